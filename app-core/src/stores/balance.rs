use parking_lot::RwLock;
use std::sync::Arc;

use crate::api::BackendApi;
use crate::errors::AppError;

#[derive(Debug, Clone, Default)]
pub struct BalanceState {
    /// `None` until the first successful fetch of this process.
    pub balance: Option<i64>,
    pub is_loading: bool,
    pub error: Option<AppError>,
}

/// Cached point balance: fetched once, replaced only by an explicit refresh.
#[derive(Clone)]
pub struct BalanceStore {
    api: BackendApi,
    state: Arc<RwLock<BalanceState>>,
}

impl BalanceStore {
    pub fn new(api: BackendApi) -> Self {
        Self {
            api,
            state: Arc::new(RwLock::new(BalanceState::default())),
        }
    }

    pub fn snapshot(&self) -> BalanceState {
        self.state.read().clone()
    }

    pub fn balance(&self) -> Option<i64> {
        self.state.read().balance
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().is_loading
    }

    /// Fetch unless a value is cached or a fetch is already running.
    pub async fn fetch_balance(&self) {
        {
            let mut state = self.state.write();
            if state.is_loading || state.balance.is_some() {
                return;
            }
            state.is_loading = true;
        }
        self.load().await;
    }

    /// Fetch regardless of cache or in-flight state; the last response wins.
    pub async fn refresh_balance(&self) {
        self.state.write().is_loading = true;
        self.load().await;
    }

    /// Forget the cached value, e.g. when the user signs out.
    pub fn clear(&self) {
        *self.state.write() = BalanceState::default();
    }

    async fn load(&self) {
        let result = self.api.balance().await;

        let mut state = self.state.write();
        state.is_loading = false;
        match result {
            Ok(points) => {
                state.balance = Some(points);
                state.error = None;
            }
            Err(err) => {
                log::warn!("Balance fetch failed: {}", err);
                state.error = Some(err);
            }
        }
    }
}
