use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::api::BackendApi;
use crate::config::ClientConfig;
use crate::errors::AppResult;
use crate::http_client::HttpClient;
use crate::storage::{
    AppPaths, EncryptedFileStore, MemorySecureStore, SecureStore, StateStore,
    PREFERENCES_STATE_KEY,
};
use crate::stores::{BalanceStore, NotificationStore, PaymentStore, SessionStore};
use crate::token_store::TokenStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    System,
    Light,
    Dark,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Preferences {
    #[serde(default)]
    theme: ThemeMode,
}

/// Everything the client needs, built once at startup and shared by reference.
pub struct AppContext {
    config: ClientConfig,
    paths: Option<AppPaths>,
    state_store: StateStore,
    preferences: RwLock<Preferences>,
    api: BackendApi,
    session: SessionStore,
    balance: BalanceStore,
    payment: PaymentStore,
    notifications: NotificationStore,
}

impl AppContext {
    /// Build the context, backed by disk when `config.data_dir` is set.
    pub fn initialize(config: ClientConfig) -> AppResult<Self> {
        let Some(root) = config.data_dir.clone() else {
            return Self::in_memory(config);
        };

        let paths = AppPaths::new(&root)?;
        paths.ensure_directories()?;
        let secure = EncryptedFileStore::open(paths.secure_store_file(), &config.device_secret)?;
        let state_store = StateStore::from_paths(&paths);

        log::info!(
            "Initializing client ({:?}) against {} with data in {}",
            config.environment,
            config.api_base_url,
            paths.root_dir().display()
        );
        let mut context = Self::with_stores(config, Arc::new(secure), state_store)?;
        context.paths = Some(paths);
        Ok(context)
    }

    /// Same graph with nothing written to disk.
    pub fn in_memory(config: ClientConfig) -> AppResult<Self> {
        Self::with_stores(
            config,
            Arc::new(MemorySecureStore::new()),
            StateStore::disabled(),
        )
    }

    pub fn with_stores(
        config: ClientConfig,
        secure: Arc<dyn SecureStore>,
        state_store: StateStore,
    ) -> AppResult<Self> {
        let tokens = TokenStore::new(secure);
        let http = HttpClient::new(&config, tokens.clone())?;
        let api = BackendApi::new(Arc::new(http));

        let session = SessionStore::new(api.clone(), tokens, state_store.clone());
        let balance = BalanceStore::new(api.clone());
        let payment = PaymentStore::new(api.clone(), balance.clone());
        let notifications = NotificationStore::new(api.clone(), balance.clone());
        let preferences = state_store.load_or_default(PREFERENCES_STATE_KEY);

        Ok(Self {
            config,
            paths: None,
            state_store,
            preferences: RwLock::new(preferences),
            api,
            session,
            balance,
            payment,
            notifications,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn paths(&self) -> Option<&AppPaths> {
        self.paths.as_ref()
    }

    pub fn api(&self) -> &BackendApi {
        &self.api
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn balance(&self) -> &BalanceStore {
        &self.balance
    }

    pub fn payment(&self) -> &PaymentStore {
        &self.payment
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    /// Startup: reconcile the login flag and warm the profile and balance.
    pub async fn restore_session(&self) -> bool {
        if !self.session.check_auth().await {
            return false;
        }
        self.session.get_profile().await;
        self.balance.fetch_balance().await;
        true
    }

    /// Unregister push delivery, drop credentials and forget per-user caches.
    pub async fn sign_out(&self) {
        if self.notifications.push_token().is_some() {
            if let Err(err) = self.notifications.unregister().await {
                log::warn!("Push unregister failed during sign out: {}", err);
            }
        }
        self.session.sign_out().await;
        self.balance.clear();
        self.payment.reset_state();
    }

    pub fn theme(&self) -> ThemeMode {
        self.preferences.read().theme
    }

    pub fn set_theme(&self, theme: ThemeMode) -> AppResult<()> {
        let snapshot = {
            let mut preferences = self.preferences.write();
            preferences.theme = theme;
            preferences.clone()
        };
        self.state_store.save(PREFERENCES_STATE_KEY, &snapshot)
    }
}

/// Context handle shared between the shell and background tasks.
pub type SharedAppContext = Arc<AppContext>;
