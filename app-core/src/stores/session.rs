use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::api::types::{TokenPair, User};
use crate::api::BackendApi;
use crate::errors::{AppError, AppResult};
use crate::storage::{StateStore, SESSION_STATE_KEY};
use crate::token_store::TokenStore;
use crate::validation::InputValidator;

/// Persisted login flag and cached profile.
///
/// `is_logged_in` is reconciled against the token store once per process by
/// [`SessionStore::check_auth`]; it is never validated against the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub is_logged_in: bool,
    pub user: Option<User>,
}

#[derive(Clone)]
pub struct SessionStore {
    api: BackendApi,
    tokens: TokenStore,
    persist: StateStore,
    validator: InputValidator,
    state: Arc<RwLock<SessionState>>,
    auth_checked: Arc<OnceCell<bool>>,
}

impl SessionStore {
    /// Rehydrate from the persisted session document, if any.
    pub fn new(api: BackendApi, tokens: TokenStore, persist: StateStore) -> Self {
        let restored: SessionState = persist.load_or_default(SESSION_STATE_KEY);
        Self {
            api,
            tokens,
            persist,
            validator: InputValidator,
            state: Arc::new(RwLock::new(restored)),
            auth_checked: Arc::new(OnceCell::new()),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.read().is_logged_in
    }

    pub fn user(&self) -> Option<User> {
        self.state.read().user.clone()
    }

    /// Authenticate with credentials and load the profile.
    pub async fn login(&self, id: &str, password: &str) -> AppResult<()> {
        self.validator.validate_login_id(id)?;
        self.validator.validate_password(password)?;

        let tokens = self.api.login(id.trim(), password).await?;
        if !self.save_tokens(&tokens).await {
            return Err(AppError::StorageError(
                "Failed to persist credentials".to_string(),
            ));
        }
        log::info!("Signed in as {}", id.trim());

        self.get_profile().await;
        Ok(())
    }

    /// Persist a token pair and mark the session logged in.
    ///
    /// Returns `false` without touching state when the keychain write fails.
    pub async fn save_tokens(&self, tokens: &TokenPair) -> bool {
        if let Err(err) = self.tokens.save(tokens).await {
            log::error!("Failed to save tokens: {}", err);
            return false;
        }
        self.update(|state| state.is_logged_in = true);
        true
    }

    /// Replace the cached profile with `GET /users/me`. Failures leave state as is.
    pub async fn get_profile(&self) {
        match self.api.me().await {
            Ok(user) => self.update(|state| state.user = Some(user)),
            Err(err) => log::warn!("Profile fetch failed: {}", err),
        }
    }

    /// Clear tokens (best-effort) and reset to logged out.
    pub async fn sign_out(&self) {
        if let Err(err) = self.tokens.clear().await {
            log::warn!("Token clear failed during sign out: {}", err);
        }
        self.update(|state| *state = SessionState::default());
        log::info!("Signed out");
    }

    /// Reconcile the login flag with the token store.
    ///
    /// Only the first call reads storage; later calls return its result.
    pub async fn check_auth(&self) -> bool {
        *self
            .auth_checked
            .get_or_init(|| self.read_token_presence())
            .await
    }

    async fn read_token_presence(&self) -> bool {
        let logged_in = match self.tokens.has_complete_pair().await {
            Ok(present) => present,
            Err(err) => {
                log::error!("Auth check could not read tokens: {}", err);
                false
            }
        };

        self.update(|state| {
            state.is_logged_in = logged_in;
            if !logged_in {
                state.user = None;
            }
        });
        log::debug!("Auth check complete: logged_in={}", logged_in);
        logged_in
    }

    fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut SessionState),
    {
        let snapshot = {
            let mut state = self.state.write();
            mutate(&mut state);
            state.clone()
        };
        if let Err(err) = self.persist.save(SESSION_STATE_KEY, &snapshot) {
            log::warn!("Failed to persist session state: {}", err);
        }
    }
}
