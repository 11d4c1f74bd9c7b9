use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::api::types::TokenPair;
use crate::errors::AppResult;
use crate::storage::SecureStore;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Sole owner of the access/refresh token slots.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn SecureStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store }
    }

    pub async fn access_token(&self) -> AppResult<Option<SecretString>> {
        self.read(ACCESS_TOKEN_KEY).await
    }

    pub async fn refresh_token(&self) -> AppResult<Option<SecretString>> {
        self.read(REFRESH_TOKEN_KEY).await
    }

    /// Store both tokens. If the refresh slot cannot be written the previous
    /// access token is put back, so the slots never hold halves of two pairs.
    pub async fn save(&self, tokens: &TokenPair) -> AppResult<()> {
        let previous_access = self.store.get(ACCESS_TOKEN_KEY).await?;
        self.store
            .set(ACCESS_TOKEN_KEY, &tokens.access_token)
            .await?;

        if let Err(err) = self
            .store
            .set(REFRESH_TOKEN_KEY, &tokens.refresh_token)
            .await
        {
            let restored = match previous_access {
                Some(previous) => self.store.set(ACCESS_TOKEN_KEY, &previous).await,
                None => self.store.delete(ACCESS_TOKEN_KEY).await,
            };
            if let Err(restore_err) = restored {
                log::error!("Failed to restore access token after partial save: {}", restore_err);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Delete both slots. The refresh slot is attempted even if the access slot fails.
    pub async fn clear(&self) -> AppResult<()> {
        let access = self.store.delete(ACCESS_TOKEN_KEY).await;
        let refresh = self.store.delete(REFRESH_TOKEN_KEY).await;
        access.and(refresh)
    }

    /// Both tokens present and non-empty.
    pub async fn has_complete_pair(&self) -> AppResult<bool> {
        let access = self.access_token().await?;
        let refresh = self.refresh_token().await?;
        Ok(access.is_some() && refresh.is_some())
    }

    async fn read(&self, key: &str) -> AppResult<Option<SecretString>> {
        Ok(self
            .store
            .get(key)
            .await?
            .filter(|value| !value.is_empty())
            .map(SecretString::from))
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenStore")
    }
}

pub(crate) fn bearer(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}
