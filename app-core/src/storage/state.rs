use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::secure::{blake3_checksum, write_atomic};
use super::AppPaths;
use crate::errors::{AppError, AppResult};

const STATE_VERSION: u16 = 1;

/// Key under which the session flags are persisted.
pub const SESSION_STATE_KEY: &str = "festival-points.session";
/// Key under which UI preferences are persisted.
pub const PREFERENCES_STATE_KEY: &str = "festival-points.preferences";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateEnvelope {
    version: u16,
    key: String,
    checksum: [u8; 32],
    payload: serde_json::Value,
    modified_at: DateTime<Utc>,
}

/// Durable, non-secret documents stored one file per namespaced key.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: Option<PathBuf>,
}

impl StateStore {
    pub fn from_paths(paths: &AppPaths) -> Self {
        Self::new(paths.state_dir())
    }

    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    /// Store that remembers nothing across loads.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let Some(path) = self.path_for(key)? else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path)?;
        let envelope: StateEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != STATE_VERSION {
            return Err(AppError::ValidationError(format!(
                "Unsupported state version {} for {}",
                envelope.version, key
            )));
        }
        if envelope.key != key || checksum(&envelope.payload)? != envelope.checksum {
            return Err(AppError::ValidationError(format!(
                "State integrity verification failed for {}",
                key
            )));
        }

        Ok(Some(serde_json::from_value(envelope.payload)?))
    }

    /// Load `key`, falling back to `T::default()` when absent or unreadable.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.load(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(err) => {
                log::warn!("Discarding unreadable state {}: {}", key, err);
                T::default()
            }
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let Some(path) = self.path_for(key)? else {
            return Ok(());
        };

        let payload = serde_json::to_value(value)?;
        let envelope = StateEnvelope {
            version: STATE_VERSION,
            key: key.to_string(),
            checksum: checksum(&payload)?,
            payload,
            modified_at: Utc::now(),
        };
        write_atomic(&path, &serde_json::to_vec_pretty(&envelope)?)
    }

    pub fn remove(&self, key: &str) -> AppResult<()> {
        if let Some(path) = self.path_for(key)? {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn path_for(&self, key: &str) -> AppResult<Option<PathBuf>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(AppError::ValidationError(format!(
                "Invalid state key '{}'",
                key
            )));
        }
        Ok(Some(dir.join(format!("{}.json", key))))
    }
}

fn checksum(payload: &serde_json::Value) -> AppResult<[u8; 32]> {
    Ok(blake3_checksum(&serde_json::to_vec(payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Flags {
        enabled: bool,
        name: Option<String>,
    }

    #[test]
    fn save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path());

        assert_eq!(store.load::<Flags>(SESSION_STATE_KEY).unwrap(), None);
        let flags = Flags {
            enabled: true,
            name: Some("festa".into()),
        };
        store.save(SESSION_STATE_KEY, &flags).unwrap();
        assert_eq!(store.load::<Flags>(SESSION_STATE_KEY).unwrap(), Some(flags));

        store.remove(SESSION_STATE_KEY).unwrap();
        assert_eq!(store.load::<Flags>(SESSION_STATE_KEY).unwrap(), None);
    }

    #[test]
    fn tampered_state_detected() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path());
        store
            .save(
                PREFERENCES_STATE_KEY,
                &Flags {
                    enabled: false,
                    name: None,
                },
            )
            .unwrap();

        let path = temp.path().join(format!("{}.json", PREFERENCES_STATE_KEY));
        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("\"enabled\": false", "\"enabled\": true")).unwrap();

        assert!(matches!(
            store.load::<Flags>(PREFERENCES_STATE_KEY),
            Err(AppError::ValidationError(_))
        ));
        assert_eq!(
            store.load_or_default::<Flags>(PREFERENCES_STATE_KEY),
            Flags::default()
        );
    }

    #[test]
    fn rejects_path_like_keys() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path());
        assert!(store.save("../escape", &Flags::default()).is_err());
    }

    #[test]
    fn disabled_store_is_inert() {
        let store = StateStore::disabled();
        store.save(SESSION_STATE_KEY, &Flags::default()).unwrap();
        assert_eq!(store.load::<Flags>(SESSION_STATE_KEY).unwrap(), None);
    }
}
