use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use blake3::Hasher as Blake3;
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::errors::{AppError, AppResult};

const STORE_MAGIC: &[u8; 8] = b"FESTSECR";
const STORE_VERSION: u16 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Encrypted key-value slot for credentials, modelled on platform keychains.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> AppResult<()>;
    async fn delete(&self, key: &str) -> AppResult<()>;
}

/// Argon2id cost parameters recorded in the store header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParameters {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
    salt: [u8; SALT_LEN],
}

impl Default for KdfParameters {
    fn default() -> Self {
        Self {
            m_cost_kib: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
            salt: [0u8; SALT_LEN],
        }
    }
}

impl KdfParameters {
    /// Minimal cost, for tests and low-end devices where the secret is already high entropy.
    pub fn low_cost() -> Self {
        Self {
            m_cost_kib: 8,
            t_cost: 1,
            p_cost: 1,
            salt: [0u8; SALT_LEN],
        }
    }

    fn with_random_salt(mut self) -> Self {
        OsRng.fill_bytes(&mut self.salt);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    magic: [u8; 8],
    version: u16,
    nonce: [u8; NONCE_LEN],
    kdf: KdfParameters,
    checksum: [u8; 32],
    ciphertext: Vec<u8>,
}

/// File-backed [`SecureStore`]: AES-256-GCM over a JSON map, key derived from a device secret.
///
/// File I/O runs on the blocking pool; writes are serialized by `io_lock`.
pub struct EncryptedFileStore {
    core: Arc<StoreCore>,
}

struct StoreCore {
    path: PathBuf,
    kdf: KdfParameters,
    key: Zeroizing<[u8; KEY_LEN]>,
    io_lock: Mutex<()>,
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.core.path)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileStore {
    pub fn open(path: impl AsRef<Path>, device_secret: &SecretString) -> AppResult<Self> {
        Self::open_with_params(path, device_secret, KdfParameters::default())
    }

    /// Open an existing store, or prepare a new one using `params` for its key derivation.
    /// An existing file keeps the parameters it was written with.
    pub fn open_with_params(
        path: impl AsRef<Path>,
        device_secret: &SecretString,
        params: KdfParameters,
    ) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();

        let existing = if path.exists() {
            Some(read_store_file(&path)?)
        } else {
            None
        };
        let kdf = match &existing {
            Some(file) => file.kdf.clone(),
            None => params.with_random_salt(),
        };
        let key = derive_key(device_secret, &kdf)?;

        let core = StoreCore {
            path,
            kdf,
            key,
            io_lock: Mutex::new(()),
        };

        // Wrong device secret surfaces here instead of on the first token read.
        if let Some(file) = existing {
            core.decrypt_entries(&file)?;
        }
        Ok(Self {
            core: Arc::new(core),
        })
    }

    pub fn path(&self) -> &Path {
        &self.core.path
    }

    async fn run<T, F>(&self, op: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreCore) -> AppResult<T> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        tokio::task::spawn_blocking(move || op(&core))
            .await
            .map_err(|e| AppError::StorageError(format!("Secure store task failed: {}", e)))?
    }
}

impl StoreCore {
    fn load_entries(&self) -> AppResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let file = read_store_file(&self.path)?;
        self.decrypt_entries(&file)
    }

    fn decrypt_entries(&self, file: &StoreFile) -> AppResult<BTreeMap<String, String>> {
        let nonce = Nonce::assume_unique_for_key(file.nonce);
        let plaintext = decrypt_aes_gcm(&self.key, nonce, &file.ciphertext)?;
        if blake3_checksum(&plaintext) != file.checksum {
            return Err(AppError::ValidationError(
                "Secure store integrity verification failed".to_string(),
            ));
        }
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn persist_entries(&self, entries: &BTreeMap<String, String>) -> AppResult<()> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let plaintext = Zeroizing::new(serde_json::to_vec(entries)?);
        let checksum = blake3_checksum(&plaintext);
        let ciphertext = encrypt_aes_gcm(
            &self.key,
            Nonce::assume_unique_for_key(nonce_bytes),
            &plaintext,
        )?;

        let file = StoreFile {
            magic: *STORE_MAGIC,
            version: STORE_VERSION,
            nonce: nonce_bytes,
            kdf: self.kdf.clone(),
            checksum,
            ciphertext,
        };
        let serialized = serde_json::to_vec(&file)?;
        write_atomic(&self.path, &serialized)
    }

    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let _guard = self.io_lock.lock();
        let mut entries = self.load_entries()?;
        Ok(entries.remove(key))
    }

    fn mutate<F>(&self, op: F) -> AppResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.io_lock.lock();
        let mut entries = self.load_entries()?;
        if op(&mut entries) {
            self.persist_entries(&entries)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SecureStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let key = key.to_string();
        self.run(move |core| core.get(&key)).await
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let key = key.to_string();
        let value = Zeroizing::new(value.to_string());
        self.run(move |core| {
            core.mutate(|entries| {
                entries.insert(key, value.to_string());
                true
            })
        })
        .await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let key = key.to_string();
        self.run(move |core| core.mutate(|entries| entries.remove(&key).is_some()))
            .await
    }
}

/// In-process [`SecureStore`] for tests and shells without persistent storage.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

fn read_store_file(path: &Path) -> AppResult<StoreFile> {
    let bytes = fs::read(path)?;
    let file: StoreFile = serde_json::from_slice(&bytes)?;

    if &file.magic != STORE_MAGIC {
        return Err(AppError::ValidationError(
            "Invalid secure store magic marker".to_string(),
        ));
    }
    if file.version != STORE_VERSION {
        return Err(AppError::ValidationError(format!(
            "Unsupported secure store version: {}",
            file.version
        )));
    }
    Ok(file)
}

fn derive_key(secret: &SecretString, params: &KdfParameters) -> AppResult<Zeroizing<[u8; KEY_LEN]>> {
    let argon_params = Params::new(params.m_cost_kib, params.t_cost, params.p_cost, Some(KEY_LEN))
        .map_err(|e| AppError::CryptoError(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(secret.expose_secret().as_bytes(), &params.salt, key.as_mut())
        .map_err(|e| AppError::CryptoError(format!("KDF failed: {e}")))?;
    Ok(key)
}

fn encrypt_aes_gcm(key: &[u8; KEY_LEN], nonce: Nonce, plaintext: &[u8]) -> AppResult<Vec<u8>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|e| AppError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| AppError::CryptoError("Encryption failure".to_string()))?;
    Ok(in_out)
}

fn decrypt_aes_gcm(
    key: &[u8; KEY_LEN],
    nonce: Nonce,
    ciphertext: &[u8],
) -> AppResult<Zeroizing<Vec<u8>>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|e| AppError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(AppError::CryptoError(
            "Ciphertext shorter than authentication tag".to_string(),
        ));
    }

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| AppError::CryptoError("Decryption failure".to_string()))?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

pub(crate) fn blake3_checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake3::new();
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Write via a sibling temp file and rename so readers never observe a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::StorageError(format!("Invalid path: {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let tmp_path = path.with_extension("new");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn open(path: &Path, device: &str) -> AppResult<EncryptedFileStore> {
        EncryptedFileStore::open_with_params(path, &secret(device), KdfParameters::low_cost())
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secure.store");

        let store = open(&path, "device-a").unwrap();
        assert_eq!(store.get("access_token").await.unwrap(), None);
        store.set("access_token", "A1").await.unwrap();
        store.set("refresh_token", "R1").await.unwrap();

        let reopened = open(&path, "device-a").unwrap();
        assert_eq!(
            reopened.get("access_token").await.unwrap().as_deref(),
            Some("A1")
        );
        reopened.delete("access_token").await.unwrap();
        assert_eq!(reopened.get("access_token").await.unwrap(), None);
        assert_eq!(
            reopened.get("refresh_token").await.unwrap().as_deref(),
            Some("R1")
        );
    }

    #[tokio::test]
    async fn plaintext_never_hits_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secure.store");
        let store = open(&path, "device-a").unwrap();
        store.set("access_token", "very-secret-token").await.unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("very-secret-token"));
    }

    #[tokio::test]
    async fn wrong_device_secret_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secure.store");
        open(&path, "device-a")
            .unwrap()
            .set("access_token", "A1")
            .await
            .unwrap();

        let err = open(&path, "device-b").unwrap_err();
        assert!(matches!(err, AppError::CryptoError(_)));
    }

    #[tokio::test]
    async fn deleting_missing_key_does_not_create_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secure.store");
        let store = open(&path, "device-a").unwrap();
        store.delete("refresh_token").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writes_are_all_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secure.store");
        let store = Arc::new(open(&path, "device-a").unwrap());

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.set(&format!("slot-{}", i), "v").await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let reopened = open(&path, "device-a").unwrap();
        for i in 0..8 {
            assert_eq!(
                reopened.get(&format!("slot-{}", i)).await.unwrap().as_deref(),
                Some("v")
            );
        }
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySecureStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
