pub mod paths;
pub mod secure;
pub mod state;

pub use paths::AppPaths;
pub use secure::{EncryptedFileStore, KdfParameters, MemorySecureStore, SecureStore};
pub use state::{StateStore, PREFERENCES_STATE_KEY, SESSION_STATE_KEY};
