// lib.rs - Core library for the festival point-payment client

pub mod api;
pub mod app_state;
pub mod config;
pub mod errors;
pub mod http_client;
pub mod storage;
pub mod stores;
pub mod token_store;
pub mod validation;

// Re-export common types
pub use api::types::*;
pub use api::BackendApi;
pub use app_state::{AppContext, SharedAppContext, ThemeMode};
pub use config::{ClientConfig, ConfigMap, Environment};
pub use errors::{AppError, AppResult, ErrorKind};
pub use http_client::HttpClient;
pub use storage::{AppPaths, EncryptedFileStore, MemorySecureStore, SecureStore, StateStore};
pub use stores::{
    BalanceState, BalanceStore, NotificationStore, PaymentPhase, PaymentState, PaymentStore,
    PushEffect, PushKind, PushPayload, Route, SessionState, SessionStore,
};
pub use token_store::TokenStore;
pub use validation::InputValidator;
