//! Observable client state built on top of [`BackendApi`](crate::api::BackendApi).
//!
//! Every store is a cheap `Clone` handle over shared state; readers take
//! snapshots, writers go through the async operations.

pub mod balance;
pub mod notification;
pub mod payment;
pub mod session;

pub use balance::{BalanceState, BalanceStore};
pub use notification::{NotificationStore, PushEffect, PushKind, PushPayload, Route};
pub use payment::{PaymentPhase, PaymentState, PaymentStore};
pub use session::{SessionState, SessionStore};
