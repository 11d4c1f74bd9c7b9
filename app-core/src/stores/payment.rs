use parking_lot::RwLock;
use std::sync::Arc;

use crate::api::types::{Order, PaymentRequest};
use crate::api::BackendApi;
use crate::errors::{AppError, AppResult};
use crate::stores::balance::BalanceStore;
use crate::validation::InputValidator;

pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
pub const ORDER_NOT_PENDING: &str = "ORDER_NOT_PENDING";

pub const LOAD_FAILED_MESSAGE: &str = "결제 정보를 불러오지 못했습니다";
pub const INSUFFICIENT_BALANCE_MESSAGE: &str = "잔액이 부족합니다";
pub const ORDER_NOT_PENDING_MESSAGE: &str = "이미 처리되었거나 취소된 주문입니다";
pub const PAYMENT_FAILED_MESSAGE: &str = "결제에 실패했습니다. 다시 시도해주세요";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentPhase {
    #[default]
    Idle,
    Loading,
    Ready,
    Confirming,
    Success,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentState {
    pub phase: PaymentPhase,
    pub payment_request: Option<PaymentRequest>,
    pub order: Option<Order>,
    pub loading: bool,
    pub confirming: bool,
    pub error: Option<String>,
    // Bumped on every reset so a stale load or confirm cannot touch a newer flow.
    generation: u64,
}

/// One scanned payment at a time: load the request and order, then confirm.
#[derive(Clone)]
pub struct PaymentStore {
    api: BackendApi,
    balance: BalanceStore,
    validator: InputValidator,
    state: Arc<RwLock<PaymentState>>,
}

impl PaymentStore {
    pub fn new(api: BackendApi, balance: BalanceStore) -> Self {
        Self {
            api,
            balance,
            validator: InputValidator,
            state: Arc::new(RwLock::new(PaymentState::default())),
        }
    }

    pub fn snapshot(&self) -> PaymentState {
        self.state.read().clone()
    }

    pub fn phase(&self) -> PaymentPhase {
        self.state.read().phase
    }

    /// Replace any current flow with the one behind `token`.
    ///
    /// Returns `true` when both the request and its order were loaded.
    pub async fn load(&self, token: &str) -> bool {
        let generation = {
            let mut state = self.state.write();
            let generation = state.generation.wrapping_add(1);
            *state = PaymentState {
                phase: PaymentPhase::Loading,
                loading: true,
                generation,
                ..PaymentState::default()
            };
            generation
        };

        let result = self.fetch(token).await;

        let mut state = self.state.write();
        if state.generation != generation {
            log::debug!("Discarding payment load superseded by a newer flow");
            return false;
        }
        state.loading = false;
        match result {
            Ok((request, order)) => {
                state.payment_request = Some(request);
                state.order = Some(order);
                state.phase = PaymentPhase::Ready;
                true
            }
            Err(err) => {
                log::warn!("Payment load failed: {}", err);
                state.error = Some(LOAD_FAILED_MESSAGE.to_string());
                state.phase = PaymentPhase::Error;
                false
            }
        }
    }

    /// Confirm the payment behind `token`. Ignored while a confirm is running.
    pub async fn confirm(&self, token: &str) -> bool {
        let guard = {
            let mut state = self.state.write();
            if state.confirming {
                log::debug!("Confirm ignored: already confirming");
                return false;
            }
            state.confirming = true;
            state.error = None;
            state.phase = PaymentPhase::Confirming;
            ConfirmingGuard {
                state: Arc::clone(&self.state),
                generation: state.generation,
            }
        };

        let result = self.api.confirm_payment(token).await;

        let refresh = match &result {
            Ok(()) => {
                log::info!("Payment confirmed");
                self.finish(guard, PaymentPhase::Success, None);
                true
            }
            Err(err) => {
                log::warn!("Payment confirm failed: {}", err);
                self.finish(guard, PaymentPhase::Error, Some(confirm_error_message(err)));
                err.business_code() == Some(INSUFFICIENT_BALANCE)
            }
        };

        if refresh {
            self.balance.refresh_balance().await;
        }
        result.is_ok()
    }

    /// Return to the initial state, abandoning any in-flight load.
    pub fn reset_state(&self) {
        let mut state = self.state.write();
        let generation = state.generation.wrapping_add(1);
        *state = PaymentState {
            generation,
            ..PaymentState::default()
        };
    }

    async fn fetch(&self, token: &str) -> AppResult<(PaymentRequest, Order)> {
        self.validator.validate_payment_token(token)?;
        let request = self.api.payment_request(token).await?;
        let order = self.api.order(request.order_id).await?;
        Ok((request, order))
    }

    fn finish(&self, guard: ConfirmingGuard, phase: PaymentPhase, error: Option<String>) {
        {
            let mut state = self.state.write();
            if state.generation != guard.generation {
                log::debug!("Discarding confirm result superseded by a newer flow");
                return;
            }
            state.phase = phase;
            state.error = error;
        }
        drop(guard);
    }
}

fn confirm_error_message(err: &AppError) -> String {
    match err.business_code() {
        Some(INSUFFICIENT_BALANCE) => INSUFFICIENT_BALANCE_MESSAGE,
        Some(ORDER_NOT_PENDING) => ORDER_NOT_PENDING_MESSAGE,
        _ => PAYMENT_FAILED_MESSAGE,
    }
    .to_string()
}

/// Clears `confirming` however the confirm future ends, including cancellation.
/// A guard from a flow that has since been reset leaves the newer flow alone.
struct ConfirmingGuard {
    state: Arc<RwLock<PaymentState>>,
    generation: u64,
}

impl Drop for ConfirmingGuard {
    fn drop(&mut self) {
        let mut state = self.state.write();
        if state.generation != self.generation {
            return;
        }
        state.confirming = false;
        if state.phase == PaymentPhase::Confirming {
            state.phase = if state.order.is_some() {
                PaymentPhase::Ready
            } else {
                PaymentPhase::Idle
            };
        }
    }
}
