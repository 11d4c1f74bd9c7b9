use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::BackendApi;
use crate::errors::AppResult;
use crate::stores::balance::BalanceStore;
use crate::validation::InputValidator;

/// Push categories sent by the backend in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushKind {
    PaymentRequestCompleted,
    OrderCompleted,
    PointCharged,
    Notice,
    #[serde(other)]
    Unknown,
}

impl PushKind {
    /// Kinds that imply the point balance changed server-side.
    pub fn affects_balance(self) -> bool {
        matches!(
            self,
            PushKind::PaymentRequestCompleted | PushKind::OrderCompleted | PushKind::PointCharged
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    #[serde(rename = "type")]
    pub kind: PushKind,
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub notice_id: Option<i64>,
}

impl PushPayload {
    pub fn new(kind: PushKind) -> Self {
        Self {
            kind,
            order_id: None,
            notice_id: None,
        }
    }

    /// Parse the `data` object of a delivered notification.
    pub fn from_json(raw: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn route(&self) -> Option<Route> {
        match self.kind {
            PushKind::PaymentRequestCompleted | PushKind::OrderCompleted => Some(
                self.order_id
                    .map(Route::OrderDetail)
                    .unwrap_or(Route::Transactions),
            ),
            PushKind::PointCharged => Some(Route::Transactions),
            PushKind::Notice => self.notice_id.map(Route::NoticeDetail),
            PushKind::Unknown => None,
        }
    }
}

/// Screen a shell should open when the user taps a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Transactions,
    OrderDetail(i64),
    NoticeDetail(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushEffect {
    pub balance_refreshed: bool,
    pub route: Option<Route>,
}

#[derive(Debug, Default)]
struct NotificationState {
    push_token: Option<String>,
}

/// Device push registration and handling of delivered pushes.
#[derive(Clone)]
pub struct NotificationStore {
    api: BackendApi,
    balance: BalanceStore,
    validator: InputValidator,
    state: Arc<RwLock<NotificationState>>,
}

impl NotificationStore {
    pub fn new(api: BackendApi, balance: BalanceStore) -> Self {
        Self {
            api,
            balance,
            validator: InputValidator,
            state: Arc::new(RwLock::new(NotificationState::default())),
        }
    }

    pub fn push_token(&self) -> Option<String> {
        self.state.read().push_token.clone()
    }

    pub async fn register(&self, push_token: &str) -> AppResult<()> {
        self.validator.validate_push_token(push_token)?;
        self.api.register_push_token(push_token).await?;
        self.state.write().push_token = Some(push_token.to_string());
        log::info!("Push token registered");
        Ok(())
    }

    pub async fn unregister(&self) -> AppResult<()> {
        let result = self.api.unregister_push_token().await;
        if result.is_ok() {
            self.state.write().push_token = None;
            log::info!("Push token unregistered");
        }
        result
    }

    /// Apply a delivered push: refresh the balance when points moved.
    pub async fn handle_push(&self, payload: &PushPayload) -> PushEffect {
        log::debug!("Push received: {:?}", payload.kind);

        let balance_refreshed = payload.kind.affects_balance();
        if balance_refreshed {
            self.balance.refresh_balance().await;
        }

        PushEffect {
            balance_refreshed,
            route: payload.route(),
        }
    }

    /// Drain `pushes` until the sender side closes, forwarding routes to `routes`.
    pub fn spawn_listener(
        &self,
        mut pushes: mpsc::Receiver<PushPayload>,
        routes: Option<mpsc::UnboundedSender<Route>>,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            while let Some(payload) = pushes.recv().await {
                let effect = store.handle_push(&payload).await;
                if let (Some(route), Some(tx)) = (effect.route, routes.as_ref()) {
                    if tx.send(route).is_err() {
                        log::debug!("Route receiver dropped; discarding {:?}", route);
                    }
                }
            }
            log::debug!("Push listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::test_support::{api_with_tokens, memory_tokens};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "ExponentPushToken[xxxxxxxxxxxxxxxxxxxxxx]";

    fn stores_for(server: &MockServer) -> (NotificationStore, BalanceStore) {
        let api = api_with_tokens(server, memory_tokens());
        let balance = BalanceStore::new(api.clone());
        (NotificationStore::new(api, balance.clone()), balance)
    }

    async fn mount_balance(server: &MockServer, points: i64, times: u64) {
        Mock::given(method("GET"))
            .and(path("/users/me/balance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(points)))
            .expect(times)
            .mount(server)
            .await;
    }

    #[test]
    fn payload_parsing() {
        let payload =
            PushPayload::from_json(r#"{"type":"ORDER_COMPLETED","orderId":42}"#).unwrap();
        assert_eq!(payload.kind, PushKind::OrderCompleted);
        assert_eq!(payload.route(), Some(Route::OrderDetail(42)));

        let unknown = PushPayload::from_json(r#"{"type":"MARKETING"}"#).unwrap();
        assert_eq!(unknown.kind, PushKind::Unknown);
        assert_eq!(unknown.route(), None);

        assert!(PushPayload::from_json("not json").is_err());
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/me/push-token"))
            .and(body_json(json!({ "token": TOKEN })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/users/me/push-token"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (notifications, _) = stores_for(&server);
        notifications.register(TOKEN).await.unwrap();
        assert_eq!(notifications.push_token().as_deref(), Some(TOKEN));

        notifications.unregister().await.unwrap();
        assert!(notifications.push_token().is_none());
    }

    #[tokio::test]
    async fn invalid_push_token_rejected() {
        let server = MockServer::start().await;
        let (notifications, _) = stores_for(&server);
        assert!(notifications.register("bad").await.is_err());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn balance_kinds_refresh_even_when_cached() {
        let server = MockServer::start().await;
        mount_balance(&server, 12000, 3).await;

        let (notifications, balance) = stores_for(&server);
        for kind in [
            PushKind::PaymentRequestCompleted,
            PushKind::OrderCompleted,
            PushKind::PointCharged,
        ] {
            let effect = notifications.handle_push(&PushPayload::new(kind)).await;
            assert!(effect.balance_refreshed);
        }
        assert_eq!(balance.balance(), Some(12000));
    }

    #[tokio::test]
    async fn other_kinds_leave_balance_alone() {
        let server = MockServer::start().await;
        mount_balance(&server, 0, 0).await;

        let (notifications, _) = stores_for(&server);
        let notice = PushPayload {
            notice_id: Some(9),
            ..PushPayload::new(PushKind::Notice)
        };
        let effect = notifications.handle_push(&notice).await;
        assert!(!effect.balance_refreshed);
        assert_eq!(effect.route, Some(Route::NoticeDetail(9)));

        let effect = notifications
            .handle_push(&PushPayload::new(PushKind::Unknown))
            .await;
        assert_eq!(
            effect,
            PushEffect {
                balance_refreshed: false,
                route: None
            }
        );
    }

    #[tokio::test]
    async fn listener_forwards_routes() {
        let server = MockServer::start().await;
        mount_balance(&server, 500, 1).await;

        let (notifications, balance) = stores_for(&server);
        let (push_tx, push_rx) = mpsc::channel(4);
        let (route_tx, mut route_rx) = mpsc::unbounded_channel();
        let handle = notifications.spawn_listener(push_rx, Some(route_tx));

        push_tx
            .send(PushPayload::new(PushKind::PointCharged))
            .await
            .unwrap();
        drop(push_tx);
        handle.await.unwrap();

        assert_eq!(route_rx.recv().await, Some(Route::Transactions));
        assert_eq!(balance.balance(), Some(500));
    }
}
