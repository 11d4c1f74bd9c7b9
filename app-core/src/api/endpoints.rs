//! Typed wrappers over the backend REST surface.
//!
//! Paths are used verbatim; every call goes through the shared [`HttpClient`].

use std::sync::Arc;

use crate::api::types::{
    BalanceResponse, Booth, ConfirmPaymentRequest, InquiryRequest, LoginRequest, Notice, Order,
    PaymentRequest, PushTokenRequest, TokenPair, Transaction, User,
};
use crate::errors::AppResult;
use crate::http_client::HttpClient;
use crate::validation::InputValidator;

#[derive(Clone)]
pub struct BackendApi {
    http: Arc<HttpClient>,
}

impl BackendApi {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Exchange credentials for a token pair. Sent without the bearer header.
    pub async fn login(&self, id: &str, password: &str) -> AppResult<TokenPair> {
        let request = LoginRequest {
            id: id.to_string(),
            password: password.to_string(),
        };
        self.http.post_anonymous("/auth/login", &request).await
    }

    pub async fn me(&self) -> AppResult<User> {
        self.http.get("/users/me").await
    }

    pub async fn balance(&self) -> AppResult<i64> {
        let response: BalanceResponse = self.http.get("/users/me/balance").await?;
        Ok(response.points())
    }

    pub async fn payment_request(&self, token: &str) -> AppResult<PaymentRequest> {
        self.http
            .get_with_query("/payments/requests", &[("token", token)])
            .await
    }

    pub async fn confirm_payment(&self, token: &str) -> AppResult<()> {
        let request = ConfirmPaymentRequest {
            token: token.to_string(),
        };
        self.http
            .post_unit("/payments/requests/confirm", &request)
            .await
    }

    pub async fn order(&self, order_id: i64) -> AppResult<Order> {
        self.http.get(&format!("/orders/{}", order_id)).await
    }

    pub async fn register_push_token(&self, token: &str) -> AppResult<()> {
        let request = PushTokenRequest {
            token: token.to_string(),
        };
        self.http.post_unit("/users/me/push-token", &request).await
    }

    pub async fn unregister_push_token(&self) -> AppResult<()> {
        self.http.delete_unit("/users/me/push-token").await
    }

    pub async fn booths(&self) -> AppResult<Vec<Booth>> {
        self.http.get("/booths").await
    }

    pub async fn booth(&self, booth_id: i64) -> AppResult<Booth> {
        self.http.get(&format!("/booths/{}", booth_id)).await
    }

    pub async fn notices(&self) -> AppResult<Vec<Notice>> {
        self.http.get("/notices").await
    }

    pub async fn notice(&self, notice_id: i64) -> AppResult<Notice> {
        self.http.get(&format!("/notices/{}", notice_id)).await
    }

    pub async fn transactions(&self) -> AppResult<Vec<Transaction>> {
        self.http.get("/users/me/transactions").await
    }

    /// Validated locally before anything is sent.
    pub async fn submit_inquiry(&self, inquiry: &InquiryRequest) -> AppResult<()> {
        InputValidator.validate_inquiry(&inquiry.title, &inquiry.content)?;
        self.http.post_unit("/inquiries", inquiry).await
    }
}
