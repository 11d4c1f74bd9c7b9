//! Authenticated HTTP client for the festival backend
//!
//! Every backend call goes through [`HttpClient`]. It attaches the stored access token
//! as a bearer credential and recovers from a 401 by refreshing the token pair once
//! and replaying the request.

use crate::api::types::{ErrorBody, RefreshRequest, TokenPair};
use crate::config::ClientConfig;
use crate::errors::{AppError, AppResult};
use crate::token_store::{bearer, TokenStore};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const REFRESH_PATH: &str = "/auth/refresh";

/// Per-call state threaded through the retry loop.
#[derive(Debug)]
struct RequestAttempt {
    id: Uuid,
    retried: bool,
}

impl RequestAttempt {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            retried: false,
        }
    }
}

/// One outbound call: method, path, optional query and JSON body.
struct Call<'a> {
    method: Method,
    path: &'a str,
    query: &'a [(&'a str, &'a str)],
    body: Option<serde_json::Value>,
}

pub struct HttpClient {
    client: Client,
    base_url: String,
    tokens: TokenStore,
    // Held while a refresh is in flight; late arrivals reuse the rotated token.
    refresh_gate: Mutex<()>,
    log_bodies: bool,
}

impl HttpClient {
    pub fn new(config: &ClientConfig, tokens: TokenStore) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpClient {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            tokens,
            refresh_gate: Mutex::new(()),
            log_bodies: config.log_http_bodies,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Issue an authenticated request and decode the JSON response.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> AppResult<T> {
        let call = Call {
            method,
            path,
            query: &[],
            body,
        };
        let response = self.execute(call).await?;
        Ok(response.json().await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        self.request(Method::GET, path, None).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AppResult<T> {
        let call = Call {
            method: Method::GET,
            path,
            query,
            body: None,
        };
        let response = self.execute(call).await?;
        Ok(response.json().await?)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> AppResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(serde_json::to_value(body)?))
            .await
    }

    /// POST whose response body is ignored.
    pub async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> AppResult<()> {
        let call = Call {
            method: Method::POST,
            path,
            query: &[],
            body: Some(serde_json::to_value(body)?),
        };
        self.execute(call).await.map(|_| ())
    }

    pub async fn delete_unit(&self, path: &str) -> AppResult<()> {
        let call = Call {
            method: Method::DELETE,
            path,
            query: &[],
            body: None,
        };
        self.execute(call).await.map(|_| ())
    }

    /// POST without credentials and without 401 recovery, for the login endpoint.
    pub async fn post_anonymous<B, T>(&self, path: &str, body: &B) -> AppResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let attempt = RequestAttempt::new();
        let call = Call {
            method: Method::POST,
            path,
            query: &[],
            body: Some(serde_json::to_value(body)?),
        };
        let response = self.send(&call, None, &attempt).await?;
        if !response.status().is_success() {
            return Err(self.error_from(response, &attempt).await);
        }
        Ok(response.json().await?)
    }

    async fn execute(&self, call: Call<'_>) -> AppResult<Response> {
        let mut attempt = RequestAttempt::new();

        loop {
            let sent_token = self.current_access_token().await;
            let response = self.send(&call, sent_token.as_ref(), &attempt).await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let error = self.error_from(response, &attempt).await;
            if status == StatusCode::UNAUTHORIZED && !attempt.retried {
                attempt.retried = true;
                if self.recover_session(sent_token.as_ref(), &attempt).await {
                    log::debug!("Replaying {} {} [{}]", call.method, call.path, attempt.id);
                    continue;
                }
            }
            return Err(error);
        }
    }

    async fn send(
        &self,
        call: &Call<'_>,
        token: Option<&SecretString>,
        attempt: &RequestAttempt,
    ) -> AppResult<Response> {
        let url = self.url(call.path);
        log::debug!("→ {} {} [{}]", call.method, url, attempt.id);

        let mut builder = self.client.request(call.method.clone(), &url);
        if !call.query.is_empty() {
            builder = builder.query(call.query);
        }
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, bearer(token));
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }

        builder.send().await.map_err(|e| {
            let error = AppError::from(e);
            log::warn!("✗ {} {} [{}]: {}", call.method, url, attempt.id, error);
            error
        })
    }

    /// Returns true when the original request should be replayed.
    async fn recover_session(
        &self,
        sent_token: Option<&SecretString>,
        attempt: &RequestAttempt,
    ) -> bool {
        let _gate = self.refresh_gate.lock().await;

        let current = self.current_access_token().await;
        match (current.as_ref(), sent_token) {
            (Some(current), Some(sent)) if current.expose_secret() != sent.expose_secret() => {
                log::debug!("Access token already rotated [{}]", attempt.id);
                return true;
            }
            (Some(_), None) => return true,
            (None, Some(_)) => {
                log::debug!("Tokens cleared while waiting to refresh [{}]", attempt.id);
                return false;
            }
            _ => {}
        }

        match self.refresh_tokens(attempt).await {
            Ok(()) => {
                log::info!("Access token refreshed [{}]", attempt.id);
                true
            }
            Err(err) => {
                log::warn!("Token refresh failed [{}]: {}", attempt.id, err);
                if let Err(clear_err) = self.tokens.clear().await {
                    log::error!("Failed to clear tokens after refresh failure: {}", clear_err);
                }
                false
            }
        }
    }

    async fn refresh_tokens(&self, attempt: &RequestAttempt) -> AppResult<()> {
        let refresh_token = self.tokens.refresh_token().await?.ok_or(AppError::Unauthorized {
            body: Some("No refresh token stored".to_string()),
        })?;

        let call = Call {
            method: Method::POST,
            path: REFRESH_PATH,
            query: &[],
            body: Some(serde_json::to_value(RefreshRequest {
                refresh_token: refresh_token.expose_secret().to_string(),
            })?),
        };
        let response = self.send(&call, None, attempt).await?;
        if !response.status().is_success() {
            return Err(self.error_from(response, attempt).await);
        }

        let pair: TokenPair = response.json().await?;
        self.tokens.save(&pair).await
    }

    async fn current_access_token(&self) -> Option<SecretString> {
        match self.tokens.access_token().await {
            Ok(token) => token,
            Err(err) => {
                log::warn!("Could not read access token: {}", err);
                None
            }
        }
    }

    async fn error_from(&self, response: Response, attempt: &RequestAttempt) -> AppError {
        let status = response.status();
        let url = response.url().to_string();
        let text = response.text().await.unwrap_or_default();

        if self.log_bodies {
            log::warn!("← {} {} [{}]: {}", status.as_u16(), url, attempt.id, text);
        } else {
            log::warn!("← {} {} [{}]", status.as_u16(), url, attempt.id);
        }

        if status == StatusCode::UNAUTHORIZED {
            return AppError::Unauthorized {
                body: (!text.is_empty()).then_some(text),
            };
        }

        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        AppError::Api {
            status: status.as_u16(),
            code: body.code,
            message: body.message,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemorySecureStore, SecureStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_with_tokens(
        server: &MockServer,
        tokens: Option<(&str, &str)>,
    ) -> HttpClient {
        let store = TokenStore::new(Arc::new(MemorySecureStore::new()));
        if let Some((access, refresh)) = tokens {
            store.save(&TokenPair::new(access, refresh)).await.unwrap();
        }
        let config = ClientConfig::for_base_url(server.uri()).unwrap();
        HttpClient::new(&config, store).unwrap()
    }

    async fn stored(client: &HttpClient) -> (Option<String>, Option<String>) {
        let access = client.tokens().access_token().await.unwrap();
        let refresh = client.tokens().refresh_token().await.unwrap();
        (
            access.map(|s| s.expose_secret().to_string()),
            refresh.map(|s| s.expose_secret().to_string()),
        )
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/balance"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(32000)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, Some(("A1", "R1"))).await;
        let balance: i64 = client.get("/users/me/balance").await.unwrap();
        assert_eq!(balance, 32000);
    }

    #[tokio::test]
    async fn no_authorization_header_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/booths"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, None).await;
        let _: Vec<serde_json::Value> = client.get("/booths").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn refreshes_once_and_replays_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .and(body_json(json!({ "refreshToken": "R1" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "accessToken": "A2", "refreshToken": "R2" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, Some(("A1", "R1"))).await;
        let body: serde_json::Value = client.get("/users/me").await.unwrap();
        assert_eq!(body, json!({ "ok": true }));
        assert_eq!(
            stored(&client).await,
            (Some("A2".to_string()), Some("R2".to_string()))
        );

        let refresh_calls = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == REFRESH_PATH)
            .collect::<Vec<_>>();
        assert_eq!(refresh_calls.len(), 1);
        assert!(!refresh_calls[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn second_unauthorized_is_not_refreshed_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "accessToken": "A2", "refreshToken": "R2" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, Some(("A1", "R1"))).await;
        let err = client.get::<serde_json::Value>("/users/me").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn failed_refresh_clears_tokens_and_returns_original_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "code": "BROKEN" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, Some(("A1", "R1"))).await;
        let err = client.get::<serde_json::Value>("/users/me").await.unwrap_err();
        match err {
            AppError::Unauthorized { body } => assert_eq!(body.as_deref(), Some("token expired")),
            other => panic!("expected original 401, got {other:?}"),
        }
        assert_eq!(stored(&client).await, (None, None));
    }

    #[tokio::test]
    async fn other_failures_propagate_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments/requests/confirm"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "code": "INSUFFICIENT_BALANCE", "message": "no" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, Some(("A1", "R1"))).await;
        let err = client
            .post_unit("/payments/requests/confirm", &json!({ "token": "t" }))
            .await
            .unwrap_err();
        assert_eq!(err.business_code(), Some("INSUFFICIENT_BALANCE"));
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test]
    async fn slow_response_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let store = TokenStore::new(Arc::new(MemorySecureStore::new()));
        let mut config = ClientConfig::for_base_url(server.uri()).unwrap();
        config.request_timeout = Duration::from_millis(50);
        let client = HttpClient::new(&config, store).unwrap();

        let err = client.get::<serde_json::Value>("/slow").await.unwrap_err();
        assert!(matches!(err, AppError::Timeout));
    }

    #[tokio::test]
    async fn query_parameters_are_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/requests"))
            .and(query_param("token", "a+b/c="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "found": true })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, None).await;
        let body: serde_json::Value = client
            .get_with_query("/payments/requests", &[("token", "a+b/c=")])
            .await
            .unwrap();
        assert_eq!(body, json!({ "found": true }));
    }

    #[tokio::test]
    async fn concurrent_unauthorized_requests_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(20)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(50))
                    .set_body_json(json!({ "accessToken": "A2", "refreshToken": "R2" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(1)))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, Some(("A1", "R1"))).await;
        let (a, b) = tokio::join!(
            client.get::<i64>("/users/me/balance"),
            client.get::<i64>("/users/me")
        );
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
    }

    #[tokio::test]
    async fn anonymous_post_skips_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, Some(("A1", "R1"))).await;
        let err = client
            .post_anonymous::<_, TokenPair>("/auth/login", &json!({ "id": "u1", "password": "x" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
        assert_eq!(
            stored(&client).await,
            (Some("A1".to_string()), Some("R1".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_refresh_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let backing = Arc::new(MemorySecureStore::new());
        backing
            .set(crate::token_store::ACCESS_TOKEN_KEY, "A1")
            .await
            .unwrap();
        let config = ClientConfig::for_base_url(server.uri()).unwrap();
        let client = HttpClient::new(&config, TokenStore::new(backing)).unwrap();

        let err = client
            .get::<serde_json::Value>("/users/me")
            .await
            .unwrap_err();
        match err {
            AppError::Unauthorized { body } => assert_eq!(body.as_deref(), Some("token expired")),
            other => panic!("expected the original 401, got {:?}", other),
        }
        assert_eq!(stored(&client).await, (None, None));
    }

    #[tokio::test]
    async fn unauthenticated_401_is_returned_as_is() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_with_tokens(&server, None).await;
        let err = client
            .get::<serde_json::Value>("/users/me")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { body: None }));
        assert_eq!(stored(&client).await, (None, None));
    }
}
