
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::auth::{REFRESH_PATH, RefreshRequest, TokenResponse};
use crate::cache::QueryCache;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::session::{SessionEvent, SessionStore};
use crate::types::{AccessToken, RefreshToken, TokenPair};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Outbound API request.
///
/// Requests are immutable. Whether a dispatch is the first try or the
/// post-refresh retry is tracked by the client, not by a flag on the request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<JsonValue>,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if `body` cannot be serialized.
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, Error> {
        self.body = Some(serde_json::to_value(body).map_err(Error::Encode)?);
        Ok(self)
    }

    /// Append query parameters from a flat struct or map. `None` fields are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if `query` does not serialize to a flat object.
    pub fn with_query<Q: Serialize + ?Sized>(mut self, query: &Q) -> Result<Self, Error> {
        let value = serde_json::to_value(query).map_err(Error::Encode)?;
        self.query.extend(query_pairs(value)?);
        Ok(self)
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }
}

fn query_pairs(value: JsonValue) -> Result<Vec<(String, String)>, Error> {
    let map = match value {
        JsonValue::Null => return Ok(Vec::new()),
        JsonValue::Object(map) => map,
        _ => return Err(encode_error("query parameters must serialize to an object")),
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            JsonValue::Null => {}
            JsonValue::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), scalar_to_string(item)?));
                }
            }
            other => pairs.push((key, scalar_to_string(other)?)),
        }
    }
    Ok(pairs)
}

fn scalar_to_string(value: JsonValue) -> Result<String, Error> {
    match value {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        _ => Err(encode_error("nested query parameters are not supported")),
    }
}

fn encode_error(msg: &str) -> Error {
    Error::Encode(<serde_json::Error as serde::ser::Error>::custom(msg))
}

/// Which dispatch of a logical request this is. Only `Initial` may be followed by `Retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Retry,
}

impl Attempt {
    fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Retry => "retry",
        }
    }
}

/// Authenticated client for the MES REST API.
///
/// Every request carries the bearer token currently held by the session
/// store. A `401` triggers one token refresh and one retry; refreshes are
/// serialized, so concurrent requests that all see an expired token share a
/// single refresh call. If the refresh token is rejected the session is
/// cleared, [`SessionEvent::Expired`] is broadcast and callers get
/// [`Error::SessionExpired`].
pub struct ApiClient<S> {
    config: ClientConfig,
    http: reqwest::Client,
    store: S,
    refresh_gate: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    cache: QueryCache,
}

impl<S: SessionStore> ApiClient<S> {
    /// Create a client reading and writing credentials through `store`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(config: ClientConfig, store: S) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            cache: QueryCache::new(config.stale_time),
            config,
            http,
            store,
            refresh_gate: Mutex::new(()),
            events,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    ///
    /// The configured timeout is still applied to every request.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Receive session lifecycle events (sign-in, renewal, expiry, sign-out).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Send `request` with the current credentials, recovering once from an expired token.
    ///
    /// Returns the successful response; every non-2xx status becomes an error.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] if no response was received (timeouts included).
    /// - [`Error::Api`] for non-2xx responses, including a `401` that
    ///   could not be recovered from.
    /// - [`Error::SessionExpired`] if the refresh token was rejected.
    pub async fn send(&self, request: &ApiRequest) -> Result<reqwest::Response, Error> {
        let presented = self.store.load().await.map(|s| s.tokens.access);

        let response = self
            .dispatch(request, presented.as_ref(), Attempt::Initial)
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::ensure_success(response).await;
        }

        let Some(renewed) = self.renew_rejected(presented.as_ref()).await? else {
            return Self::ensure_success(response).await;
        };

        let retried = self
            .dispatch(request, Some(&renewed), Attempt::Retry)
            .await?;
        Self::ensure_success(retried).await
    }

    /// Send `request` with no credentials and no refresh handling (login).
    pub(crate) async fn send_unauthenticated(
        &self,
        request: &ApiRequest,
    ) -> Result<reqwest::Response, Error> {
        let response = self.dispatch(request, None, Attempt::Initial).await?;
        Self::ensure_success(response).await
    }

    /// Send `request` and decode the JSON response body.
    ///
    /// # Errors
    ///
    /// Everything [`send`](Self::send) returns, plus [`Error::Decode`] if the
    /// body does not match `T`.
    pub async fn fetch<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, Error> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(Error::Decode)
    }

    /// Send `request`, discarding any response body.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn execute(&self, request: &ApiRequest) -> Result<(), Error> {
        self.send(request).await.map(drop)
    }

    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.fetch(&ApiRequest::get(path)).await
    }

    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.fetch(&ApiRequest::post(path).with_json(body)?).await
    }

    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn put_json<T, B>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.fetch(&ApiRequest::put(path).with_json(body)?).await
    }

    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn patch_json<T, B>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.fetch(&ApiRequest::patch(path).with_json(body)?).await
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        self.execute(&ApiRequest::delete(path)).await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&AccessToken>,
        attempt: Attempt,
    ) -> Result<reqwest::Response, Error> {
        let url = self.config.endpoint(&request.path)?;
        debug!(
            method = %request.method,
            path = %request.path,
            attempt = attempt.as_str(),
            authenticated = token.is_some(),
            "Dispatching API request"
        );

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .timeout(self.config.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    /// Decide how to recover from a `401` to a request that presented `presented`.
    ///
    /// `Ok(None)` means there is nothing to refresh with and the original
    /// response should be propagated.
    async fn renew_rejected(
        &self,
        presented: Option<&AccessToken>,
    ) -> Result<Option<AccessToken>, Error> {
        // Requests sent without a session get their own 401 back, even if a
        // login completed while they were in flight.
        let Some(presented) = presented else {
            return Ok(None);
        };

        let _gate = self.refresh_gate.lock().await;

        let Some(session) = self.store.load().await else {
            // The session ended (failed refresh or logout) while this request was in flight.
            return Err(Error::SessionExpired);
        };

        if presented != session.access_token() {
            debug!("Access token already renewed, retrying with current token");
            return Ok(Some(session.tokens.access));
        }

        self.refresh_locked(&session.tokens.refresh).await.map(Some)
    }

    /// Take the refresh gate. Held while renewing so renewals never overlap.
    pub(crate) async fn lock_refresh(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.refresh_gate.lock().await
    }

    /// Exchange `refresh` for new tokens. Callers must hold the refresh gate.
    pub(crate) async fn refresh_locked(&self, refresh: &RefreshToken) -> Result<AccessToken, Error> {
        let tokens = match self.request_refresh(refresh).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.end_session(SessionEvent::Expired).await;
                return Err(Error::SessionExpired);
            }
        };

        let access = tokens.access.clone();
        if !self.store.replace_tokens(refresh, tokens).await {
            debug!("Session ended or replaced during refresh, discarding renewed tokens");
            return Err(Error::SessionExpired);
        }

        info!("Session tokens renewed");
        let _ = self.events.send(SessionEvent::Renewed);
        Ok(access)
    }

    async fn request_refresh(&self, refresh: &RefreshToken) -> Result<TokenPair, Error> {
        let url = self.config.endpoint(REFRESH_PATH)?;
        debug!(path = REFRESH_PATH, "Requesting token refresh");

        let response = self
            .http
            .post(url)
            .timeout(self.config.timeout)
            .json(&RefreshRequest {
                refresh_token: refresh,
            })
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        let body: TokenResponse = serde_json::from_slice(&bytes).map_err(Error::Decode)?;
        Ok(body.into_tokens())
    }

    /// Clear local session state and cached reads, then announce `event`.
    pub(crate) async fn end_session(&self, event: SessionEvent) {
        self.store.clear().await;
        self.cache.clear().await;
        let _ = self.events.send(event);
    }

    pub(crate) fn announce(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(Error::from_status(status, &body))
    }
}

impl<S> std::fmt::Debug for ApiClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Filters {
        status: Option<&'static str>,
        assigned_to: Option<i64>,
        tags: Vec<&'static str>,
        urgent: bool,
    }

    #[test]
    fn test_query_pairs_skip_none_and_expand_arrays() {
        let request = ApiRequest::get("/issues")
            .with_query(&Filters {
                status: Some("OPEN"),
                assigned_to: None,
                tags: vec!["a", "b"],
                urgent: true,
            })
            .unwrap();

        let mut pairs: Vec<(&str, &str)> = request
            .query()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![("status", "OPEN"), ("tags", "a"), ("tags", "b"), ("urgent", "true")]
        );
    }

    #[test]
    fn test_query_none_is_empty() {
        let request = ApiRequest::get("/users").with_query(&None::<Filters>).unwrap();
        assert!(request.query().is_empty());
    }

    #[test]
    fn test_query_rejects_non_objects() {
        let err = ApiRequest::get("/users").with_query(&42).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));

        let nested = serde_json::json!({ "filters": { "status": "OPEN" } });
        let err = ApiRequest::get("/users").with_query(&nested).unwrap_err();
        assert!(err.to_string().contains("nested"));
    }

    #[test]
    fn test_request_builders() {
        let request = ApiRequest::patch("/work-orders/3/status")
            .with_json(&serde_json::json!({ "status": "COMPLETED" }))
            .unwrap();
        assert_eq!(*request.method(), Method::PATCH);
        assert_eq!(request.path(), "/work-orders/3/status");
        assert_eq!(*ApiRequest::delete("/x").method(), Method::DELETE);
    }

    #[test]
    fn test_attempt_labels() {
        assert_eq!(Attempt::Initial.as_str(), "initial");
        assert_eq!(Attempt::Retry.as_str(), "retry");
    }
}
