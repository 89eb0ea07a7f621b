//! API client for communicating with the taxtrack REST API.
//!
//! `ApiClient` attaches the session's access token to every request. When a
//! request is rejected with 401 it refreshes the token pair once and re-sends
//! the request; if recovery is impossible the session is ended and a
//! `SessionEvent::Terminated` is published for the host to act on.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{header, Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::request::{ApiRequest, Attempt};
use super::ApiError;
use crate::auth::{Session, SessionEvent, TerminationReason};
use crate::models::{
    ApiEnvelope, AuthSession, AuthTokens, LoginRequest, RefreshRequest, RegisterRequest,
    TaxSummary, User,
};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const REFRESH_PATH: &str = "auth/refresh";

/// Connection settings for an `ApiClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_rate_limit_retries: u32,
    pub initial_backoff: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            max_rate_limit_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

/// Join the base address and a request path with exactly one slash.
fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

type RefreshResult = Result<String, Arc<ApiError>>;

/// A refresh in progress, shared by every request waiting on it
struct PendingRefresh {
    id: u64,
    future: Shared<BoxFuture<'static, RefreshResult>>,
}

#[derive(Default)]
struct RefreshSlot {
    next_id: u64,
    pending: Option<PendingRefresh>,
}

/// API client for taxtrack.
/// Clone is cheap - clones share the connection pool, session, and
/// in-flight refresh.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Arc<ClientConfig>,
    session: Arc<Session>,
    refresh: Arc<Mutex<RefreshSlot>>,
}

impl ApiClient {
    /// Create a new API client bound to a session
    pub fn new(config: ClientConfig, session: Arc<Session>) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config: Arc::new(config),
            session,
            refresh: Arc::new(Mutex::new(RefreshSlot::default())),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    // ===== Core request path =====

    /// Send a request with the current access token.
    ///
    /// A 401 is recovered once by refreshing the token pair. Any other error,
    /// or a 401 on the re-sent request, is returned as is.
    pub async fn request(&self, req: &ApiRequest) -> Result<Response, ApiError> {
        let mut attempt = Attempt::First;
        let mut token = self.session.access_token()?;

        loop {
            let result = self.send(req, token.as_deref(), attempt).await;
            match result {
                Err(ApiError::Unauthorized { body, .. }) if attempt.may_refresh() => {
                    attempt = Attempt::AfterRefresh;
                    token = Some(self.recover_token(req, token, body).await?);
                }
                Err(e @ ApiError::Unauthorized { .. }) => {
                    warn!(path = req.path(), "Request still unauthorized after token refresh");
                    return Err(e);
                }
                result => return result,
            }
        }
    }

    /// Produce a token to retry with after `rejected` was refused.
    async fn recover_token(
        &self,
        req: &ApiRequest,
        rejected: Option<String>,
        body: String,
    ) -> Result<String, ApiError> {
        if let Some(current) = self.replaced_token(rejected.as_deref())? {
            debug!(path = req.path(), "Access token already replaced, retrying");
            return Ok(current);
        }

        match self.session.refresh_token()? {
            Some(refresh_token) => {
                self.refresh_access_token(rejected.as_deref(), refresh_token)
                    .await
            }
            None => {
                warn!(path = req.path(), "Unauthorized with no refresh token, ending session");
                self.session
                    .emit(SessionEvent::Terminated(TerminationReason::MissingRefreshToken));
                Err(ApiError::Unauthorized {
                    body,
                    session_terminated: true,
                })
            }
        }
    }

    /// The current access token, if another request has already replaced
    /// the one that was rejected.
    fn replaced_token(&self, rejected: Option<&str>) -> Result<Option<String>, ApiError> {
        Ok(self
            .session
            .access_token()?
            .filter(|current| Some(current.as_str()) != rejected))
    }

    /// Refresh the token pair, joining a refresh already in flight if any.
    async fn refresh_access_token(
        &self,
        rejected: Option<&str>,
        refresh_token: String,
    ) -> Result<String, ApiError> {
        let (id, future) = {
            let mut guard = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = &mut *guard;
            match slot.pending.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    (pending.id, pending.future.clone())
                }
                None => {
                    // A refresh may have completed since the caller checked
                    if let Some(current) = self.replaced_token(rejected)? {
                        return Ok(current);
                    }
                    let id = slot.next_id;
                    slot.next_id += 1;
                    let future = Self::run_refresh(
                        self.client.clone(),
                        Arc::clone(&self.config),
                        Arc::clone(&self.session),
                        refresh_token,
                    )
                    .boxed()
                    .shared();
                    slot.pending = Some(PendingRefresh {
                        id,
                        future: future.clone(),
                    });
                    (id, future)
                }
            }
        };

        let result = future.await;

        {
            let mut slot = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.pending.as_ref().is_some_and(|p| p.id == id) {
                slot.pending = None;
            }
        }

        result.map_err(ApiError::SessionTerminated)
    }

    /// Exchange the refresh token and store the new pair. On failure the
    /// session is cleared and terminated.
    async fn run_refresh(
        client: Client,
        config: Arc<ClientConfig>,
        session: Arc<Session>,
        refresh_token: String,
    ) -> RefreshResult {
        info!("Refreshing access token");

        let result = async {
            let tokens = Self::exchange_refresh_token(&client, &config, &refresh_token).await?;
            session.set_tokens(&tokens)?;
            Ok::<_, ApiError>(tokens)
        }
        .await;

        match result {
            Ok(tokens) => {
                info!("Access token refreshed");
                session.emit(SessionEvent::Refreshed);
                Ok(tokens.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                if let Err(clear_err) = session.clear() {
                    warn!(error = %clear_err, "Failed to clear session");
                }
                session.emit(SessionEvent::Terminated(TerminationReason::RefreshRejected));
                Err(Arc::new(e))
            }
        }
    }

    /// Direct call to the refresh endpoint, bypassing the 401 handling
    async fn exchange_refresh_token(
        client: &Client,
        config: &ClientConfig,
        refresh_token: &str,
    ) -> Result<AuthTokens, ApiError> {
        let url = join_url(&config.base_url, REFRESH_PATH);
        let response = client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let envelope: ApiEnvelope<AuthTokens> = Self::parse_json(response).await?;
        Ok(envelope.data)
    }

    fn headers(&self, req: &ApiRequest, token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        for (name, value) in req.headers() {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidRequest(format!("Invalid access token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Send one attempt, backing off and retrying on 429.
    async fn send(
        &self,
        req: &ApiRequest,
        token: Option<&str>,
        attempt: Attempt,
    ) -> Result<Response, ApiError> {
        let url = join_url(&self.config.base_url, req.path());
        let mut retries = 0;
        let mut backoff = self.config.initial_backoff;

        loop {
            debug!(method = %req.method(), url = %url, ?attempt, "Sending request");

            let mut builder = self
                .client
                .request(req.method().clone(), &url)
                .headers(self.headers(req, token)?);
            if !req.query_pairs().is_empty() {
                builder = builder.query(req.query_pairs());
            }
            if let Some(body) = req.body() {
                builder = builder.body(body.to_string());
            }

            let response = builder.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > self.config.max_rate_limit_retries {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(
                        url = %url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            Self::check_response(response).await.map(Some)
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().to_string();
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    // ===== Typed helpers =====

    pub async fn request_json<T: DeserializeOwned>(&self, req: &ApiRequest) -> Result<T, ApiError> {
        let response = self.request(req).await?;
        Self::parse_json(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request_json(&ApiRequest::get(path)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request_json(&ApiRequest::post(path).json(body)?).await
    }

    // ===== Authentication =====

    /// Sign in with email and password and start a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let req = ApiRequest::post("auth/login").json(&LoginRequest { email, password })?;
        self.start_session(&req).await
    }

    /// Create an account and start a session.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, ApiError> {
        let req = ApiRequest::post("auth/register").json(&RegisterRequest {
            email,
            password,
            name,
        })?;
        self.start_session(&req).await
    }

    /// Credential exchanges are sent without a token and a 401 means bad
    /// credentials, so they skip the refresh path.
    async fn start_session(&self, req: &ApiRequest) -> Result<User, ApiError> {
        let response = self.send(req, None, Attempt::First).await?;
        let envelope: ApiEnvelope<AuthSession> = Self::parse_json(response).await?;
        let AuthSession { tokens, user } = envelope.data;

        self.session.set_tokens(&tokens)?;
        self.session.emit(SessionEvent::Started);
        info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        let envelope: ApiEnvelope<User> = self.get_json("auth/me").await?;
        Ok(envelope.data)
    }

    /// End the session. The server is told to revoke the refresh token on a
    /// best-effort basis; local credentials are always cleared.
    pub async fn logout(&self) -> Result<(), ApiError> {
        if let Some(refresh_token) = self.session.refresh_token()? {
            let access = self.session.access_token()?;
            let req = ApiRequest::post("auth/logout").json(&RefreshRequest {
                refresh_token: &refresh_token,
            })?;
            if let Err(e) = self.send(&req, access.as_deref(), Attempt::First).await {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }

        self.session.clear()?;
        self.session
            .emit(SessionEvent::Terminated(TerminationReason::LoggedOut));
        Ok(())
    }

    // ===== Data Fetching Methods =====

    /// Fetch the year-to-date tax summary for the dashboard
    pub async fn fetch_tax_summary(&self) -> Result<TaxSummary, ApiError> {
        let envelope: ApiEnvelope<TaxSummary> = self.get_json("tax/summary").await?;
        Ok(envelope.data)
    }
}
