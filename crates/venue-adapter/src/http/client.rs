/*
[INPUT]:  HTTP configuration (base URLs, timeouts, credentials, request key)
[OUTPUT]: Configured reqwest client plus shared authed/signed request plumbing
[POS]:    HTTP layer - core client implementation
[UPDATE]: When connection options or the request/response envelope change
*/

use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::auth::{RequestKey, SIGNATURE_VERSION};
use crate::http::error::{Result, VenueError};
use crate::http::signature::{
    HEADER_REQUEST_ID, HEADER_REQUEST_SIGNATURE, HEADER_REQUEST_TIMESTAMP, HEADER_REQUEST_VERSION,
};
use crate::types::{
    SessionLoginRequest, SessionLoginResponse, SessionPrepareRequest, SessionPrepareResponse,
};

const AUTH_BASE_URL: &str = "https://api.perpdex.example";
const TRADING_BASE_URL: &str = "https://perps.perpdex.example";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Credentials for authenticated requests.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub jwt_token: String,
}

/// Main HTTP client for the venue API.
#[derive(Debug)]
pub struct VenueClient {
    http_client: Client,
    auth_base_url: Url,
    trading_base_url: Url,
    credentials: Option<Credentials>,
    key: Option<RequestKey>,
    timeout_secs: u64,
}

impl VenueClient {
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Self::with_config_and_base_urls(config, AUTH_BASE_URL, TRADING_BASE_URL)
    }

    /// Build a client against explicit base URLs (tests point this at wiremock).
    pub fn with_config_and_base_urls(
        config: ClientConfig,
        auth_base_url: &str,
        trading_base_url: &str,
    ) -> Result<Self> {
        let timeout_secs = config.timeout.as_secs().max(1);
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| VenueError::Network(err.to_string()))?;

        Ok(Self {
            http_client,
            auth_base_url: Url::parse(auth_base_url)?,
            trading_base_url: Url::parse(trading_base_url)?,
            credentials: None,
            key: None,
            timeout_secs,
        })
    }

    /// Set credentials and the Ed25519 request key used for body signing.
    pub fn set_credentials_and_key(&mut self, credentials: Credentials, key: RequestKey) {
        self.credentials = Some(credentials);
        self.key = Some(key);
    }

    /// Replace the bearer token, e.g. after a session handshake.
    pub fn set_session_token(&mut self, token: String) {
        self.credentials = Some(Credentials { jwt_token: token });
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    fn bearer(&self) -> Result<&str> {
        self.credentials
            .as_ref()
            .map(|c| c.jwt_token.as_str())
            .ok_or(VenueError::SessionExpired)
    }

    fn trading_request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = self.trading_base_url.join(endpoint)?;
        Ok(self.http_client.request(method, url))
    }

    fn auth_request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = self.auth_base_url.join(endpoint)?;
        Ok(self.http_client.request(method, url))
    }

    /// GET on a public endpoint.
    pub(crate) async fn get_public<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let request = self.trading_request(Method::GET, endpoint)?;
        self.execute(request).await
    }

    /// GET with the bearer token attached.
    pub(crate) async fn get_authed<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let request = self
            .trading_request(Method::GET, endpoint)?
            .bearer_auth(self.bearer()?);
        self.execute(request).await
    }

    /// POST with bearer token plus body-signature headers. The request id and
    /// timestamp are minted here, one pair per outgoing request.
    pub(crate) async fn post_signed<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let key = self.key.as_ref().ok_or(VenueError::SessionExpired)?;
        let payload = serde_json::to_string(body)?;
        let request_id = Uuid::new_v4().to_string();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let signature = key.request_signature(&request_id, timestamp, &payload);

        let request = self
            .trading_request(Method::POST, endpoint)?
            .bearer_auth(self.bearer()?)
            .header(HEADER_REQUEST_VERSION, SIGNATURE_VERSION)
            .header(HEADER_REQUEST_ID, &request_id)
            .header(HEADER_REQUEST_TIMESTAMP, timestamp.to_string())
            .header(HEADER_REQUEST_SIGNATURE, &signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);

        self.execute(request).await
    }

    pub(crate) async fn session_prepare(
        &self,
        req: SessionPrepareRequest,
    ) -> Result<SessionPrepareResponse> {
        let request = self
            .auth_request(Method::POST, "/v1/session/prepare")?
            .json(&req);
        self.execute(request).await
    }

    pub(crate) async fn session_login(
        &self,
        req: SessionLoginRequest,
    ) -> Result<SessionLoginResponse> {
        let request = self
            .auth_request(Method::POST, "/v1/session/login")?
            .json(&req);
        self.execute(request).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|err| VenueError::from_transport(err, self.timeout_secs))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| VenueError::from_transport(err, self.timeout_secs))?;

        if status == StatusCode::OK {
            serde_json::from_str(&body)
                .map_err(|err| VenueError::InvalidResponse(format!("{err}: {body}")))
        } else {
            Err(VenueError::from_status(status, &body))
        }
    }
}
