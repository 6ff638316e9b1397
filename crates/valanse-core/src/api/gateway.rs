//! Backend gateway for the three token operations.
//!
//! The [`Gateway`] trait is the seam the session manager talks through;
//! [`HttpGateway`] is the production implementation against the valanse
//! backend. Every operation is a `POST` with an empty body, the credential
//! travelling in a header.

use std::time::Duration;

use reqwest::{header, Client};
use serde::Deserialize;
use tracing::debug;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Path exchanging a one-time external code for an access credential
const EXCHANGE_PATH: &str = "token/get";

/// Path renewing an access credential from a refresh credential
const REFRESH_PATH: &str = "token/refresh";

/// Path revoking an access credential server-side
const REVOKE_PATH: &str = "token/logout";

/// Header carrying the external exchange code
pub const STATE_TOKEN_HEADER: &str = "stateToken";

/// Token endpoints wrap their payload as `{"data": "<credential>"}`
#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    data: Option<String>,
}

/// Operations the backend exposes for the credential lifecycle.
#[allow(async_fn_in_trait)]
pub trait Gateway {
    /// Redeem an external exchange code for an access credential.
    async fn exchange(&self, code: &str) -> Result<String, ApiError>;

    /// Obtain a fresh access credential using a refresh credential.
    async fn refresh(&self, refresh_credential: &str) -> Result<String, ApiError>;

    /// Revoke an access credential. The acknowledgement body is ignored.
    async fn revoke(&self, access_credential: &str) -> Result<(), ApiError>;
}

/// Gateway backed by `reqwest`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Build a gateway sharing an existing connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Build a token request: `POST`, empty body, credential in `header_name`.
    fn token_request(
        &self,
        path: &str,
        header_name: &str,
        value: &str,
    ) -> Result<reqwest::Request, ApiError> {
        let request = self
            .client
            .post(self.endpoint(path))
            .header(header_name, header::HeaderValue::from_str(value)?)
            .header(header::CONTENT_TYPE, "application/json")
            .build()?;
        Ok(request)
    }

    fn exchange_request(&self, code: &str) -> Result<reqwest::Request, ApiError> {
        self.token_request(EXCHANGE_PATH, STATE_TOKEN_HEADER, code)
    }

    fn refresh_request(&self, refresh_credential: &str) -> Result<reqwest::Request, ApiError> {
        self.token_request(REFRESH_PATH, header::AUTHORIZATION.as_str(), refresh_credential)
    }

    fn revoke_request(&self, access_credential: &str) -> Result<reqwest::Request, ApiError> {
        self.token_request(REVOKE_PATH, header::AUTHORIZATION.as_str(), access_credential)
    }

    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, ApiError> {
        debug!(url = %request.url(), "Posting token request");
        let response = self.client.execute(request).await?;
        Self::check_response(response).await
    }

    async fn send_for_credential(&self, request: reqwest::Request) -> Result<String, ApiError> {
        let response = self.send(request).await?;
        let envelope: TokenEnvelope = response.json().await?;
        parse_credential(envelope)
    }
}

fn parse_credential(envelope: TokenEnvelope) -> Result<String, ApiError> {
    match envelope.data {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(ApiError::InvalidResponse(
            "token response carried no credential".to_string(),
        )),
    }
}

impl Gateway for HttpGateway {
    async fn exchange(&self, code: &str) -> Result<String, ApiError> {
        let request = self.exchange_request(code)?;
        self.send_for_credential(request).await
    }

    async fn refresh(&self, refresh_credential: &str) -> Result<String, ApiError> {
        let request = self.refresh_request(refresh_credential)?;
        self.send_for_credential(request).await
    }

    async fn revoke(&self, access_credential: &str) -> Result<(), ApiError> {
        let request = self.revoke_request(access_credential)?;
        self.send(request).await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
