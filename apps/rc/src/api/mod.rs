//! Request/response calls against the rc host: ticket issuance and the
//! session directory.

use crate::config::{ClientConfig, ConfigError, Endpoint};
use async_trait::async_trait;
use rc_proto::{ApiErrorEnvelope, CreateSessionRequest, SessionInfo, TicketResponse};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{code} ({status}): {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },
    #[error("HTTP {0}")]
    HttpStatus(StatusCode),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    /// Maps a non-success response body onto the error taxonomy.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<ApiErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.error);
        if status == StatusCode::UNAUTHORIZED {
            let detail = parsed
                .map(|payload| payload.summary())
                .filter(|summary| !summary.is_empty())
                .unwrap_or_else(|| "credential rejected".to_string());
            return ApiError::Unauthorized(detail);
        }
        match parsed {
            Some(payload) => ApiError::Api {
                status,
                code: payload.code.clone().unwrap_or_else(|| "error".to_string()),
                message: payload.summary(),
            },
            None => ApiError::HttpStatus(status),
        }
    }
}

/// Exchanges the long-lived credential for a single-use stream ticket.
#[async_trait]
pub trait TicketIssuer: Send + Sync {
    async fn issue_ticket(&self) -> Result<String, ApiError>;
}

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ApiError>;
    async fn create_session(&self, request: &CreateSessionRequest)
    -> Result<SessionInfo, ApiError>;
    async fn terminate_session(&self, session_id: &str) -> Result<(), ApiError>;
    async fn list_engines(&self) -> Result<Vec<String>, ApiError>;
    async fn healthz(&self) -> Result<bool, ApiError>;
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    endpoint: Endpoint,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(endpoint: Endpoint) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .build()?;
        Ok(Self { endpoint, http })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(config.endpoint()?)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.endpoint.url_for(path));
        match self.endpoint.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_response(status, &body));
        }
        serde_json::from_str(&body).map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl TicketIssuer for ApiClient {
    async fn issue_ticket(&self) -> Result<String, ApiError> {
        let builder = self
            .request(reqwest::Method::POST, "/api/ws-ticket")
            .json(&serde_json::json!({}));
        let response: TicketResponse = self.execute(builder).await?;
        let ticket = response
            .ticket
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::InvalidResponse("missing ws ticket".into()))?;
        debug!(target: "rc::api", expires_ms = ?response.expires_ms, "issued stream ticket");
        Ok(ticket)
    }
}

#[async_trait]
impl SessionDirectory for ApiClient {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ApiError> {
        self.execute(self.request(reqwest::Method::GET, "/api/sessions"))
            .await
    }

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<SessionInfo, ApiError> {
        let builder = self
            .request(reqwest::Method::POST, "/api/sessions")
            .json(request);
        self.execute(builder).await
    }

    async fn terminate_session(&self, session_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/sessions/{session_id}/terminate");
        let response = self.request(reqwest::Method::POST, &path).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_response(status, &body))
    }

    async fn list_engines(&self) -> Result<Vec<String>, ApiError> {
        self.execute(self.request(reqwest::Method::GET, "/api/engines"))
            .await
    }

    async fn healthz(&self) -> Result<bool, ApiError> {
        let response = self
            .http
            .get(self.endpoint.url_for("/healthz"))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}
