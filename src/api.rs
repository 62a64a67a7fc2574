//! HTTP client adapter for the payments API.
//!
//! Every request carries the current bearer token when there is one, and
//! every response is checked for 401 before the caller sees it. A 401 drops
//! the session and sends the client back to the login surface.

use crate::activity::ActivityLog;
use crate::models::{
    Account, Credentials, TokenResponse, TransactionRecord, TransferConfirmation, TransferRequest,
};
use crate::navigator::Navigator;
use crate::session::SessionStore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("HTTP {code}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Status { code: u16, detail: Option<String> },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Server-supplied detail, if the error carried one
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// One raw request/response exchange with the server
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError>;
}

pub struct UreqTransport {
    base_url: String,
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(base_url: &str, timeout_ms: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_millis(timeout_ms))
                .build(),
        }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut req = self
            .agent
            .request(request.method.as_str(), &url)
            .set("Accept", "application/json");
        if let Some(token) = &request.bearer {
            req = req.set("Authorization", &format!("Bearer {}", token));
        }

        let resp = match &request.body {
            Some(body) => req
                .set("Content-Type", "application/json")
                .send_json(body.clone()),
            None => req.call(),
        };

        match resp {
            Ok(r) => {
                let status = r.status();
                let body = r
                    .into_string()
                    .map_err(|e| ApiError::Transport(e.to_string()))?;
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Ok(HttpResponse { status: code, body })
            }
            Err(e) => Err(ApiError::Transport(e.to_string())),
        }
    }
}

/// Pull a human-readable message out of a FastAPI error body.
pub fn extract_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    }
}

pub struct ApiClient {
    transport: Box<dyn Transport>,
    session: Arc<SessionStore>,
    navigator: Arc<Navigator>,
    activity: Arc<ActivityLog>,
}

impl ApiClient {
    pub fn new(
        transport: Box<dyn Transport>,
        session: Arc<SessionStore>,
        navigator: Arc<Navigator>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            transport,
            session,
            navigator,
            activity,
        }
    }

    pub fn authenticate(&self, credentials: &Credentials) -> Result<String, ApiError> {
        let resp: TokenResponse = self.post("/login", serde_json::to_value(credentials))?;
        Ok(resp.access_token)
    }

    pub fn register(&self, credentials: &Credentials) -> Result<String, ApiError> {
        let resp: TokenResponse = self.post("/register", serde_json::to_value(credentials))?;
        Ok(resp.access_token)
    }

    pub fn fetch_account(&self) -> Result<Account, ApiError> {
        self.get("/me")
    }

    pub fn fetch_history(&self) -> Result<Vec<TransactionRecord>, ApiError> {
        // The server sends null instead of [] for some empty histories
        let records: Option<Vec<TransactionRecord>> = self.get("/history")?;
        Ok(records.unwrap_or_default())
    }

    pub fn submit_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferConfirmation, ApiError> {
        self.post("/transfer", serde_json::to_value(request))
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(Method::Get, path, None)
    }

    fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Result<Value>,
    ) -> Result<T, ApiError> {
        let body = body.map_err(|e| ApiError::Decode(e.to_string()))?;
        self.send(Method::Post, path, Some(body))
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let request = HttpRequest {
            method,
            path: path.to_string(),
            bearer: self.session.token(),
            body,
        };
        let resp = self.transport.execute(&request)?;

        if resp.status == 401 {
            self.session.terminate();
            let redirected = self.navigator.redirect_to_login();
            let _ = self.activity.unauthorized(path, redirected);
            if redirected {
                eprintln!("Session rejected by server, please log in again");
            }
            return Err(ApiError::Unauthorized);
        }

        if !resp.is_success() {
            return Err(ApiError::Status {
                code: resp.status,
                detail: extract_detail(&resp.body),
            });
        }

        serde_json::from_str(&resp.body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}
