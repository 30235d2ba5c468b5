//! HTTP client for the hosting service API
//!
//! Every endpoint answers with the same envelope:
//! `{ "request": { "status_code", "success" }, "response": <payload> }`.
//! `ApiClient::send` executes an `ApiRequest`, records request metrics and
//! unwraps the envelope into the caller's payload type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::remote::Credentials;
use crate::config::ApiConfig;
use crate::error::AppError;
use crate::metrics::observe_remote_request;

/// Default re-read interval of push channels
const DEFAULT_UPDATES_INTERVAL: Duration = Duration::from_secs(60);

/// HTTP method of an API request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
}

/// Description of one API call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Path relative to the API base URL, starting with `/`
    pub path: String,
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, AppError> {
        self.body = Some(RequestBody::Json(serde_json::to_value(body)?));
        Ok(self)
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }
}

/// Request metadata half of the envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMeta {
    pub status_code: u16,
    pub success: bool,
}

/// Response envelope shared by all endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub request: RequestMeta,
    pub response: T,
}

/// API client
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    updates_interval: Duration,
}

impl ApiClient {
    /// Create a client from API configuration
    pub fn new(config: &ApiConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()?;

        Ok(Self::with_client(http, &config.base_url))
    }

    /// Wrap an existing `reqwest::Client`
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            updates_interval: DEFAULT_UPDATES_INTERVAL,
        }
    }

    /// Set how often push channels re-read the remote list
    pub fn with_updates_interval(mut self, interval: Duration) -> Self {
        self.updates_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn updates_interval(&self) -> Duration {
        self.updates_interval
    }

    /// Execute a request and decode the envelope payload
    ///
    /// # Errors
    /// - `Unauthorized` on HTTP 401
    /// - `NotFound` on HTTP 404
    /// - `Api` on any other failure status or a non-success envelope
    /// - `HttpClient` on transport failures
    pub async fn send<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        credentials: &Credentials,
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, request.path);
        let method = request.method.as_str();

        let mut builder = self
            .http
            .request(request.method.into(), &url)
            .bearer_auth(&credentials.token);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            Some(RequestBody::Json(body)) => builder.json(&body),
            Some(RequestBody::Text(body)) => builder
                .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(body),
            None => builder,
        };

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                observe_remote_request(method, "error", started.elapsed());
                tracing::warn!(method, path = %request.path, error = %e, "API request failed");
                return Err(e.into());
            }
        };

        let status = response.status();
        let body = response.bytes().await?;
        observe_remote_request(method, status.as_str(), started.elapsed());

        tracing::debug!(
            method,
            path = %request.path,
            status = status.as_u16(),
            "API request completed"
        );

        decode_envelope(status.as_u16(), &body)
    }
}

/// Unwrap an envelope, mapping failure statuses to errors
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    status: u16,
    body: &[u8],
) -> Result<T, AppError> {
    if !(200..300).contains(&status) {
        return Err(status_error(status, server_message(body)));
    }

    let envelope: ApiEnvelope<serde_json::Value> = serde_json::from_slice(body)?;
    if !envelope.request.success {
        let message = envelope
            .response
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string);
        return Err(status_error(envelope.request.status_code, message));
    }

    Ok(serde_json::from_value(envelope.response)?)
}

fn status_error(status: u16, message: Option<String>) -> AppError {
    match status {
        401 => AppError::Unauthorized,
        404 => AppError::NotFound,
        _ => AppError::Api {
            status,
            message: message.unwrap_or_else(|| format!("HTTP {status}")),
        },
    }
}

fn server_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .pointer("/response/message")
        .or_else(|| value.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}
