//! # Request Executor
//!
//! Every backend call goes through [`RequestExecutor::send`]:
//!
//! - a deadline chosen by [`OperationKind`]
//! - a `CancellationToken` that fires when the deadline passes and can be
//!   cancelled early by the caller
//! - one error classification (`RequestError`) before anything reaches the
//!   session or checkout state machines
//!
//! No retries happen here. Callers decide whether to offer one.

use crate::config::{ClientConfig, Timeouts};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use topup_core::{BearerToken, ShopError, GENERIC_FAILURE_MESSAGE};
use tracing::{debug, error, warn};

/// Deadline class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    Payment,
    Upload,
}

impl Timeouts {
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Read => self.read,
            OperationKind::Write => self.write,
            OperationKind::Payment => self.payment,
            OperationKind::Upload => self.upload,
        }
    }
}

/// Transport-level classification of a failed request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Request could not be built; nothing was sent
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("{operation} was aborted")]
    Aborted { operation: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// Response arrived but did not have the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RequestError> for ShopError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Validation(msg) => ShopError::Validation(msg),
            RequestError::Timeout { operation, after } => ShopError::Timeout {
                operation,
                after_ms: after.as_millis() as u64,
            },
            RequestError::Aborted { operation } => ShopError::Aborted { operation },
            RequestError::Http { status, message } if status == 401 || status == 403 => {
                ShopError::Auth(message)
            }
            RequestError::Http { status, message } if status == 404 => ShopError::NotFound(message),
            RequestError::Http { status, message } => ShopError::server(status, message),
            RequestError::Network(message) => ShopError::Server {
                status: None,
                message,
            },
            RequestError::Decode(message) => ShopError::Serialization(message),
        }
    }
}

/// A single backend call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    /// Appended to `path` percent-encoded, one segment each
    segments: Vec<String>,
    kind: OperationKind,
    operation: String,
    body: Option<Value>,
    headers: Vec<(&'static str, String)>,
    bearer: Option<String>,
    cancel: Option<CancellationToken>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>, kind: OperationKind) -> Self {
        let path = path.into();
        Self {
            operation: format!("{} {}", method, path),
            method,
            path,
            segments: Vec::new(),
            kind,
            body: None,
            headers: Vec::new(),
            bearer: None,
            cancel: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, OperationKind::Read)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path, OperationKind::Write)
    }

    /// Append a path segment taken from outside input, such as an order id
    pub fn segment(mut self, value: impl Into<String>) -> Self {
        self.segments.push(value.into());
        self
    }

    /// Human-readable name used in errors and logs
    pub fn operation(mut self, name: impl Into<String>) -> Self {
        self.operation = name.into();
        self
    }

    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, RequestError> {
        let value = serde_json::to_value(body)
            .map_err(|e| RequestError::Validation(format!("cannot encode body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Use this token instead of the shared one
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Let the caller abort the request by cancelling `token`
    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Bounded-timeout HTTP executor for the hosted backend
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: Client,
    base_url: String,
    anon_key: String,
    token: BearerToken,
    timeouts: Timeouts,
}

impl RequestExecutor {
    pub fn new(config: &ClientConfig, token: BearerToken) -> Result<Self, ShopError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ShopError::Configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            anon_key: config.anon_key.clone(),
            token,
            timeouts: config.timeouts,
        })
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn bearer_token(&self) -> &BearerToken {
        &self.token
    }

    /// Send a request and decode the JSON response into `T`
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, RequestError> {
        let operation = request.operation.clone();
        let value = self.send(request).await?;
        serde_json::from_value(value)
            .map_err(|e| RequestError::Decode(format!("{}: {}", operation, e)))
    }

    /// Send a request, returning the parsed JSON body (or `Null`)
    pub async fn send(&self, request: ApiRequest) -> Result<Value, RequestError> {
        let timeout = self.timeouts.for_kind(request.kind);
        let deadline = match &request.cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        let url = self.url_for(&request)?;
        let bearer = request
            .bearer
            .clone()
            .or_else(|| self.token.get())
            .unwrap_or_else(|| self.anon_key.clone());

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
            .header("apikey", &self.anon_key);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(
            method = %request.method,
            path = %request.path,
            timeout_ms = timeout.as_millis() as u64,
            "sending {}",
            request.operation
        );

        let call = async {
            let response = builder.send().await.map_err(|e| classify_transport(&request, timeout, e))?;
            read_response(response).await
        };

        let result = tokio::select! {
            biased;
            _ = deadline.cancelled() => Err(RequestError::Aborted {
                operation: request.operation.clone(),
            }),
            _ = tokio::time::sleep(timeout) => {
                deadline.cancel();
                Err(RequestError::Timeout {
                    operation: request.operation.clone(),
                    after: timeout,
                })
            }
            result = call => result,
        };

        match &result {
            Err(RequestError::Timeout { after, .. }) => {
                warn!(path = %request.path, ?after, "{} timed out", request.operation)
            }
            Err(RequestError::Http { status, message }) if *status >= 500 => {
                error!(path = %request.path, status, "{} failed: {}", request.operation, message)
            }
            Err(err) => debug!(path = %request.path, "{} failed: {}", request.operation, err),
            Ok(_) => debug!(path = %request.path, "{} succeeded", request.operation),
        }

        result
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, RequestError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| RequestError::Validation(format!("{}: invalid URL: {}", request.operation, e)))?;
        if !request.segments.is_empty() {
            url.path_segments_mut()
                .map_err(|_| RequestError::Validation(format!("{}: base URL cannot take a path", request.operation)))?
                .pop_if_empty()
                .extend(&request.segments);
        }
        Ok(url)
    }
}

fn classify_transport(request: &ApiRequest, timeout: Duration, err: reqwest::Error) -> RequestError {
    if err.is_timeout() {
        RequestError::Timeout {
            operation: request.operation.clone(),
            after: timeout,
        }
    } else if err.is_builder() {
        RequestError::Validation(err.to_string())
    } else {
        RequestError::Network(err.to_string())
    }
}

async fn read_response(response: Response) -> Result<Value, RequestError> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("json"))
        .unwrap_or(false);

    let body = response
        .text()
        .await
        .map_err(|e| RequestError::Network(e.to_string()))?;

    let payload = if is_json && !body.trim().is_empty() {
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Some(value),
            Err(e) if status.is_success() => {
                return Err(RequestError::Decode(format!("invalid JSON body: {}", e)))
            }
            Err(_) => None,
        }
    } else {
        None
    };

    if !status.is_success() {
        let message = payload
            .as_ref()
            .and_then(extract_error_message)
            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
        return Err(RequestError::Http {
            status: status.as_u16(),
            message,
        });
    }

    Ok(match payload {
        Some(value) => value,
        None if body.trim().is_empty() => Value::Null,
        None => Value::String(body),
    })
}

/// `payload.error` (string, or object with `message`) → `payload.message`
/// → auth-style `error_description` / `msg`.
pub fn extract_error_message(payload: &Value) -> Option<String> {
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let error = payload.get("error");
    non_empty(error)
        .or_else(|| non_empty(error.and_then(|e| e.get("message"))))
        .or_else(|| non_empty(payload.get("message")))
        .or_else(|| non_empty(payload.get("error_description")))
        .or_else(|| non_empty(payload.get("msg")))
}
