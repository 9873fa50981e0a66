use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

/// Outbound call prepared by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionRequest {
    pub url: String,
    pub method: String,
    pub token: String,
    pub body: Value,
}

/// What the authority answered, accepted or not.
#[derive(Debug, Clone, PartialEq)]
pub struct TceReply {
    pub status_code: u16,
    pub accepted: bool,
    pub protocol: Option<String>,
    pub message: String,
    pub errors: Vec<String>,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("could not reach {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Strategy for delivering a payload to the oversight authority.
pub trait TceTransport: Send + Sync {
    fn deliver(&self, request: &TransmissionRequest) -> Result<TceReply, TransportError>;

    fn mode(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MockOutcome {
    #[default]
    Accept,
    Reject,
    Unreachable,
}

impl FromStr for MockOutcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accept" | "success" => Ok(MockOutcome::Accept),
            "reject" | "rejected" => Ok(MockOutcome::Reject),
            "unreachable" | "error" => Ok(MockOutcome::Unreachable),
            other => Err(format!("unknown mock outcome '{other}'")),
        }
    }
}

/// Deterministic stand-in for environments without connectivity to the authority.
#[derive(Debug, Default)]
pub struct MockTransport {
    outcome: MockOutcome,
    sequence: AtomicU64,
}

impl MockTransport {
    pub fn new(outcome: MockOutcome) -> Self {
        Self {
            outcome,
            sequence: AtomicU64::new(0),
        }
    }

    fn next_protocol(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("TCE-{}-{seq:06}", Utc::now().format("%Y%m%d"))
    }
}

impl TceTransport for MockTransport {
    fn deliver(&self, request: &TransmissionRequest) -> Result<TceReply, TransportError> {
        match self.outcome {
            MockOutcome::Accept => {
                let protocol = self.next_protocol();
                let message = "Remessa recebida com sucesso".to_string();
                Ok(TceReply {
                    status_code: 200,
                    accepted: true,
                    body: json!({
                        "success": true,
                        "protocolo": protocol,
                        "message": message,
                    }),
                    protocol: Some(protocol),
                    message,
                    errors: Vec::new(),
                })
            }
            MockOutcome::Reject => {
                let message = "Remessa rejeitada pelo TCE".to_string();
                let errors = vec!["Layout do arquivo divergente do esperado".to_string()];
                Ok(TceReply {
                    status_code: 400,
                    accepted: false,
                    body: json!({
                        "success": false,
                        "message": message,
                        "errors": errors,
                    }),
                    protocol: None,
                    message,
                    errors,
                })
            }
            MockOutcome::Unreachable => Err(TransportError::Unreachable {
                url: request.url.clone(),
                reason: "connection refused".to_string(),
            }),
        }
    }

    fn mode(&self) -> &'static str {
        "mock"
    }
}

/// Bearer-authenticated HTTP client for the authority's API.
///
/// Blocking: callers on an async runtime must run `deliver` on the blocking pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
        Ok(Self { client })
    }
}

impl TceTransport for HttpTransport {
    fn deliver(&self, request: &TransmissionRequest) -> Result<TceReply, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("method '{}'", request.method)))?;

        let response = self
            .client
            .request(method, &request.url)
            .bearer_auth(&request.token)
            .json(&request.body)
            .send()
            .map_err(|err| classify(&request.url, err))?;

        let status = response.status();
        let text = response.text().map_err(|err| classify(&request.url, err))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);

        if status.is_success() {
            return Ok(TceReply {
                status_code: status.as_u16(),
                accepted: true,
                protocol: body
                    .get("protocolo")
                    .or_else(|| body.get("protocol"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                message: message.unwrap_or_else(|| "Remessa enviada com sucesso".to_string()),
                errors: Vec::new(),
                body,
            });
        }

        let errors = body
            .get("errors")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(TceReply {
            status_code: status.as_u16(),
            accepted: false,
            protocol: None,
            message: message
                .unwrap_or_else(|| format!("TCE respondeu com status {}", status.as_u16())),
            errors,
            body,
        })
    }

    fn mode(&self) -> &'static str {
        "http"
    }
}

fn classify(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Unreachable {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}
