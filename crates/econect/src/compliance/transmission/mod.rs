mod transport;

pub use transport::{
    HttpTransport, MockOutcome, MockTransport, TceReply, TceTransport, TransmissionRequest,
    TransportError,
};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::domain::{LogDirection, NewRemittanceLog, Remittance, Unit, UnitEnvironment};
use super::repository::RecordStore;
use crate::config::TransmissionConfig;

/// Sent when a unit has no usable credential for its environment.
pub const PLACEHOLDER_TOKEN: &str = "mock-token";
const TOKEN_PREFIX_LEN: usize = 10;

/// Structured outcome of one transmission attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransmissionReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub status_code: u16,
    pub duration_ms: u64,
}

/// Sends remittance payloads through a [`TceTransport`] and records the
/// request/response exchange on the remittance log.
pub struct TransmissionAdapter<S> {
    store: Arc<S>,
    transport: Box<dyn TceTransport>,
    base_url: String,
}

impl<S> TransmissionAdapter<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>, transport: Box<dyn TceTransport>, base_url: impl Into<String>) -> Self {
        Self {
            store,
            transport,
            base_url: base_url.into(),
        }
    }

    /// Pick the mock or HTTP transport from configuration.
    pub fn from_config(store: Arc<S>, config: &TransmissionConfig) -> Result<Self, TransportError> {
        let transport: Box<dyn TceTransport> = if config.mock {
            Box::new(MockTransport::new(config.mock_outcome))
        } else {
            Box::new(HttpTransport::new(config.timeout)?)
        };
        Ok(Self::new(store, transport, config.base_url.clone()))
    }

    pub fn mode(&self) -> &'static str {
        self.transport.mode()
    }

    /// Deliver the remittance payload. Never fails: transport errors are
    /// folded into an unsuccessful report.
    pub fn transmit(&self, remittance: &Remittance) -> TransmissionReport {
        let (endpoint, method) = self.resolve_endpoint(remittance);
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), endpoint);
        let token = self.resolve_token(remittance);

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", redact_token(&token)),
        );

        self.append_log(NewRemittanceLog {
            remittance_id: remittance.id,
            direction: LogDirection::Request,
            url: Some(url.clone()),
            method: Some(method.clone()),
            headers: Some(headers),
            body: remittance.payload.clone(),
            status_code: None,
            duration_ms: None,
        });

        let request = TransmissionRequest {
            url,
            method,
            token,
            body: remittance.payload.clone(),
        };

        let started = Instant::now();
        let outcome = self.transport.deliver(&request);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (report, body) = match outcome {
            Ok(reply) => {
                let status_code = if reply.accepted { 200 } else { reply.status_code };
                let report = TransmissionReport {
                    success: reply.accepted,
                    protocol: reply.protocol,
                    message: reply.message,
                    errors: reply.errors,
                    status_code,
                    duration_ms,
                };
                (report, reply.body)
            }
            Err(err) => {
                let message = err.to_string();
                let body = json!({ "success": false, "message": message });
                let report = TransmissionReport {
                    success: false,
                    protocol: None,
                    message,
                    errors: Vec::new(),
                    status_code: 500,
                    duration_ms,
                };
                (report, body)
            }
        };

        self.append_log(NewRemittanceLog {
            remittance_id: remittance.id,
            direction: LogDirection::Response,
            url: None,
            method: None,
            headers: None,
            body,
            status_code: Some(report.status_code),
            duration_ms: Some(duration_ms),
        });

        info!(
            remittance = %remittance.id,
            mode = self.transport.mode(),
            success = report.success,
            status = report.status_code,
            duration_ms,
            "transmission attempt finished"
        );
        report
    }

    fn resolve_endpoint(&self, remittance: &Remittance) -> (String, String) {
        match self.store.active_endpoint(remittance.module) {
            Ok(Some(config)) => (config.endpoint, config.method.to_ascii_uppercase()),
            Ok(None) => (remittance.module.default_endpoint(), "POST".to_string()),
            Err(err) => {
                warn!(module = %remittance.module, error = %err, "endpoint lookup failed, using default path");
                (remittance.module.default_endpoint(), "POST".to_string())
            }
        }
    }

    fn resolve_token(&self, remittance: &Remittance) -> String {
        match self.store.fetch_unit(remittance.unit_id) {
            Ok(Some(unit)) => select_token(&unit),
            Ok(None) => {
                warn!(unit = %remittance.unit_id, "unit not found, sending placeholder token");
                PLACEHOLDER_TOKEN.to_string()
            }
            Err(err) => {
                warn!(unit = %remittance.unit_id, error = %err, "unit lookup failed, sending placeholder token");
                PLACEHOLDER_TOKEN.to_string()
            }
        }
    }

    fn append_log(&self, log: NewRemittanceLog) {
        let remittance_id = log.remittance_id;
        let direction = log.direction;
        if let Err(err) = self.store.append_log(log) {
            warn!(remittance = %remittance_id, ?direction, error = %err, "failed to persist remittance log");
        }
    }
}

/// Credential for the unit's configured environment.
pub fn select_token(unit: &Unit) -> String {
    let configured = |token: &Option<String>| {
        token
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
    };
    let token = match unit.environment {
        UnitEnvironment::Producao => {
            configured(&unit.production_token).or_else(|| configured(&unit.homologation_token))
        }
        UnitEnvironment::Homologacao => configured(&unit.homologation_token),
    };
    token.unwrap_or_else(|| PLACEHOLDER_TOKEN.to_string())
}

/// Keep a short token prefix for the audit trail.
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(TOKEN_PREFIX_LEN).collect();
    format!("{prefix}...")
}
