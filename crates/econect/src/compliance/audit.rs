use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::domain::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Send,
    Cancel,
    Retry,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Send => "send",
            AuditAction::Cancel => "cancel",
            AuditAction::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity: &'static str,
    pub entity_id: String,
    pub principal_id: UserId,
    pub detail: Value,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        entity: &'static str,
        entity_id: impl ToString,
        principal_id: UserId,
        detail: Value,
    ) -> Self {
        Self {
            action,
            entity,
            entity_id: entity_id.to_string(),
            principal_id,
            detail,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("audit sink rejected entry: {0}")]
pub struct AuditError(pub String);

/// Append-only destination for audit entries.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Emit an entry, logging sink failures instead of returning them.
pub(crate) fn emit(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action;
    let entity_id = entry.entity_id.clone();
    if let Err(err) = sink.record(entry) {
        warn!(action = action.label(), entity = %entity_id, error = %err, "audit entry dropped");
    }
}

/// Writes audit entries as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        info!(
            target: "econect::audit",
            action = entry.action.label(),
            entity = entry.entity,
            entity_id = %entry.entity_id,
            principal = %entry.principal_id,
            detail = %entry.detail,
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory; used by tests and the demo.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|_| AuditError("memory sink poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _entry: AuditEntry) -> Result<(), AuditError> {
            Err(AuditError("disk full".to_string()))
        }
    }

    #[test]
    fn emit_swallows_sink_failures() {
        emit(
            &FailingSink,
            AuditEntry::new(AuditAction::Send, "remittance", 3, UserId(1), json!({})),
        );
    }

    #[test]
    fn memory_sink_keeps_entries_in_order() {
        let sink = MemoryAuditSink::default();
        emit(
            &sink,
            AuditEntry::new(AuditAction::Create, "remittance", 1, UserId(2), json!({})),
        );
        emit(
            &sink,
            AuditEntry::new(AuditAction::Cancel, "remittance", 1, UserId(2), json!({})),
        );

        let actions: Vec<_> = sink.entries().iter().map(|entry| entry.action).collect();
        assert_eq!(actions, vec![AuditAction::Create, AuditAction::Cancel]);
    }
}
