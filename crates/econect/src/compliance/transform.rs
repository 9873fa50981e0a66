use serde_json::{json, Value};

use super::domain::{Module, SourceRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("{module} payload must be a JSON object to be mapped")]
    UnsupportedPayload { module: Module },
    #[error("mapping failed for {module}: {reason}")]
    Mapping { module: Module, reason: String },
}

/// Converts a validated source record into the authority's target schema.
pub trait TransformMapper: Send + Sync {
    fn transform(&self, record: &SourceRecord) -> Result<Value, TransformError>;
}

/// Wraps the record payload in the submission envelope expected by the authority.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeMapper;

impl TransformMapper for EnvelopeMapper {
    fn transform(&self, record: &SourceRecord) -> Result<Value, TransformError> {
        if !record.payload.is_object() {
            return Err(TransformError::UnsupportedPayload {
                module: record.module,
            });
        }

        Ok(json!({
            "modulo": record.module,
            "competencia": record.competency,
            "unidade": record.unit_id,
            "dados": record.payload,
        }))
    }
}
