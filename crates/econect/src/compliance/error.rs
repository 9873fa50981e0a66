use axum::http::StatusCode;

use super::domain::{Module, PermissionAction, RemittanceId, RemittanceStatus, UnitId};
use super::repository::StoreError;
use super::transform::TransformError;
use super::validation::ValidationResultItem;

/// Errors raised by the compliance pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("principal lacks '{action}' permission for unit {unit_id:?} / module {module:?}")]
    Forbidden {
        action: PermissionAction,
        unit_id: Option<UnitId>,
        module: Option<Module>,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("remittance {remittance_id} {reason}, current status {status}")]
    InvalidTransition {
        remittance_id: RemittanceId,
        reason: &'static str,
        status: RemittanceStatus,
    },
    #[error("record failed validation with {} blocking violation(s)", .violations.len())]
    ValidationBlocked { violations: Vec<ValidationResultItem> },
    #[error("transmission of remittance {remittance_id} failed: {message}")]
    Transmission {
        remittance_id: RemittanceId,
        message: String,
        errors: Vec<String>,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Store(StoreError),
}

impl ComplianceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ComplianceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ComplianceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ComplianceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ComplianceError::Conflict(_) => StatusCode::CONFLICT,
            ComplianceError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            ComplianceError::ValidationBlocked { .. } | ComplianceError::Transform(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ComplianceError::Transmission { .. } => StatusCode::BAD_GATEWAY,
            ComplianceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ComplianceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { entity, id } => ComplianceError::NotFound { entity, id },
            StoreError::Conflict(message) => ComplianceError::Conflict(message),
            other => ComplianceError::Store(other),
        }
    }
}
