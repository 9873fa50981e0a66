//! Compliance-submission pipeline: permission cascade, rule validation,
//! remittance lifecycle and transmission to the oversight authority (TCE).

pub mod audit;
pub mod catalog;
pub mod domain;
pub mod error;
pub(crate) mod locks;
pub mod memory;
pub mod permissions;
pub mod records;
pub mod remittance;
pub mod repository;
pub mod router;
pub mod service;
pub mod transform;
pub mod transmission;
pub mod validation;

#[cfg(test)]
mod tests;

pub use audit::{AuditAction, AuditEntry, AuditError, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use catalog::{load_rules, load_rules_from_path, RuleCatalogError};
pub use domain::{
    Competency, EndpointConfig, GrantChanges, LogDirection, Module, NewEndpointConfig, NewGrant,
    NewSourceRecord, NewValidationRule, PermissionAction, Principal, RecordStatus, Remittance,
    RemittanceId, RemittanceLog, RemittanceStatus, Role, RuleLevel, RuleOperator, SourceRecord,
    SourceRecordId, Unit, UnitEnvironment, UnitId, UserId, UserPermissionGrant, ValidationResult,
    ValidationRule,
};
pub use error::ComplianceError;
pub use memory::InMemoryRecordStore;
pub use permissions::{resolve_grant, PermissionResolver, PermittedScope};
pub use records::RecordService;
pub use remittance::{RemittanceService, SendResult};
pub use repository::{
    IdentityProvider, Page, RecordStore, RemittanceQuery, RemittanceStats, StoreError,
};
pub use router::{compliance_router, PRINCIPAL_HEADER};
pub use service::ComplianceService;
pub use transform::{EnvelopeMapper, TransformError, TransformMapper};
pub use transmission::{
    redact_token, select_token, HttpTransport, MockOutcome, MockTransport, TceReply,
    TceTransport, TransmissionAdapter, TransmissionReport, TransmissionRequest, TransportError,
    PLACEHOLDER_TOKEN,
};
pub use validation::{ValidationEngine, ValidationOutcome, ValidationResultItem, ValidationSummary};
