use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    Competency, EndpointConfig, GrantId, Module, NewEndpointConfig, NewGrant, NewRemittance,
    NewRemittanceLog, NewSourceRecord, NewValidationResult, NewValidationRule, Principal,
    RecordStatus, Remittance, RemittanceId, RemittanceLog, RemittanceStatus, SourceRecord,
    SourceRecordId, Unit, UnitId, UserId, UserPermissionGrant, ValidationResult, ValidationRule,
};
use super::permissions::PermittedScope;

/// Persistent store behind the pipeline.
///
/// Implementations must make each method atomic on its own; the pipeline never
/// spans a transaction across calls. `transition_remittance` is the only
/// compare-and-set primitive and backs the `READY -> SENDING` claim.
pub trait RecordStore: Send + Sync {
    fn insert_record(&self, record: NewSourceRecord) -> Result<SourceRecord, StoreError>;
    fn fetch_record(&self, id: SourceRecordId) -> Result<Option<SourceRecord>, StoreError>;
    fn set_record_status(
        &self,
        id: SourceRecordId,
        status: RecordStatus,
    ) -> Result<SourceRecord, StoreError>;

    fn insert_rule(&self, rule: NewValidationRule) -> Result<ValidationRule, StoreError>;
    /// Snapshot of the active rules for a module.
    fn active_rules(&self, module: Module) -> Result<Vec<ValidationRule>, StoreError>;
    fn rules(&self, module: Option<Module>) -> Result<Vec<ValidationRule>, StoreError>;

    fn insert_validation_result(
        &self,
        result: NewValidationResult,
    ) -> Result<ValidationResult, StoreError>;
    fn validation_results(
        &self,
        record_id: SourceRecordId,
    ) -> Result<Vec<ValidationResult>, StoreError>;
    fn clear_validation_results(&self, record_id: SourceRecordId) -> Result<usize, StoreError>;

    fn insert_remittance(&self, remittance: NewRemittance) -> Result<Remittance, StoreError>;
    fn fetch_remittance(&self, id: RemittanceId) -> Result<Option<Remittance>, StoreError>;
    fn update_remittance(&self, remittance: Remittance) -> Result<Remittance, StoreError>;
    /// Applies `change` only when the current status is `expected`, in one
    /// atomic step. Returns `None` when the status did not match.
    fn transition_remittance(
        &self,
        id: RemittanceId,
        expected: RemittanceStatus,
        change: &dyn Fn(&mut Remittance),
    ) -> Result<Option<Remittance>, StoreError>;
    fn remittances_for_record(
        &self,
        record_id: SourceRecordId,
    ) -> Result<Vec<Remittance>, StoreError>;
    fn query_remittances(&self, query: &RemittanceQuery) -> Result<Page<Remittance>, StoreError>;
    fn remittance_stats(
        &self,
        units: &PermittedScope<UnitId>,
    ) -> Result<RemittanceStats, StoreError>;

    fn append_log(&self, log: NewRemittanceLog) -> Result<RemittanceLog, StoreError>;
    /// Logs for a remittance ordered by creation time.
    fn logs_for(&self, remittance_id: RemittanceId) -> Result<Vec<RemittanceLog>, StoreError>;

    fn insert_unit(&self, unit: Unit) -> Result<Unit, StoreError>;
    fn fetch_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError>;

    fn insert_endpoint_config(
        &self,
        config: NewEndpointConfig,
    ) -> Result<EndpointConfig, StoreError>;
    fn active_endpoint(&self, module: Module) -> Result<Option<EndpointConfig>, StoreError>;

    fn grants_for(&self, user_id: UserId) -> Result<Vec<UserPermissionGrant>, StoreError>;
    fn fetch_grant(&self, id: GrantId) -> Result<Option<UserPermissionGrant>, StoreError>;
    fn insert_grant(&self, grant: NewGrant) -> Result<UserPermissionGrant, StoreError>;
    fn update_grant(&self, grant: UserPermissionGrant) -> Result<UserPermissionGrant, StoreError>;
    fn delete_grant(&self, id: GrantId) -> Result<(), StoreError>;
    fn delete_grants_for(&self, user_id: UserId) -> Result<usize, StoreError>;
}

/// Source of authenticated principals; credentials are managed elsewhere.
pub trait IdentityProvider: Send + Sync {
    fn principal(&self, id: UserId) -> Result<Option<Principal>, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Filters accepted by the remittance listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RemittanceQuery {
    pub status: Option<RemittanceStatus>,
    pub module: Option<Module>,
    pub competency: Option<Competency>,
    pub unit_id: Option<UnitId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Units visible to the caller.
    pub units: PermittedScope<UnitId>,
    /// One-based page number.
    pub page: usize,
    pub limit: usize,
}

impl Default for RemittanceQuery {
    fn default() -> Self {
        Self {
            status: None,
            module: None,
            competency: None,
            unit_id: None,
            from: None,
            to: None,
            units: PermittedScope::All,
            page: 1,
            limit: 10,
        }
    }
}

impl RemittanceQuery {
    pub fn matches(&self, remittance: &Remittance) -> bool {
        self.status.map_or(true, |status| remittance.status == status)
            && self.module.map_or(true, |module| remittance.module == module)
            && self
                .competency
                .map_or(true, |competency| remittance.competency == competency)
            && self.unit_id.map_or(true, |unit| remittance.unit_id == unit)
            && self.from.map_or(true, |from| remittance.created_at >= from)
            && self.to.map_or(true, |to| remittance.created_at <= to)
            && self.units.contains(&remittance.unit_id)
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemittanceStats {
    pub total: usize,
    pub by_status: BTreeMap<RemittanceStatus, usize>,
    pub by_module: BTreeMap<Module, usize>,
}

impl RemittanceStats {
    pub fn record(&mut self, remittance: &Remittance) {
        self.total += 1;
        *self.by_status.entry(remittance.status).or_default() += 1;
        *self.by_module.entry(remittance.module).or_default() += 1;
    }
}
