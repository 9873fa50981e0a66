use std::sync::Arc;

use tracing::info;

use super::domain::{
    Module, NewSourceRecord, PermissionAction, Principal, SourceRecord, SourceRecordId,
    ValidationResult, ValidationRule,
};
use super::error::ComplianceError;
use super::permissions::PermissionResolver;
use super::repository::RecordStore;
use super::validation::{ValidationEngine, ValidationOutcome};

/// Principal-facing access to source records and their validation results.
pub struct RecordService<S> {
    store: Arc<S>,
    permissions: Arc<PermissionResolver<S>>,
    validation: Arc<ValidationEngine<S>>,
}

impl<S> RecordService<S>
where
    S: RecordStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        permissions: Arc<PermissionResolver<S>>,
        validation: Arc<ValidationEngine<S>>,
    ) -> Self {
        Self {
            store,
            permissions,
            validation,
        }
    }

    /// Store a new record in `RECEIVED` status.
    pub fn ingest(
        &self,
        principal: &Principal,
        record: NewSourceRecord,
    ) -> Result<SourceRecord, ComplianceError> {
        if self.store.fetch_unit(record.unit_id)?.is_none() {
            return Err(ComplianceError::not_found("unit", record.unit_id));
        }
        self.permissions.require(
            principal,
            Some(record.unit_id),
            Some(record.module),
            PermissionAction::Create,
        )?;

        let stored = self.store.insert_record(record)?;
        info!(
            record = %stored.id,
            unit = %stored.unit_id,
            module = %stored.module,
            competency = %stored.competency,
            "source record received"
        );
        Ok(stored)
    }

    pub fn get(
        &self,
        principal: &Principal,
        id: SourceRecordId,
    ) -> Result<SourceRecord, ComplianceError> {
        self.authorized(principal, id, PermissionAction::View)
    }

    pub fn validate(
        &self,
        principal: &Principal,
        id: SourceRecordId,
    ) -> Result<ValidationOutcome, ComplianceError> {
        self.authorized(principal, id, PermissionAction::Edit)?;
        self.validation.evaluate(id)
    }

    pub fn revalidate(
        &self,
        principal: &Principal,
        id: SourceRecordId,
    ) -> Result<ValidationOutcome, ComplianceError> {
        self.authorized(principal, id, PermissionAction::Edit)?;
        self.validation.revalidate(id)
    }

    pub fn validations(
        &self,
        principal: &Principal,
        id: SourceRecordId,
    ) -> Result<Vec<ValidationResult>, ComplianceError> {
        self.authorized(principal, id, PermissionAction::View)?;
        self.validation.list_results(id)
    }

    pub fn clear_validations(
        &self,
        principal: &Principal,
        id: SourceRecordId,
    ) -> Result<usize, ComplianceError> {
        self.authorized(principal, id, PermissionAction::Delete)?;
        self.validation.clear_results(id)
    }

    /// Rule catalog, optionally narrowed to one module. Rules are
    /// configuration and readable by any active principal.
    pub fn rules(
        &self,
        principal: &Principal,
        module: Option<Module>,
    ) -> Result<Vec<ValidationRule>, ComplianceError> {
        if !principal.active {
            return Err(ComplianceError::Forbidden {
                action: PermissionAction::View,
                unit_id: None,
                module,
            });
        }
        Ok(self.store.rules(module)?)
    }

    fn authorized(
        &self,
        principal: &Principal,
        id: SourceRecordId,
        action: PermissionAction,
    ) -> Result<SourceRecord, ComplianceError> {
        let record = self
            .store
            .fetch_record(id)?
            .ok_or_else(|| ComplianceError::not_found("source record", id))?;
        self.permissions
            .require(principal, Some(record.unit_id), Some(record.module), action)?;
        Ok(record)
    }
}
