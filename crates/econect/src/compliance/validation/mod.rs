mod operators;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{
    Module, NewValidationResult, RuleId, RuleLevel, SourceRecord, SourceRecordId,
    ValidationResult,
};
use super::error::ComplianceError;
use super::locks::KeyedLocks;
use super::repository::RecordStore;

use operators::{canonical_string, field_value, violates};

/// One fired rule as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResultItem {
    pub rule_id: RuleId,
    pub code: String,
    pub level: RuleLevel,
    pub field: String,
    pub message: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub blocking: usize,
    pub advisory: usize,
}

/// Result of one validation pass over a source record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub record_id: SourceRecordId,
    pub module: Module,
    pub has_blocking_errors: bool,
    pub violations: Vec<ValidationResultItem>,
    pub summary: ValidationSummary,
}

impl ValidationOutcome {
    pub fn blocking_violations(&self) -> Vec<ValidationResultItem> {
        self.violations
            .iter()
            .filter(|item| item.level.is_blocking())
            .cloned()
            .collect()
    }
}

/// Evaluates the active rules of a record's module against its payload.
///
/// Passes over the same record are serialized so a revalidation never
/// interleaves its clear/regenerate steps with another pass.
pub struct ValidationEngine<S> {
    store: Arc<S>,
    locks: KeyedLocks<SourceRecordId>,
}

impl<S> ValidationEngine<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: KeyedLocks::default(),
        }
    }

    pub fn evaluate(&self, record_id: SourceRecordId) -> Result<ValidationOutcome, ComplianceError> {
        self.locks.run(record_id, || -> Result<_, ComplianceError> {
            let record = self.fetch_record(record_id)?;
            self.run_pass(&record)
        })
    }

    /// Clear every stored result for the record, then evaluate again.
    pub fn revalidate(
        &self,
        record_id: SourceRecordId,
    ) -> Result<ValidationOutcome, ComplianceError> {
        self.locks.run(record_id, || -> Result<_, ComplianceError> {
            let record = self.fetch_record(record_id)?;
            let cleared = self.store.clear_validation_results(record_id)?;
            debug!(record = %record_id, cleared, "cleared previous validation results");
            self.run_pass(&record)
        })
    }

    pub fn list_results(
        &self,
        record_id: SourceRecordId,
    ) -> Result<Vec<ValidationResult>, ComplianceError> {
        self.fetch_record(record_id)?;
        Ok(self.store.validation_results(record_id)?)
    }

    pub fn clear_results(&self, record_id: SourceRecordId) -> Result<usize, ComplianceError> {
        self.locks.run(record_id, || -> Result<_, ComplianceError> {
            self.fetch_record(record_id)?;
            Ok(self.store.clear_validation_results(record_id)?)
        })
    }

    fn fetch_record(&self, record_id: SourceRecordId) -> Result<SourceRecord, ComplianceError> {
        self.store
            .fetch_record(record_id)?
            .ok_or_else(|| ComplianceError::not_found("source record", record_id))
    }

    fn run_pass(&self, record: &SourceRecord) -> Result<ValidationOutcome, ComplianceError> {
        let rules = self.store.active_rules(record.module)?;
        let mut violations = Vec::new();

        for rule in &rules {
            let value = field_value(&record.payload, &rule.field);
            if !violates(rule.operator, value, &rule.value) {
                continue;
            }

            let observed = canonical_string(value);
            self.store.insert_validation_result(NewValidationResult {
                record_id: record.id,
                rule_id: rule.id,
                code: rule.code.clone(),
                level: rule.level,
                field: rule.field.clone(),
                message: rule.message.clone(),
                value: observed.clone(),
            })?;

            violations.push(ValidationResultItem {
                rule_id: rule.id,
                code: rule.code.clone(),
                level: rule.level,
                field: rule.field.clone(),
                message: rule.message.clone(),
                value: observed,
            });
        }

        let blocking = violations
            .iter()
            .filter(|item| item.level.is_blocking())
            .count();
        let summary = ValidationSummary {
            total: violations.len(),
            blocking,
            advisory: violations.len() - blocking,
        };

        info!(
            record = %record.id,
            module = %record.module,
            rules = rules.len(),
            violations = summary.total,
            blocking,
            "validation pass finished"
        );

        Ok(ValidationOutcome {
            record_id: record.id,
            module: record.module,
            has_blocking_errors: blocking > 0,
            violations,
            summary,
        })
    }
}
