use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::audit::{self, AuditAction, AuditEntry, AuditSink};
use super::domain::{
    NewRemittance, PermissionAction, Principal, RecordStatus, Remittance, RemittanceId,
    RemittanceLog, RemittanceStatus, SourceRecord, SourceRecordId,
};
use super::error::ComplianceError;
use super::locks::KeyedLocks;
use super::permissions::PermissionResolver;
use super::repository::{Page, RecordStore, RemittanceQuery, RemittanceStats};
use super::transform::TransformMapper;
use super::transmission::{TransmissionAdapter, TransmissionReport};
use super::validation::ValidationEngine;

/// Successful transmission: the persisted remittance and the adapter report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendResult {
    pub remittance: Remittance,
    pub transmission: TransmissionReport,
}

/// Drives a remittance from creation through transmission, retry and cancellation.
///
/// Every operation looks the entity up first, then checks the caller's
/// capability on the entity's unit and module.
pub struct RemittanceService<S> {
    store: Arc<S>,
    permissions: Arc<PermissionResolver<S>>,
    validation: Arc<ValidationEngine<S>>,
    transmission: TransmissionAdapter<S>,
    mapper: Arc<dyn TransformMapper>,
    audit: Arc<dyn AuditSink>,
    creation: KeyedLocks<SourceRecordId>,
}

impl<S> RemittanceService<S>
where
    S: RecordStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        permissions: Arc<PermissionResolver<S>>,
        validation: Arc<ValidationEngine<S>>,
        transmission: TransmissionAdapter<S>,
        mapper: Arc<dyn TransformMapper>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            permissions,
            validation,
            transmission,
            mapper,
            audit,
            creation: KeyedLocks::default(),
        }
    }

    /// Validate, transform and persist a `READY` remittance for a source record.
    pub fn create(
        &self,
        principal: &Principal,
        record_id: SourceRecordId,
    ) -> Result<Remittance, ComplianceError> {
        let record = self
            .store
            .fetch_record(record_id)?
            .ok_or_else(|| ComplianceError::not_found("source record", record_id))?;
        self.permissions.require(
            principal,
            Some(record.unit_id),
            Some(record.module),
            PermissionAction::Create,
        )?;

        self.creation.run(record_id, || -> Result<Remittance, ComplianceError> {
            let active = self
                .store
                .remittances_for_record(record_id)?
                .into_iter()
                .find(|remittance| remittance.status.blocks_new_remittance());
            if let Some(existing) = active {
                return Err(ComplianceError::Conflict(format!(
                    "source record {record_id} already has remittance {} in status {}",
                    existing.id, existing.status
                )));
            }

            self.store
                .set_record_status(record_id, RecordStatus::Processing)?;
            let created = self.build_remittance(&record);
            let status = if created.is_ok() {
                RecordStatus::Processed
            } else {
                RecordStatus::Error
            };
            self.mark_record(record_id, status);

            let remittance = created?;
            info!(
                remittance = %remittance.id,
                record = %record_id,
                module = %remittance.module,
                "remittance ready for transmission"
            );
            self.emit(
                AuditAction::Create,
                principal,
                remittance.id,
                json!({ "source_record_id": record_id, "module": remittance.module }),
            );
            Ok(remittance)
        })
    }

    fn build_remittance(&self, record: &SourceRecord) -> Result<Remittance, ComplianceError> {
        let outcome = self.validation.revalidate(record.id)?;
        if outcome.has_blocking_errors {
            let violations = outcome.blocking_violations();
            info!(
                record = %record.id,
                blocking = violations.len(),
                "remittance creation blocked by validation"
            );
            return Err(ComplianceError::ValidationBlocked { violations });
        }

        let payload = self.mapper.transform(record)?;
        Ok(self.store.insert_remittance(NewRemittance {
            source_record_id: record.id,
            unit_id: record.unit_id,
            module: record.module,
            competency: record.competency,
            status: RemittanceStatus::Ready,
            payload,
        })?)
    }

    fn mark_record(&self, record_id: SourceRecordId, status: RecordStatus) {
        if let Err(err) = self.store.set_record_status(record_id, status) {
            warn!(record = %record_id, ?status, error = %err, "failed to update source record status");
        }
    }

    /// Page of remittances restricted to the units the caller may view.
    pub fn list(
        &self,
        principal: &Principal,
        mut query: RemittanceQuery,
    ) -> Result<Page<Remittance>, ComplianceError> {
        query.units = self
            .permissions
            .permitted_units(principal, PermissionAction::View)?;
        query.page = query.page.max(1);
        query.limit = query.limit.max(1);
        Ok(self.store.query_remittances(&query)?)
    }

    pub fn get(
        &self,
        principal: &Principal,
        id: RemittanceId,
    ) -> Result<Remittance, ComplianceError> {
        let remittance = self.fetch(id)?;
        self.require(principal, &remittance, PermissionAction::View)?;
        Ok(remittance)
    }

    pub fn logs(
        &self,
        principal: &Principal,
        id: RemittanceId,
    ) -> Result<Vec<RemittanceLog>, ComplianceError> {
        let remittance = self.fetch(id)?;
        self.require(principal, &remittance, PermissionAction::View)?;
        Ok(self.store.logs_for(id)?)
    }

    pub fn stats(&self, principal: &Principal) -> Result<RemittanceStats, ComplianceError> {
        let units = self
            .permissions
            .permitted_units(principal, PermissionAction::View)?;
        Ok(self.store.remittance_stats(&units)?)
    }

    /// Transmit a `READY` remittance.
    ///
    /// The `READY -> SENDING` claim is persisted before the outbound call, so a
    /// concurrent send observes `SENDING` and fails. A failed transmission is
    /// recorded as `ERROR` before the error is returned.
    pub fn send(
        &self,
        principal: &Principal,
        id: RemittanceId,
    ) -> Result<SendResult, ComplianceError> {
        let remittance = self.fetch(id)?;
        self.require(principal, &remittance, PermissionAction::Transmit)?;
        if remittance.status != RemittanceStatus::Ready {
            return Err(not_ready(&remittance));
        }

        let claimed = match self.store.transition_remittance(
            id,
            RemittanceStatus::Ready,
            &|remittance| remittance.status = RemittanceStatus::Sending,
        )? {
            Some(claimed) => claimed,
            None => return Err(not_ready(&self.fetch(id)?)),
        };
        info!(remittance = %id, mode = self.transmission.mode(), "transmitting remittance");

        let report = self.transmission.transmit(&claimed);

        let mut finished = claimed;
        if report.success {
            finished.status = RemittanceStatus::Sent;
            finished.protocol = report.protocol.clone();
            finished.sent_at = Some(Utc::now());
            finished.error_msg = None;
            let finished = self.store.update_remittance(finished)?;
            info!(remittance = %id, protocol = ?finished.protocol, "remittance sent");
            self.emit(AuditAction::Send, principal, id, json!({ "success": true, "protocol": finished.protocol }));
            return Ok(SendResult {
                remittance: finished,
                transmission: report,
            });
        }

        finished.status = RemittanceStatus::Error;
        finished.error_msg = Some(error_message(&report));
        self.store.update_remittance(finished)?;
        warn!(remittance = %id, status = report.status_code, message = %report.message, "remittance transmission failed");
        self.emit(AuditAction::Send, principal, id, json!({ "success": false, "message": report.message }));

        Err(ComplianceError::Transmission {
            remittance_id: id,
            message: report.message,
            errors: report.errors,
        })
    }

    /// Move any non-terminal remittance to `CANCELLED`.
    pub fn cancel(
        &self,
        principal: &Principal,
        id: RemittanceId,
    ) -> Result<Remittance, ComplianceError> {
        let mut current = self.fetch(id)?;
        self.require(principal, &current, PermissionAction::Delete)?;

        loop {
            if current.status.is_terminal() {
                return Err(ComplianceError::InvalidTransition {
                    remittance_id: id,
                    reason: "cannot be cancelled",
                    status: current.status,
                });
            }

            let previous = current.status;
            let cancelled = self.store.transition_remittance(id, previous, &|remittance| {
                remittance.status = RemittanceStatus::Cancelled
            })?;
            match cancelled {
                Some(cancelled) => {
                    info!(remittance = %id, from = %previous, "remittance cancelled");
                    self.emit(AuditAction::Cancel, principal, id, json!({ "from": previous }));
                    return Ok(cancelled);
                }
                // status moved underneath us; re-read and decide again
                None => current = self.fetch(id)?,
            }
        }
    }

    /// Reset an `ERROR` remittance to `READY`, clearing its error message.
    /// Validation and transformation are not repeated.
    pub fn retry(
        &self,
        principal: &Principal,
        id: RemittanceId,
    ) -> Result<Remittance, ComplianceError> {
        let remittance = self.fetch(id)?;
        self.require(principal, &remittance, PermissionAction::Transmit)?;
        if remittance.status != RemittanceStatus::Error {
            return Err(cannot_retry(&remittance));
        }

        // Shares the creation lock: a newer remittance for the same record
        // may have been created while this one sat in ERROR.
        let record_id = remittance.source_record_id;
        self.creation.run(record_id, || -> Result<Remittance, ComplianceError> {
            let newer = self
                .store
                .remittances_for_record(record_id)?
                .into_iter()
                .find(|other| other.id != id && other.status.blocks_new_remittance());
            if let Some(newer) = newer {
                return Err(ComplianceError::Conflict(format!(
                    "source record {record_id} already has remittance {} in status {}",
                    newer.id, newer.status
                )));
            }

            let ready =
                self.store
                    .transition_remittance(id, RemittanceStatus::Error, &|remittance| {
                        remittance.status = RemittanceStatus::Ready;
                        remittance.error_msg = None;
                    })?;
            match ready {
                Some(ready) => {
                    info!(remittance = %id, "remittance queued for retry");
                    self.emit(AuditAction::Retry, principal, id, json!({}));
                    Ok(ready)
                }
                None => Err(cannot_retry(&self.fetch(id)?)),
            }
        })
    }

    fn fetch(&self, id: RemittanceId) -> Result<Remittance, ComplianceError> {
        self.store
            .fetch_remittance(id)?
            .ok_or_else(|| ComplianceError::not_found("remittance", id))
    }

    fn require(
        &self,
        principal: &Principal,
        remittance: &Remittance,
        action: PermissionAction,
    ) -> Result<(), ComplianceError> {
        self.permissions.require(
            principal,
            Some(remittance.unit_id),
            Some(remittance.module),
            action,
        )
    }

    fn emit(
        &self,
        action: AuditAction,
        principal: &Principal,
        id: RemittanceId,
        detail: serde_json::Value,
    ) {
        audit::emit(
            self.audit.as_ref(),
            AuditEntry::new(action, "remittance", id, principal.id, detail),
        );
    }
}

fn not_ready(remittance: &Remittance) -> ComplianceError {
    ComplianceError::InvalidTransition {
        remittance_id: remittance.id,
        reason: "is not ready for transmission",
        status: remittance.status,
    }
}

fn cannot_retry(remittance: &Remittance) -> ComplianceError {
    ComplianceError::InvalidTransition {
        remittance_id: remittance.id,
        reason: "can only be retried from ERROR",
        status: remittance.status,
    }
}

fn error_message(report: &TransmissionReport) -> String {
    if report.errors.is_empty() {
        report.message.clone()
    } else {
        format!("{}: {}", report.message, report.errors.join("; "))
    }
}
