use std::sync::Arc;

use tracing::info;

use super::audit::{AuditSink, TracingAuditSink};
use super::domain::{NewValidationRule, Principal, UserId};
use super::permissions::PermissionResolver;
use super::records::RecordService;
use super::remittance::RemittanceService;
use super::repository::{IdentityProvider, RecordStore, StoreError};
use super::transform::{EnvelopeMapper, TransformMapper};
use super::transmission::{TransmissionAdapter, TransportError};
use super::validation::ValidationEngine;
use crate::config::TransmissionConfig;

/// Wires the resolver, validation engine, transmission adapter and remittance
/// state machine over one shared store.
pub struct ComplianceService<S> {
    store: Arc<S>,
    permissions: Arc<PermissionResolver<S>>,
    records: RecordService<S>,
    remittances: RemittanceService<S>,
}

impl<S> ComplianceService<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>, transmission: TransmissionAdapter<S>) -> Self {
        Self::with_collaborators(
            store,
            transmission,
            Arc::new(EnvelopeMapper),
            Arc::new(TracingAuditSink),
        )
    }

    pub fn from_config(store: Arc<S>, config: &TransmissionConfig) -> Result<Self, TransportError> {
        let transmission = TransmissionAdapter::from_config(store.clone(), config)?;
        info!(
            mode = transmission.mode(),
            base_url = %config.base_url,
            "transmission adapter configured"
        );
        Ok(Self::new(store, transmission))
    }

    pub fn with_collaborators(
        store: Arc<S>,
        transmission: TransmissionAdapter<S>,
        mapper: Arc<dyn TransformMapper>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let permissions = Arc::new(PermissionResolver::new(store.clone()));
        let validation = Arc::new(ValidationEngine::new(store.clone()));
        let records = RecordService::new(store.clone(), permissions.clone(), validation.clone());
        let remittances = RemittanceService::new(
            store.clone(),
            permissions.clone(),
            validation,
            transmission,
            mapper,
            audit,
        );

        Self {
            store,
            permissions,
            records,
            remittances,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn permissions(&self) -> &PermissionResolver<S> {
        &self.permissions
    }

    pub fn records(&self) -> &RecordService<S> {
        &self.records
    }

    pub fn remittances(&self) -> &RemittanceService<S> {
        &self.remittances
    }

    /// Persist catalog rules, returning how many were stored.
    pub fn install_rules(&self, rules: Vec<NewValidationRule>) -> Result<usize, StoreError> {
        let mut installed = 0;
        for rule in rules {
            self.store.insert_rule(rule)?;
            installed += 1;
        }
        info!(installed, "validation rules installed");
        Ok(installed)
    }
}

impl<S> ComplianceService<S>
where
    S: RecordStore + IdentityProvider + 'static,
{
    pub fn principal(&self, id: UserId) -> Result<Option<Principal>, StoreError> {
        self.store.principal(id)
    }
}
