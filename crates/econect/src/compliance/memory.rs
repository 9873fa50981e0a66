use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::domain::{
    EndpointConfig, EndpointConfigId, GrantId, Module, NewEndpointConfig, NewGrant,
    NewRemittance, NewRemittanceLog, NewSourceRecord, NewValidationResult, NewValidationRule,
    Principal, RecordStatus, Remittance, RemittanceId, RemittanceLog, RemittanceLogId,
    RemittanceStatus, RuleId, SourceRecord, SourceRecordId, Unit, UnitId, UserId,
    UserPermissionGrant, ValidationResult, ValidationResultId, ValidationRule,
};
use super::permissions::PermittedScope;
use super::repository::{
    IdentityProvider, Page, RecordStore, RemittanceQuery, RemittanceStats, StoreError,
};

#[derive(Default)]
struct Sequences {
    record: u64,
    rule: u64,
    result: u64,
    remittance: u64,
    log: u64,
    endpoint: u64,
    grant: u64,
}

fn next(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

#[derive(Default)]
struct State {
    seq: Sequences,
    records: BTreeMap<SourceRecordId, SourceRecord>,
    rules: BTreeMap<RuleId, ValidationRule>,
    results: BTreeMap<ValidationResultId, ValidationResult>,
    remittances: BTreeMap<RemittanceId, Remittance>,
    logs: Vec<RemittanceLog>,
    units: BTreeMap<UnitId, Unit>,
    endpoints: BTreeMap<EndpointConfigId, EndpointConfig>,
    grants: BTreeMap<GrantId, UserPermissionGrant>,
    principals: HashMap<UserId, Principal>,
}

/// Process-local store backing the service, the demo and the tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<State>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_principal(&self, principal: Principal) -> Result<Principal, StoreError> {
        self.lock()?.principals.insert(principal.id, principal);
        Ok(principal)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

impl RecordStore for InMemoryRecordStore {
    fn insert_record(&self, record: NewSourceRecord) -> Result<SourceRecord, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let stored = SourceRecord {
            id: SourceRecordId(next(&mut state.seq.record)),
            unit_id: record.unit_id,
            module: record.module,
            competency: record.competency,
            payload: record.payload,
            status: RecordStatus::Received,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn fetch_record(&self, id: SourceRecordId) -> Result<Option<SourceRecord>, StoreError> {
        Ok(self.lock()?.records.get(&id).cloned())
    }

    fn set_record_status(
        &self,
        id: SourceRecordId,
        status: RecordStatus,
    ) -> Result<SourceRecord, StoreError> {
        let mut state = self.lock()?;
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("source record", id))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    fn insert_rule(&self, rule: NewValidationRule) -> Result<ValidationRule, StoreError> {
        let mut state = self.lock()?;
        if state.rules.values().any(|existing| existing.code == rule.code) {
            return Err(StoreError::Conflict(format!(
                "validation rule code {} already exists",
                rule.code
            )));
        }
        let stored = ValidationRule {
            id: RuleId(next(&mut state.seq.rule)),
            module: rule.module,
            field: rule.field,
            operator: rule.operator,
            value: rule.value,
            level: rule.level,
            code: rule.code,
            message: rule.message,
            active: rule.active,
        };
        state.rules.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn active_rules(&self, module: Module) -> Result<Vec<ValidationRule>, StoreError> {
        Ok(self
            .lock()?
            .rules
            .values()
            .filter(|rule| rule.active && rule.module == module)
            .cloned()
            .collect())
    }

    fn rules(&self, module: Option<Module>) -> Result<Vec<ValidationRule>, StoreError> {
        Ok(self
            .lock()?
            .rules
            .values()
            .filter(|rule| module.map_or(true, |module| rule.module == module))
            .cloned()
            .collect())
    }

    fn insert_validation_result(
        &self,
        result: NewValidationResult,
    ) -> Result<ValidationResult, StoreError> {
        let mut state = self.lock()?;
        let stored = ValidationResult {
            id: ValidationResultId(next(&mut state.seq.result)),
            record_id: result.record_id,
            rule_id: result.rule_id,
            code: result.code,
            level: result.level,
            field: result.field,
            message: result.message,
            value: result.value,
            created_at: Utc::now(),
        };
        state.results.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn validation_results(
        &self,
        record_id: SourceRecordId,
    ) -> Result<Vec<ValidationResult>, StoreError> {
        Ok(self
            .lock()?
            .results
            .values()
            .filter(|result| result.record_id == record_id)
            .cloned()
            .collect())
    }

    fn clear_validation_results(&self, record_id: SourceRecordId) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let before = state.results.len();
        state
            .results
            .retain(|_, result| result.record_id != record_id);
        Ok(before - state.results.len())
    }

    fn insert_remittance(&self, remittance: NewRemittance) -> Result<Remittance, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let stored = Remittance {
            id: RemittanceId(next(&mut state.seq.remittance)),
            source_record_id: remittance.source_record_id,
            unit_id: remittance.unit_id,
            module: remittance.module,
            competency: remittance.competency,
            status: remittance.status,
            payload: remittance.payload,
            protocol: None,
            error_msg: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };
        state.remittances.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn fetch_remittance(&self, id: RemittanceId) -> Result<Option<Remittance>, StoreError> {
        Ok(self.lock()?.remittances.get(&id).cloned())
    }

    fn update_remittance(&self, mut remittance: Remittance) -> Result<Remittance, StoreError> {
        let mut state = self.lock()?;
        let slot = state
            .remittances
            .get_mut(&remittance.id)
            .ok_or_else(|| StoreError::not_found("remittance", remittance.id))?;
        remittance.updated_at = Utc::now();
        *slot = remittance.clone();
        Ok(remittance)
    }

    fn transition_remittance(
        &self,
        id: RemittanceId,
        expected: RemittanceStatus,
        change: &dyn Fn(&mut Remittance),
    ) -> Result<Option<Remittance>, StoreError> {
        let mut state = self.lock()?;
        let remittance = state
            .remittances
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("remittance", id))?;
        if remittance.status != expected {
            return Ok(None);
        }
        change(remittance);
        remittance.updated_at = Utc::now();
        Ok(Some(remittance.clone()))
    }

    fn remittances_for_record(
        &self,
        record_id: SourceRecordId,
    ) -> Result<Vec<Remittance>, StoreError> {
        Ok(self
            .lock()?
            .remittances
            .values()
            .filter(|remittance| remittance.source_record_id == record_id)
            .cloned()
            .collect())
    }

    fn query_remittances(&self, query: &RemittanceQuery) -> Result<Page<Remittance>, StoreError> {
        let state = self.lock()?;
        let mut matching: Vec<&Remittance> = state
            .remittances
            .values()
            .filter(|remittance| query.matches(remittance))
            .collect();
        // newest first; ids break ties between remittances created in the same instant
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matching.len();
        let data = matching
            .into_iter()
            .skip(query.offset())
            .take(query.limit)
            .cloned()
            .collect();

        Ok(Page {
            data,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    fn remittance_stats(
        &self,
        units: &PermittedScope<UnitId>,
    ) -> Result<RemittanceStats, StoreError> {
        let state = self.lock()?;
        let mut stats = RemittanceStats::default();
        state
            .remittances
            .values()
            .filter(|remittance| units.contains(&remittance.unit_id))
            .for_each(|remittance| stats.record(remittance));
        Ok(stats)
    }

    fn append_log(&self, log: NewRemittanceLog) -> Result<RemittanceLog, StoreError> {
        let mut state = self.lock()?;
        let stored = RemittanceLog {
            id: RemittanceLogId(next(&mut state.seq.log)),
            remittance_id: log.remittance_id,
            direction: log.direction,
            url: log.url,
            method: log.method,
            headers: log.headers,
            body: log.body,
            status_code: log.status_code,
            duration_ms: log.duration_ms,
            created_at: Utc::now(),
        };
        state.logs.push(stored.clone());
        Ok(stored)
    }

    fn logs_for(&self, remittance_id: RemittanceId) -> Result<Vec<RemittanceLog>, StoreError> {
        Ok(self
            .lock()?
            .logs
            .iter()
            .filter(|log| log.remittance_id == remittance_id)
            .cloned()
            .collect())
    }

    fn insert_unit(&self, unit: Unit) -> Result<Unit, StoreError> {
        let mut state = self.lock()?;
        if state
            .units
            .values()
            .any(|existing| existing.id == unit.id || existing.code == unit.code)
        {
            return Err(StoreError::Conflict(format!(
                "unit {} already exists",
                unit.code
            )));
        }
        state.units.insert(unit.id, unit.clone());
        Ok(unit)
    }

    fn fetch_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError> {
        Ok(self.lock()?.units.get(&id).cloned())
    }

    fn insert_endpoint_config(
        &self,
        config: NewEndpointConfig,
    ) -> Result<EndpointConfig, StoreError> {
        let mut state = self.lock()?;
        if state
            .endpoints
            .values()
            .any(|existing| existing.module == config.module)
        {
            return Err(StoreError::Conflict(format!(
                "endpoint already configured for module {}",
                config.module
            )));
        }
        let stored = EndpointConfig {
            id: EndpointConfigId(next(&mut state.seq.endpoint)),
            module: config.module,
            endpoint: config.endpoint,
            method: config.method,
            description: config.description,
            active: config.active,
        };
        state.endpoints.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn active_endpoint(&self, module: Module) -> Result<Option<EndpointConfig>, StoreError> {
        Ok(self
            .lock()?
            .endpoints
            .values()
            .find(|config| config.active && config.module == module)
            .cloned())
    }

    fn grants_for(&self, user_id: UserId) -> Result<Vec<UserPermissionGrant>, StoreError> {
        Ok(self
            .lock()?
            .grants
            .values()
            .filter(|grant| grant.user_id == user_id)
            .cloned()
            .collect())
    }

    fn fetch_grant(&self, id: GrantId) -> Result<Option<UserPermissionGrant>, StoreError> {
        Ok(self.lock()?.grants.get(&id).cloned())
    }

    fn insert_grant(&self, grant: NewGrant) -> Result<UserPermissionGrant, StoreError> {
        let mut state = self.lock()?;
        if state.grants.values().any(|existing| {
            existing.user_id == grant.user_id && existing.scope() == (grant.unit_id, grant.module)
        }) {
            return Err(StoreError::Conflict(
                "a grant already exists for this principal, unit and module".to_string(),
            ));
        }
        let stored = UserPermissionGrant {
            id: GrantId(next(&mut state.seq.grant)),
            user_id: grant.user_id,
            unit_id: grant.unit_id,
            module: grant.module,
            can_view: grant.can_view,
            can_create: grant.can_create,
            can_edit: grant.can_edit,
            can_delete: grant.can_delete,
            can_transmit: grant.can_transmit,
        };
        state.grants.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update_grant(&self, grant: UserPermissionGrant) -> Result<UserPermissionGrant, StoreError> {
        let mut state = self.lock()?;
        let slot = state
            .grants
            .get_mut(&grant.id)
            .ok_or_else(|| StoreError::not_found("grant", grant.id))?;
        *slot = grant.clone();
        Ok(grant)
    }

    fn delete_grant(&self, id: GrantId) -> Result<(), StoreError> {
        self.lock()?
            .grants
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("grant", id))
    }

    fn delete_grants_for(&self, user_id: UserId) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let before = state.grants.len();
        state.grants.retain(|_, grant| grant.user_id != user_id);
        Ok(before - state.grants.len())
    }
}

impl IdentityProvider for InMemoryRecordStore {
    fn principal(&self, id: UserId) -> Result<Option<Principal>, StoreError> {
        Ok(self.lock()?.principals.get(&id).copied())
    }
}
