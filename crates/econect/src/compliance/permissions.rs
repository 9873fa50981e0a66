use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::domain::{
    GrantChanges, GrantId, Module, NewGrant, PermissionAction, Principal, UnitId, UserId,
    UserPermissionGrant,
};
use super::error::ComplianceError;
use super::repository::{RecordStore, StoreError};

/// Either every value of a dimension or an explicit subset of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermittedScope<T: Ord> {
    All,
    Only(BTreeSet<T>),
}

impl<T: Ord> PermittedScope<T> {
    pub fn none() -> Self {
        PermittedScope::Only(BTreeSet::new())
    }

    pub fn contains(&self, value: &T) -> bool {
        match self {
            PermittedScope::All => true,
            PermittedScope::Only(values) => values.contains(value),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PermittedScope::All)
    }
}

/// Finds the grant that decides a request, by decreasing specificity:
/// unit+module, module-wide, unit-wide, global.
pub fn resolve_grant(
    grants: &[UserPermissionGrant],
    unit_id: Option<UnitId>,
    module: Option<Module>,
) -> Option<&UserPermissionGrant> {
    let mut tiers: Vec<(Option<UnitId>, Option<Module>)> = Vec::with_capacity(4);
    if unit_id.is_some() && module.is_some() {
        tiers.push((unit_id, module));
    }
    if module.is_some() {
        tiers.push((None, module));
    }
    if unit_id.is_some() {
        tiers.push((unit_id, None));
    }
    tiers.push((None, None));

    tiers
        .into_iter()
        .find_map(|scope| grants.iter().find(|grant| grant.scope() == scope))
}

/// Four-tier permission cascade over a principal's grants.
pub struct PermissionResolver<S> {
    store: Arc<S>,
}

impl<S> PermissionResolver<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Decide whether `principal` may perform `action` on the given unit/module.
    pub fn authorize(
        &self,
        principal: &Principal,
        unit_id: Option<UnitId>,
        module: Option<Module>,
        action: PermissionAction,
    ) -> Result<bool, StoreError> {
        if !principal.active {
            return Ok(false);
        }
        if principal.is_admin() {
            return Ok(true);
        }

        let grants = self.store.grants_for(principal.id)?;
        if grants.is_empty() {
            return Ok(false);
        }

        let allowed = resolve_grant(&grants, unit_id, module)
            .map(|grant| grant.allows(action))
            .unwrap_or(false);
        Ok(allowed)
    }

    /// Like [`authorize`](Self::authorize) but turns a denial into `Forbidden`.
    pub fn require(
        &self,
        principal: &Principal,
        unit_id: Option<UnitId>,
        module: Option<Module>,
        action: PermissionAction,
    ) -> Result<(), ComplianceError> {
        if self.authorize(principal, unit_id, module, action)? {
            return Ok(());
        }

        debug!(
            principal = %principal.id,
            unit = ?unit_id,
            module = ?module,
            %action,
            "permission denied"
        );
        Err(ComplianceError::Forbidden {
            action,
            unit_id,
            module,
        })
    }

    pub fn permitted_units(
        &self,
        principal: &Principal,
        action: PermissionAction,
    ) -> Result<PermittedScope<UnitId>, StoreError> {
        if !principal.active {
            return Ok(PermittedScope::none());
        }
        if principal.is_admin() {
            return Ok(PermittedScope::All);
        }

        let grants = self.store.grants_for(principal.id)?;
        if grants
            .iter()
            .any(|grant| grant.unit_id.is_none() && grant.allows(action))
        {
            return Ok(PermittedScope::All);
        }

        let units = grants
            .iter()
            .filter(|grant| grant.allows(action))
            .filter_map(|grant| grant.unit_id)
            .collect();
        Ok(PermittedScope::Only(units))
    }

    pub fn permitted_modules(
        &self,
        principal: &Principal,
        action: PermissionAction,
        unit_id: Option<UnitId>,
    ) -> Result<PermittedScope<Module>, StoreError> {
        if !principal.active {
            return Ok(PermittedScope::none());
        }
        if principal.is_admin() {
            return Ok(PermittedScope::All);
        }

        let grants = self.store.grants_for(principal.id)?;
        let global = grants.iter().any(|grant| {
            grant.unit_id.is_none() && grant.module.is_none() && grant.allows(action)
        });
        if global {
            return Ok(PermittedScope::All);
        }

        if let Some(unit) = unit_id {
            let unit_wide = grants.iter().any(|grant| {
                grant.unit_id == Some(unit) && grant.module.is_none() && grant.allows(action)
            });
            if unit_wide {
                return Ok(PermittedScope::All);
            }
        }

        let modules = grants
            .iter()
            .filter(|grant| match (unit_id, grant.unit_id) {
                (Some(requested), Some(granted)) => requested == granted,
                _ => true,
            })
            .filter(|grant| grant.allows(action))
            .filter_map(|grant| grant.module)
            .collect();
        Ok(PermittedScope::Only(modules))
    }

    pub fn grants_for(&self, user_id: UserId) -> Result<Vec<UserPermissionGrant>, StoreError> {
        self.store.grants_for(user_id)
    }

    /// Create a grant; the `(principal, unit, module)` triple must be unique.
    pub fn create_grant(&self, grant: NewGrant) -> Result<UserPermissionGrant, ComplianceError> {
        if let Some(unit_id) = grant.unit_id {
            if self.store.fetch_unit(unit_id)?.is_none() {
                return Err(ComplianceError::not_found("unit", unit_id));
            }
        }

        let existing = self.store.grants_for(grant.user_id)?;
        if existing
            .iter()
            .any(|current| current.scope() == (grant.unit_id, grant.module))
        {
            return Err(duplicate_grant());
        }

        let created = self.store.insert_grant(grant)?;
        info!(
            grant = %created.id,
            principal = %created.user_id,
            unit = ?created.unit_id,
            module = ?created.module,
            "permission grant created"
        );
        Ok(created)
    }

    /// Create several grants for one principal, skipping duplicates.
    pub fn create_grants_bulk(
        &self,
        user_id: UserId,
        grants: Vec<NewGrant>,
    ) -> Result<Vec<UserPermissionGrant>, ComplianceError> {
        let mut created = Vec::with_capacity(grants.len());
        for grant in grants {
            let grant = NewGrant { user_id, ..grant };
            match self.create_grant(grant) {
                Ok(stored) => created.push(stored),
                Err(ComplianceError::Conflict(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(created)
    }

    pub fn update_grant(
        &self,
        id: GrantId,
        changes: GrantChanges,
    ) -> Result<UserPermissionGrant, ComplianceError> {
        let mut grant = self
            .store
            .fetch_grant(id)?
            .ok_or_else(|| ComplianceError::not_found("grant", id))?;
        changes.apply(&mut grant);

        let collides = self
            .store
            .grants_for(grant.user_id)?
            .iter()
            .any(|other| other.id != grant.id && other.scope() == grant.scope());
        if collides {
            return Err(duplicate_grant());
        }

        Ok(self.store.update_grant(grant)?)
    }

    pub fn remove_grant(&self, id: GrantId) -> Result<(), ComplianceError> {
        if self.store.fetch_grant(id)?.is_none() {
            return Err(ComplianceError::not_found("grant", id));
        }
        self.store.delete_grant(id)?;
        Ok(())
    }

    pub fn remove_all_grants(&self, user_id: UserId) -> Result<usize, StoreError> {
        self.store.delete_grants_for(user_id)
    }
}

fn duplicate_grant() -> ComplianceError {
    ComplianceError::Conflict(
        "a grant already exists for this principal, unit and module".to_string(),
    )
}
