//! Tenant/session resolver contract.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::{AuthzError, Principal, PrincipalId, TenantMembership};

/// Maps an authenticated principal to its tenant membership.
///
/// Implemented by whatever owns sessions and memberships; the engine only
/// consumes the result.
pub trait MembershipDirectory: Send + Sync {
    fn membership(&self, principal_id: PrincipalId) -> Option<TenantMembership>;

    fn resolve(&self, principal_id: PrincipalId) -> Result<Principal, AuthzError> {
        self.membership(principal_id)
            .map(|membership| Principal::new(principal_id, membership))
            .ok_or(AuthzError::UnknownPrincipal(principal_id))
    }
}

/// Membership table held in memory (tests, single-node deployments).
#[derive(Debug, Default)]
pub struct InMemoryMembershipDirectory {
    memberships: RwLock<HashMap<PrincipalId, TenantMembership>>,
}

impl InMemoryMembershipDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, principal_id: PrincipalId, membership: TenantMembership) {
        if let Ok(mut map) = self.memberships.write() {
            map.insert(principal_id, membership);
        }
    }

    pub fn revoke(&self, principal_id: PrincipalId) {
        if let Ok(mut map) = self.memberships.write() {
            map.remove(&principal_id);
        }
    }
}

impl MembershipDirectory for InMemoryMembershipDirectory {
    fn membership(&self, principal_id: PrincipalId) -> Option<TenantMembership> {
        self.memberships
            .read()
            .ok()
            .and_then(|map| map.get(&principal_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gestio_core::TenantId;

    #[test]
    fn resolves_registered_principals_only() {
        let directory = InMemoryMembershipDirectory::new();
        let tenant = TenantId::new();
        let known = PrincipalId::new();
        directory.register(known, TenantMembership::owner(tenant));

        let principal = directory.resolve(known).unwrap();
        assert_eq!(principal.tenant_id(), tenant);

        let stranger = PrincipalId::new();
        assert_eq!(directory.resolve(stranger), Err(AuthzError::UnknownPrincipal(stranger)));

        directory.revoke(known);
        assert!(directory.resolve(known).is_err());
    }
}
