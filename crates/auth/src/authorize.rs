use serde::{Deserialize, Serialize};
use thiserror::Error;

use gestio_core::TenantId;

use crate::{Action, PrincipalId, Resource, TenantMembership};

/// A principal with its resolved membership. Built by the session layer
/// through a [`crate::MembershipDirectory`]; the engine never builds one
/// from request data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub membership: TenantMembership,
}

impl Principal {
    pub fn new(principal_id: PrincipalId, membership: TenantMembership) -> Self {
        Self {
            principal_id,
            membership,
        }
    }

    /// The only tenant this principal may read or write.
    pub fn tenant_id(&self) -> TenantId {
        self.membership.tenant_id
    }

    /// Reject access to a record owned by another tenant.
    pub fn ensure_tenant(&self, owner: TenantId) -> Result<(), AuthzError> {
        if owner == self.tenant_id() {
            Ok(())
        } else {
            Err(AuthzError::TenantMismatch)
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing '{action}' on '{resource}'")]
    Forbidden { resource: Resource, action: Action },

    #[error("principal {0} has no tenant membership")]
    UnknownPrincipal(PrincipalId),
}

/// Authorize `action` on `resource` for `principal`.
///
/// Owners bypass the capability map; everyone else needs the matching flag.
pub fn authorize(principal: &Principal, resource: Resource, action: Action) -> Result<(), AuthzError> {
    let membership = &principal.membership;
    if membership.role.is_owner() || membership.capabilities.allows(resource, action) {
        return Ok(());
    }

    tracing::debug!(
        principal_id = %principal.principal_id,
        tenant_id = %membership.tenant_id,
        role = %membership.role,
        %resource,
        %action,
        "authorization denied"
    );
    Err(AuthzError::Forbidden { resource, action })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Capabilities, CapabilityMap, Role};

    fn principal(role: Role, capabilities: CapabilityMap) -> Principal {
        Principal::new(
            PrincipalId::new(),
            TenantMembership::with_role(TenantId::new(), role, capabilities),
        )
    }

    #[test]
    fn owner_bypasses_capability_map() {
        let owner = principal(Role::owner(), CapabilityMap::new());
        for resource in Resource::ALL {
            assert!(authorize(&owner, resource, Action::Delete).is_ok());
        }
    }

    #[test]
    fn other_roles_follow_the_map() {
        let clerk = principal(
            Role::new("clerk"),
            CapabilityMap::new().grant(Resource::Orders, Capabilities::READ_WRITE),
        );

        assert!(authorize(&clerk, Resource::Orders, Action::Write).is_ok());
        assert_eq!(
            authorize(&clerk, Resource::Orders, Action::Delete),
            Err(AuthzError::Forbidden {
                resource: Resource::Orders,
                action: Action::Delete
            })
        );
        assert!(authorize(&clerk, Resource::Invoices, Action::Read).is_err());
    }

    #[test]
    fn foreign_records_are_rejected() {
        let clerk = principal(Role::new("clerk"), CapabilityMap::new());
        assert!(clerk.ensure_tenant(clerk.tenant_id()).is_ok());
        assert_eq!(clerk.ensure_tenant(TenantId::new()), Err(AuthzError::TenantMismatch));
    }
}
