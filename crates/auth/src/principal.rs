use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gestio_core::TenantId;

use crate::{CapabilityMap, Role};

/// Identity of an authenticated principal, as handed over by the session layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for PrincipalId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for PrincipalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// A principal's membership record: the tenant it works in, its role and
/// the per-resource capability map stored alongside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: TenantId,
    pub role: Role,
    #[serde(default)]
    pub capabilities: CapabilityMap,
}

impl TenantMembership {
    pub fn owner(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            role: Role::owner(),
            capabilities: CapabilityMap::default(),
        }
    }

    pub fn with_role(tenant_id: TenantId, role: Role, capabilities: CapabilityMap) -> Self {
        Self {
            tenant_id,
            role,
            capabilities,
        }
    }
}
