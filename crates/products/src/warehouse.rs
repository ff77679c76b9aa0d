use serde::{Deserialize, Serialize};

use gestio_core::{domain_id, DomainError, DomainResult, TenantId};

domain_id!(WarehouseId);

/// Stock-holding location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    /// Default target of postings that name no warehouse.
    pub primary: bool,
    pub active: bool,
}

impl Warehouse {
    pub fn new(tenant_id: TenantId, code: impl Into<String>, name: impl Into<String>) -> DomainResult<Self> {
        let warehouse = Self {
            id: WarehouseId::new(),
            tenant_id,
            code: code.into(),
            name: name.into(),
            primary: false,
            active: true,
        };
        if warehouse.code.trim().is_empty() {
            return Err(DomainError::field("code", "must not be empty"));
        }
        if warehouse.name.trim().is_empty() {
            return Err(DomainError::field("name", "must not be empty"));
        }
        Ok(warehouse)
    }

    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Ledger entries stay; the warehouse just stops accepting new postings.
    pub fn ensure_postable(&self) -> DomainResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(DomainError::field("warehouse", format!("warehouse '{}' is inactive", self.code)))
        }
    }
}

/// At most one primary warehouse per tenant.
pub fn ensure_single_primary<'a>(warehouses: impl IntoIterator<Item = &'a Warehouse>) -> DomainResult<()> {
    let primaries = warehouses.into_iter().filter(|w| w.primary).count();
    if primaries > 1 {
        return Err(DomainError::invariant(format!(
            "{primaries} warehouses are marked primary, at most one is allowed"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_primaries_violate_the_invariant() {
        let tenant = TenantId::new();
        let main = Warehouse::new(tenant, "MAIN", "Sede").unwrap().as_primary();
        let branch = Warehouse::new(tenant, "BR1", "Filiale").unwrap();
        assert!(ensure_single_primary([&main, &branch]).is_ok());

        let rogue = branch.clone().as_primary();
        assert!(ensure_single_primary([&main, &rogue]).is_err());
    }
}
