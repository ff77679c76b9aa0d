use std::collections::HashMap;

use gestio_core::{DomainError, DomainResult, TenantId};

use crate::document::DocumentCausale;
use crate::movement::{CausaleEffect, MovementCausale};

/// One tenant's causali, loaded once per engine operation.
///
/// Inactive causali stay in the registry so historical entries keep
/// resolving through [`CausaleRegistry::movement`], but they refuse new use
/// through [`CausaleRegistry::resolve`] and [`CausaleRegistry::document`].
#[derive(Debug, Clone)]
pub struct CausaleRegistry {
    tenant_id: TenantId,
    movements: HashMap<String, MovementCausale>,
    documents: HashMap<String, DocumentCausale>,
}

impl CausaleRegistry {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            movements: HashMap::new(),
            documents: HashMap::new(),
        }
    }

    /// Build from stored rows, dropping anything owned by another tenant.
    pub fn from_parts(
        tenant_id: TenantId,
        movements: impl IntoIterator<Item = MovementCausale>,
        documents: impl IntoIterator<Item = DocumentCausale>,
    ) -> Self {
        let mut registry = Self::new(tenant_id);
        for causale in movements.into_iter().filter(|c| c.tenant_id == tenant_id) {
            registry.movements.insert(causale.code.clone(), causale);
        }
        for causale in documents.into_iter().filter(|c| c.tenant_id == tenant_id) {
            registry.documents.insert(causale.code.clone(), causale);
        }
        registry
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Any movement causale, active or not.
    pub fn movement(&self, code: &str) -> Option<&MovementCausale> {
        self.movements.get(&code.to_uppercase())
    }

    /// Effect of posting `code` in `tenant_id`. Unknown or foreign codes are
    /// `NotFound`; deactivated ones are a validation failure.
    pub fn resolve(&self, code: &str, tenant_id: TenantId) -> DomainResult<CausaleEffect> {
        if tenant_id != self.tenant_id {
            return Err(DomainError::not_found(format!("movement causale '{code}'")));
        }
        let causale = self
            .movement(code)
            .ok_or_else(|| DomainError::not_found(format!("movement causale '{code}'")))?;
        if !causale.active {
            return Err(DomainError::field(
                "causale",
                format!("movement causale '{}' is deactivated", causale.code),
            ));
        }
        Ok(causale.effect())
    }

    /// Effect of the causale that corrects entries posted with `code`.
    pub fn resolve_inverse(&self, code: &str, tenant_id: TenantId) -> DomainResult<CausaleEffect> {
        let causale = self
            .movement(code)
            .ok_or_else(|| DomainError::not_found(format!("movement causale '{code}'")))?;
        let inverse_code = causale.inverse_code.as_deref().ok_or_else(|| {
            DomainError::field(
                "causale",
                format!("movement causale '{}' has no inverse causale configured", causale.code),
            )
        })?;
        let inverse = self.resolve(inverse_code, tenant_id)?;
        if inverse.direction == causale.direction {
            return Err(DomainError::invariant(format!(
                "inverse causale '{}' moves stock in the same direction as '{}'",
                inverse.code, causale.code
            )));
        }
        Ok(inverse)
    }

    /// Any document causale, active or not.
    pub fn document_any(&self, code: &str) -> Option<&DocumentCausale> {
        self.documents.get(&code.to_uppercase())
    }

    pub fn document(&self, code: &str) -> DomainResult<&DocumentCausale> {
        let causale = self
            .documents
            .get(&code.to_uppercase())
            .ok_or_else(|| DomainError::not_found(format!("document causale '{code}'")))?;
        if !causale.active {
            return Err(DomainError::field(
                "causale",
                format!("document causale '{}' is deactivated", causale.code),
            ));
        }
        Ok(causale)
    }

    /// Movement effect a document causale posts with.
    pub fn movement_for_document(&self, document_code: &str) -> DomainResult<CausaleEffect> {
        let document = self.document(document_code)?;
        let movement_code = document.linked_movement()?;
        self.resolve(movement_code, self.tenant_id)
    }

    pub fn movements(&self) -> impl Iterator<Item = &MovementCausale> {
        self.movements.values()
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentCausale> {
        self.documents.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use crate::movement::Direction;

    fn registry() -> (TenantId, CausaleRegistry) {
        let tenant = TenantId::new();
        let (movements, documents) = default_catalog(tenant);
        (tenant, CausaleRegistry::from_parts(tenant, movements, documents))
    }

    #[test]
    fn resolves_effects_by_code() {
        let (tenant, registry) = registry();
        let effect = registry.resolve("acq", tenant).unwrap();
        assert_eq!(effect.direction, Direction::Inbound);
        assert!(effect.updates_average_cost);
        assert!(effect.requires_document);
    }

    #[test]
    fn unknown_and_foreign_codes_are_not_found() {
        let (tenant, registry) = registry();
        assert!(matches!(registry.resolve("ZZZ", tenant), Err(DomainError::NotFound(_))));
        assert!(matches!(registry.resolve("ACQ", TenantId::new()), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn deactivated_causale_blocks_new_use_but_keeps_history() {
        let tenant = TenantId::new();
        let (mut movements, documents) = default_catalog(tenant);
        for causale in movements.iter_mut().filter(|c| c.code == "SCA") {
            causale.active = false;
        }
        let registry = CausaleRegistry::from_parts(tenant, movements, documents);

        assert!(registry.resolve("SCA", tenant).unwrap_err().is_validation());
        assert!(registry.movement("SCA").is_some());
    }

    #[test]
    fn inverse_flips_direction() {
        let (tenant, registry) = registry();
        let inverse = registry.resolve_inverse("VEN", tenant).unwrap();
        assert_eq!(inverse.direction, Direction::Inbound);
        assert!(!inverse.updates_average_cost);
    }

    #[test]
    fn order_causale_resolves_its_movement() {
        let (_, registry) = registry();
        let effect = registry.movement_for_document("OC").unwrap();
        assert_eq!(effect.code, "VEN");
        assert!(registry.movement_for_document("FV").is_err());
    }

    #[test]
    fn rows_of_other_tenants_are_dropped() {
        let tenant = TenantId::new();
        let (movements, documents) = default_catalog(TenantId::new());
        let registry = CausaleRegistry::from_parts(tenant, movements, documents);
        assert_eq!(registry.movements().count(), 0);
        assert_eq!(registry.documents().count(), 0);
    }
}
