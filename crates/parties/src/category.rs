use serde::{Deserialize, Serialize};

use gestio_core::{domain_id, DomainError, DomainResult, TenantId};

domain_id!(SubjectCategoryId);

/// Grouping of subjects (e.g. "retail", "wholesale").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCategory {
    pub id: SubjectCategoryId,
    pub tenant_id: TenantId,
    pub name: String,
}

impl SubjectCategory {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::field("name", "must not be empty"));
        }
        Ok(Self {
            id: SubjectCategoryId::new(),
            tenant_id,
            name,
        })
    }

    /// Deletion guard: a category still assigned to subjects stays.
    pub fn ensure_deletable(&self, assigned_subjects: u64) -> DomainResult<()> {
        if assigned_subjects == 0 {
            Ok(())
        } else {
            Err(DomainError::referential(
                format!("subject category '{}'", self.name),
                "subjects",
                assigned_subjects,
            ))
        }
    }
}
