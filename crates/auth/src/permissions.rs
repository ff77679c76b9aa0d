//! Typed capability table: resources × actions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Everything the engine gates access to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Subjects,
    Products,
    Warehouses,
    Causali,
    Orders,
    Invoices,
    Ledger,
    Schedules,
    ReferenceData,
}

impl Resource {
    pub const ALL: [Resource; 9] = [
        Resource::Subjects,
        Resource::Products,
        Resource::Warehouses,
        Resource::Causali,
        Resource::Orders,
        Resource::Invoices,
        Resource::Ledger,
        Resource::Schedules,
        Resource::ReferenceData,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Subjects => "subjects",
            Resource::Products => "products",
            Resource::Warehouses => "warehouses",
            Resource::Causali => "causali",
            Resource::Orders => "orders",
            Resource::Invoices => "invoices",
            Resource::Ledger => "ledger",
            Resource::Schedules => "schedules",
            Resource::ReferenceData => "reference_data",
        }
    }
}

impl core::fmt::Display for Resource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{read, write, delete}` flags for one resource.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub delete: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        read: false,
        write: false,
        delete: false,
    };

    pub const READ_ONLY: Capabilities = Capabilities {
        read: true,
        write: false,
        delete: false,
    };

    pub const READ_WRITE: Capabilities = Capabilities {
        read: true,
        write: true,
        delete: false,
    };

    pub const FULL: Capabilities = Capabilities {
        read: true,
        write: true,
        delete: true,
    };

    pub fn allows(self, action: Action) -> bool {
        match action {
            Action::Read => self.read,
            Action::Write => self.write,
            Action::Delete => self.delete,
        }
    }
}

/// Per-resource capabilities stored with a membership. Missing resources
/// grant nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMap(BTreeMap<Resource, Capabilities>);

impl CapabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, resource: Resource, capabilities: Capabilities) -> Self {
        self.0.insert(resource, capabilities);
        self
    }

    pub fn get(&self, resource: Resource) -> Capabilities {
        self.0.get(&resource).copied().unwrap_or(Capabilities::NONE)
    }

    pub fn allows(&self, resource: Resource, action: Action) -> bool {
        self.get(resource).allows(action)
    }
}
