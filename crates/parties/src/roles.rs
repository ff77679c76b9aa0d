use core::fmt;

use serde::{Deserialize, Serialize};

use gestio_core::{DomainError, DomainResult, OperationType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectRole {
    Client,
    Supplier,
    Agent,
    Carrier,
}

impl SubjectRole {
    pub const ALL: [SubjectRole; 4] = [
        SubjectRole::Client,
        SubjectRole::Supplier,
        SubjectRole::Agent,
        SubjectRole::Carrier,
    ];

    fn bit(self) -> u8 {
        match self {
            SubjectRole::Client => 0b0001,
            SubjectRole::Supplier => 0b0010,
            SubjectRole::Agent => 0b0100,
            SubjectRole::Carrier => 0b1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubjectRole::Client => "client",
            SubjectRole::Supplier => "supplier",
            SubjectRole::Agent => "agent",
            SubjectRole::Carrier => "carrier",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        SubjectRole::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| DomainError::field("roles", format!("unknown subject role '{value}'")))
    }

    /// Role a subject needs to be the counterparty of `operation`.
    pub fn counterparty_for(operation: OperationType) -> Self {
        match operation {
            OperationType::Sale => SubjectRole::Client,
            OperationType::Purchase => SubjectRole::Supplier,
        }
    }
}

impl fmt::Display for SubjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of roles. Serialized as a list of role names.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<SubjectRole>", into = "Vec<SubjectRole>")]
pub struct SubjectRoles(u8);

impl SubjectRoles {
    pub const EMPTY: SubjectRoles = SubjectRoles(0);

    pub fn of(roles: impl IntoIterator<Item = SubjectRole>) -> Self {
        roles.into_iter().fold(Self::EMPTY, |set, role| set.with(role))
    }

    pub fn with(self, role: SubjectRole) -> Self {
        Self(self.0 | role.bit())
    }

    pub fn without(self, role: SubjectRole) -> Self {
        Self(self.0 & !role.bit())
    }

    pub fn contains(self, role: SubjectRole) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = SubjectRole> {
        SubjectRole::ALL.into_iter().filter(move |role| self.contains(*role))
    }

    pub fn can_sell_to(self) -> bool {
        self.contains(SubjectRole::Client)
    }

    pub fn can_buy_from(self) -> bool {
        self.contains(SubjectRole::Supplier)
    }

    /// Counterparty check for an order of `operation`.
    pub fn ensure_counterparty_for(self, operation: OperationType) -> DomainResult<()> {
        let needed = SubjectRole::counterparty_for(operation);
        if self.contains(needed) {
            Ok(())
        } else {
            Err(DomainError::field(
                "subject",
                format!("{operation} orders require a {needed} subject"),
            ))
        }
    }

    /// Bit pattern, for storage.
    pub fn bits(self) -> i16 {
        i16::from(self.0)
    }

    pub fn from_bits(bits: i16) -> Self {
        let known = SubjectRole::ALL.iter().fold(0u8, |acc, role| acc | role.bit());
        Self((bits as u8) & known)
    }
}

impl From<Vec<SubjectRole>> for SubjectRoles {
    fn from(value: Vec<SubjectRole>) -> Self {
        Self::of(value)
    }
}

impl From<SubjectRoles> for Vec<SubjectRole> {
    fn from(value: SubjectRoles) -> Self {
        value.iter().collect()
    }
}
