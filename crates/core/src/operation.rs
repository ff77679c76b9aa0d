//! Sale/purchase discriminator shared by causali, subjects and orders.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Sale,
    Purchase,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Sale => "sale",
            OperationType::Purchase => "purchase",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sale" => Ok(OperationType::Sale),
            "purchase" => Ok(OperationType::Purchase),
            other => Err(DomainError::field("operation", format!("unknown operation type '{other}'"))),
        }
    }
}
