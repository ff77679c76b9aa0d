//! Document numbering.
//!
//! Numbers are allocated per `(tenant, sequence key, year)`. The allocation
//! itself is an infrastructure concern (atomic counter); this module only
//! names the sequence and carries the result.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Name of a numbering sequence.
///
/// A document causale flagged for separate numbering owns a sequence named
/// after its code; otherwise all causali of the same document type and
/// operation share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceKey(String);

impl SequenceKey {
    pub fn new(key: impl Into<String>) -> DomainResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DomainError::field("sequence_key", "must not be empty"));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An allocated document number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentNumber {
    pub sequence: SequenceKey,
    pub year: i32,
    pub number: u64,
}

impl DocumentNumber {
    pub fn new(sequence: SequenceKey, year: i32, number: u64) -> DomainResult<Self> {
        if number == 0 {
            return Err(DomainError::field("number", "document numbers start at 1"));
        }
        Ok(Self { sequence, year, number })
    }
}

/// Renders as `<number>/<year>`, the form printed on documents.
impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.year)
    }
}
