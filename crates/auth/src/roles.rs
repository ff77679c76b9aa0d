use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role held by a principal inside a tenant.
///
/// Only `owner` has built-in meaning (bypasses capability checks); any other
/// role name is a label and its rights come from the membership's
/// capability map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const OWNER: &'static str = "owner";

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn owner() -> Self {
        Self(Cow::Borrowed(Self::OWNER))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_owner(&self) -> bool {
        self.0.eq_ignore_ascii_case(Self::OWNER)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
