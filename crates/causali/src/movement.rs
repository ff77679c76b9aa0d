use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{DomainError, DomainResult, TenantId};

use crate::normalize_code;

/// Which way stock moves.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn sign(self) -> Sign {
        match self {
            Direction::Inbound => Sign::Positive,
            Direction::Outbound => Sign::Negative,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Inbound => Direction::Outbound,
            Direction::Outbound => Direction::Inbound,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(DomainError::field("direction", format!("unknown direction '{other}'"))),
        }
    }
}

/// `+1` / `-1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn factor(self) -> Decimal {
        match self {
            Sign::Positive => Decimal::ONE,
            Sign::Negative => Decimal::NEGATIVE_ONE,
        }
    }

    /// `abs(value) * sign`: the caller's own sign is ignored.
    pub fn apply(self, value: Decimal) -> Decimal {
        value.abs() * self.factor()
    }

    /// Sign of a non-zero value.
    pub fn of(value: Decimal) -> Option<Self> {
        if value.is_zero() {
            None
        } else if value.is_sign_negative() {
            Some(Sign::Negative)
        } else {
            Some(Sign::Positive)
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            Sign::Positive => 1,
            Sign::Negative => -1,
        }
    }

    pub fn from_i16(value: i16) -> DomainResult<Self> {
        match value {
            1 => Ok(Sign::Positive),
            -1 => Ok(Sign::Negative),
            other => Err(DomainError::field("sign", format!("must be +1 or -1, got {other}"))),
        }
    }
}

/// Reason code of a stock ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCausale {
    pub tenant_id: TenantId,
    pub code: String,
    pub description: String,
    pub direction: Direction,
    pub updates_average_cost: bool,
    pub requires_document: bool,
    /// Causale used to post a correcting ("rettifica") entry.
    pub inverse_code: Option<String>,
    pub active: bool,
}

impl MovementCausale {
    pub fn new(
        tenant_id: TenantId,
        code: &str,
        description: impl Into<String>,
        direction: Direction,
    ) -> DomainResult<Self> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(DomainError::field("description", "must not be empty"));
        }
        Ok(Self {
            tenant_id,
            code: normalize_code(code)?,
            description,
            direction,
            updates_average_cost: false,
            requires_document: false,
            inverse_code: None,
            active: true,
        })
    }

    pub fn updating_average_cost(mut self) -> Self {
        self.updates_average_cost = true;
        self
    }

    pub fn with_inverse(mut self, code: &str) -> DomainResult<Self> {
        self.inverse_code = Some(normalize_code(code)?);
        Ok(self)
    }

    pub fn sign(&self) -> Sign {
        self.direction.sign()
    }

    /// Only inbound causali may move the weighted-average cost.
    pub fn validate(&self) -> DomainResult<()> {
        normalize_code(&self.code)?;
        if self.updates_average_cost && self.direction == Direction::Outbound {
            return Err(DomainError::field(
                "updates_average_cost",
                "outbound causali never change the average cost",
            ));
        }
        if self.inverse_code.as_deref() == Some(self.code.as_str()) {
            return Err(DomainError::field("inverse_code", "a causale cannot be its own inverse"));
        }
        Ok(())
    }

    pub fn effect(&self) -> CausaleEffect {
        CausaleEffect {
            code: self.code.clone(),
            direction: self.direction,
            updates_average_cost: self.updates_average_cost && self.direction == Direction::Inbound,
            requires_document: self.requires_document,
        }
    }
}

/// Immutable description of what posting a causale means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausaleEffect {
    pub code: String,
    pub direction: Direction,
    pub updates_average_cost: bool,
    pub requires_document: bool,
}

impl CausaleEffect {
    pub fn sign(&self) -> Sign {
        self.direction.sign()
    }

    /// Signed ledger quantity for an unsigned request quantity.
    pub fn signed_quantity(&self, quantity: Decimal) -> Decimal {
        self.sign().apply(quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sign_comes_from_direction_not_from_caller() {
        let tenant = TenantId::new();
        let out = MovementCausale::new(tenant, "ven", "Scarico per vendita", Direction::Outbound)
            .unwrap()
            .effect();

        assert_eq!(out.signed_quantity(dec!(5)), dec!(-5));
        assert_eq!(out.signed_quantity(dec!(-5)), dec!(-5));
        assert_eq!(out.code, "VEN");
    }

    #[test]
    fn outbound_cannot_update_cost() {
        let tenant = TenantId::new();
        let bad = MovementCausale::new(tenant, "SCA", "Scarico", Direction::Outbound)
            .unwrap()
            .updating_average_cost();
        assert!(bad.validate().is_err());
        assert!(!bad.effect().updates_average_cost);
    }

    #[test]
    fn sign_round_trips_through_i16() {
        assert_eq!(Sign::from_i16(Sign::Negative.as_i16()).unwrap(), Sign::Negative);
        assert!(Sign::from_i16(0).is_err());
        assert_eq!(Sign::of(dec!(-0.5)), Some(Sign::Negative));
        assert_eq!(Sign::of(Decimal::ZERO), None);
    }
}
