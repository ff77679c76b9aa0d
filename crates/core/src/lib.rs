//! `gestio-core`: domain foundation shared by every engine crate.
//!
//! Pure primitives only: identifiers, the error taxonomy, aggregate
//! semantics, money rounding and document numbering. No IO lives here.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod numbering;
pub mod operation;

pub use aggregate::{execute, Aggregate, AggregateRoot};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
pub use money::{round_cost, round_money, COST_SCALE, MONEY_SCALE};
pub use numbering::{DocumentNumber, SequenceKey};
pub use operation::OperationType;
