//! Inventory ledger and costing engine.
//!
//! The ledger is append-only: a [`PostingRequest`] validated against its
//! causale effect becomes an immutable [`LedgerEntry`], and the product's
//! [`ProductStock`] snapshot (on-hand quantity, weighted-average cost) is
//! advanced in the same step. Corrections are new, oppositely-signed
//! entries. Persisting entry and snapshot atomically is the store's job.

pub mod costing;
pub mod ledger;
pub mod replay;
pub mod stats;

pub use costing::{weighted_average, ProductStock, StockPolicy, WarehouseStock};
pub use ledger::{LedgerEntry, LedgerEntryId, LedgerEvent, PostingRequest, SourceDocument, SourceKind};
pub use replay::{replay, verify, StockDiscrepancy};
pub use stats::PriceStatistics;
