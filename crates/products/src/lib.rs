//! Catalog reference data the ledger and documents price against:
//! products, warehouses and VAT codes.

pub mod product;
pub mod vat;
pub mod warehouse;

pub use product::{Product, ProductId};
pub use vat::VatCode;
pub use warehouse::{ensure_single_primary, Warehouse, WarehouseId};
