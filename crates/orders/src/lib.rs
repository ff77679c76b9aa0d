//! Orders: sale and purchase documents and their lifecycle.
//!
//! Line amounts and header totals are always computed, never entered;
//! [`pricing`] holds the arithmetic shared with invoices and [`vat`] the
//! rule that picks a line's VAT code.

pub mod order;
pub mod pricing;
pub mod vat;

pub use order::{
    AddLine, CancelOrder, ConfirmOrder, CreateOrder, InvoiceLink, LineInput, MarkFulfilled, MarkInvoiced,
    MarkReceived, Order, OrderCommand, OrderEvent, OrderId, OrderLine, OrderStatus, RemoveLine, UpdateLine,
};
pub use pricing::{line_amounts, DocumentTotals, LineAmounts, LineDiscount};
pub use vat::{AppliedVat, VatContext};
