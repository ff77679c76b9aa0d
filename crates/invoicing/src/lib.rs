//! Invoicing domain module.
//!
//! Invoices derived from fulfilled orders, payment methods and the payment
//! schedules they produce, and delivery notes (DDT). Pure domain logic: no
//! IO, no storage.

pub mod delivery_note;
pub mod invoice;
pub mod payment;
pub mod schedule;

pub use delivery_note::{DeliveryLine, DeliveryNote, DeliveryNoteEvent, DeliveryNoteId, IssueDeliveryNote};
pub use invoice::{
    lines_from_order, AddInvoiceLine, AmendedLine, Invoice, InvoiceCommand, InvoiceEvent, InvoiceId,
    InvoiceIssued, InvoiceLine, IssueInvoice, LineAmended, RemoveInvoiceLine, UpdateInvoiceLine,
};
pub use payment::{InstallmentRule, PaymentMethod};
pub use schedule::{generate_schedule, ScheduleEntry};
