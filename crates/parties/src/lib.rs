//! Subjects: the counterparties of every order, invoice and ledger entry.
//!
//! One subject can be client, supplier, agent and carrier at the same time;
//! the role set is a typed flag set so "usable as a sale counterparty" is a
//! predicate, not a string lookup.

pub mod category;
pub mod roles;
pub mod subject;

pub use category::{SubjectCategory, SubjectCategoryId};
pub use roles::{SubjectRole, SubjectRoles};
pub use subject::{ContactInfo, FiscalIdentifiers, Subject, SubjectId, SubjectStatus, SupplierTerms};
