//! `gestio-auth`: tenant context and authorization gate.
//!
//! Pure policy: no HTTP, no storage. A [`Principal`] is resolved from a
//! [`MembershipDirectory`] (the external session resolver) and every engine
//! write passes through [`authorize`]. The tenant an operation runs in is
//! always the principal's, never one supplied by the caller.

pub mod authorize;
pub mod directory;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, AuthzError, Principal};
pub use directory::{InMemoryMembershipDirectory, MembershipDirectory};
pub use permissions::{Action, Capabilities, CapabilityMap, Resource};
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
