//! Tracing initialization.
//!
//! Engine operations and store calls emit spans carrying the tenant and
//! document ids; this installs the JSON formatter that writes them out.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVES: &str = "info";

/// Initialize tracing for the process, filtered by `RUST_LOG`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVES);
}

/// Like [`init`], falling back to `directives` instead of `info`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_with_default(directives: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialization_is_a_no_op() {
        init_with_default("debug");
        assert!(!init_with_default("info"));
        init();
        ::tracing::info!(tenant_id = "t-1", "still logging after repeated init");
    }
}
