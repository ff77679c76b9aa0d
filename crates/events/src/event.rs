use chrono::{DateTime, Utc};

/// A domain event: an immutable fact about one document or ledger.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "orders.order.fulfilled").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
