//! Aggregate semantics for the engine's documents (orders, invoices).

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Number of events applied so far. Persisted alongside the row and used
    /// as the optimistic-concurrency token on every write.
    fn version(&self) -> u64;
}

/// Aggregate execution semantics (pure, deterministic).
///
/// `handle` decides which events a command produces without touching state;
/// `apply` evolves state from one event. Aggregates never perform IO: anything
/// they need from the outside world (counterparty roles, VAT rates, document
/// numbers) arrives resolved inside the command.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event; bumps `version()` by one.
    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// Runs `handle` then `apply` for every emitted event, returning the events.
///
/// Convenience for callers that work on a loaded aggregate in memory and
/// persist the resulting state as a whole.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = aggregate.handle(command)?;
    for event in &events {
        aggregate.apply(event);
    }
    Ok(events)
}
