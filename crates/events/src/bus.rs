//! Publish/subscribe abstraction for committed domain events.
//!
//! The bus distributes, it does not store: the engine's store is the source
//! of truth and events are published only after the write that produced
//! them has committed. Delivery is best-effort fan-out; subscribers must
//! tolerate duplicates (use `sequence_number` per aggregate).

use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// Receiving end of a bus subscription. Each subscription sees every message
/// published after it was created, in publication order.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Everything already queued, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
