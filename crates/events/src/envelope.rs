use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gestio_core::{AggregateId, TenantId};

use crate::event::Event;

/// An event plus its tenant and stream metadata.
///
/// `sequence_number` is the aggregate version reached by applying the event,
/// so consumers can discard duplicates per aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    aggregate_id: AggregateId,
    aggregate_type: String,
    sequence_number: u64,

    event_type: String,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}

impl EventEnvelope<serde_json::Value> {
    /// Wrap a typed domain event into a JSON envelope for the bus.
    pub fn from_event<T>(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        sequence_number: u64,
        event: &T,
    ) -> Result<Self, serde_json::Error>
    where
        T: Event + Serialize,
    {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            tenant_id,
            aggregate_id,
            aggregate_type,
            sequence_number,
            event.event_type(),
            event.occurred_at(),
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct StockPosted {
        quantity: i64,
        at: DateTime<Utc>,
    }

    impl Event for StockPosted {
        fn event_type(&self) -> &'static str {
            "inventory.ledger.posted"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn json_envelope_keeps_event_metadata() {
        let tenant = TenantId::new();
        let aggregate = AggregateId::new();
        let at = Utc::now();
        let envelope = EventEnvelope::from_event(
            tenant,
            aggregate,
            "ledger",
            7,
            &StockPosted { quantity: 10, at },
        )
        .unwrap();

        assert_eq!(envelope.tenant_id(), tenant);
        assert_eq!(envelope.aggregate_id(), aggregate);
        assert_eq!(envelope.event_type(), "inventory.ledger.posted");
        assert_eq!(envelope.sequence_number(), 7);
        assert_eq!(envelope.occurred_at(), at);
        assert_eq!(envelope.payload()["quantity"], 10);
    }
}
