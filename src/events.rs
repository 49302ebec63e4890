//! Domain events emitted after committed state changes. Consumers (webhooks,
//! projections, notifications) live outside the engine; the in-process
//! processor just logs them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    InvoiceCreated {
        invoice_id: Uuid,
    },
    InvoicePaid {
        invoice_id: Uuid,
    },
    InvoiceCancelled {
        invoice_id: Uuid,
    },
    ItemReserved {
        invoice_id: Uuid,
        asset_id: Uuid,
        quantity: i32,
    },
    ItemVoided {
        invoice_id: Uuid,
        item_id: Uuid,
    },
    TransactionRecorded {
        transaction_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
    },
    TransactionVoided {
        transaction_id: Uuid,
        invoice_id: Uuid,
    },
    ReturnFinalized {
        return_id: Uuid,
        invoice_id: Uuid,
    },
    CreditIssued {
        credit_id: Uuid,
        amount: Decimal,
    },
    CreditApplied {
        credit_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Builds a channel pair with a reasonable buffer.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Spawn once per process.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::InvoicePaid { invoice_id } => {
                info!(invoice_id = %invoice_id, "event: invoice paid");
            }
            Event::InvoiceCancelled { invoice_id } => {
                info!(invoice_id = %invoice_id, "event: invoice cancelled");
            }
            Event::ReturnFinalized {
                return_id,
                invoice_id,
            } => {
                info!(return_id = %return_id, invoice_id = %invoice_id, "event: return finalized");
            }
            other => {
                debug!(event = ?other, "event processed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tagged_variant_names() {
        // Downstream consumers key off the variant name in the JSON payload.
        let event = Event::ItemReserved {
            invoice_id: Uuid::nil(),
            asset_id: Uuid::nil(),
            quantity: 3,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert!(json.get("ItemReserved").is_some());
        assert_eq!(json["ItemReserved"]["quantity"], 3);
    }
}
