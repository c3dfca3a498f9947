//! Event publication.
//!
//! Events collected while a block executes are published here only after
//! the block commits. Each subscriber has an independent buffer; slow
//! subscribers lag rather than block the chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_types::Event;
use tokio::sync::broadcast;

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "epoch", "reward".
    pub categories: Option<Vec<String>>,
    /// Only events whose payload names one of these epoch identifiers.
    pub epoch_ids: Option<Vec<String>>,
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            let category = event.event_type.category();
            if !categories.iter().any(|c| c == category) {
                return false;
            }
        }

        if let Some(ref epoch_ids) = self.epoch_ids {
            let id = event
                .payload
                .get("identifier")
                .or_else(|| event.payload.get("epoch_id"))
                .and_then(|v| v.as_str());
            match id {
                Some(id) if epoch_ids.iter().any(|e| e == id) => {}
                _ => return false,
            }
        }

        true
    }
}

/// Event bus for broadcasting committed block events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish the events of one committed block, in emission order.
    pub fn publish(&self, events: Vec<Event>) {
        for event in events {
            self.sequence.fetch_add(1, Ordering::SeqCst);
            // Ignore send errors (no subscribers)
            let _ = self.sender.send(event);
        }
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe to the events that pass `filter`.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    /// Number of events published so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

/// Receiver half of [`EventBus::subscribe_filtered`].
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<Event>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Next matching event. Lagging skips the overwritten events and keeps
    /// reading; `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
