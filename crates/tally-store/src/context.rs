//! Block execution context.
//!
//! One context per block: the block's height and time, exclusive access
//! to the block's store view, and the events the block has emitted so far.

use tally_types::{Event, EventType, Height};

use crate::KvStore;

pub struct Context<'a> {
    height: Height,
    time: u64,
    store: &'a mut dyn KvStore,
    events: Vec<Event>,
}

impl<'a> Context<'a> {
    /// `time` is the block time in Unix seconds.
    pub fn new(height: Height, time: u64, store: &'a mut dyn KvStore) -> Self {
        Self {
            height,
            time,
            store,
            events: Vec::new(),
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn store(&self) -> &dyn KvStore {
        &*self.store
    }

    pub fn store_mut(&mut self) -> &mut dyn KvStore {
        &mut *self.store
    }

    /// Record an event at the current height.
    pub fn emit(&mut self, event_type: EventType, payload: serde_json::Value) {
        self.events.push(Event {
            event_type,
            height: self.height,
            timestamp: self.time,
            payload,
        });
    }

    /// Append events recorded by a nested context.
    pub fn extend_events(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStore;

    #[test]
    fn test_emit_stamps_height_and_time() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(10, 1_700_000_000, &mut store);
        ctx.emit(EventType::EpochStart, serde_json::json!({"identifier": "day"}));
        let events = ctx.into_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].height, 10);
        assert_eq!(events[0].timestamp, 1_700_000_000);
    }

    #[test]
    fn test_store_access() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(1, 0, &mut store);
        ctx.store_mut().set(b"k", b"v").expect("set");
        assert!(ctx.store().has(b"k").expect("has"));
    }
}
