//! Epoch lifecycle subscribers.
//!
//! Subscribers are wired once, at construction time, into an
//! [`EpochHookDispatcher`]. Dispatch is synchronous and in registration
//! order on the block's own context. The first failing subscriber stops
//! dispatch and its error propagates to the caller, which aborts the
//! block.

use std::fmt;
use std::sync::Arc;

use tally_store::Context;
use tally_types::{EpochNumber, ErrorKind};

use crate::{EpochError, Result};

/// Error returned by a subscriber.
#[derive(Debug)]
pub struct HookError {
    pub kind: ErrorKind,
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl HookError {
    pub fn new(kind: ErrorKind, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source, f)
    }
}

pub type HookResult = std::result::Result<(), HookError>;

/// Epoch lifecycle callbacks.
pub trait EpochHooks: Send + Sync {
    /// A new ordinal of `identifier` has begun.
    fn before_epoch_start(
        &self,
        ctx: &mut Context<'_>,
        identifier: &str,
        epoch_number: EpochNumber,
    ) -> HookResult;

    /// Ordinal `epoch_number` of `identifier` has just closed.
    fn after_epoch_end(
        &self,
        ctx: &mut Context<'_>,
        identifier: &str,
        epoch_number: EpochNumber,
    ) -> HookResult;
}

/// Ordered, fixed list of epoch subscribers.
#[derive(Clone, Default)]
pub struct EpochHookDispatcher {
    subscribers: Vec<(String, Arc<dyn EpochHooks>)>,
}

impl EpochHookDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Subscriber names in dispatch order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.subscribers.iter().map(|(name, _)| name.as_str())
    }

    pub fn before_epoch_start(
        &self,
        ctx: &mut Context<'_>,
        identifier: &str,
        epoch_number: EpochNumber,
    ) -> Result<()> {
        for (name, hooks) in &self.subscribers {
            hooks
                .before_epoch_start(ctx, identifier, epoch_number)
                .map_err(|e| subscriber_error(name, e))?;
        }
        Ok(())
    }

    pub fn after_epoch_end(
        &self,
        ctx: &mut Context<'_>,
        identifier: &str,
        epoch_number: EpochNumber,
    ) -> Result<()> {
        for (name, hooks) in &self.subscribers {
            hooks
                .after_epoch_end(ctx, identifier, epoch_number)
                .map_err(|e| subscriber_error(name, e))?;
        }
        Ok(())
    }
}

impl fmt::Debug for EpochHookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn subscriber_error(name: &str, err: HookError) -> EpochError {
    tracing::error!(subscriber = name, error = %err, "epoch hook failed");
    EpochError::Subscriber {
        subscriber: name.to_string(),
        kind: err.kind,
        source: err.source,
    }
}

/// Collects subscribers for an [`EpochHookDispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    subscribers: Vec<(String, Arc<dyn EpochHooks>)>,
}

impl DispatcherBuilder {
    /// Append a subscriber. Dispatch follows append order.
    ///
    /// # Errors
    ///
    /// - [`EpochError::DuplicateSubscriber`] if `name` is already registered
    pub fn subscribe(mut self, name: impl Into<String>, hooks: Arc<dyn EpochHooks>) -> Result<Self> {
        let name = name.into();
        if self.subscribers.iter().any(|(existing, _)| *existing == name) {
            return Err(EpochError::DuplicateSubscriber(name));
        }
        self.subscribers.push((name, hooks));
        Ok(self)
    }

    pub fn build(self) -> EpochHookDispatcher {
        EpochHookDispatcher {
            subscribers: self.subscribers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tally_store::MemStore;

    /// Records every call as "<name>:<hook>:<identifier>:<n>".
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_on_end: bool,
    }

    impl EpochHooks for Recorder {
        fn before_epoch_start(&self, _ctx: &mut Context<'_>, id: &str, n: EpochNumber) -> HookResult {
            if let Ok(mut log) = self.log.lock() {
                log.push(format!("{}:start:{id}:{n}", self.name));
            }
            Ok(())
        }

        fn after_epoch_end(&self, _ctx: &mut Context<'_>, id: &str, n: EpochNumber) -> HookResult {
            if let Ok(mut log) = self.log.lock() {
                log.push(format!("{}:end:{id}:{n}", self.name));
            }
            if self.fail_on_end {
                return Err(HookError::new(ErrorKind::Integrity, "boom"));
            }
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail_on_end: bool) -> Arc<dyn EpochHooks> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
            fail_on_end,
        })
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EpochHookDispatcher::builder()
            .subscribe("a", recorder("a", &log, false))
            .expect("a")
            .subscribe("b", recorder("b", &log, false))
            .expect("b")
            .build();

        let mut store = MemStore::new();
        let mut ctx = Context::new(1, 0, &mut store);
        dispatcher
            .before_epoch_start(&mut ctx, "day", 1)
            .expect("dispatch");

        let log = log.lock().expect("lock");
        assert_eq!(*log, vec!["a:start:day:1", "b:start:day:1"]);
    }

    #[test]
    fn test_duplicate_subscriber_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = EpochHookDispatcher::builder()
            .subscribe("rewards", recorder("a", &log, false))
            .expect("first")
            .subscribe("rewards", recorder("b", &log, false));
        assert!(matches!(result, Err(EpochError::DuplicateSubscriber(_))));
    }

    #[test]
    fn test_failure_stops_dispatch_and_propagates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EpochHookDispatcher::builder()
            .subscribe("a", recorder("a", &log, true))
            .expect("a")
            .subscribe("b", recorder("b", &log, false))
            .expect("b")
            .build();

        let mut store = MemStore::new();
        let mut ctx = Context::new(1, 0, &mut store);
        let err = dispatcher
            .after_epoch_end(&mut ctx, "day", 1)
            .expect_err("should fail");
        assert!(matches!(err, EpochError::Subscriber { ref subscriber, .. } if subscriber == "a"));
        assert_eq!(err.kind(), ErrorKind::Integrity);

        let log = log.lock().expect("lock");
        assert_eq!(*log, vec!["a:end:day:1"]);
    }
}
