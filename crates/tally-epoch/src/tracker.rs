//! Epoch boundary detection.
//!
//! [`EpochTracker::advance_for_block`] runs once per block, in height
//! order, before any other block logic. For every registered epoch it
//! either starts counting (the first time the chain reaches
//! `start_height`), rolls the epoch over (once `duration` blocks have
//! elapsed since the current ordinal began), or does nothing.
//!
//! ## Rollover policy
//!
//! Under [`RolloverPolicy::SkipForward`] a height gap spanning several
//! durations still produces a single transition whose new ordinal starts
//! at the current height. [`RolloverPolicy::CatchUp`] instead closes one
//! ordinal per whole elapsed duration, each starting exactly `duration`
//! blocks after the previous one.

use serde::{Deserialize, Serialize};
use tally_store::Context;
use tally_types::{EpochInfo, EpochNumber, EventType, Height};

use crate::hooks::EpochHookDispatcher;
use crate::{registry, EpochError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverPolicy {
    /// At most one ordinal increment per block.
    #[default]
    SkipForward,
    /// One ordinal increment per whole elapsed duration.
    CatchUp,
}

/// Tracker configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub rollover: RolloverPolicy,
}

/// A state transition performed for one epoch during one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EpochTransition {
    /// Counting began; `epoch_number` is the first ordinal.
    Started {
        identifier: String,
        epoch_number: EpochNumber,
    },
    /// Ordinal `ended` closed and `ended + 1` began.
    Rolled {
        identifier: String,
        ended: EpochNumber,
        start_height: Height,
    },
}

pub struct EpochTracker {
    config: TrackerConfig,
    hooks: Option<EpochHookDispatcher>,
}

impl EpochTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            hooks: None,
        }
    }

    /// Install the subscriber chain.
    ///
    /// # Errors
    ///
    /// - [`EpochError::HooksAlreadySet`] if a chain was already installed
    pub fn set_hooks(&mut self, hooks: EpochHookDispatcher) -> Result<()> {
        if self.hooks.is_some() {
            return Err(EpochError::HooksAlreadySet);
        }
        tracing::debug!(subscribers = ?hooks, "epoch hooks installed");
        self.hooks = Some(hooks);
        Ok(())
    }

    /// Builder form of [`EpochTracker::set_hooks`].
    pub fn with_hooks(mut self, hooks: EpochHookDispatcher) -> Result<Self> {
        self.set_hooks(hooks)?;
        Ok(self)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Evaluate every registered epoch against the block in `ctx`.
    ///
    /// Persists each updated [`EpochInfo`] before notifying subscribers,
    /// so they observe post-transition state. Any subscriber or store
    /// failure is returned and must abort the block.
    pub fn advance_for_block(&self, ctx: &mut Context<'_>) -> Result<Vec<EpochTransition>> {
        let epochs = registry::all(ctx.store())?;
        let mut transitions = Vec::new();
        for info in epochs {
            self.advance_epoch(ctx, info, &mut transitions)?;
        }
        Ok(transitions)
    }

    fn advance_epoch(
        &self,
        ctx: &mut Context<'_>,
        mut info: EpochInfo,
        transitions: &mut Vec<EpochTransition>,
    ) -> Result<()> {
        let height = ctx.height();
        info.validate().map_err(|e| {
            EpochError::Integrity(format!("stored epoch {} is invalid: {e}", info.identifier))
        })?;

        if !info.epoch_counting_started {
            if height < info.start_height {
                return Ok(());
            }
            info.epoch_counting_started = true;
            info.current_epoch_start_height = height;
            info.current_epoch = next_ordinal(&info)?;
            registry::set(ctx.store_mut(), &info)?;

            tracing::info!(
                identifier = %info.identifier,
                epoch = info.current_epoch,
                height,
                "epoch counting started"
            );
            self.begin(ctx, &info)?;
            transitions.push(EpochTransition::Started {
                identifier: info.identifier,
                epoch_number: info.current_epoch,
            });
            return Ok(());
        }

        if info.current_epoch_start_height > height {
            return Err(EpochError::Integrity(format!(
                "epoch {} started at {} which is after block {height}",
                info.identifier, info.current_epoch_start_height
            )));
        }

        let mut elapsed = info.blocks_since_start(height);
        while elapsed >= info.duration {
            let new_start = match self.config.rollover {
                RolloverPolicy::SkipForward => height,
                RolloverPolicy::CatchUp => info.current_epoch_start_height + info.duration,
            };
            let ended = info.current_epoch;
            info.current_epoch = next_ordinal(&info)?;
            info.previous_epoch_start_height = info.current_epoch_start_height;
            info.current_epoch_start_height = new_start;
            registry::set(ctx.store_mut(), &info)?;

            tracing::info!(
                identifier = %info.identifier,
                ended,
                epoch = info.current_epoch,
                start_height = new_start,
                height,
                "epoch rolled over"
            );
            self.end(ctx, &info, ended)?;
            self.begin(ctx, &info)?;
            transitions.push(EpochTransition::Rolled {
                identifier: info.identifier.clone(),
                ended,
                start_height: new_start,
            });

            elapsed = info.blocks_since_start(height);
        }
        Ok(())
    }

    fn begin(&self, ctx: &mut Context<'_>, info: &EpochInfo) -> Result<()> {
        ctx.emit(
            EventType::EpochStart,
            serde_json::json!({
                "identifier": info.identifier,
                "epoch_number": info.current_epoch,
                "start_height": info.current_epoch_start_height,
            }),
        );
        match &self.hooks {
            Some(hooks) => hooks.before_epoch_start(ctx, &info.identifier, info.current_epoch),
            None => Ok(()),
        }
    }

    fn end(&self, ctx: &mut Context<'_>, info: &EpochInfo, ended: EpochNumber) -> Result<()> {
        ctx.emit(
            EventType::EpochEnd,
            serde_json::json!({
                "identifier": info.identifier,
                "epoch_number": ended,
                "start_height": info.previous_epoch_start_height,
                "end_height": info.current_epoch_start_height,
            }),
        );
        match &self.hooks {
            Some(hooks) => hooks.after_epoch_end(ctx, &info.identifier, ended),
            None => Ok(()),
        }
    }
}

fn next_ordinal(info: &EpochInfo) -> Result<EpochNumber> {
    info.current_epoch
        .checked_add(1)
        .ok_or_else(|| EpochError::Integrity(format!("epoch {} ordinal overflow", info.identifier)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EpochHooks, HookResult};
    use crate::queries;
    use std::sync::{Arc, Mutex};
    use tally_store::{KvStore, MemStore};

    const MONTHLY: u64 = 525_960;

    #[derive(Default)]
    struct Log(Mutex<Vec<(String, String, EpochNumber)>>);

    impl Log {
        fn push(&self, hook: &str, id: &str, n: EpochNumber) {
            if let Ok(mut log) = self.0.lock() {
                log.push((hook.to_string(), id.to_string(), n));
            }
        }

        fn take(&self) -> Vec<(String, String, EpochNumber)> {
            self.0.lock().map(|mut l| std::mem::take(&mut *l)).unwrap_or_default()
        }
    }

    struct Recorder(Arc<Log>);

    impl EpochHooks for Recorder {
        fn before_epoch_start(&self, _ctx: &mut Context<'_>, id: &str, n: EpochNumber) -> HookResult {
            self.0.push("start", id, n);
            Ok(())
        }

        fn after_epoch_end(&self, ctx: &mut Context<'_>, id: &str, n: EpochNumber) -> HookResult {
            // subscribers see the already-advanced record
            let info = registry::must_get(ctx.store(), id)
                .map_err(|e| crate::HookError::new(e.kind(), e))?;
            assert_eq!(info.current_epoch, n + 1);
            self.0.push("end", id, n);
            Ok(())
        }
    }

    fn tracker(policy: RolloverPolicy) -> (EpochTracker, Arc<Log>) {
        let log = Arc::new(Log::default());
        let hooks = EpochHookDispatcher::builder()
            .subscribe("recorder", Arc::new(Recorder(Arc::clone(&log))))
            .expect("subscribe")
            .build();
        let tracker = EpochTracker::new(TrackerConfig { rollover: policy })
            .with_hooks(hooks)
            .expect("hooks");
        (tracker, log)
    }

    fn monthly() -> EpochInfo {
        EpochInfo {
            identifier: "monthly".to_string(),
            start_height: 1,
            duration: MONTHLY,
            current_epoch: 0,
            current_epoch_start_height: 1,
            epoch_counting_started: false,
            previous_epoch_start_height: 0,
        }
    }

    fn advance(tracker: &EpochTracker, store: &mut dyn KvStore, height: Height) -> Vec<EpochTransition> {
        let mut ctx = Context::new(height, height * 5, store);
        tracker.advance_for_block(&mut ctx).expect("advance")
    }

    #[test]
    fn test_hooks_cannot_be_set_twice() {
        let (mut tracker, _) = tracker(RolloverPolicy::SkipForward);
        let result = tracker.set_hooks(EpochHookDispatcher::default());
        assert!(matches!(result, Err(EpochError::HooksAlreadySet)));
    }

    #[test]
    fn test_monthly_scenario() {
        let (tracker, log) = tracker(RolloverPolicy::SkipForward);
        let mut store = MemStore::new();
        registry::set(&mut store, &monthly()).expect("register");

        advance(&tracker, &mut store, 2);
        let info = registry::must_get(&store, "monthly").expect("get");
        assert_eq!(info.current_epoch, 1);
        assert_eq!(info.current_epoch_start_height, 2);
        assert!(info.epoch_counting_started);
        assert_eq!(log.take(), vec![("start".to_string(), "monthly".to_string(), 1)]);

        // elapsed = 525958 < duration
        let transitions = advance(&tracker, &mut store, 525_960);
        assert!(transitions.is_empty());
        let info = registry::must_get(&store, "monthly").expect("get");
        assert_eq!(info.current_epoch, 1);

        advance(&tracker, &mut store, 535_680);
        let info = registry::must_get(&store, "monthly").expect("get");
        assert_eq!(info.current_epoch, 2);
        assert_eq!(info.current_epoch_start_height, 535_680);
        assert_eq!(info.previous_epoch_start_height, 2);
        assert_eq!(
            log.take(),
            vec![
                ("end".to_string(), "monthly".to_string(), 1),
                ("start".to_string(), "monthly".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_not_started_never_ends() {
        let (tracker, log) = tracker(RolloverPolicy::SkipForward);
        let mut store = MemStore::new();
        let mut info = EpochInfo::new("week", 1_000, 10);
        info.current_epoch_start_height = 1;
        registry::set(&mut store, &info).expect("register");

        for height in [1, 50, 500, 999] {
            assert!(advance(&tracker, &mut store, height).is_empty());
        }
        assert!(log.take().is_empty());
        let info = registry::must_get(&store, "week").expect("get");
        assert_eq!(info.current_epoch, 0);
        assert!(!info.epoch_counting_started);

        advance(&tracker, &mut store, 1_000);
        let info = registry::must_get(&store, "week").expect("get");
        assert_eq!(info.current_epoch, 1);
        assert_eq!(info.current_epoch_start_height, 1_000);
    }

    #[test]
    fn test_skip_forward_single_increment_on_large_gap() {
        let (tracker, log) = tracker(RolloverPolicy::SkipForward);
        let mut store = MemStore::new();
        registry::set(&mut store, &EpochInfo::new("day", 1, 10)).expect("register");
        advance(&tracker, &mut store, 1);
        log.take();

        // 5 whole durations elapsed
        let transitions = advance(&tracker, &mut store, 51);
        assert_eq!(transitions.len(), 1);
        let info = registry::must_get(&store, "day").expect("get");
        assert_eq!(info.current_epoch, 2);
        assert_eq!(info.current_epoch_start_height, 51);
        assert_eq!(log.take().len(), 2);
    }

    #[test]
    fn test_catch_up_closes_every_elapsed_duration() {
        let (tracker, log) = tracker(RolloverPolicy::CatchUp);
        let mut store = MemStore::new();
        registry::set(&mut store, &EpochInfo::new("day", 1, 10)).expect("register");
        advance(&tracker, &mut store, 1);
        log.take();

        let transitions = advance(&tracker, &mut store, 35);
        assert_eq!(transitions.len(), 3);
        let info = registry::must_get(&store, "day").expect("get");
        assert_eq!(info.current_epoch, 4);
        assert_eq!(info.current_epoch_start_height, 31);
        assert_eq!(info.previous_epoch_start_height, 21);
        let ended: Vec<EpochNumber> = log
            .take()
            .into_iter()
            .filter(|(hook, _, _)| hook == "end")
            .map(|(_, _, n)| n)
            .collect();
        assert_eq!(ended, vec![1, 2, 3]);
    }

    #[test]
    fn test_ordinal_monotonic_and_progress_reset() {
        let (tracker, _) = tracker(RolloverPolicy::SkipForward);
        let mut store = MemStore::new();
        registry::set(&mut store, &EpochInfo::new("day", 3, 7)).expect("register");

        let mut last = 0;
        for height in 1..=100u64 {
            let transitions = advance(&tracker, &mut store, height);
            let info = registry::must_get(&store, "day").expect("get");
            assert!(info.current_epoch >= last);
            assert!(info.current_epoch - last <= 1);
            if !transitions.is_empty() {
                let n = queries::num_blocks_since_epoch_start(&store, height, "day").expect("progress");
                assert_eq!(n, 0);
            }
            last = info.current_epoch;
        }
        // started at 3, rolled at 10, 17, ..., 94
        assert_eq!(last, 14);
    }

    #[test]
    fn test_epochs_advance_independently() {
        let (tracker, _) = tracker(RolloverPolicy::SkipForward);
        let mut store = MemStore::new();
        registry::set(&mut store, &EpochInfo::new("fast", 1, 2)).expect("register");
        registry::set(&mut store, &EpochInfo::new("slow", 1, 5)).expect("register");
        for height in 1..=10 {
            advance(&tracker, &mut store, height);
        }
        assert_eq!(registry::must_get(&store, "fast").expect("get").current_epoch, 5);
        assert_eq!(registry::must_get(&store, "slow").expect("get").current_epoch, 2);
    }

    #[test]
    fn test_events_emitted() {
        let tracker = EpochTracker::new(TrackerConfig::default());
        let mut store = MemStore::new();
        registry::set(&mut store, &EpochInfo::new("day", 1, 2)).expect("register");

        let mut ctx = Context::new(1, 0, &mut store);
        tracker.advance_for_block(&mut ctx).expect("advance");
        assert_eq!(ctx.events().len(), 1);
        assert_eq!(ctx.events()[0].event_type, EventType::EpochStart);

        let mut ctx = Context::new(3, 0, &mut store);
        tracker.advance_for_block(&mut ctx).expect("advance");
        let types: Vec<EventType> = ctx.events().iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::EpochEnd, EventType::EpochStart]);
        assert_eq!(ctx.events()[0].payload["epoch_number"], 1);
    }

    #[test]
    fn test_start_height_in_future_is_integrity_error() {
        let tracker = EpochTracker::new(TrackerConfig::default());
        let mut store = MemStore::new();
        let mut info = EpochInfo::new("day", 1, 2);
        info.epoch_counting_started = true;
        info.current_epoch = 1;
        info.current_epoch_start_height = 100;
        registry::set(&mut store, &info).expect("register");

        let mut ctx = Context::new(50, 0, &mut store);
        let err = tracker.advance_for_block(&mut ctx).expect_err("integrity");
        assert_eq!(err.kind(), tally_types::ErrorKind::Integrity);
    }

    #[test]
    fn test_zero_duration_record_is_integrity_error() {
        for policy in [RolloverPolicy::SkipForward, RolloverPolicy::CatchUp] {
            let tracker = EpochTracker::new(TrackerConfig { rollover: policy });
            let mut store = MemStore::new();
            let mut info = EpochInfo::new("day", 1, 0);
            info.epoch_counting_started = true;
            info.current_epoch = 1;
            registry::set(&mut store, &info).expect("register");

            let mut ctx = Context::new(2, 0, &mut store);
            let err = tracker.advance_for_block(&mut ctx).expect_err("integrity");
            assert!(matches!(err, EpochError::Integrity(_)));
            assert!(ctx.events().is_empty());
        }
    }
}
