//! Genesis import/export for epoch records.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tally_store::Context;
use tally_types::{EpochInfo, ValidationError};

use crate::{registry, EpochError, Result};

/// Blocks per day at a 5-second block time.
pub const BLOCKS_PER_DAY: u64 = 17_280;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    #[serde(default)]
    pub epochs: Vec<EpochInfo>,
}

impl GenesisState {
    pub fn new(epochs: Vec<EpochInfo>) -> Self {
        Self { epochs }
    }

    /// Check every record and reject duplicate identifiers.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for epoch in &self.epochs {
            epoch.validate()?;
            if !seen.insert(epoch.identifier.as_str()) {
                return Err(EpochError::InvalidGenesis(format!(
                    "duplicate epoch identifier {}",
                    epoch.identifier
                )));
            }
        }
        Ok(())
    }
}

/// `day`, `week` and `month` epochs, all starting at genesis.
pub fn default_genesis() -> GenesisState {
    GenesisState::new(vec![
        EpochInfo::new("day", 0, BLOCKS_PER_DAY),
        EpochInfo::new("week", 0, BLOCKS_PER_DAY * 7),
        EpochInfo::new("month", 0, BLOCKS_PER_DAY * 30),
    ])
}

/// Write the genesis epochs into the store.
///
/// A `start_height` of 0 means "start at genesis" and is replaced with
/// the current height. `current_epoch_start_height` is reset to the
/// current height for epochs that have not started counting.
pub fn init_genesis(ctx: &mut Context<'_>, genesis: &GenesisState) -> Result<()> {
    genesis.validate()?;
    let height = ctx.height();
    for epoch in &genesis.epochs {
        let mut info = epoch.clone();
        if info.start_height == 0 {
            info.start_height = height;
        }
        if !info.epoch_counting_started {
            info.current_epoch_start_height = height;
        } else if info.current_epoch_start_height > height {
            return Err(EpochError::InvalidGenesis(format!(
                "epoch {} started at {} which is after genesis height {height}",
                info.identifier, info.current_epoch_start_height
            )));
        }
        registry::set(ctx.store_mut(), &info)?;
        tracing::info!(
            identifier = %info.identifier,
            start_height = info.start_height,
            duration = info.duration,
            "epoch registered at genesis"
        );
    }
    Ok(())
}

pub fn export_genesis(ctx: &Context<'_>) -> Result<GenesisState> {
    Ok(GenesisState::new(registry::all(ctx.store())?))
}

/// Register a new epoch at runtime.
///
/// Only a fresh record is accepted: the tracker owns every field past
/// `start_height` and `duration`.
///
/// # Errors
///
/// - [`EpochError::AlreadyExists`] if the identifier is taken
/// - [`EpochError::Invalid`] if the record fails validation or carries
///   counting state
pub fn register_epoch(ctx: &mut Context<'_>, mut info: EpochInfo) -> Result<()> {
    info.validate()?;
    if info.epoch_counting_started || info.current_epoch != 0 {
        return Err(ValidationError::InvalidEpoch(format!(
            "epoch {} must be registered before counting starts",
            info.identifier
        ))
        .into());
    }
    if registry::exists(ctx.store(), &info.identifier)? {
        return Err(EpochError::AlreadyExists(info.identifier));
    }
    let height = ctx.height();
    if info.start_height == 0 {
        info.start_height = height;
    }
    info.current_epoch_start_height = info.start_height.max(height);
    info.previous_epoch_start_height = 0;
    registry::set(ctx.store_mut(), &info)?;
    tracing::info!(identifier = %info.identifier, duration = info.duration, "epoch registered");
    Ok(())
}
