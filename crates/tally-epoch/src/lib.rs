//! # tally-epoch
//!
//! Periodic epoch tracking. Converts the monotonically increasing block
//! height stream into named epoch boundaries and notifies subscribers.
//!
//! ## Modules
//!
//! - [`registry`]: Durable `EpochInfo` records
//! - [`hooks`]: Subscriber contract and dispatcher
//! - [`tracker`]: Per-block boundary detection
//! - [`genesis`]: Genesis import/export and validation
//! - [`queries`]: Read-only views

pub mod genesis;
pub mod hooks;
pub mod queries;
pub mod registry;
pub mod tracker;

pub use hooks::{EpochHookDispatcher, EpochHooks, HookError, HookResult};
pub use tracker::{EpochTracker, EpochTransition, RolloverPolicy, TrackerConfig};

use tally_types::ErrorKind;

/// Error types for epoch operations.
#[derive(Debug, thiserror::Error)]
pub enum EpochError {
    /// No epoch registered under this identifier.
    #[error("epoch with identifier {0} not found")]
    NotFound(String),

    /// An epoch with this identifier is already registered.
    #[error("epoch with identifier {0} already exists")]
    AlreadyExists(String),

    /// The tracker already has a subscriber chain.
    #[error("cannot set epoch hooks twice")]
    HooksAlreadySet,

    /// Two subscribers registered under the same name.
    #[error("duplicate epoch hook subscriber: {0}")]
    DuplicateSubscriber(String),

    #[error(transparent)]
    Invalid(#[from] tally_types::ValidationError),

    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    /// Persisted epoch state violates an invariant.
    #[error("epoch state integrity violation: {0}")]
    Integrity(String),

    /// A subscriber failed while handling a boundary notification.
    #[error("epoch hook subscriber {subscriber} failed: {source}")]
    Subscriber {
        subscriber: String,
        kind: ErrorKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("store error: {0}")]
    Store(#[from] tally_store::StoreError),
}

impl EpochError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EpochError::NotFound(_) => ErrorKind::NotFound,
            EpochError::AlreadyExists(_)
            | EpochError::HooksAlreadySet
            | EpochError::DuplicateSubscriber(_)
            | EpochError::Invalid(_)
            | EpochError::InvalidGenesis(_) => ErrorKind::Configuration,
            EpochError::Subscriber { kind, .. } => *kind,
            EpochError::Integrity(_) | EpochError::Store(_) => ErrorKind::Integrity,
        }
    }
}

/// Convenience result type for epoch operations.
pub type Result<T> = std::result::Result<T, EpochError>;
