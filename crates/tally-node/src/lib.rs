//! # tally-node
//!
//! Wiring for a single-process Tally chain: configuration, block
//! execution over the SQLite store, and event publication.
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration
//! - [`chain`]: Block executor
//! - [`events`]: Broadcast event bus

pub mod chain;
pub mod config;
pub mod events;

pub use chain::{BlockOutcome, Chain, ChainError, Receipt, Tx};
pub use config::NodeConfig;
pub use events::{EventBus, EventFilter, FilteredReceiver};
