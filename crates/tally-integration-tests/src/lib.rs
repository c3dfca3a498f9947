//! Integration test crate for the tally chain.
//!
//! This crate has no library code. Its tests drive whole blocks through
//! `tally_node::Chain` and check epochs, distributions, claims and
//! expiration sweeps together.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p tally-integration-tests
//! ```
