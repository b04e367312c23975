//! Ports for infrastructure adapters.
//!
//! Each external capability the core depends on is expressed as a narrow
//! trait contract injected into the engine, which keeps the core free of
//! transport and storage concerns and enables deterministic replay-based
//! testing with in-memory fakes.

pub mod activity;
pub mod durable_log;
pub mod lock_store;

pub use activity::{ActivityClient, ActivityFailure, ActivityId};
pub use durable_log::{DurableLog, DurableLogError};
pub use lock_store::{LockRecord, LockStore};
