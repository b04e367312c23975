//! # saga-runtime-local
//!
//! In-process backends and the [`LocalRuntime`] builder for running the
//! saga runtime without external infrastructure: an in-memory durable log
//! and lock store wired to the core engine.

pub mod memory_lock_store;
pub mod memory_log;
pub mod runtime;

pub use memory_lock_store::InMemoryLockStore;
pub use memory_log::InMemoryDurableLog;
pub use runtime::{LocalRuntime, LocalRuntimeBuilder};
