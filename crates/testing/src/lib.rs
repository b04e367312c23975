//! # saga-runtime-testing
//!
//! Test doubles for exercising the saga runtime: a scripted
//! [`ActivityClient`] with per-class response queues and call recording.
//!
//! [`ActivityClient`]: saga_runtime_core::port::ActivityClient

pub mod scripted_client;

pub use scripted_client::{Invocation, ScriptedActivityClient, ScriptedOutcome};
