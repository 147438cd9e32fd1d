//! Shared domain types for Sagaflow.
//!
//! This crate contains the core domain types used across the Sagaflow engine:
//! execution state, plans, locks, circuit breaker configuration, outbox events,
//! trace events, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod breaker;
pub mod config;
pub mod error;
pub mod execution;
pub mod lock;
pub mod outbox;
pub mod plan;
pub mod trace;
