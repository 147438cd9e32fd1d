//! Storage traits for the engine.
//!
//! The infrastructure layer (sagaflow-infra) implements these with SQLite
//! persistence and an in-process cache. All traits use native async fn in
//! traits (Rust 2024 edition, no async_trait macro).

mod execution;
mod outbox;
mod queue;

pub use execution::ExecutionStateStore;
pub use outbox::{CacheStore, OutboxStore};
pub use queue::{ClaimedMessage, StepQueue};
