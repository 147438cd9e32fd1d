//! SQLite implementations of the engine's storage traits.

pub mod execution;
pub mod lock;
pub mod outbox;
pub mod pool;
pub mod queue;
