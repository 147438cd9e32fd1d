//! Sagaflow execution engine.
//!
//! Domain logic for durable multi-step executions: the status state machine,
//! the self-triggering step scheduler, the plan verification gate, the
//! distributed idempotency lock manager, per-service circuit breakers, and
//! the transactional outbox relay.
//!
//! Storage and transport are behind the traits in [`repository`], [`lock`],
//! [`planner`], and [`tool`]; the infra crate provides the SQLite and HTTP
//! implementations.

pub mod breaker;
pub mod gate;
pub mod lock;
pub mod machine;
pub mod planner;
pub mod relay;
pub mod repository;
pub mod scheduler;
pub mod tool;
pub mod tracer;
