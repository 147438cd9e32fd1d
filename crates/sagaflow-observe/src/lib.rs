//! Observability setup for Sagaflow.

pub mod tracing_setup;
