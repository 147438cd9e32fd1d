//! Infrastructure adapters for Sagaflow.
//!
//! SQLite implementations of the engine's storage traits, the in-process
//! read cache, HTTP adapters for the plan generator and tool service, the
//! config loader, and internal-endpoint authentication.

pub mod cache;
pub mod config;
pub mod planner;
pub mod sqlite;
pub mod tools;
pub mod webhook;
