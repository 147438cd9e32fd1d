//! Endpoint handlers grouped by resource.

pub mod execution;
pub mod internal;
pub mod status;
