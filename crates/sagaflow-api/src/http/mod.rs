//! HTTP surface: router, handlers, envelope, and errors.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
