//! HTTP error type.
//!
//! Wraps engine errors and maps them onto the response envelope. Codes are
//! the same strings the scheduler reports, so a CLI talking to the server
//! and a caller embedding the core crate see identical failures. Handlers
//! attach their request id and start time via [`ResultExt::request_meta`]
//! so error envelopes report the real request, not a freshly minted one.

use axum::response::{IntoResponse, Response};
use sagaflow_types::error::{PlanError, SchedulerError};
use std::time::Instant;
use uuid::Uuid;

use super::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum AppErrorKind {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("invalid or missing credentials")]
    Unauthorized,

    #[error("no plan generator is configured; supply a plan directly")]
    PlannerUnavailable,

    #[error("{0}")]
    Validation(String),
}

#[derive(Debug)]
pub struct AppError {
    kind: AppErrorKind,
    request_id: Option<String>,
    started: Option<Instant>,
}

impl AppError {
    pub fn unauthorized() -> Self {
        AppErrorKind::Unauthorized.into()
    }

    pub fn planner_unavailable() -> Self {
        AppErrorKind::PlannerUnavailable.into()
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppErrorKind::Validation(message.into()).into()
    }

    pub fn with_meta(mut self, request_id: &str, started: Instant) -> Self {
        self.request_id = Some(request_id.to_string());
        self.started = Some(started);
        self
    }

    pub fn code(&self) -> &'static str {
        match &self.kind {
            AppErrorKind::Scheduler(e) => e.code(),
            AppErrorKind::Plan(PlanError::ClarificationRequired(_)) => "CLARIFICATION_REQUIRED",
            AppErrorKind::Plan(PlanError::Invalid(_)) => "VALIDATION_ERROR",
            AppErrorKind::Plan(PlanError::Provider(_)) => "PLANNER_ERROR",
            AppErrorKind::Unauthorized => "UNAUTHORIZED",
            AppErrorKind::PlannerUnavailable => "PLANNER_UNAVAILABLE",
            AppErrorKind::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}

impl From<AppErrorKind> for AppError {
    fn from(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            started: None,
        }
    }
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        AppErrorKind::from(err).into()
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        AppErrorKind::from(err).into()
    }
}

/// Attach the handler's request metadata to a fallible engine call.
pub trait ResultExt<T> {
    fn request_meta(self, request_id: &str, started: Instant) -> Result<T, AppError>;
}

impl<T, E: Into<AppError>> ResultExt<T> for Result<T, E> {
    fn request_meta(self, request_id: &str, started: Instant) -> Result<T, AppError> {
        self.map_err(|e| e.into().with_meta(request_id, started))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let message = self.to_string();
        if code == "ORCHESTRATION_ERROR" {
            tracing::error!(code, %message, "request failed");
        } else {
            tracing::debug!(code, %message, "request rejected");
        }
        let request_id = self
            .request_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let started = self.started.unwrap_or_else(Instant::now);
        ApiResponse::<()>::error(code, message, request_id, started).into_response()
    }
}
