//! Uniform API response envelope.
//!
//! Every endpoint returns `{success, data, executionId?, metadata, errors}`.
//! `metadata` carries the request id and timing; `errors` is empty on
//! success. The HTTP status is derived from the first error code so
//! handlers only deal in codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    pub metadata: ApiMeta,
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, request_id: String, started: Instant) -> Self {
        Self {
            success: true,
            data: Some(data),
            execution_id: None,
            metadata: ApiMeta {
                request_id,
                timestamp: Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
            errors: Vec::new(),
        }
    }

    pub fn error(
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: String,
        started: Instant,
    ) -> Self {
        Self {
            success: false,
            data: None,
            execution_id: None,
            metadata: ApiMeta {
                request_id,
                timestamp: Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
            errors: vec![ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            }],
        }
    }

    /// Surface the execution this response is about at the top level.
    pub fn with_execution_id(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// Attach an error to an otherwise populated response, e.g. a rejected
    /// plan whose persisted state is still returned to the caller.
    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.success = false;
        self.errors.push(ApiErrorDetail {
            code: code.into(),
            message: message.into(),
        });
        self
    }
}

/// HTTP status for a wire-format error code. Policy rejections are client
/// errors: the plan as submitted is invalid under the active policy.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
        "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
        "EXECUTION_NOT_FOUND" => StatusCode::NOT_FOUND,
        "CLARIFICATION_REQUIRED" => StatusCode::UNPROCESSABLE_ENTITY,
        "PLANNER_UNAVAILABLE" | "PLANNER_ERROR" => StatusCode::SERVICE_UNAVAILABLE,
        c if c.starts_with("POLICY_VIOLATION") => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = self
            .errors
            .first()
            .map(|e| status_for_code(&e.code))
            .unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_has_no_errors() {
        let resp = ApiResponse::success(
            serde_json::json!({"ok": true}),
            "req-1".to_string(),
            Instant::now(),
        );
        assert!(resp.success);
        assert!(resp.errors.is_empty());
        assert_eq!(resp.metadata.request_id, "req-1");
        assert!(resp.data.is_some());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_code("VALIDATION_ERROR"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_code("UNAUTHORIZED"), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for_code("EXECUTION_NOT_FOUND"), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for_code("POLICY_VIOLATION_HIGH_RISK_UNCONFIRMED"),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for_code("POLICY_VIOLATION_EMPTY_PLAN"),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for_code("CLARIFICATION_REQUIRED"),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for_code("ORCHESTRATION_ERROR"),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_with_error_keeps_data_and_flips_success() {
        let resp = ApiResponse::success(
            serde_json::json!({"status": "REJECTED"}),
            "req-2".to_string(),
            Instant::now(),
        )
        .with_error("POLICY_VIOLATION_EMPTY_PLAN", "plan has no steps");
        assert!(!resp.success);
        assert!(resp.data.is_some());
        assert_eq!(resp.errors.len(), 1);
    }

    #[test]
    fn test_wire_shape() {
        let id = Uuid::now_v7();
        let resp = ApiResponse::success(
            serde_json::json!({}),
            "req-3".to_string(),
            Instant::now(),
        )
        .with_execution_id(id);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["executionId"], id.to_string());
        assert!(json["metadata"]["durationMs"].is_u64());
        assert!(json["metadata"]["requestId"].is_string());
    }
}
