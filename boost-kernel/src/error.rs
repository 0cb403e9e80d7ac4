use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use boost_core::{BotKind, BoostError};
use thiserror::Error;

/// Erreurs exposées par l'API ; `code` permet à l'UI d'afficher un message
/// distinct ("servers busy" vs "upgrade your plan").
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Boost(#[from] BoostError),

    #[error("plan limit reached: {current} of {limit} {kind}s already active")]
    PlanLimit { kind: BotKind, limit: u32, current: u32 },

    #[error("host {host} rejected the command: {error}")]
    HostFailed { host: String, error: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Boost(e) => match e {
                BoostError::CapacityExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                BoostError::InsufficientAllocation { .. } => StatusCode::CONFLICT,
                BoostError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::PlanLimit { .. } => StatusCode::FORBIDDEN,
            ApiError::HostFailed { .. } => StatusCode::BAD_GATEWAY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Boost(e) => match e {
                BoostError::CapacityExhausted { .. } => "capacity_exhausted",
                BoostError::InsufficientAllocation { .. } => "insufficient_allocation",
                BoostError::InvalidRequest(_) => "invalid_request",
                _ => "internal",
            },
            ApiError::PlanLimit { .. } => "plan_limit",
            ApiError::HostFailed { .. } => "host_failed",
            ApiError::NotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "ok": false, "code": self.code(), "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_outcomes_have_distinct_statuses() {
        let exhausted = ApiError::from(BoostError::CapacityExhausted { kind: BotKind::Viewer, requested: 5 });
        let plan = ApiError::PlanLimit { kind: BotKind::Viewer, limit: 10, current: 8 };
        let over = ApiError::from(BoostError::InsufficientAllocation { requested: 9, available: 2 });

        assert_eq!(exhausted.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(plan.status(), StatusCode::FORBIDDEN);
        assert_eq!(over.status(), StatusCode::CONFLICT);
        assert_ne!(exhausted.code(), plan.code());
    }
}
