use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::core::orchestrator::{ContainerState, Phase};
use crate::errors::{PipelineError, ProvisionError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: StatusCode,
    pub message: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ContainerState>,
}

impl ErrorResponse {
    /// A request the pipeline never saw, such as a body that does not parse.
    pub fn validation(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
            kind: "validation",
            phase: None,
            state: None,
        }
    }

    pub fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
            kind: "internal",
            phase: None,
            state: None,
        }
    }
}

fn status_for(error: &ProvisionError) -> StatusCode {
    if error.is_cancellation() {
        return StatusCode::GATEWAY_TIMEOUT;
    }
    match error {
        ProvisionError::Validation { .. } => StatusCode::BAD_REQUEST,
        ProvisionError::Resolution { .. } => StatusCode::NOT_FOUND,
        ProvisionError::Allocation { .. } => StatusCode::CONFLICT,
        ProvisionError::Placement { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ProvisionError::RemoteOperation { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl From<PipelineError> for ErrorResponse {
    fn from(err: PipelineError) -> Self {
        Self {
            status: status_for(&err.error),
            message: err.to_string(),
            kind: err.kind(),
            phase: Some(err.phase),
            state: Some(err.state),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteFailure;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&ProvisionError::validation("bad ip")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ProvisionError::resolution("missing")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&ProvisionError::placement("no hosts")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&ProvisionError::remote("boom")), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&ProvisionError::RemoteOperation { kind: RemoteFailure::DeadlineExceeded }),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
