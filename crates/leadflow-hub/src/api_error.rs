//! JSON error bodies for hub handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use leadflow_engine::EngineError;
use serde::Serialize;
use tracing::error;

const INTERNAL_MESSAGE: &str = "internal server error";

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// JSON body extractor that rejects with the same envelope as handler errors.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Engine(EngineError),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(err) => match err {
                EngineError::Validation(_)
                | EngineError::InvalidStatus(_)
                | EngineError::EmptyImport
                | EngineError::NoAgents
                | EngineError::NoData => StatusCode::BAD_REQUEST,
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::Forbidden => StatusCode::FORBIDDEN,
                EngineError::PartialDistribution { .. }
                | EngineError::Sheet(_)
                | EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest(message) => ErrorBody {
                code: "invalid_argument",
                message,
            },
            Self::Unauthorized(message) => ErrorBody {
                code: "unauthorized",
                message,
            },
            Self::Internal(message) => {
                error!(event = "request_failed", error = %message);
                ErrorBody {
                    code: "internal",
                    message: INTERNAL_MESSAGE.to_string(),
                }
            }
            Self::Engine(err) => {
                let code = err.code();
                let message = match &err {
                    EngineError::PartialDistribution {
                        batch_id,
                        inserted,
                        expected,
                        ..
                    } => {
                        error!(event = "request_failed", code, error = %err);
                        format!(
                            "import of batch {batch_id} stopped after {inserted} of {expected} leads"
                        )
                    }
                    EngineError::Storage(_) | EngineError::Sheet(_) => {
                        error!(event = "request_failed", code, error = %err);
                        INTERNAL_MESSAGE.to_string()
                    }
                    _ => err.to_string(),
                };
                ErrorBody { code, message }
            }
        };
        (status, Json(ErrorEnvelope { error: body })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_storage::StorageError;

    #[test]
    fn engine_errors_map_to_client_and_server_statuses() {
        let cases = [
            (EngineError::validation("x"), StatusCode::BAD_REQUEST),
            (EngineError::NoData, StatusCode::BAD_REQUEST),
            (EngineError::not_found("lead not found"), StatusCode::NOT_FOUND),
            (EngineError::Forbidden, StatusCode::FORBIDDEN),
            (
                EngineError::Storage(StorageError::Poisoned),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn storage_details_stay_out_of_the_body() {
        let response =
            ApiError::from(EngineError::Storage(StorageError::Poisoned)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], "storage_error");
        assert_eq!(value["error"]["message"], INTERNAL_MESSAGE);
    }
}
