use application::{ApplicationError, ErrorCode, HubError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError.as_str(),
            message,
        )
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Unauthenticated | ErrorCode::InvalidCredential => StatusCode::UNAUTHORIZED,
        ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let code = error.code();
        if code == ErrorCode::InternalError {
            tracing::error!(error = ?error, "请求处理失败");
        }
        ApiError::new(status_for(code), code.as_str(), error.public_message())
    }
}

impl From<HubError> for ApiError {
    fn from(error: HubError) -> Self {
        tracing::warn!(error = %error, "连接中心不可用");
        ApiError::service_unavailable(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DomainError, RepositoryError};

    #[test]
    fn maps_application_errors_to_statuses() {
        let cases = [
            (ApplicationError::from(DomainError::GroupNotFound), StatusCode::NOT_FOUND),
            (
                ApplicationError::from(DomainError::DuplicateJoinTag {
                    tag: "abc".to_owned(),
                }),
                StatusCode::CONFLICT,
            ),
            (ApplicationError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (ApplicationError::validation("tag must not be empty"), StatusCode::BAD_REQUEST),
            (
                ApplicationError::from(RepositoryError::storage("connection reset")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }

    #[test]
    fn internal_errors_are_opaque() {
        let error = ApiError::from(ApplicationError::infrastructure("redis pool exhausted"));
        assert_eq!(error.body.code, "INTERNAL_ERROR");
        assert_eq!(error.body.message, "internal error");
    }
}
