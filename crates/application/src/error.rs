use domain::{DomainError, RepositoryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::CredentialError;

/// 对客户端暴露的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    Conflict,
    Unauthenticated,
    InvalidCredential,
    ValidationError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::InvalidCredential => "INVALID_CREDENTIAL",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
    #[error("authentication required")]
    Unauthenticated,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("infrastructure error: {message}")]
    Infrastructure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
            source: None,
        }
    }

    pub fn infrastructure_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApplicationError::Validation(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ApplicationError::Domain(err) => match err {
                DomainError::InvalidArgument { .. } => ErrorCode::ValidationError,
                DomainError::UserNotFound
                | DomainError::GroupNotFound
                | DomainError::MemberNotFound => ErrorCode::NotFound,
                DomainError::UserAlreadyExists | DomainError::DuplicateJoinTag { .. } => {
                    ErrorCode::Conflict
                }
            },
            ApplicationError::Repository(RepositoryError::NotFound) => ErrorCode::NotFound,
            ApplicationError::Repository(RepositoryError::Conflict) => ErrorCode::Conflict,
            ApplicationError::Repository(RepositoryError::Storage { .. }) => {
                ErrorCode::InternalError
            }
            ApplicationError::Credential(_) => ErrorCode::InvalidCredential,
            ApplicationError::Unauthenticated => ErrorCode::Unauthenticated,
            ApplicationError::Validation(_) => ErrorCode::ValidationError,
            ApplicationError::Infrastructure { .. } => ErrorCode::InternalError,
        }
    }

    /// 面向客户端的错误描述，内部错误不泄露细节
    pub fn public_message(&self) -> String {
        match self.code() {
            ErrorCode::InternalError => "internal error".to_owned(),
            _ => self.to_string(),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
