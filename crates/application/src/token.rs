//! 访问令牌抽象
//!
//! 签发与校验由基础设施层实现（JWT），应用层只关心校验结果。

use domain::UserId;
use thiserror::Error;

/// 令牌校验失败的原因。对客户端一律表现为 `INVALID_CREDENTIAL`，区别只用于日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("token expired")]
    Expired,
    #[error("token malformed")]
    Malformed,
    #[error("token signature invalid")]
    SignatureInvalid,
}

impl CredentialError {
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialError::Expired => "expired",
            CredentialError::Malformed => "malformed",
            CredentialError::SignatureInvalid => "signature_invalid",
        }
    }
}

pub trait TokenService: Send + Sync {
    /// 为指定用户签发令牌
    fn issue(&self, user_id: &UserId) -> Result<String, CredentialError>;

    /// 校验令牌并取出用户 ID
    fn verify(&self, token: &str) -> Result<UserId, CredentialError>;
}
