//! JWT 令牌服务
//!
//! HS256 签名，`sub` 为用户 ID。

use application::{CredentialError, TokenService};
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
    pub iat: i64,
    pub nbf: i64,
}

#[derive(Clone)]
pub struct JwtTokenService {
    expiration: chrono::Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenService {
    pub fn new(config: &JwtConfig) -> Self {
        Self::with_expiration(&config.secret, chrono::Duration::hours(config.expiration_hours))
    }

    pub fn with_expiration(secret: &str, expiration: chrono::Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            expiration,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenService for JwtTokenService {
    fn issue(&self, user_id: &UserId) -> Result<String, CredentialError> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user_id.as_str().to_owned(),
            exp: (now + self.expiration).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|err| {
            tracing::error!(user_id = %user_id, error = %err, "生成令牌失败");
            CredentialError::Malformed
        })
    }

    fn verify(&self, token: &str) -> Result<UserId, CredentialError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => CredentialError::Expired,
                ErrorKind::InvalidSignature => CredentialError::SignatureInvalid,
                _ => CredentialError::Malformed,
            }
        })?;
        UserId::parse(data.claims.sub).map_err(|_| CredentialError::Malformed)
    }
}
