//! JWT 认证实现
//!
//! HS256 签名，claims 只携带用户 id 与过期时间。

use application::{AuthError, TokenVerifier};
use async_trait::async_trait;
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

#[derive(Clone)]
pub struct JwtTokenVerifier {
    expiration_hours: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::default();
        validation.leeway = 0;
        Self {
            expiration_hours: config.expiration_hours,
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    /// 签发令牌，供外部登录流程和测试使用
    pub fn issue_token(&self, user_id: UserId) -> Result<String, AuthError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.expiration_hours);
        self.encode(&Claims {
            sub: user_id.into(),
            exp: exp.timestamp(),
        })
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|err| AuthError::InvalidCredential(format!("token generation failed: {err}")))
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        decode::<Claims>(credential, &self.decoding_key, &self.validation)
            .map(|data| UserId::from(data.claims.sub))
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidCredential(err.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(secret: &str) -> JwtTokenVerifier {
        JwtTokenVerifier::new(&JwtConfig {
            secret: secret.to_string(),
            expiration_hours: 1,
        })
    }

    #[tokio::test]
    async fn issued_token_maps_back_to_the_user() {
        let verifier = verifier("a-test-secret-that-is-long-enough-123");
        let user = UserId::generate();
        let token = verifier.issue_token(user).unwrap();

        assert_eq!(verifier.verify(&token).await, Ok(user));
    }

    #[tokio::test]
    async fn rejects_foreign_expired_and_empty_tokens() {
        let ours = verifier("a-test-secret-that-is-long-enough-123");
        let theirs = verifier("another-secret-that-is-long-enough-456");
        let user = UserId::generate();

        let foreign = theirs.issue_token(user).unwrap();
        assert!(matches!(
            ours.verify(&foreign).await,
            Err(AuthError::InvalidCredential(_))
        ));

        let expired = ours
            .encode(&Claims {
                sub: user.into(),
                exp: chrono::Utc::now().timestamp() - 3600,
            })
            .unwrap();
        assert_eq!(ours.verify(&expired).await, Err(AuthError::Expired));

        assert_eq!(ours.verify("  ").await, Err(AuthError::MissingCredential));
        assert!(matches!(
            ours.verify("not-a-jwt").await,
            Err(AuthError::InvalidCredential(_))
        ));
    }
}
