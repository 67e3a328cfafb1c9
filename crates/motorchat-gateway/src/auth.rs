use std::time::Duration;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use motorchat_types::api::Claims;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential token")]
    MissingToken,

    #[error("invalid credential token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// The authenticated principal behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
}

/// Validates the opaque credential a client presents at connect time.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWTs signed with a secret shared with the marketplace auth service.
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Mint a token for `user_id`, valid for `ttl`.
    pub fn issue(&self, user_id: Uuid, ttl: Duration) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id,
            exp: (chrono::Utc::now().timestamp() as u64 + ttl.as_secs()) as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(Identity {
            user_id: data.claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_own_tokens() {
        let auth = JwtAuthenticator::new("test-secret");
        let user = Uuid::new_v4();
        let token = auth.issue(user, Duration::from_secs(60)).unwrap();

        assert_eq!(auth.authenticate(&token).unwrap().user_id, user);
    }

    #[test]
    fn rejects_foreign_signature() {
        let issuer = JwtAuthenticator::new("someone-else");
        let auth = JwtAuthenticator::new("test-secret");
        let token = issuer.issue(Uuid::new_v4(), Duration::from_secs(60)).unwrap();

        assert!(matches!(auth.authenticate(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn rejects_expired_and_empty() {
        let auth = JwtAuthenticator::new("test-secret");
        let claims = Claims {
            sub: Uuid::new_v4(),
            exp: (chrono::Utc::now().timestamp() - 3600) as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();

        assert!(auth.authenticate(&token).is_err());
        assert!(matches!(auth.authenticate(""), Err(AuthError::MissingToken)));
        assert!(auth.authenticate("not-a-jwt").is_err());
    }
}
