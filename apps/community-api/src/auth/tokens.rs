//! HS256 access tokens shared with the platform's auth service.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Default lifetime of tokens minted by [`issue_access_token`].
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// Claims carried by a platform access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: the user id.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Symmetric signing material derived from `JWT_SECRET`.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Mint an access token. Issuance belongs to the auth service; this exists
/// for tests and local development.
pub fn issue_access_token(
    keys: &TokenKeys,
    user_id: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = AccessClaims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
}

/// Verify signature and expiry, returning the claims.
pub fn decode_access_token(
    keys: &TokenKeys,
    token: &str,
) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    let data = jsonwebtoken::decode::<AccessClaims>(token, &keys.decoding, &validation)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_decodes_to_subject() {
        let keys = TokenKeys::from_secret(b"test-secret");
        let token = issue_access_token(&keys, "usr_01", Duration::seconds(60)).unwrap();
        let claims = decode_access_token(&keys, &token).unwrap();
        assert_eq!(claims.sub, "usr_01");
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = TokenKeys::from_secret(b"test-secret");
        let token = issue_access_token(&keys, "usr_01", Duration::seconds(-120)).unwrap();
        assert!(decode_access_token(&keys, &token).is_err());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let keys = TokenKeys::from_secret(b"test-secret");
        let other = TokenKeys::from_secret(b"another-secret");
        let token = issue_access_token(&other, "usr_01", Duration::seconds(60)).unwrap();
        assert!(decode_access_token(&keys, &token).is_err());
    }
}
