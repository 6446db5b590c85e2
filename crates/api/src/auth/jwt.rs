//! JWT minting and validation.
//!
//! Access tokens carry the principal's role and resolved permission map;
//! refresh tokens carry only the subject and a `type` discriminator so
//! they can never be replayed as access tokens.

use std::collections::HashMap;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Claims embedded in an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub exp: i64,
    pub role: String,
    /// resource type → granted permissions, resolved at login time.
    pub permissions: HashMap<String, Vec<String>>,
    /// Permanent-admin marker. Reference only — role checks go through
    /// the role field and the user_permissions table.
    pub is_admin: bool,
}

/// Claims embedded in a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

pub const REFRESH_TOKEN_TYPE: &str = "refresh";

/// HS256 signer/verifier for both token kinds.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint an access token. Returns the compact JWT and its expiry.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        role: &str,
        permissions: HashMap<String, Vec<String>>,
        is_admin: bool,
        lifetime: time::Duration,
    ) -> Result<(String, OffsetDateTime), jsonwebtoken::errors::Error> {
        let expires_at = OffsetDateTime::now_utc() + lifetime;
        let claims = AccessClaims {
            sub: user_id,
            exp: expires_at.unix_timestamp(),
            role: role.to_string(),
            permissions,
            is_admin,
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, expires_at))
    }

    /// Mint a refresh token. Returns the compact JWT and its expiry.
    pub fn generate_refresh_token(
        &self,
        user_id: Uuid,
        lifetime: time::Duration,
    ) -> Result<(String, OffsetDateTime), jsonwebtoken::errors::Error> {
        let expires_at = OffsetDateTime::now_utc() + lifetime;
        let claims = RefreshClaims {
            sub: user_id,
            exp: expires_at.unix_timestamp(),
            token_type: REFRESH_TOKEN_TYPE.to_string(),
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, expires_at))
    }

    /// Validate signature and expiry of an access token.
    pub fn decode_access(&self, token: &str) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<AccessClaims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(data.claims)
    }

    /// Validate an access token's signature only, accepting expired
    /// tokens. Used by the expiry notifier, which must be able to start a
    /// monitor for a token that is about to (or just did) expire.
    pub fn decode_access_ignore_expiry(
        &self,
        token: &str,
    ) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }

    /// Validate signature and expiry of a refresh token, and check the
    /// `type` discriminator.
    pub fn decode_refresh(
        &self,
        token: &str,
    ) -> Result<RefreshClaims, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<RefreshClaims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )?;
        if data.claims.token_type != REFRESH_TOKEN_TYPE {
            return Err(jsonwebtoken::errors::ErrorKind::InvalidToken.into());
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("test-jwt-secret-key-for-testing-only")
    }

    fn permissions() -> HashMap<String, Vec<String>> {
        HashMap::from([(
            "workflow".to_string(),
            vec!["read".to_string(), "execute".to_string()],
        )])
    }

    #[test]
    fn access_token_round_trips_claims() {
        let user_id = Uuid::new_v4();
        let (token, expires_at) = manager()
            .generate_access_token(
                user_id,
                "viewer",
                permissions(),
                false,
                time::Duration::minutes(30),
            )
            .expect("generate");

        let claims = manager().decode_access(&token).expect("decode");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, "viewer");
        assert_eq!(claims.exp, expires_at.unix_timestamp());
        assert_eq!(claims.permissions["workflow"], vec!["read", "execute"]);
        assert!(!claims.is_admin);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) = manager()
            .generate_access_token(
                Uuid::new_v4(),
                "viewer",
                permissions(),
                false,
                time::Duration::minutes(30),
            )
            .expect("generate");

        let other = JwtManager::new("a-completely-different-secret-key");
        assert!(other.decode_access(&token).is_err());
    }

    #[test]
    fn expired_access_token_is_rejected_but_monitorable() {
        let (token, _) = manager()
            .generate_access_token(
                Uuid::new_v4(),
                "viewer",
                permissions(),
                false,
                time::Duration::minutes(-5),
            )
            .expect("generate");

        assert!(manager().decode_access(&token).is_err());
        // The notifier path still accepts it.
        assert!(manager().decode_access_ignore_expiry(&token).is_ok());
    }

    #[test]
    fn access_token_is_not_a_refresh_token() {
        let (token, _) = manager()
            .generate_access_token(
                Uuid::new_v4(),
                "viewer",
                permissions(),
                false,
                time::Duration::minutes(30),
            )
            .expect("generate");

        assert!(manager().decode_refresh(&token).is_err());
    }

    #[test]
    fn refresh_token_round_trips() {
        let user_id = Uuid::new_v4();
        let (token, _) = manager()
            .generate_refresh_token(user_id, time::Duration::days(7))
            .expect("generate");

        let claims = manager().decode_refresh(&token).expect("decode");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.token_type, REFRESH_TOKEN_TYPE);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(manager().decode_access("not.a.token").is_err());
    }
}
