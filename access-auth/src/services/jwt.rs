use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::JwtConfig;

/// Issues and validates short-lived access tokens (HS256).
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_token_expiry_minutes: i64,
    refresh_session_ttl_days: i64,
}

/// Claims for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Refresh session the token was minted from
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
}

/// Token pair returned to the client after login or refresh.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let secret = config.secret.expose_secret().as_bytes();
        if secret.len() < 32 {
            anyhow::bail!("JWT secret must be at least 32 bytes");
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: config.issuer.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_session_ttl_days: config.refresh_session_ttl_days,
        })
    }

    /// Mint an access token bound to `user_id` and the refresh session it
    /// belongs to.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, anyhow::Error> {
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to generate access token: {}", e))
    }

    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    pub fn refresh_session_ttl(&self) -> Duration {
        Duration::days(self.refresh_session_ttl_days)
    }

    pub fn token_response(&self, access_token: String, refresh_token: String) -> TokenResponse {
        TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config(secret: &str) -> JwtConfig {
        JwtConfig {
            secret: SecretString::new(secret.to_string()),
            issuer: "access-auth-test".to_string(),
            access_token_expiry_minutes: 15,
            refresh_session_ttl_days: 7,
        }
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_generate_and_validate_access_token() -> Result<(), anyhow::Error> {
        let jwt = JwtService::new(&config(SECRET))?;
        let user_id = Uuid::new_v4();

        let token = jwt.generate_access_token(user_id, "session-hash", Utc::now())?;
        let claims = jwt.validate_access_token(&token)?;

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.sid, "session-hash");
        assert_eq!(claims.iss, "access-auth-test");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
        Ok(())
    }

    #[test]
    fn test_expired_token_is_rejected() -> Result<(), anyhow::Error> {
        let jwt = JwtService::new(&config(SECRET))?;
        let issued = Utc::now() - Duration::hours(2);

        let token = jwt.generate_access_token(Uuid::new_v4(), "s", issued)?;

        assert!(jwt.validate_access_token(&token).is_err());
        Ok(())
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() -> Result<(), anyhow::Error> {
        let ours = JwtService::new(&config(SECRET))?;
        let theirs = JwtService::new(&config("ffffffffffffffffffffffffffffffff"))?;

        let token = theirs.generate_access_token(Uuid::new_v4(), "s", Utc::now())?;

        assert!(ours.validate_access_token(&token).is_err());
        Ok(())
    }

    #[test]
    fn test_short_secret_is_refused() {
        assert!(JwtService::new(&config("too-short")).is_err());
    }

    #[test]
    fn test_token_response_shape() -> Result<(), anyhow::Error> {
        let jwt = JwtService::new(&config(SECRET))?;
        let response = jwt.token_response("a".to_string(), "r".to_string());
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 900);
        Ok(())
    }
}
