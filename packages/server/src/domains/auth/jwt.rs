use anyhow::Result;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default lifetime of an issued token.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// JWT Claims - data stored in the token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,        // Subject (user id)
    pub roles: Vec<String>, // Free-form roles granted by the issuing deployment
    pub is_admin: bool,     // Admin flag
    pub exp: i64,           // Expiration timestamp
    pub iat: i64,           // Issued at timestamp
    pub iss: String,        // Issuer
    pub jti: String,        // JWT ID (unique token identifier)
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// JWT Service - creates and verifies JWT tokens
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtService {
    pub fn new(secret: &str, issuer: String) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }

    /// Create a token that expires after [`TOKEN_TTL_HOURS`].
    pub fn create_token(&self, user_id: &str, roles: Vec<String>, is_admin: bool) -> Result<String> {
        self.create_token_with_ttl(user_id, roles, is_admin, chrono::Duration::hours(TOKEN_TTL_HOURS))
    }

    /// Create a token with an explicit lifetime. A negative `ttl` yields an
    /// already-expired token.
    pub fn create_token_with_ttl(
        &self,
        user_id: &str,
        roles: Vec<String>,
        is_admin: bool,
        ttl: chrono::Duration,
    ) -> Result<String> {
        let now = chrono::Utc::now();
        let exp = now + ttl;

        let claims = Claims {
            sub: user_id.to_string(),
            roles,
            is_admin,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(Into::into)
    }

    /// Verify and decode a JWT token
    ///
    /// Returns claims if token is valid, issued by us, and not expired
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new("test_secret_key", "test_issuer".to_string())
    }

    #[test]
    fn test_create_and_verify_token() {
        let service = service();
        let token = service
            .create_token("clerk-42", vec!["finance".into()], true)
            .unwrap();

        let claims = service.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "clerk-42");
        assert!(claims.has_role("finance"));
        assert!(claims.is_admin);
        assert_eq!(claims.iss, "test_issuer");
    }

    #[test]
    fn test_invalid_token() {
        assert!(service().verify_token("invalid_token").is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let service1 = JwtService::new("secret1", "test_issuer".to_string());
        let service2 = JwtService::new("secret2", "test_issuer".to_string());

        let token = service1.create_token("u1", vec![], false).unwrap();
        assert!(service2.verify_token(&token).is_err());
    }

    #[test]
    fn test_wrong_issuer() {
        let ours = service();
        let theirs = JwtService::new("test_secret_key", "someone_else".to_string());
        let token = theirs.create_token("u1", vec![], false).unwrap();
        assert!(ours.verify_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = service();
        // Past the default 60s validation leeway
        let token = service
            .create_token_with_ttl("u1", vec![], false, chrono::Duration::minutes(-5))
            .unwrap();
        assert!(service.verify_token(&token).is_err());
    }

    #[test]
    fn test_expiry_window() {
        let service = service();
        let token = service.create_token("u1", vec![], false).unwrap();
        let claims = service.verify_token(&token).unwrap();

        let expires_in = claims.exp - chrono::Utc::now().timestamp();
        assert!(expires_in > (TOKEN_TTL_HOURS - 1) * 3600);
        assert!(expires_in <= TOKEN_TTL_HOURS * 3600);
    }
}
