use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fs;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::TenantId;
use crate::services::error::ServiceError;

/// Issues and verifies bearer tokens.
#[derive(Clone)]
pub struct JwtService {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    leeway_seconds: u64,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub tenant_id: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
    /// Token ID, also the session row id
    pub jti: String,
}

impl AccessTokenClaims {
    pub fn user_id(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| ServiceError::Unauthenticated("Invalid token subject".into()))
    }

    pub fn tenant(&self) -> Result<TenantId, ServiceError> {
        self.tenant_id
            .parse()
            .map_err(|_| ServiceError::Unauthenticated("Invalid token tenant".into()))
    }

    pub fn session_id(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.jti)
            .map_err(|_| ServiceError::Unauthenticated("Invalid token id".into()))
    }
}

/// A freshly issued token and its claims.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: AccessTokenClaims,
}

impl JwtService {
    /// HS256 when a secret is configured, otherwise RS256 from PEM files.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let (algorithm, encoding_key, decoding_key) = match (
            &config.secret,
            &config.private_key_path,
            &config.public_key_path,
        ) {
            (Some(secret), _, _) => (
                Algorithm::HS256,
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            ),
            (None, Some(private_key_path), Some(public_key_path)) => {
                let private_key_pem = fs::read_to_string(private_key_path).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to read private key from {}: {}",
                        private_key_path,
                        e
                    )
                })?;
                let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

                let public_key_pem = fs::read_to_string(public_key_path).map_err(|e| {
                    anyhow::anyhow!("Failed to read public key from {}: {}", public_key_path, e)
                })?;
                let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

                (Algorithm::RS256, encoding_key, decoding_key)
            }
            _ => anyhow::bail!("No JWT signing material configured"),
        };

        tracing::info!(algorithm = ?algorithm, "JWT service initialized");

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            leeway_seconds: config.leeway_seconds,
        })
    }

    /// Issue an access token bound to a user and tenant.
    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        tenant_id: TenantId,
        email: &str,
    ) -> Result<IssuedToken, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            email: email.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok(IssuedToken { token, claims })
    }

    /// Verify signature and expiry and decode the claims.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = self.leeway_seconds;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected bearer token");
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        ServiceError::Unauthenticated("Token expired".into())
                    }
                    _ => ServiceError::Unauthenticated("Invalid token".into()),
                }
            })?;

        Ok(token_data.claims)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

/// Extract the token from an `Authorization: Bearer` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
