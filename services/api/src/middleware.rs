//! Authentication middleware for JWT token validation
//!
//! Access tokens are issued by the auth service. The identity carried by a
//! valid token is attached to the request as an [`AuthUser`].

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, info};

use crate::{error::ApiError, models::Identity, state::AppState};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Identity ID
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
    /// Token type (access or refresh)
    pub token_type: TokenType,
}

/// Token type enum
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum TokenType {
    /// Access token
    Access,
    /// Refresh token
    Refresh,
}

/// Authenticated user information
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity: Identity,
}

/// Verifies access tokens
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_PUBLIC_KEY`: RS256 public key (PEM format) or path to the key file
    /// - `JWT_SECRET`: HS256 shared secret, used when no public key is set
    pub fn from_env() -> Result<Self, String> {
        if let Ok(public_key) = env::var("JWT_PUBLIC_KEY") {
            // If the public key looks like a file path, read from file (try CWD, then project root)
            let public_key = if public_key.starts_with("-----BEGIN") {
                public_key
            } else {
                std::fs::read_to_string(&public_key)
                    .or_else(|_| {
                        let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
                        path.push(&public_key);
                        std::fs::read_to_string(path)
                    })
                    .map_err(|e| format!("Failed to read public key file: {}", e))?
                    .trim()
                    .to_string()
            };
            return Self::rsa(&public_key);
        }

        let secret = env::var("JWT_SECRET")
            .map_err(|_| "Neither JWT_PUBLIC_KEY nor JWT_SECRET is set".to_string())?;
        info!("Verifying tokens with a shared secret");
        Ok(Self::hmac(secret.as_bytes()))
    }

    pub fn rsa(public_key_pem: &str) -> Result<Self, String> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| format!("Failed to create decoding key: {}", e))?;
        Ok(Self::with_key(decoding_key, Algorithm::RS256))
    }

    pub fn hmac(secret: &[u8]) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256)
    }

    fn with_key(decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        Self {
            decoding_key,
            validation,
        }
    }

    /// Validate an access token and return the identity it carries
    pub fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let token_data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                debug!("Failed to validate token: {}", e);
                ApiError::Unauthorized
            })?;

        let claims = token_data.claims;
        if claims.token_type != TokenType::Access {
            return Err(ApiError::Unauthorized);
        }
        Ok(Identity {
            id: claims.sub,
            email: claims.email,
            display_name: claims.name,
        })
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;
    let identity = state.verifier.verify(bearer.token())?;

    req.extensions_mut().insert(AuthUser { identity });
    Ok(next.run(req).await)
}
