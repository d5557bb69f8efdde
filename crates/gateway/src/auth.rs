//! Credential verification.
//!
//! Token issuance belongs to the marketplace backend; the gateway only
//! needs `verify(token) -> Principal`. [`JwtVerifier`] checks an HS256
//! signature over the secret shared with the issuer.

use crate::error::{GatewayError, Result};
use common::types::{PrincipalId, Role};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// An authenticated user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: PrincipalId,
    pub role: Role,
}

/// Collaborator boundary for token verification.
pub trait CredentialVerifier: Send + Sync {
    /// Verify a bearer token, returning the principal it names.
    fn verify(&self, token: &str) -> Result<Principal>;
}

/// Claims carried by marketplace-issued tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id.
    pub sub: String,
    pub role: Role,
    /// Expiry, seconds since epoch.
    pub exp: u64,
}

/// HS256 verifier over the secret shared with the token issuer.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Principal> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| GatewayError::Auth(e.to_string()))?;
        Ok(Principal {
            id: data.claims.sub,
            role: data.claims.role,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{far_future, mint};
    use super::*;

    #[test]
    fn test_verify_roundtrip() {
        let verifier = JwtVerifier::new("s3cret");
        let token = mint("s3cret", "u42", Role::Freelancer, far_future());
        let principal = verifier.verify(&token).unwrap();
        assert_eq!(principal.id, "u42");
        assert_eq!(principal.role, Role::Freelancer);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = JwtVerifier::new("s3cret");
        let token = mint("other", "u42", Role::Client, far_future());
        let err = verifier.verify(&token).unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = JwtVerifier::new("s3cret");
        let token = mint("s3cret", "u42", Role::Client, 1);
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let verifier = JwtVerifier::new("s3cret");
        assert!(verifier.verify("not-a-jwt").is_err());
    }
}
