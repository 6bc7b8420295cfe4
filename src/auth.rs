use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::models::{Id, Identity};

/// Session claims minted at login. `sub` is the numeric user id; the
/// remaining identity fields ride along so handlers never re-query the
/// user row for ownership checks or denormalized author blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Id,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub admin: bool,
    pub exp: usize,
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`. Used as `Auth` where a session
/// is required and `Option<Auth>` on routes with optional viewers.
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> Id {
        self.0.sub
    }
    pub fn is_admin(&self) -> bool {
        self.0.admin
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            match decode_jwt(bearer.token()) {
                Ok(claims) => return ready(Ok(Auth(claims))),
                Err(_) => return ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT"))),
            }
        }
        ready(Err(actix_web::error::ErrorUnauthorized(
            "Authorization required",
        )))
    }
}

/// Mint a session token for a verified identity.
pub fn create_jwt(identity: &Identity) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::days(30))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: identity.id,
        name: identity.name.clone(),
        email: identity.email.clone(),
        image: identity.image.clone(),
        admin: identity.is_admin,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[derive(thiserror::Error, Debug)]
pub enum PasswordError {
    #[error("password hashing failed")]
    Hash,
    #[error("invalid credentials")]
    Mismatch,
}

/// Hash a password with Argon2id for storage.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| PasswordError::Hash)
}

/// Verify a password against a stored Argon2 hash.
pub fn verify_password(password: &str, hash: &str) -> Result<(), PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::Mismatch)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| PasswordError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_secret() {
        std::env::set_var("JWT_SECRET", "unit-test-secret-of-sufficient-len!!");
    }

    fn identity() -> Identity {
        Identity {
            id: 42,
            name: "alice".into(),
            email: "alice@supinfo.com".into(),
            image: None,
            is_admin: true,
        }
    }

    #[test]
    fn jwt_round_trip_preserves_claims() {
        ensure_secret();
        let token = create_jwt(&identity()).unwrap();
        let claims = decode_jwt(&token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.name, "alice");
        assert!(claims.admin);
    }

    #[test]
    fn tampered_jwt_is_rejected() {
        ensure_secret();
        let mut token = create_jwt(&identity()).unwrap();
        token.push('x');
        assert!(decode_jwt(&token).is_err());
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let hash = hash_password("hunter22").unwrap();
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", &hash).is_ok());
        assert!(verify_password("hunter23", &hash).is_err());
    }
}
