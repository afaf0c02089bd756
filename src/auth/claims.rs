//! Reading identity claims out of access tokens
//!
//! The token is not verified here: the signature belongs to the auth service
//! and the client only needs the identity fields to render a provisional
//! profile.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Claims carried by a Supabase access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Expiry timestamp
    #[serde(default)]
    pub exp: Option<i64>,

    /// Email address
    #[serde(default)]
    pub email: Option<String>,

    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,

    /// Database role (`authenticated`, `anon`, ...)
    #[serde(default)]
    pub role: Option<String>,

    /// Metadata supplied at sign-up
    #[serde(default)]
    pub user_metadata: Value,
}

/// Decode the claims of `token` without checking its signature or expiry.
pub fn peek(token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Sign claims with an HS256 secret, the way the auth service mints tokens.
pub fn mint(claims: &Claims, secret: &[u8]) -> Result<String> {
    let token = encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret))?;
    Ok(token)
}
