use axum::http::{HeaderMap, header};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use huddle_types::api::{Claims, Identity};

const TOKEN_COOKIE: &str = "token";

/// Identity carried by an upgrade request: a `token` cookie, falling back to
/// an `Authorization: Bearer` header. `None` when absent or not verifiable.
pub fn identity_from_headers(headers: &HeaderMap, secret: &str) -> Option<Identity> {
    let token = token_from_cookie(headers).or_else(|| token_from_bearer(headers))?;
    verify_token(token, secret)
}

pub fn verify_token(token: &str, secret: &str) -> Option<Identity> {
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => Some(data.claims.into()),
        Err(e) => {
            debug!("Rejected handshake token: {}", e);
            None
        }
    }
}

fn token_from_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == TOKEN_COOKIE).then(|| value.trim()).filter(|v| !v.is_empty())
        })
}

fn token_from_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}
