//! HTTP Basic authentication for the `/api` routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::{debug, warn};

use super::AppState;
use super::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Both sides of a comparison are MACed under this key so the check
/// runs in constant time regardless of input length.
const COMPARE_KEY: &[u8] = b"cmsync-basic-auth";

/// The one account allowed to use the API.
#[derive(Debug)]
pub struct BasicCredentials {
    pub username: String,
    pub password: SecretString,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Constant-time check of both fields; neither short-circuits.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let pass_ok = constant_time_eq(
            password.as_bytes(),
            self.password.expose_secret().as_bytes(),
        );
        user_ok && pass_ok
    }
}

fn constant_time_eq(given: &[u8], expected: &[u8]) -> bool {
    let (Ok(mut given_mac), Ok(mut expected_mac)) = (
        HmacSha256::new_from_slice(COMPARE_KEY),
        HmacSha256::new_from_slice(COMPARE_KEY),
    ) else {
        return false;
    };
    given_mac.update(given);
    expected_mac.update(expected);
    given_mac
        .verify_slice(&expected_mac.finalize().into_bytes())
        .is_ok()
}

/// Decode an `Authorization: Basic <base64(user:pass)>` header value.
pub fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

/// Route layer: pass the request on only with valid Basic credentials.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.credentials.as_deref() else {
        warn!(path = %request.uri().path(), "API request refused, no auth_password configured");
        return Err(AppError::AuthRequired);
    };

    let given = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic);

    match given {
        Some((user, pass)) if expected.matches(&user, &pass) => {
            debug!(user = %user, "API request authenticated");
            Ok(next.run(request).await)
        }
        Some((user, _)) => {
            warn!(user = %user, "API authentication failed");
            Err(AppError::AuthRequired)
        }
        None => Err(AppError::AuthRequired),
    }
}
