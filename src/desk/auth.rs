//! Admin session token codec.
//!
//! A session token is `base64(username) + "." + hex(HMAC-SHA256(secret, username))`,
//! carried in the `admin_auth` cookie. Verification is stateless: there is no
//! server-side session table, so a token stays valid until the cookie's
//! 24-hour `Max-Age` lapses or the secret is rotated.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::api::{ApiError, SharedState};
use crate::config::AdminAuthConfig;
use crate::errors::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "admin_auth";

/// Session lifetime, enforced only through the cookie's `Max-Age`.
pub const SESSION_MAX_AGE_SECS: u64 = 60 * 60 * 24;

fn keyed_mac(secret: &str) -> Result<HmacSha256, AuthError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::NotConfigured)
}

/// Produce the session token for `username`.
pub fn sign_session_token(secret: &str, username: &str) -> Result<String, AuthError> {
    let mut mac = keyed_mac(secret)?;
    mac.update(username.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("{}.{}", BASE64.encode(username.as_bytes()), signature))
}

/// Verify a session token against the configured admin user and secret.
///
/// Returns the authenticated username.
pub fn verify_session_token(
    token: Option<&str>,
    secret: Option<&str>,
    admin_user: Option<&str>,
) -> Result<String, AuthError> {
    let (Some(secret), Some(admin_user)) = (secret, admin_user) else {
        return Err(AuthError::NotConfigured);
    };
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let parts: Vec<&str> = token.split('.').collect();
    let [payload_b64, signature_hex] = parts.as_slice() else {
        return Err(AuthError::Malformed);
    };

    let payload = BASE64
        .decode(payload_b64)
        .map_err(|_| AuthError::Malformed)?;
    let username = String::from_utf8(payload).map_err(|_| AuthError::Malformed)?;
    if username.is_empty() || username != admin_user {
        return Err(AuthError::UnknownUser);
    }

    let signature = hex::decode(signature_hex).map_err(|_| AuthError::BadSignature)?;
    let mut mac = keyed_mac(secret)?;
    mac.update(username.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::BadSignature)?;

    Ok(username)
}

/// Check login credentials and mint a session token on success.
pub fn login(config: &AdminAuthConfig, username: &str, password: &str) -> Result<String, AuthError> {
    let (Some(admin_user), Some(admin_pass), Some(secret)) = (
        config.username.as_deref(),
        config.password.as_deref(),
        config.cookie_secret.as_deref(),
    ) else {
        return Err(AuthError::NotConfigured);
    };

    let username = username.trim();
    let password = password.trim();
    if username != admin_user {
        return Err(AuthError::InvalidCredentials);
    }
    // Compare MACs of both passwords so the check runs in constant time.
    let mut expected = keyed_mac(secret)?;
    expected.update(admin_pass.as_bytes());
    let mut given = keyed_mac(secret)?;
    given.update(password.as_bytes());
    given
        .verify(&expected.finalize().into_bytes())
        .map_err(|_| AuthError::InvalidCredentials)?;

    sign_session_token(secret, username)
}

/// Find a cookie value by name across all `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix(prefix.as_str()))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// `Set-Cookie` value that installs a session token.
pub fn session_cookie(token: &str, secure: bool) -> String {
    let secure_flag = if secure { "Secure; " } else { "" };
    format!(
        "{}={}; Path=/; {}HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, secure_flag, SESSION_MAX_AGE_SECS
    )
}

/// `Set-Cookie` value that clears the session.
pub fn cleared_session_cookie() -> String {
    format!(
        "{}=; Path=/; HttpOnly; Max-Age=0; SameSite=Lax; expires=Thu, 01 Jan 1970 00:00:00 UTC",
        SESSION_COOKIE
    )
}

/// An authenticated administrator.
///
/// Used as an extractor by every privileged handler; rejects with 401.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub username: String,
}

impl FromRequestParts<SharedState> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = cookie_value(&parts.headers, SESSION_COOKIE);
        let admin = &state.config.admin;
        match verify_session_token(
            token.as_deref(),
            admin.cookie_secret.as_deref(),
            admin.username.as_deref(),
        ) {
            Ok(username) => Ok(Self { username }),
            Err(reason) => {
                tracing::info!(path = %parts.uri.path(), %reason, "admin session rejected");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "cookie-secret";

    #[test]
    fn test_token_format() {
        let token = sign_session_token(SECRET, "admin").unwrap();
        let (payload, sig) = token.split_once('.').unwrap();
        assert_eq!(payload, "YWRtaW4=");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_token_matches_reference_hmac() {
        // HMAC-SHA256(key="key", "The quick brown fox jumps over the lazy dog")
        let token =
            sign_session_token("key", "The quick brown fox jumps over the lazy dog").unwrap();
        assert!(token.ends_with(
            ".f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        ));
    }

    #[test]
    fn test_verify_round_trip() {
        let token = sign_session_token(SECRET, "admin").unwrap();
        let user = verify_session_token(Some(&token), Some(SECRET), Some("admin")).unwrap();
        assert_eq!(user, "admin");
    }

    #[test]
    fn test_verify_utf8_username() {
        let token = sign_session_token(SECRET, "ผู้ดูแล").unwrap();
        let user = verify_session_token(Some(&token), Some(SECRET), Some("ผู้ดูแล")).unwrap();
        assert_eq!(user, "ผู้ดูแล");
    }

    #[test]
    fn test_verify_requires_configuration() {
        let token = sign_session_token(SECRET, "admin").unwrap();
        assert_eq!(
            verify_session_token(Some(&token), None, Some("admin")),
            Err(AuthError::NotConfigured)
        );
        assert_eq!(
            verify_session_token(Some(&token), Some(SECRET), None),
            Err(AuthError::NotConfigured)
        );
    }

    #[test]
    fn test_verify_missing_token() {
        assert_eq!(
            verify_session_token(None, Some(SECRET), Some("admin")),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            verify_session_token(Some(""), Some(SECRET), Some("admin")),
            Err(AuthError::MissingToken)
        );
    }

    #[test]
    fn test_verify_rejects_wrong_part_count() {
        let token = sign_session_token(SECRET, "admin").unwrap();
        assert_eq!(
            verify_session_token(Some("abc"), Some(SECRET), Some("admin")),
            Err(AuthError::Malformed)
        );
        let extra = format!("{}.extra", token);
        assert_eq!(
            verify_session_token(Some(&extra), Some(SECRET), Some("admin")),
            Err(AuthError::Malformed)
        );
    }

    #[test]
    fn test_verify_rejects_other_user() {
        let token = sign_session_token(SECRET, "mallory").unwrap();
        assert_eq!(
            verify_session_token(Some(&token), Some(SECRET), Some("admin")),
            Err(AuthError::UnknownUser)
        );
    }

    #[test]
    fn test_verify_rejects_empty_username() {
        let token = sign_session_token(SECRET, "").unwrap();
        assert_eq!(
            verify_session_token(Some(&token), Some(SECRET), Some("admin")),
            Err(AuthError::UnknownUser)
        );
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let token = sign_session_token("other-secret", "admin").unwrap();
        assert_eq!(
            verify_session_token(Some(&token), Some(SECRET), Some("admin")),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_verify_rejects_non_hex_signature() {
        let token = format!("{}.zz", BASE64.encode("admin"));
        assert_eq!(
            verify_session_token(Some(&token), Some(SECRET), Some("admin")),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_verify_rejects_truncated_signature() {
        let token = sign_session_token(SECRET, "admin").unwrap();
        let truncated = &token[..token.len() - 2];
        assert_eq!(
            verify_session_token(Some(truncated), Some(SECRET), Some("admin")),
            Err(AuthError::BadSignature)
        );
    }

    fn auth_config() -> AdminAuthConfig {
        AdminAuthConfig {
            username: Some("admin".into()),
            password: Some("hunter2".into()),
            cookie_secret: Some(SECRET.into()),
            secure_cookie: false,
        }
    }

    #[test]
    fn test_login_success_trims_input() {
        let token = login(&auth_config(), " admin ", " hunter2 ").unwrap();
        assert_eq!(
            verify_session_token(Some(&token), Some(SECRET), Some("admin")).unwrap(),
            "admin"
        );
    }

    #[test]
    fn test_login_rejects_bad_credentials() {
        assert_eq!(
            login(&auth_config(), "admin", "wrong"),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            login(&auth_config(), "root", "hunter2"),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[test]
    fn test_login_requires_full_configuration() {
        let mut config = auth_config();
        config.password = None;
        assert_eq!(login(&config, "admin", "hunter2"), Err(AuthError::NotConfigured));
    }

    #[test]
    fn test_cookie_value_parsing() {
        let mut headers = HeaderMap::new();
        headers.append(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; admin_auth=abc.def ; other=1"),
        );
        assert_eq!(cookie_value(&headers, "admin_auth").as_deref(), Some("abc.def"));
        assert_eq!(cookie_value(&headers, "theme").as_deref(), Some("dark"));
        assert!(cookie_value(&headers, "missing").is_none());
    }

    #[test]
    fn test_cookie_value_ignores_empty_and_prefix_collisions() {
        let mut headers = HeaderMap::new();
        headers.append(
            axum::http::header::COOKIE,
            HeaderValue::from_static("admin_auth_old=x; admin_auth="),
        );
        assert!(cookie_value(&headers, "admin_auth").is_none());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok", false);
        assert_eq!(
            cookie,
            "admin_auth=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=86400"
        );
        assert!(session_cookie("tok", true).contains("; Secure; HttpOnly;"));
        assert!(cleared_session_cookie().contains("Max-Age=0"));
    }
}
