use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use hmac::{Hmac, Mac};
use rand_core::OsRng;
use sha2::Sha256;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime (30 days).
const TOKEN_TTL_SECS: i64 = 30 * 86400;

pub const ROLE_CLIENT: &str = "client";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub role: String,
}

// ── Passwords ──

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

// ── Signed bearer tokens ──
//
// Format: `<id>:<role>:<exp>:<sig>` where sig = HMAC-SHA256(secret,
// "<id>:<role>:<exp>") hex-encoded. Stateless: any server process holding
// the secret can verify.

fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn issue_token(secret: &str, id: &str, role: &str) -> String {
    let exp = chrono::Utc::now().timestamp() + TOKEN_TTL_SECS;
    let payload = format!("{id}:{role}:{exp}");
    let sig = sign(secret, &payload);
    format!("{payload}:{sig}")
}

/// Verify a token's signature and expiry. Constant structure, no storage
/// access.
pub fn verify_token(secret: &str, token: &str) -> Option<AuthUser> {
    let mut parts = token.rsplitn(2, ':');
    let sig = parts.next()?;
    let payload = parts.next()?;

    if sign(secret, payload) != sig {
        tracing::warn!("token signature mismatch");
        return None;
    }

    let fields: Vec<&str> = payload.split(':').collect();
    let [id, role, exp] = fields.as_slice() else {
        return None;
    };

    let exp: i64 = exp.parse().ok()?;
    if chrono::Utc::now().timestamp() > exp {
        return None;
    }
    if *role != ROLE_CLIENT && *role != ROLE_ADMIN {
        return None;
    }

    Some(AuthUser {
        id: id.to_string(),
        role: role.to_string(),
    })
}

/// Extract the user from an `Authorization: Bearer <token>` header value.
pub fn extract_user_from_header(auth_header: &str, secret: &str) -> Option<AuthUser> {
    let token = auth_header.strip_prefix("Bearer ")?;
    verify_token(secret, token)
}

pub fn is_admin(user: &AuthUser) -> bool {
    user.role == ROLE_ADMIN
}

// ── Handler helpers ──

/// Resolve the Authorization header or reject with 401.
pub fn require_user(auth_header: Option<&str>, secret: &str) -> Result<AuthUser, ApiError> {
    let header = auth_header.ok_or(ApiError::Unauthorized("Missing Authorization header"))?;
    extract_user_from_header(header, secret)
        .ok_or(ApiError::Unauthorized("Invalid or expired token"))
}

/// Like `require_user`, additionally demanding the admin role.
pub fn require_admin(auth_header: Option<&str>, secret: &str) -> Result<AuthUser, ApiError> {
    let user = require_user(auth_header, secret)?;
    if !is_admin(&user) {
        return Err(ApiError::Forbidden);
    }
    Ok(user)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_token_roundtrip() {
        let token = issue_token(SECRET, "abc-123", ROLE_CLIENT);
        let user = verify_token(SECRET, &token).expect("valid token");
        assert_eq!(user.id, "abc-123");
        assert_eq!(user.role, ROLE_CLIENT);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token(SECRET, "abc-123", ROLE_CLIENT);
        assert!(verify_token("other-secret", &token).is_none());
    }

    #[test]
    fn test_tampered_role_rejected() {
        let token = issue_token(SECRET, "abc-123", ROLE_CLIENT);
        let tampered = token.replacen(ROLE_CLIENT, ROLE_ADMIN, 1);
        assert!(verify_token(SECRET, &tampered).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let exp = chrono::Utc::now().timestamp() - 10;
        let payload = format!("abc-123:client:{exp}");
        let token = format!("{payload}:{}", sign(SECRET, &payload));
        assert!(verify_token(SECRET, &token).is_none());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let exp = chrono::Utc::now().timestamp() + 1000;
        let payload = format!("abc-123:root:{exp}");
        let token = format!("{payload}:{}", sign(SECRET, &payload));
        assert!(verify_token(SECRET, &token).is_none());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(verify_token(SECRET, "not a token").is_none());
        assert!(verify_token(SECRET, "").is_none());
    }

    #[test]
    fn test_bearer_prefix_required() {
        let token = issue_token(SECRET, "abc-123", ROLE_CLIENT);
        assert!(extract_user_from_header(&token, SECRET).is_none());
        let header = format!("Bearer {token}");
        assert!(extract_user_from_header(&header, SECRET).is_some());
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("s3nha-forte").unwrap();
        assert!(verify_password("s3nha-forte", &hash));
        assert!(!verify_password("errada", &hash));
    }

    #[test]
    fn test_verify_against_garbage_hash() {
        assert!(!verify_password("x", "not-a-hash"));
    }

    #[test]
    fn test_admin_check() {
        let admin = AuthUser {
            id: "admin".into(),
            role: ROLE_ADMIN.into(),
        };
        let client = AuthUser {
            id: "c1".into(),
            role: ROLE_CLIENT.into(),
        };
        assert!(is_admin(&admin));
        assert!(!is_admin(&client));
    }
}
