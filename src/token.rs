//! Bearer-token verification for the socket gateway (§4.J, §6).
//!
//! Issuance of these tokens belongs to the out-of-scope auth service (§1);
//! the core only verifies them. Rather than pull in a dedicated JWT crate,
//! this reuses the reference service's own HMAC-SHA256 stack (`hmac` +
//! `sha2` + `hex`, the same crates it uses to sign outgoing webhook
//! payloads) to check a compact `payload.signature` token: a base64url JSON
//! claims object followed by a base64url HMAC-SHA256 signature over it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::CoreError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issue a token for `user_id`, valid for `ttl_secs` from now. Exposed
/// mainly for tests and local development — in production the out-of-scope
/// auth service mints these.
pub fn issue_token(secret: &str, user_id: &str, ttl_secs: i64) -> Result<String, CoreError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    let payload = serde_json::to_vec(&claims)
        .map_err(|e| CoreError::Internal(format!("encode claims: {e}")))?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Internal(format!("init hmac: {e}")))?;
    mac.update(payload_b64.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{payload_b64}.{sig_b64}"))
}

/// Verify `token`'s signature under `secret` and that it has not expired.
/// Returns the `sub` claim (the user-id) on success.
pub fn verify_token(secret: &str, token: &str) -> Result<String, CoreError> {
    let (payload_b64, sig_b64) = token
        .split_once('.')
        .ok_or_else(|| CoreError::InvalidArgument("malformed bearer token".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Internal(format!("init hmac: {e}")))?;
    mac.update(payload_b64.as_bytes());

    let given_sig = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| CoreError::InvalidArgument("malformed token signature".to_string()))?;
    mac.verify_slice(&given_sig)
        .map_err(|_| CoreError::InvalidArgument("token signature does not verify".to_string()))?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| CoreError::InvalidArgument("malformed token payload".to_string()))?;
    let claims: Claims = serde_json::from_slice(&payload)
        .map_err(|_| CoreError::InvalidArgument("malformed token claims".to_string()))?;

    if claims.exp < chrono::Utc::now().timestamp() {
        return Err(CoreError::InvalidArgument("token expired".to_string()));
    }

    Ok(claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_issue_and_verify() {
        let token = issue_token("secret", "alice", 3600).unwrap();
        let sub = verify_token("secret", &token).unwrap();
        assert_eq!(sub, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("secret", "alice", 3600).unwrap();
        assert!(verify_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token("secret", "alice", -10).unwrap();
        assert!(verify_token("secret", &token).is_err());
    }
}
