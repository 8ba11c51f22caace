//! Token authentication for the realtime channel.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Token layout: 8-byte big-endian issue time in Unix milliseconds,
/// followed by a 32-byte HMAC-SHA256 over `account_id || 0x00 || issue
/// time`, hex-encoded.
const TOKEN_BYTES: usize = 8 + 32;

/// Issues and checks realtime-channel tokens.
///
/// Tokens are account-scoped bearer credentials: possession proves the
/// holder got them from someone who knows the shared secret. They carry
/// their issue time, so validation needs no server-side session table.
pub struct TokenValidator {
    secret: Vec<u8>,
    expiry: Duration,
}

impl TokenValidator {
    /// Creates a validator over the shared secret.
    pub fn new(secret: Vec<u8>, expiry: Duration) -> Self {
        Self { secret, expiry }
    }

    /// Issues a token for an account, valid from now.
    pub fn issue(&self, account_id: &str) -> ServerResult<String> {
        self.issue_at(account_id, unix_millis())
    }

    fn issue_at(&self, account_id: &str, issued_at_millis: u64) -> ServerResult<String> {
        let mac = self.mac(account_id, issued_at_millis)?;
        let mut raw = Vec::with_capacity(TOKEN_BYTES);
        raw.extend_from_slice(&issued_at_millis.to_be_bytes());
        raw.extend_from_slice(&mac);
        Ok(hex_encode(&raw))
    }

    /// Checks a token for an account and returns its remaining lifetime.
    pub fn validate(&self, account_id: &str, token: &str) -> ServerResult<Duration> {
        let raw = hex_decode(token)
            .ok_or_else(|| ServerError::NotAuthorized("malformed token".into()))?;
        if raw.len() != TOKEN_BYTES {
            return Err(ServerError::NotAuthorized("malformed token".into()));
        }

        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&raw[..8]);
        let issued_at_millis = u64::from_be_bytes(ts_bytes);

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| ServerError::Internal("invalid secret length".into()))?;
        mac.update(account_id.as_bytes());
        mac.update(&[0]);
        mac.update(&issued_at_millis.to_be_bytes());
        mac.verify_slice(&raw[8..])
            .map_err(|_| ServerError::NotAuthorized("bad token signature".into()))?;

        let age = Duration::from_millis(unix_millis().saturating_sub(issued_at_millis));
        self.expiry
            .checked_sub(age)
            .ok_or_else(|| ServerError::NotAuthorized("token expired".into()))
    }

    fn mac(&self, account_id: &str, issued_at_millis: u64) -> ServerResult<[u8; 32]> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| ServerError::Internal("invalid secret length".into()))?;
        mac.update(account_id.as_bytes());
        mac.update(&[0]);
        mac.update(&issued_at_millis.to_be_bytes());
        Ok(mac.finalize().into_bytes().into())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(b"test-secret".to_vec(), Duration::from_secs(3600))
    }

    #[test]
    fn issued_token_validates() {
        let validator = validator();
        let token = validator.issue("alice").unwrap();
        let remaining = validator.validate("alice", &token).unwrap();
        assert!(remaining <= Duration::from_secs(3600));
        assert!(remaining > Duration::from_secs(3590));
    }

    #[test]
    fn token_is_account_scoped() {
        let validator = validator();
        let token = validator.issue("alice").unwrap();
        assert!(validator.validate("bob", &token).is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = validator().issue("alice").unwrap();
        let other = TokenValidator::new(b"other-secret".to_vec(), Duration::from_secs(3600));
        assert!(other.validate("alice", &token).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let validator = validator();
        let stale = unix_millis() - 2 * 3600 * 1000;
        let token = validator.issue_at("alice", stale).unwrap();
        assert!(matches!(
            validator.validate("alice", &token),
            Err(ServerError::NotAuthorized(_))
        ));
    }

    #[test]
    fn garbage_tokens_rejected() {
        let validator = validator();
        assert!(validator.validate("alice", "").is_err());
        assert!(validator.validate("alice", "zz").is_err());
        assert!(validator.validate("alice", "deadbeef").is_err());
    }

    #[test]
    fn tampered_token_rejected() {
        let validator = validator();
        let mut token = validator.issue("alice").unwrap();
        let flipped = if token.ends_with('0') { '1' } else { '0' };
        token.pop();
        token.push(flipped);
        assert!(validator.validate("alice", &token).is_err());
    }
}
