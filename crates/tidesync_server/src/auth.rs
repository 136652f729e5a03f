//! Bearer-token authentication for the reference server.
//!
//! Tokens are signed with HMAC-SHA256 and carry an issue timestamp for
//! expiration checking.
//!
//! ## Token Format
//!
//! Before hex encoding, a token is composed of:
//! - 2 bytes: client id length (big-endian)
//! - N bytes: client id (UTF-8)
//! - 8 bytes: timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over everything before it
//!
//! Clients send it as `authorization: Bearer <hex>`.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ServerError, ServerResult};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;
const BEARER: &str = "Bearer ";

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and checks bearer tokens.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a hex-encoded token for a client.
    pub fn create_token(&self, client_id: &str) -> ServerResult<String> {
        let id = client_id.as_bytes();
        let id_len = u16::try_from(id.len())
            .map_err(|_| ServerError::InvalidRequest("client id too long".into()))?;

        let mut data = Vec::with_capacity(2 + id.len() + 8 + SIGNATURE_LEN);
        data.extend_from_slice(&id_len.to_be_bytes());
        data.extend_from_slice(id);
        data.extend_from_slice(&now_millis().to_be_bytes());

        let signature = self.sign(&data)?;
        data.extend_from_slice(&signature);
        Ok(encode_hex(&data))
    }

    /// Validates a hex-encoded token and returns the client id it was
    /// issued to.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        let raw = decode_hex(token)
            .ok_or_else(|| ServerError::NotAuthorized("malformed token".into()))?;
        if raw.len() < 2 + 8 + SIGNATURE_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }

        let id_len = usize::from(u16::from_be_bytes([raw[0], raw[1]]));
        if raw.len() != 2 + id_len + 8 + SIGNATURE_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }
        let (signed, signature) = raw.split_at(raw.len() - SIGNATURE_LEN);

        let expected = self.sign(signed)?;
        if signature != expected.as_slice() {
            return Err(ServerError::NotAuthorized("invalid signature".into()));
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&signed[2 + id_len..]);
        let issued = u64::from_be_bytes(timestamp);
        let expiry = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued.saturating_add(expiry) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        String::from_utf8(signed[2..2 + id_len].to_vec())
            .map_err(|_| ServerError::NotAuthorized("invalid client id".into()))
    }

    /// Authorizes a request from its headers. Header names match
    /// case-insensitively.
    pub fn authorize(&self, headers: &BTreeMap<String, String>) -> ServerResult<String> {
        let value = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .map(|(_, value)| value.as_str())
            .ok_or_else(|| ServerError::AuthenticationFailed("missing authorization header".into()))?;

        let token = value.strip_prefix(BEARER).ok_or_else(|| {
            ServerError::AuthenticationFailed("expected a bearer token".into())
        })?;
        self.validate_token(token.trim())
    }

    fn sign(&self, data: &[u8]) -> ServerResult<[u8; SIGNATURE_LEN]> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid hmac key: {e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

/// Formats a header value carrying the given token.
pub fn bearer(token: &str) -> String {
    format!("{BEARER}{token}")
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
