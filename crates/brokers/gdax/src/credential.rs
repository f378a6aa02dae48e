use base64::prelude::*;
use blockhead_core::ExchangeError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Path signed when authenticating the websocket subscription.
pub const WS_AUTH_PATH: &str = "/users/self/verify";

/// API credentials used to sign REST requests and feed subscriptions.
///
/// The signature is `base64(HMAC-SHA256(base64decode(secret), timestamp + METHOD + path + body))`.
#[derive(Clone)]
pub struct Credential {
    pub api_key: String,
    pub passphrase: String,
    /// Keyed with the decoded secret; cloned per signature.
    mac: HmacSha256,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &self.api_key)
            .field("passphrase", &"<redacted>")
            .field("mac", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn new(api_key: &str, secret_b64: &str, passphrase: &str) -> Result<Self, ExchangeError> {
        let secret = BASE64_STANDARD
            .decode(secret_b64.trim())
            .map_err(|e| ExchangeError::Auth(format!("API secret is not valid base64: {}", e)))?;

        let mac = HmacSha256::new_from_slice(&secret)
            .map_err(|e| ExchangeError::Auth(format!("Unusable API secret: {}", e)))?;

        Ok(Self {
            api_key: api_key.to_string(),
            passphrase: passphrase.to_string(),
            mac,
        })
    }

    /// Signs one request. `request_path` includes the query string.
    pub fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(timestamp.as_bytes());
        mac.update(method.to_uppercase().as_bytes());
        mac.update(request_path.as_bytes());
        mac.update(body.as_bytes());
        BASE64_STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Signature for the feed's `subscribe` message.
    pub fn sign_ws(&self, timestamp: &str) -> String {
        self.sign(timestamp, "GET", WS_AUTH_PATH, "")
    }
}
