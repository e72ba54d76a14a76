//! HMAC signatures on worker callbacks (`X-Task-Signature: sha256=<hex>`).

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "x-task-signature";

/// Sign a payload. Returns `None` when no secret is configured.
pub fn sign(secret: &str, payload: &[u8]) -> Option<String> {
    if secret.is_empty() {
        return None;
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// How the worker callback authenticates deliveries.
#[derive(Clone, Debug)]
pub enum CallbackAuth {
    /// Local worker without a secret. Callbacks are accepted unsigned.
    Unsigned,
    /// Callbacks must carry an HMAC of the body under this secret.
    Hmac(Arc<str>),
    /// A push queue is configured but no secret is. Every callback is refused.
    Refused,
}

impl CallbackAuth {
    pub fn new(secret: &str, push_queue: bool) -> Self {
        match (secret.is_empty(), push_queue) {
            (false, _) => Self::Hmac(Arc::from(secret)),
            (true, false) => Self::Unsigned,
            (true, true) => Self::Refused,
        }
    }

    /// Whether `signature` (the header value) authenticates `payload`.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let secret = match self {
            Self::Unsigned => return true,
            Self::Refused => return false,
            Self::Hmac(secret) => secret,
        };

        let Some(expected) = signature
            .strip_prefix("sha256=")
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
        else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}
