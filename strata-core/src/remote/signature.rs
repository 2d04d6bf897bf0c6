//! Detached catalog signatures
//!
//! A signature is the hex-encoded HMAC-SHA256 of the catalog bytes under a
//! shared key, optionally prefixed with `hmac-sha256:`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "hmac-sha256:";

/// Default suffix appended to a catalog URL to find its signature
pub const DEFAULT_SIGNATURE_SUFFIX: &str = ".sig";

#[derive(Clone)]
pub struct SignatureVerifier {
    key: Vec<u8>,
    suffix: String,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(key: impl Into<Vec<u8>>, suffix: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            suffix: suffix.into(),
        }
    }

    /// Read the key from the environment variable `key_env`
    pub fn from_env(key_env: &str, suffix: &str) -> Result<Self, String> {
        let key = std::env::var(key_env)
            .map_err(|_| format!("signature key variable {key_env} is not set"))?;
        if key.is_empty() {
            return Err(format!("signature key variable {key_env} is empty"));
        }
        Ok(Self::new(key.into_bytes(), suffix))
    }

    /// URL of the detached signature for `url`
    pub fn signature_url(&self, url: &str) -> String {
        format!("{url}{}", self.suffix)
    }

    fn mac(&self) -> Result<HmacSha256, String> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| format!("unusable signature key: {e}"))
    }

    /// Produce the signature text for `document`
    pub fn sign(&self, document: &[u8]) -> Result<String, String> {
        let mut mac = self.mac()?;
        mac.update(document);
        Ok(format!(
            "{SIGNATURE_PREFIX}{}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Check `signature` (the fetched signature file) against `document`
    pub fn verify(&self, document: &[u8], signature: &[u8]) -> Result<(), String> {
        let text = std::str::from_utf8(signature)
            .map_err(|_| "signature file is not text".to_string())?
            .trim();
        let digits = text.strip_prefix(SIGNATURE_PREFIX).unwrap_or(text);
        let expected = hex::decode(digits).map_err(|_| "signature is not hex encoded".to_string())?;

        let mut mac = self.mac()?;
        mac.update(document);
        mac.verify_slice(&expected)
            .map_err(|_| "signature does not match catalog content".to_string())
    }
}
