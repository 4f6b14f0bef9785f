use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use tracing::warn;

/// Key used when `ENCRYPTION_KEY` is absent. Development only.
const INSECURE_DEV_KEY: &str = "Z7wz8u_u8Y7j6B1b4C9d2E5f8G1h3I4j5K6l7M8n9O0=";

const NONCE_LEN: usize = 12;

/// Authenticated encryption for credential tokens at rest.
///
/// Ciphertext layout: base64url(nonce || aes-256-gcm ciphertext). Rows
/// written before encryption was introduced hold cleartext; decryption
/// failure therefore returns the stored value unchanged instead of
/// erroring.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Builds the cipher from a 32-byte url-safe base64 key, typically the
    /// `ENCRYPTION_KEY` environment variable.
    pub fn new(key: Option<&str>) -> anyhow::Result<Self> {
        let key = match key {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => {
                warn!("no ENCRYPTION_KEY set, using insecure default key for development");
                INSECURE_DEV_KEY.to_string()
            }
        };
        let bytes = URL_SAFE
            .decode(key.as_bytes())
            .map_err(|e| anyhow::anyhow!("ENCRYPTION_KEY is not valid url-safe base64: {e}"))?;
        if bytes.len() != 32 {
            anyhow::bail!("ENCRYPTION_KEY must decode to 32 bytes, got {}", bytes.len());
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes));
        Ok(Self { cipher })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(std::env::var("ENCRYPTION_KEY").ok().as_deref())
    }

    pub fn encrypt(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        // Encryption with a fresh random nonce cannot fail for our key size.
        let ciphertext = self
            .cipher
            .encrypt(&nonce, raw.as_bytes())
            .unwrap_or_else(|_| raw.as_bytes().to_vec());
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        URL_SAFE.encode(out)
    }

    /// Decrypts a stored token. Legacy cleartext rows round-trip unchanged.
    pub fn decrypt(&self, stored: &str) -> String {
        if stored.is_empty() {
            return String::new();
        }
        let Ok(bytes) = URL_SAFE.decode(stored.as_bytes()) else {
            return stored.to_string();
        };
        if bytes.len() <= NONCE_LEN {
            return stored.to_string();
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        match self.cipher.decrypt(Nonce::from_slice(nonce_bytes), ciphertext) {
            Ok(plain) => String::from_utf8(plain).unwrap_or_else(|_| stored.to_string()),
            // Integrity failure: assume legacy cleartext.
            Err(_) => stored.to_string(),
        }
    }
}
