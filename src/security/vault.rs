use crate::error::{AppError, AppResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::Rng;

const NONCE_SIZE: usize = 12;

/// Authenticated symmetric encryption for provider API keys at rest,
/// keyed by a process-wide key loaded from `ENCRYPTION_KEY`.
pub struct SecretVault {
    cipher: Aes256Gcm,
}

impl SecretVault {
    pub fn new(master_key: &[u8]) -> anyhow::Result<Self> {
        if master_key.len() != 32 {
            anyhow::bail!("encryption key must be 32 bytes, got {}", master_key.len());
        }
        let cipher = Aes256Gcm::new_from_slice(master_key)
            .map_err(|err| anyhow::anyhow!("invalid encryption key: {:?}", err))?;
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` and returns a base64-encoded `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Internal("failed to encrypt secret".into()))?;
        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.append(&mut ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(output))
    }

    pub fn decrypt(&self, encoded: &str) -> AppResult<String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| AppError::BadCiphertext)?;
        if raw.len() < NONCE_SIZE {
            return Err(AppError::BadCiphertext);
        }
        let (nonce_bytes, payload) = raw.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, payload)
            .map_err(|_| AppError::BadCiphertext)?;
        String::from_utf8(plaintext).map_err(|_| AppError::BadCiphertext)
    }

    /// Masks a secret for display: keeps the first 3 and last 4 characters.
    pub fn mask(s: &str) -> String {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        [0xAB; 32]
    }

    #[test]
    fn roundtrip() {
        let vault = SecretVault::new(&test_key()).unwrap();
        let ciphertext = vault.encrypt("sk-test-secret-key").unwrap();
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), "sk-test-secret-key");
    }

    #[test]
    fn wrong_key_size() {
        let key = [0u8; 31];
        let err = SecretVault::new(&key).err().expect("should fail");
        assert!(err.to_string().contains("32"));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let vault = SecretVault::new(&test_key()).unwrap();
        let ciphertext = vault.encrypt("sensitive").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD.decode(&ciphertext).unwrap();
        let idx = NONCE_SIZE + 1;
        raw[idx] ^= 0xFF;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);
        assert!(matches!(vault.decrypt(&tampered), Err(AppError::BadCiphertext)));
    }

    #[test]
    fn garbage_ciphertext_fails() {
        let vault = SecretVault::new(&test_key()).unwrap();
        assert!(matches!(vault.decrypt("not-base64!!"), Err(AppError::BadCiphertext)));
    }

    #[test]
    fn mask_keeps_head_and_tail() {
        assert_eq!(SecretVault::mask("sk-proj-abcdef1234"), "sk-...1234");
        assert_eq!(SecretVault::mask("short"), "*****");
    }
}
