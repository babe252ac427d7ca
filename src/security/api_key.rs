use sha2::{Digest, Sha256};
use uuid::Uuid;

pub struct IssuedApiKey {
    /// Shown to the caller exactly once; never persisted.
    pub raw: String,
    pub hash: String,
    pub prefix: String,
}

/// Generates a fresh project API key, grounded in restflow-server's
/// `ApiKeyManager::create_key`.
pub fn generate() -> IssuedApiKey {
    let raw = format!("rtk_{}", Uuid::new_v4().simple());
    let hash = hash_key(&raw);
    let prefix = raw.chars().take(11).collect();
    IssuedApiKey { raw, hash, prefix }
}

pub fn hash_key(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_hashes_to_its_own_hash() {
        let issued = generate();
        assert_eq!(hash_key(&issued.raw), issued.hash);
        assert!(issued.raw.starts_with(&issued.prefix));
    }

    #[test]
    fn keys_are_unique() {
        assert_ne!(generate().raw, generate().raw);
    }
}
