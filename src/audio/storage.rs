use std::path::{Path, PathBuf};

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_URL_TTL_SECS: i64 = 24 * 60 * 60;

/// Local blob store with HMAC-signed, expiring retrieval URLs. Files land
/// under `root/<key>`; the serving route checks the signature and expiry
/// before streaming bytes back.
pub struct BlobStorage {
    root: PathBuf,
    secret: String,
    base_url: String,
}

impl BlobStorage {
    pub fn from_env() -> Result<Self, Error> {
        let root = std::env::var("UPLOADS_DIR").unwrap_or_else(|_| "uploads".to_string());
        let secret = std::env::var("AUDIO_URL_SECRET")
            .map_err(|_| Error::Config("AUDIO_URL_SECRET not set".to_string()))?;
        let base_url = std::env::var("SERVER_URL")
            .map_err(|_| Error::Config("SERVER_URL not set".to_string()))?;
        Ok(Self {
            root: PathBuf::from(root),
            secret,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, Error> {
        // Keys are server-generated, but the serving route passes through
        // whatever the request carried.
        if key.split('/').any(|part| part == ".." || part.is_empty()) || Path::new(key).is_absolute()
        {
            return Err(Error::Config(format!("Invalid storage key: {}", key)));
        }
        Ok(self.root.join(key))
    }

    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), Error> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Synthesis(format!("Cannot create upload dir: {}", e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::Synthesis(format!("Cannot write {}: {}", key, e)))?;
        Ok(())
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, Error> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Synthesis(format!("Cannot read {}: {}", key, e)))
    }

    fn sign(&self, key: &str, expires_at: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{}:{}", key, expires_at).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// 24-hour signed URL for a stored blob.
    pub fn signed_url(&self, key: &str) -> String {
        let expires_at = Utc::now().timestamp() + SIGNED_URL_TTL_SECS;
        let signature = self.sign(key, expires_at);
        format!(
            "{}/uploads/{}?exp={}&sig={}",
            self.base_url,
            key,
            expires_at,
            signature
        )
    }

    /// Constant-time signature check plus expiry.
    pub fn verify(&self, key: &str, expires_at: i64, signature: &str) -> bool {
        if expires_at < Utc::now().timestamp() {
            return false;
        }
        let raw = match hex::decode(signature) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{}:{}", key, expires_at).as_bytes());
        mac.verify_slice(&raw).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> BlobStorage {
        BlobStorage {
            root: PathBuf::from("/tmp/daybreak-test-uploads"),
            secret: "test-secret".to_string(),
            base_url: "http://localhost:3000".to_string(),
        }
    }

    #[test]
    fn signed_url_verifies() {
        let storage = storage();
        let url = storage.signed_url("u1/123.mp3");
        let query = url.split('?').nth(1).unwrap();
        let mut exp = 0i64;
        let mut sig = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "exp" => exp = v.parse().unwrap(),
                "sig" => sig = v.to_string(),
                _ => {}
            }
        }
        assert!(storage.verify("u1/123.mp3", exp, &sig));
    }

    #[test]
    fn tampered_key_fails_verification() {
        let storage = storage();
        let exp = Utc::now().timestamp() + 1000;
        let sig = storage.sign("u1/123.mp3", exp);
        assert!(!storage.verify("u1/other.mp3", exp, &sig));
    }

    #[test]
    fn expired_signature_fails() {
        let storage = storage();
        let exp = Utc::now().timestamp() - 1;
        let sig = storage.sign("u1/123.mp3", exp);
        assert!(!storage.verify("u1/123.mp3", exp, &sig));
    }

    #[test]
    fn garbage_signature_fails() {
        let storage = storage();
        let exp = Utc::now().timestamp() + 1000;
        assert!(!storage.verify("u1/123.mp3", exp, "not-hex"));
        assert!(!storage.verify("u1/123.mp3", exp, "deadbeef"));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let storage = storage();
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("a/../../b").is_err());
        assert!(storage.resolve("/abs/path").is_err());
        assert!(storage.resolve("u1/ok.mp3").is_ok());
    }
}
