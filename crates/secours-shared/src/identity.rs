//! Long-lived node identity.
//!
//! Each node owns a Curve25519 key pair and a UUID node id, persisted as
//! JSON next to the database. The file is written once on first startup
//! and loaded verbatim afterwards.

use std::fs;
use std::path::Path;

use crypto_box::{aead::OsRng, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::KEY_SIZE;
use crate::error::IdentityError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub node_id: String,
    pub pub_key: String,
    pub priv_key: String,
}

impl Identity {
    /// Generate a fresh key pair and node id.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();

        Self {
            node_id: Uuid::new_v4().to_string(),
            pub_key: hex::encode(public.as_bytes()),
            priv_key: hex::encode(secret.to_bytes()),
        }
    }

    /// Load the identity from `path`, or generate and persist a new one.
    ///
    /// A file that is missing, unreadable, or incomplete is replaced by a
    /// freshly generated identity. Failure to persist the new identity is
    /// fatal: a node that cannot keep its key pair across restarts would
    /// change identity on every run.
    pub fn load_or_generate(path: &Path) -> Result<Self, IdentityError> {
        if let Ok(data) = fs::read(path) {
            match serde_json::from_slice::<Identity>(&data) {
                Ok(id) if id.is_complete() => {
                    tracing::info!(node_id = %id.node_id, path = %path.display(), "loaded identity");
                    return Ok(id);
                }
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "identity file incomplete, regenerating");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "identity file corrupt, regenerating");
                }
            }
        }

        let id = Self::generate();
        let data = serde_json::to_vec_pretty(&id)?;
        fs::write(path, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
        }

        tracing::info!(node_id = %id.node_id, path = %path.display(), "generated new identity");
        Ok(id)
    }

    /// All three fields present and both keys decode to 32 bytes.
    fn is_complete(&self) -> bool {
        let valid_key = |k: &str| hex::decode(k).map(|b| b.len() == KEY_SIZE).unwrap_or(false);
        !self.node_id.is_empty() && valid_key(&self.pub_key) && valid_key(&self.priv_key)
    }
}

/// Deterministic message id: hex(SHA-256("sender:content:ts")).
///
/// Identical origin triples collide on purpose; the store's unique id
/// column turns rebroadcasts into no-ops.
pub fn message_id(sender_id: &str, content: &str, ts: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", sender_id, content, ts));
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_well_formed() {
        let id = Identity::generate();
        assert_eq!(hex::decode(&id.pub_key).unwrap().len(), KEY_SIZE);
        assert_eq!(hex::decode(&id.priv_key).unwrap().len(), KEY_SIZE);
        assert!(Uuid::parse_str(&id.node_id).is_ok());
    }

    #[test]
    fn test_load_or_generate_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity_9000.json");

        let first = Identity::load_or_generate(&path).unwrap();
        let second = Identity::load_or_generate(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupt_file_regenerates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity_9000.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let id = Identity::load_or_generate(&path).unwrap();
        assert!(id.is_complete());

        // The regenerated identity must have been persisted.
        let reloaded = Identity::load_or_generate(&path).unwrap();
        assert_eq!(id, reloaded);
    }

    #[test]
    fn test_incomplete_file_regenerates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity_9000.json");
        std::fs::write(
            &path,
            br#"{"node_id":"abc","pub_key":"","priv_key":""}"#,
        )
        .unwrap();

        let id = Identity::load_or_generate(&path).unwrap();
        assert_ne!(id.node_id, "abc");
        assert!(id.is_complete());
    }

    #[test]
    fn test_message_id_deterministic() {
        let a = message_id("node-1", "hello", 42);
        let b = message_id("node-1", "hello", 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_message_id_distinguishes_inputs() {
        let base = message_id("node-1", "hello", 42);
        assert_ne!(base, message_id("node-2", "hello", 42));
        assert_ne!(base, message_id("node-1", "hello!", 42));
        assert_ne!(base, message_id("node-1", "hello", 43));
    }
}
