//! Secret provisioning
//!
//! Secrets are raw key files, one per enrolled client, whose extension
//! matches the configured prefix token. They are loaded once at startup and
//! shared read-only afterwards.

use crate::error::ProtocolError;
use rand::Rng;
use sha2::{Digest, Sha512};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Digest bytes shown in a secret fingerprint
const FINGERPRINT_SIZE: usize = 8;

/// Fixed-length shared secret
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    id: String,
    bytes: Vec<u8>,
}

impl Secret {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            bytes,
        }
    }

    /// Read a secret file, keeping exactly the first `key_length` bytes
    ///
    /// The secret id is the file stem.
    pub fn from_file(path: &Path, key_length: usize) -> Result<Self, ProtocolError> {
        if key_length == 0 {
            return Err(ProtocolError::InvalidKeyLength(key_length));
        }

        let mut bytes = std::fs::read(path).map_err(|source| ProtocolError::SecretUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        if bytes.len() < key_length {
            return Err(ProtocolError::SecretTooShort {
                path: path.to_path_buf(),
                expected: key_length,
                actual: bytes.len(),
            });
        }
        bytes.truncate(key_length);

        let id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self { id, bytes })
    }

    /// Generate fresh random key material
    pub fn generate(id: impl Into<String>, key_length: usize) -> Self {
        let mut bytes = vec![0u8; key_length];
        rand::thread_rng().fill(&mut bytes[..]);
        Self::new(id, bytes)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Short identifier for the key material, safe to log
    ///
    /// Hex of the first 8 bytes of the SHA-512 digest of the secret.
    pub fn fingerprint(&self) -> String {
        Sha512::digest(&self.bytes)[..FINGERPRINT_SIZE]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// The set of enrolled secrets, in stable (path-sorted) order
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    secrets: Vec<Arc<Secret>>,
}

impl SecretStore {
    /// Walk `dir` recursively and load every file whose extension equals `prefix`
    ///
    /// Unreadable or undersized files are skipped with a warning. Failing to
    /// walk the directory itself is fatal.
    pub fn load(dir: &Path, prefix: &str, key_length: usize) -> Result<Self, ProtocolError> {
        if key_length == 0 {
            return Err(ProtocolError::InvalidKeyLength(key_length));
        }

        let mut files = Vec::new();
        collect_files(dir, prefix, &mut files)?;
        files.sort();

        let mut secrets = Vec::with_capacity(files.len());
        for path in &files {
            match Secret::from_file(path, key_length) {
                Ok(secret) => {
                    debug!("Loaded secret {} from {:?}", secret.id(), path);
                    secrets.push(Arc::new(secret));
                }
                Err(e) => warn!("Skipping secret file: {}", e),
            }
        }

        info!("Loaded {} of {} secrets from {:?}", secrets.len(), files.len(), dir);
        if secrets.is_empty() {
            warn!("No secrets enrolled, no knock sequence will ever validate");
        }

        Ok(Self { secrets })
    }

    pub fn from_secrets(secrets: impl IntoIterator<Item = Secret>) -> Self {
        Self {
            secrets: secrets.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Secret>> {
        self.secrets.iter()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

fn collect_files(dir: &Path, prefix: &str, files: &mut Vec<PathBuf>) -> Result<(), ProtocolError> {
    let unreadable = |source: std::io::Error| ProtocolError::SecretDirUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(unreadable)?;

        if file_type.is_dir() {
            collect_files(&path, prefix, files)?;
        } else if path.extension().is_some_and(|ext| ext == prefix) {
            files.push(path);
        }
    }

    Ok(())
}
