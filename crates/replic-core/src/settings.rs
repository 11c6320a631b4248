//! Saved run configuration.
//!
//! `--save-args` stores the resolved [`RunConfiguration`] so scheduled runs
//! can start with `--read-saved-args` alone. Credentials are part of the
//! snapshot, so the file is sealed with AES-256-GCM:
//!
//! ```text
//! data.dat = nonce (12 bytes) ++ ciphertext ++ tag (16 bytes)
//! ```
//!
//! The key is the SHA-256 of `REPLIC_SETTINGS_KEY`, or of a built-in
//! passphrase when the variable is unset.

use std::path::{Path, PathBuf};

use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::RunConfiguration;
use crate::error::{ReplicError, Result};
use crate::io;

pub const DEFAULT_SETTINGS_FILE: &str = "data.dat";
pub const KEY_ENV: &str = "REPLIC_SETTINGS_KEY";
const BUILTIN_PASSPHRASE: &str = "replic-loader/settings/v1";

pub trait SettingsStore {
    fn save(&self, config: &RunConfiguration) -> Result<()>;

    /// `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<RunConfiguration>>;

    /// Remove the saved snapshot. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

pub struct EncryptedFileStore {
    path: PathBuf,
    key: [u8; 32],
}

impl EncryptedFileStore {
    /// Store at `path` keyed from the environment.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let passphrase = std::env::var(KEY_ENV).unwrap_or_else(|_| BUILTIN_PASSPHRASE.to_string());
        Self::with_passphrase(path, &passphrase)
    }

    pub fn with_passphrase(path: impl Into<PathBuf>, passphrase: &str) -> Self {
        Self {
            path: path.into(),
            key: Sha256::digest(passphrase.as_bytes()).into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self) -> Result<LessSafeKey> {
        let key = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| ReplicError::Settings("invalid key".to_string()))?;
        Ok(LessSafeKey::new(key))
    }

    fn seal(&self, plaintext: Vec<u8>) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut in_out = plaintext;
        self.cipher()?
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| ReplicError::Settings("encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&in_out);
        Ok(blob)
    }

    fn open(&self, mut blob: Vec<u8>) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(ReplicError::Settings(format!(
                "{} is truncated",
                self.path.display()
            )));
        }
        let mut sealed = blob.split_off(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&blob)
            .map_err(|_| ReplicError::Settings("bad nonce".to_string()))?;
        let plaintext = self
            .cipher()?
            .open_in_place(nonce, Aad::empty(), &mut sealed)
            .map_err(|_| {
                ReplicError::Settings(format!(
                    "cannot decrypt {}; was it saved with a different {KEY_ENV}?",
                    self.path.display()
                ))
            })?;
        Ok(plaintext.to_vec())
    }
}

impl SettingsStore for EncryptedFileStore {
    fn save(&self, config: &RunConfiguration) -> Result<()> {
        let json = serde_json::to_vec(config)?;
        let blob = self.seal(json)?;
        io::atomic_write(&self.path, &blob)?;
        info!(file = %self.path.display(), "arguments saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<RunConfiguration>> {
        let blob = match std::fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %self.path.display(), "no saved arguments");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let json = self.open(blob)?;
        Ok(Some(serde_json::from_slice(&json)?))
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(file = %self.path.display(), "saved arguments removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> RunConfiguration {
        let mut config = RunConfiguration {
            project_name: "Demo".to_string(),
            ..RunConfiguration::default()
        };
        config.database.name = "Prod".to_string();
        config.database.password = "hunter2".to_string();
        config.mail.to = vec!["ops@example.com".to_string()];
        config
    }

    #[test]
    fn load_without_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = EncryptedFileStore::with_passphrase(dir.path().join("data.dat"), "k");
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn saved_configuration_comes_back() {
        let dir = TempDir::new().unwrap();
        let store = EncryptedFileStore::with_passphrase(dir.path().join("data.dat"), "k");
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));
    }

    #[test]
    fn file_does_not_contain_plaintext_secrets() {
        let dir = TempDir::new().unwrap();
        let store = EncryptedFileStore::with_passphrase(dir.path().join("data.dat"), "k");
        store.save(&sample()).unwrap();
        let raw = std::fs::read(store.path()).unwrap();
        let needle = b"hunter2";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.dat");
        EncryptedFileStore::with_passphrase(&path, "right").save(&sample()).unwrap();
        let err = EncryptedFileStore::with_passphrase(&path, "wrong").load().unwrap_err();
        assert!(matches!(err, ReplicError::Settings(_)));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = EncryptedFileStore::with_passphrase(dir.path().join("data.dat"), "k");
        std::fs::write(store.path(), b"short").unwrap();
        assert!(matches!(store.load(), Err(ReplicError::Settings(_))));
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = EncryptedFileStore::with_passphrase(dir.path().join("data.dat"), "k");
        store.save(&sample()).unwrap();
        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }
}
