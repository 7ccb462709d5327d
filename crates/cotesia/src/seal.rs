//! Flight log sealing.
//!
//! The session store decides that a flight log is sensitive and hands
//! its bytes to a sealer; whether the bytes actually get encrypted is a
//! capability resolved once at store construction, from the presence of
//! a locally-stored symmetric key file. The store's own logic never
//! branches on key availability.

use std::fs;
use std::path::Path;

use fernet::Fernet;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// The outcome of sealing a log: the bytes to persist and whether they
/// were encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedLog {
    /// Bytes to write to disk.
    pub bytes: Vec<u8>,
    /// Whether `bytes` is ciphertext.
    pub encrypted: bool,
}

/// Encrypt-or-passthrough collaborator for flight logs.
pub trait LogSealer: Send + Sync + std::fmt::Debug {
    /// Seal the given plaintext.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    fn seal(&self, plaintext: &[u8]) -> Result<SealedLog>;

    /// Whether this sealer produces ciphertext.
    fn encrypting(&self) -> bool;
}

/// Sealer used when no key is configured: bytes pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl LogSealer for Passthrough {
    fn seal(&self, plaintext: &[u8]) -> Result<SealedLog> {
        Ok(SealedLog {
            bytes: plaintext.to_vec(),
            encrypted: false,
        })
    }

    fn encrypting(&self) -> bool {
        false
    }
}

/// Fernet-based sealer keyed by a local key file.
pub struct FernetSealer {
    fernet: Fernet,
}

impl std::fmt::Debug for FernetSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FernetSealer").finish_non_exhaustive()
    }
}

impl FernetSealer {
    /// Build a sealer from a base64 key string.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid Fernet key.
    pub fn new(key: &str) -> Result<Self> {
        let fernet =
            Fernet::new(key.trim()).ok_or_else(|| Error::seal("invalid Fernet key"))?;
        Ok(Self { fernet })
    }

    /// Build a sealer from a key file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a
    /// valid key.
    pub fn from_key_file(path: &Path) -> Result<Self> {
        let key = fs::read_to_string(path)
            .map_err(|e| Error::seal(format!("cannot read key file {}: {e}", path.display())))?;
        Self::new(&key)
    }
}

impl LogSealer for FernetSealer {
    fn seal(&self, plaintext: &[u8]) -> Result<SealedLog> {
        let token = self.fernet.encrypt(plaintext);
        Ok(SealedLog {
            bytes: token.into_bytes(),
            encrypted: true,
        })
    }

    fn encrypting(&self) -> bool {
        true
    }
}

/// Resolve the sealing capability from an optional key file.
///
/// A present, valid key file yields a [`FernetSealer`]; anything else
/// falls back to [`Passthrough`] with a warning, and logs are persisted
/// in plaintext marked as such.
#[must_use]
pub fn resolve(key_path: &Path) -> Box<dyn LogSealer> {
    if !key_path.exists() {
        warn!(
            "log key file {} not found; flight logs will be stored in plaintext",
            key_path.display()
        );
        return Box::new(Passthrough);
    }

    match FernetSealer::from_key_file(key_path) {
        Ok(sealer) => {
            info!("flight log encryption enabled ({})", key_path.display());
            Box::new(sealer)
        }
        Err(e) => {
            warn!("log key file unusable ({e}); flight logs will be stored in plaintext");
            Box::new(Passthrough)
        }
    }
}

/// Decrypt a sealed flight log into `output`.
///
/// Counterpart of the sealing performed at flight finalization, used by
/// the `decrypt` CLI subcommand.
///
/// # Errors
///
/// Returns an error if the key or log cannot be read, or if the token
/// does not decrypt under the given key.
pub fn unseal_file(log: &Path, key_file: &Path, output: &Path) -> Result<()> {
    let key = fs::read_to_string(key_file)
        .map_err(|e| Error::seal(format!("cannot read key file {}: {e}", key_file.display())))?;
    let fernet =
        Fernet::new(key.trim()).ok_or_else(|| Error::seal("invalid Fernet key"))?;

    let token = fs::read_to_string(log)
        .map_err(|e| Error::seal(format!("cannot read log {}: {e}", log.display())))?;
    let plaintext = fernet
        .decrypt(token.trim())
        .map_err(|e| Error::seal(format!("decryption failed: {e}")))?;

    fs::write(output, plaintext)?;
    Ok(())
}
