//! Signature manifest parsing and state evaluation.
//!
//! A signed plugin carries a `MANIFEST.json` listing every file with its
//! sha256 digest, the signing identity and organisation, and an ed25519
//! signature over the canonical serialization of the manifest body.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{SignatureInfo, SignatureState, SignatureType};
use crate::{INTERNAL_SIGNING_IDENTITY, MANIFEST_FILENAME};

/// Hash algorithms a manifest may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
}

/// The signed portion of a manifest.
///
/// Field order and the sorted file map make the serialization canonical, so
/// the signature is stable across parse/serialize round trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestBody {
    /// Hash algorithm used for the file digests.
    pub alg: HashAlgorithm,

    /// Signing identity.
    pub signed_by: String,

    /// Signing organisation.
    pub org: String,

    /// Signature level.
    pub signature_type: SignatureType,

    /// Relative file path to lowercase hex digest.
    pub files: BTreeMap<String, String>,
}

/// The on-disk manifest file: a body plus a detached signature over the
/// body's canonical JSON serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureManifest {
    pub manifest: ManifestBody,

    /// Base64-encoded ed25519 signature.
    pub signature: String,
}

impl SignatureManifest {
    /// Verify the manifest signature against a set of trusted keys.
    pub fn verify(&self, keys: &[VerifyingKey]) -> bool {
        let payload = match serde_json::to_vec(&self.manifest) {
            Ok(payload) => payload,
            Err(_) => return false,
        };
        let signature_bytes = match BASE64_STANDARD.decode(&self.signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let signature = match Signature::from_slice(&signature_bytes) {
            Ok(signature) => signature,
            Err(_) => return false,
        };

        keys.iter()
            .any(|key| key.verify(&payload, &signature).is_ok())
    }
}

/// Compute the signature state for a plugin directory.
pub fn evaluate(plugin_dir: &Path, keys: &[VerifyingKey]) -> SignatureInfo {
    let manifest_path = plugin_dir.join(MANIFEST_FILENAME);
    if !manifest_path.exists() {
        debug!("Plugin has no signature manifest: {:?}", plugin_dir);
        return SignatureInfo::unsigned();
    }

    let content = match fs::read_to_string(&manifest_path) {
        Ok(content) => content,
        Err(err) => {
            warn!("Failed to read manifest {:?}: {}", manifest_path, err);
            return SignatureInfo::invalid();
        }
    };
    let manifest: SignatureManifest = match serde_json::from_str(&content) {
        Ok(manifest) => manifest,
        Err(err) => {
            warn!("Failed to parse manifest {:?}: {}", manifest_path, err);
            return SignatureInfo::invalid();
        }
    };

    let info = |state| SignatureInfo {
        state,
        signature_type: Some(manifest.manifest.signature_type),
        signing_org: Some(manifest.manifest.org.clone()),
    };

    // First-party plugins shipped with the host are trusted without hash
    // checks
    if manifest.manifest.signed_by == INTERNAL_SIGNING_IDENTITY {
        return info(SignatureState::Internal);
    }

    if !manifest.verify(keys) {
        warn!("Manifest signature did not verify: {:?}", manifest_path);
        return info(SignatureState::Invalid);
    }

    // Every listed file must match its digest byte-for-byte
    for (relative_path, expected) in &manifest.manifest.files {
        let file_path = plugin_dir.join(relative_path);
        let bytes = match fs::read(&file_path) {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!("Manifest lists missing file: {:?}", file_path);
                return info(SignatureState::Modified);
            }
        };
        let digest = format!("{:x}", Sha256::digest(&bytes));
        if &digest != expected {
            debug!("File digest mismatch: {:?}", file_path);
            return info(SignatureState::Modified);
        }
    }

    // Every file on disk must be listed, apart from the manifest itself and
    // ignored entries
    for relative_path in list_files(plugin_dir) {
        let name = relative_path.to_string_lossy().replace('\\', "/");
        if !manifest.manifest.files.contains_key(&name) {
            debug!("File not listed in manifest: {:?}", relative_path);
            return info(SignatureState::Modified);
        }
    }

    info(SignatureState::Valid)
}

/// Collect the relative paths of all files under a plugin directory,
/// skipping the manifest itself and dotfiles.
fn list_files(plugin_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![plugin_dir.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to read directory {:?}: {}", dir, err);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let ignored = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name == MANIFEST_FILENAME || name.starts_with('.'))
                .unwrap_or(true);
            if ignored {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(relative) = path.strip_prefix(plugin_dir) {
                files.push(relative.to_path_buf());
            }
        }
    }

    files
}
