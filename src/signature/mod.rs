//! Plugin signature states and policy.
//!
//! The evaluator derives a signature state from a plugin directory's
//! manifest; the validator applies admission policy to that state.

mod manifest;
mod validator;

pub use manifest::{evaluate, HashAlgorithm, ManifestBody, SignatureManifest};
pub use validator::{SignatureValidator, UnsignedPluginCondition};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signature policy rejections, collected per plugin id during a load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("plugin '{0}' is unsigned")]
    Missing(String),

    #[error("plugin '{0}' has an invalid signature")]
    Invalid(String),

    #[error("plugin '{0}' has a modified signature")]
    Modified(String),
}

impl SignatureError {
    /// The plugin id this rejection applies to.
    pub fn plugin_id(&self) -> &str {
        match self {
            Self::Missing(id) | Self::Invalid(id) | Self::Modified(id) => id,
        }
    }
}

/// The result of evaluating a plugin directory against its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureState {
    /// Manifest present, signature verified, every file matched.
    Valid,

    /// Manifest present but unparseable, or its signature did not verify.
    Invalid,

    /// At least one file did not match the manifest.
    Modified,

    /// No manifest present.
    Unsigned,

    /// Signed by the reserved internal identity; trusted without hash checks.
    Internal,
}

impl fmt::Display for SignatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Invalid => write!(f, "invalid"),
            Self::Modified => write!(f, "modified"),
            Self::Unsigned => write!(f, "unsigned"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// The level of signature a plugin carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureType {
    Community,
    Commercial,
    Internal,
}

/// Signature state together with the manifest's declared type and signing
/// organisation, passed through unchanged from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub state: SignatureState,
    pub signature_type: Option<SignatureType>,
    pub signing_org: Option<String>,
}

impl SignatureInfo {
    pub fn unsigned() -> Self {
        Self {
            state: SignatureState::Unsigned,
            signature_type: None,
            signing_org: None,
        }
    }

    pub fn invalid() -> Self {
        Self {
            state: SignatureState::Invalid,
            signature_type: None,
            signing_org: None,
        }
    }
}
