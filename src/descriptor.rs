//! Plugin descriptor model and reader.
//!
//! Every plugin directory carries a `plugin.json` descriptor declaring its
//! identity, type, and capabilities. Descriptors are immutable after load;
//! upgrades are modelled as uninstall + install + rescan.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("invalid plugin descriptor file path was provided")]
    InvalidPath,

    #[error("did not find valid type or id properties in plugin descriptor")]
    InvalidDescriptor,

    #[error("failed to read plugin descriptor: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse plugin descriptor: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The closed set of plugin types the host understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Datasource,
    Panel,
    App,
    Renderer,
}

impl PluginType {
    /// All known plugin types.
    pub const ALL: [PluginType; 4] = [
        PluginType::Datasource,
        PluginType::Panel,
        PluginType::App,
        PluginType::Renderer,
    ];
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Datasource => write!(f, "datasource"),
            Self::Panel => write!(f, "panel"),
            Self::App => write!(f, "app"),
            Self::Renderer => write!(f, "renderer"),
        }
    }
}

/// Descriptive metadata block of a descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginInfo {
    /// The plugin version.
    pub version: String,

    /// Human-readable description.
    pub description: String,

    /// Author or vendor name.
    pub author: String,
}

/// A dependency declared by a plugin descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDependency {
    /// ID of the required plugin.
    pub id: String,

    /// Version requirement.
    #[serde(default)]
    pub version: String,
}

/// The on-disk metadata record declaring a plugin's id, type, and
/// capabilities. Unknown fields are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin identifier.
    pub id: String,

    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: PluginType,

    /// Descriptive metadata.
    #[serde(default)]
    pub info: PluginInfo,

    /// Declared plugin dependencies.
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,

    /// Whether the plugin ships a backend process.
    #[serde(default)]
    pub backend: bool,

    /// Backend executable name hint, relative to the plugin directory.
    #[serde(default)]
    pub executable: Option<String>,

    /// Declared signature type, if any.
    #[serde(default)]
    pub signature_type: Option<String>,

    /// Declared signing organisation, if any.
    #[serde(default)]
    pub signature_org: Option<String>,
}

/// Read and validate a descriptor file.
///
/// The extension must be `json` (case-insensitive); anything else is an
/// `InvalidPath` and the file is never opened. A descriptor with an empty id
/// or a type outside the closed enumeration is an `InvalidDescriptor`.
pub fn read_descriptor(path: &Path) -> Result<PluginDescriptor, DescriptorError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        return Err(DescriptorError::InvalidPath);
    }

    let file = File::open(path)?;
    let descriptor: PluginDescriptor = match serde_json::from_reader(BufReader::new(file)) {
        Ok(descriptor) => descriptor,
        // An unknown `type` value is a policy rejection, not a parse failure
        Err(err) if err.is_data() => return Err(DescriptorError::InvalidDescriptor),
        Err(err) => return Err(DescriptorError::Parse(err)),
    };

    if descriptor.id.is_empty() {
        return Err(DescriptorError::InvalidDescriptor);
    }

    Ok(descriptor)
}
