//! Runtime plugin records and trust classification.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::config::ManagerConfig;
use crate::descriptor::{PluginDescriptor, PluginType};
use crate::signature::{SignatureInfo, SignatureState};
use crate::transport::BackendTransport;

/// Which configured root directory contains a plugin.
///
/// Derived once at load and never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustClass {
    Core,
    Bundled,
    External,
    Unknown,
}

impl TrustClass {
    /// Classify a plugin directory against the configured roots.
    ///
    /// Checks are applied core, bundled, external in order, so a directory
    /// that lies inside two roots due to misconfiguration resolves to the
    /// first match.
    pub fn classify(dir: &Path, cfg: &ManagerConfig) -> TrustClass {
        if dir.starts_with(&cfg.core_root) {
            TrustClass::Core
        } else if dir.starts_with(&cfg.bundled_root) {
            TrustClass::Bundled
        } else if dir.starts_with(&cfg.external_root) {
            TrustClass::External
        } else {
            TrustClass::Unknown
        }
    }
}

impl fmt::Display for TrustClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Bundled => write!(f, "bundled"),
            Self::External => write!(f, "external"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A loaded plugin as tracked by the registry.
///
/// Created by the loader on admission. Parent/child links are logical
/// references by plugin id; the registry remains the sole owner of records.
pub struct PluginRecord {
    /// The parsed descriptor.
    pub descriptor: PluginDescriptor,

    /// Absolute plugin directory.
    pub plugin_dir: PathBuf,

    /// Trust class derived from the containing root.
    pub class: TrustClass,

    /// Signature state as observed by the evaluator. Never mutated; the
    /// validator derives the effective state separately.
    pub signature: SignatureInfo,

    /// Signature state after validation, with parent inheritance applied.
    pub effective_signature: SignatureState,

    /// ID of the enclosing plugin, if this plugin is nested inside another
    /// plugin's directory.
    pub parent: Option<String>,

    /// IDs of plugins nested inside this plugin's directory.
    pub children: Vec<String>,

    /// Whether the supervisor owns this plugin's process lifecycle.
    pub managed: bool,

    pub(crate) transport: Option<Arc<dyn BackendTransport>>,
    pub(crate) logger: Span,
    decommissioned: AtomicBool,
}

impl PluginRecord {
    pub(crate) fn new(
        descriptor: PluginDescriptor,
        plugin_dir: PathBuf,
        class: TrustClass,
        signature: SignatureInfo,
    ) -> Self {
        let logger = tracing::info_span!("plugin", id = %descriptor.id);
        let effective_signature = signature.state;
        Self {
            descriptor,
            plugin_dir,
            class,
            signature,
            effective_signature,
            parent: None,
            children: Vec::new(),
            managed: true,
            transport: None,
            logger,
            decommissioned: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn plugin_type(&self) -> PluginType {
        self.descriptor.plugin_type
    }

    pub fn is_core(&self) -> bool {
        self.class == TrustClass::Core
    }

    pub fn is_external(&self) -> bool {
        self.class == TrustClass::External
    }

    pub fn is_renderer(&self) -> bool {
        self.descriptor.plugin_type == PluginType::Renderer
    }

    /// Whether the plugin declares a backend component.
    pub fn has_backend(&self) -> bool {
        self.descriptor.backend
    }

    /// The transport handle, present iff the plugin has a resolved backend.
    pub fn transport(&self) -> Option<&Arc<dyn BackendTransport>> {
        self.transport.as_ref()
    }

    /// The per-plugin logger span.
    pub fn logger(&self) -> &Span {
        &self.logger
    }

    /// Whether the backend process has exited. Plugins without a transport
    /// report false.
    pub fn exited(&self) -> bool {
        self.transport
            .as_ref()
            .map(|t| t.exited())
            .unwrap_or(false)
    }

    /// Mark the record as no longer runnable.
    ///
    /// One-way latch: hides the record from registry lookups and makes the
    /// monitor task exit on its next tick.
    pub fn decommission(&self) {
        self.decommissioned.store(true, Ordering::SeqCst);
    }

    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRecord")
            .field("id", &self.descriptor.id)
            .field("type", &self.descriptor.plugin_type)
            .field("dir", &self.plugin_dir)
            .field("class", &self.class)
            .field("signature", &self.signature)
            .field("effective_signature", &self.effective_signature)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("decommissioned", &self.is_decommissioned())
            .finish()
    }
}
