use std::path::PathBuf;
use thiserror::Error;

use crate::descriptor::DescriptorError;
use crate::signature::SignatureError;
use crate::transport::TransportError;

/// Errors surfaced by the manager, registry and installer facade.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin {0} is already registered")]
    AlreadyRegistered(String),

    #[error("plugin {0} is not registered")]
    NotRegistered(String),

    #[error("plugin {0} is not installed")]
    NotInstalled(String),

    #[error("cannot install a core plugin: {0}")]
    InstallCorePlugin(String),

    #[error("cannot uninstall a core plugin: {0}")]
    UninstallCorePlugin(String),

    #[error("cannot uninstall plugin {id}: directory {dir:?} is outside of the external plugin directory")]
    UninstallOutsideOfPluginDir { id: String, dir: PathBuf },

    #[error("plugin {id} version {version} is already installed in {existing_dir:?}")]
    DuplicatePlugin {
        id: String,
        version: String,
        existing_dir: PathBuf,
    },

    #[error("could not load plugin at path {0:?}")]
    NothingToLoad(PathBuf),

    #[error("received empty resource response")]
    EmptyResourceResponse,

    #[error("failed to query data for plugin {id}: {source}")]
    QueryFailed { id: String, source: TransportError },

    #[error("health check failed for plugin {id}: {source}")]
    HealthCheckFailed { id: String, source: TransportError },

    #[error("failed to call resource on plugin {id}: {source}")]
    ResourceCallFailed { id: String, source: TransportError },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("installer error: {0}")]
    Installer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;
