//! Install/uninstall facade.
//!
//! The archive installer that downloads and extracts plugin archives is an
//! external collaborator; the facade serialises its work with the loader
//! and the supervisor so the registry never sees interleaved mutations.

use std::path::{Component, Path};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::PluginError;
use crate::manager::PluginManager;

/// Update availability details for a plugin version.
#[derive(Debug, Clone)]
pub struct UpdateInfo {
    /// Where to fetch the version's archive from.
    pub archive_url: String,
}

/// Downloads, extracts and removes plugin archives.
#[async_trait]
pub trait PluginInstaller: Send + Sync {
    /// Fetch and extract a plugin version into `dest_dir`.
    async fn install(
        &self,
        token: CancellationToken,
        id: &str,
        version: &str,
        dest_dir: &Path,
        archive_url: Option<&str>,
    ) -> Result<(), PluginError>;

    /// Remove an installed plugin directory.
    async fn uninstall(&self, token: CancellationToken, dir: &Path) -> Result<(), PluginError>;

    /// Confirm an upgrade is possible and resolve its archive URL.
    async fn get_update_info(
        &self,
        token: CancellationToken,
        id: &str,
        version: &str,
    ) -> Result<UpdateInfo, PluginError>;
}

impl PluginManager {
    /// Install (or upgrade to) the given plugin version and start it.
    pub async fn install(
        &self,
        token: CancellationToken,
        id: &str,
        version: &str,
    ) -> Result<(), PluginError> {
        let _guard = self.install_lock.lock().await;

        let mut archive_url = None;
        if let Some(existing) = self.registry.plugin(id) {
            if !existing.is_external() {
                return Err(PluginError::InstallCorePlugin(id.to_string()));
            }
            if existing.descriptor.info.version == version {
                return Err(PluginError::DuplicatePlugin {
                    id: id.to_string(),
                    version: version.to_string(),
                    existing_dir: existing.plugin_dir.clone(),
                });
            }

            // Confirm upgrading is possible before removing anything
            let update = self
                .installer
                .get_update_info(token.clone(), id, version)
                .await?;
            archive_url = Some(update.archive_url);

            self.uninstall_inner(token.clone(), id).await?;
        }

        info!("Installing plugin {} version {}", id, version);
        self.installer
            .install(
                token.clone(),
                id,
                version,
                &self.cfg.external_root,
                archive_url.as_deref(),
            )
            .await?;

        let external_root = self.cfg.external_root.clone();
        self.load_and_start(token, &external_root).await
    }

    /// Stop, unregister and remove an externally installed plugin.
    pub async fn uninstall(&self, token: CancellationToken, id: &str) -> Result<(), PluginError> {
        let _guard = self.install_lock.lock().await;
        self.uninstall_inner(token, id).await
    }

    async fn uninstall_inner(
        &self,
        token: CancellationToken,
        id: &str,
    ) -> Result<(), PluginError> {
        let plugin = self
            .registry
            .plugin(id)
            .ok_or_else(|| PluginError::NotInstalled(id.to_string()))?;

        if !plugin.is_external() {
            return Err(PluginError::UninstallCorePlugin(id.to_string()));
        }

        // Only remove directories that really live under the external root;
        // a descriptor-crafted path must not be able to escape it
        let escapes = !plugin.plugin_dir.starts_with(&self.cfg.external_root)
            || plugin
                .plugin_dir
                .components()
                .any(|component| matches!(component, Component::ParentDir));
        if escapes {
            return Err(PluginError::UninstallOutsideOfPluginDir {
                id: id.to_string(),
                dir: plugin.plugin_dir.clone(),
            });
        }

        self.unregister_and_stop(token.clone(), id).await?;

        info!("Uninstalling plugin {}", id);
        self.installer.uninstall(token, &plugin.plugin_dir).await
    }
}
