//! Main plugin manager: registration, supervision and shutdown.
//!
//! The manager owns the registry and the loader, starts managed backend
//! plugins, and keeps them running until shutdown or decommission. Request
//! proxying lives in [`crate::proxy`], the install/uninstall facade in
//! [`crate::installer`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ManagerConfig;
use crate::error::PluginError;
use crate::installer::PluginInstaller;
use crate::loader::Loader;
use crate::plugin::PluginRecord;
use crate::registry::PluginRegistry;
use crate::signature::SignatureError;
use crate::transport::{RequestValidator, TransportFactory};

pub struct PluginManager {
    pub(crate) cfg: Arc<ManagerConfig>,
    pub(crate) registry: PluginRegistry,
    pub(crate) loader: Loader,
    pub(crate) request_validator: Arc<dyn RequestValidator>,
    pub(crate) installer: Arc<dyn PluginInstaller>,

    // Serialises install/uninstall/rescan so concurrent facade calls cannot
    // interleave registry mutations
    pub(crate) install_lock: tokio::sync::Mutex<()>,
}

impl PluginManager {
    pub fn new(
        cfg: Arc<ManagerConfig>,
        loader: Loader,
        request_validator: Arc<dyn RequestValidator>,
        installer: Arc<dyn PluginInstaller>,
    ) -> Self {
        Self {
            cfg,
            registry: PluginRegistry::new(),
            loader,
            request_validator,
            installer,
            install_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load and start plugins from every configured root, core first.
    pub async fn bootstrap(&self, token: CancellationToken) -> Result<(), PluginError> {
        let roots = [
            self.cfg.core_root.clone(),
            self.cfg.bundled_root.clone(),
            self.cfg.external_root.clone(),
        ];
        for root in roots {
            self.load_and_start(token.clone(), &root).await?;
        }
        Ok(())
    }

    /// Park until the token fires, then stop every plugin before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        shutdown.cancelled().await;
        info!("Shutting down plugin manager");
        self.stop_all(CancellationToken::new()).await;
    }

    /// Load admissible plugins under `root` and register-and-start each.
    pub(crate) async fn load_and_start(
        &self,
        token: CancellationToken,
        root: &Path,
    ) -> Result<(), PluginError> {
        let loaded = self
            .loader
            .load_all(&[root.to_path_buf()], &self.registry.registered_ids())
            .await?;

        for record in loaded {
            self.register_and_start(token.clone(), record).await?;
        }
        Ok(())
    }

    /// Load a whitelisted core plugin with the given factory and start it.
    pub async fn register_core_plugin(
        &self,
        token: CancellationToken,
        plugin_dir: &Path,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<(), PluginError> {
        let record = self.loader.load_with_factory(plugin_dir, factory).await?;
        self.register_and_start(token, record).await
    }

    /// Insert a record into the registry and start its backend.
    pub async fn register_and_start(
        &self,
        token: CancellationToken,
        record: Arc<PluginRecord>,
    ) -> Result<(), PluginError> {
        self.registry.register(record.clone())?;
        self.start(token, record).await;
        Ok(())
    }

    /// Start a managed backend plugin and spawn its monitor task.
    ///
    /// A start failure is logged, not propagated; the monitor retries on
    /// its next tick.
    async fn start(&self, token: CancellationToken, record: Arc<PluginRecord>) {
        if !record.managed || !record.has_backend() {
            return;
        }
        let Some(transport) = record.transport().cloned() else {
            return;
        };

        record.logger().in_scope(|| debug!("Starting plugin"));
        if let Err(err) = transport.start(token.clone()).await {
            record
                .logger()
                .in_scope(|| error!("Failed to start plugin: {}", err));
        }

        tokio::spawn(monitor_plugin(token, record));
    }

    /// Stop every plugin concurrently and await the whole group.
    pub async fn stop_all(&self, token: CancellationToken) {
        let stops = self.registry.all().into_iter().map(|record| {
            let token = token.clone();
            async move {
                let Some(transport) = record.transport().cloned() else {
                    return;
                };
                record.logger().in_scope(|| debug!("Stopping plugin"));
                if let Err(err) = transport.stop(token).await {
                    record
                        .logger()
                        .in_scope(|| error!("Failed to stop plugin: {}", err));
                } else {
                    record.logger().in_scope(|| debug!("Plugin stopped"));
                }
            }
        });
        join_all(stops).await;
    }

    /// Decommission a plugin, stop its backend, and drop it from the
    /// registry.
    pub async fn unregister_and_stop(
        &self,
        token: CancellationToken,
        id: &str,
    ) -> Result<(), PluginError> {
        let record = self
            .registry
            .plugin(id)
            .ok_or_else(|| PluginError::NotRegistered(id.to_string()))?;

        debug!("Unregistering plugin: {}", id);
        record.decommission();

        if let Some(transport) = record.transport() {
            transport.stop(token).await?;
        }

        self.registry.unregister(id);
        debug!("Plugin unregistered: {}", id);
        Ok(())
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.registry.plugin(id).is_some()
    }

    pub fn plugin(&self, id: &str) -> Option<Arc<PluginRecord>> {
        self.registry.plugin(id)
    }

    pub fn plugin_by_type(
        &self,
        id: &str,
        plugin_type: crate::descriptor::PluginType,
    ) -> Option<Arc<PluginRecord>> {
        self.registry.plugin_by_type(id, plugin_type)
    }

    pub fn plugins(&self, types: &[crate::descriptor::PluginType]) -> Vec<Arc<PluginRecord>> {
        self.registry.plugins(types)
    }

    pub fn renderer(&self) -> Option<Arc<PluginRecord>> {
        self.registry.renderer()
    }

    /// Signature rejections from the most recent load, keyed by plugin id.
    pub fn load_errors(&self) -> HashMap<String, SignatureError> {
        self.loader.errors()
    }

    /// The configured external plugin root.
    pub fn external_root(&self) -> &PathBuf {
        &self.cfg.external_root
    }
}

/// Per-plugin monitor: restart the backend process when it exits.
///
/// Ticks once per second. Exits cleanly on token cancellation or when the
/// record is decommissioned; restart failures are logged and retried on the
/// next tick.
async fn monitor_plugin(token: CancellationToken, record: Arc<PluginRecord>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of an interval completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                if record.is_decommissioned() {
                    record.logger().in_scope(|| debug!("Plugin decommissioned"));
                    return;
                }
                let Some(transport) = record.transport() else {
                    return;
                };
                if !transport.exited() {
                    continue;
                }

                record.logger().in_scope(|| debug!("Restarting plugin"));
                match transport.start(token.clone()).await {
                    Ok(()) => record.logger().in_scope(|| debug!("Plugin restarted")),
                    Err(err) => record
                        .logger()
                        .in_scope(|| error!("Failed to restart plugin: {}", err)),
                }
            }
        }
    }
}
