//! In-memory plugin registry.
//!
//! Maps plugin IDs to records. Mutations take the exclusive lock, reads the
//! shared lock. Decommissioned records are invisible to all public reads
//! until they are unregistered.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::descriptor::PluginType;
use crate::error::PluginError;
use crate::plugin::PluginRecord;

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<PluginRecord>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record. Uniqueness by ID is enforced.
    pub fn register(&self, record: Arc<PluginRecord>) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write();
        let id = record.id().to_string();
        if plugins.contains_key(&id) {
            return Err(PluginError::AlreadyRegistered(id));
        }
        plugins.insert(id.clone(), record);
        debug!("Plugin registered: {}", id);
        Ok(())
    }

    /// Remove a record, returning it if present.
    pub fn unregister(&self, id: &str) -> Option<Arc<PluginRecord>> {
        let removed = self.plugins.write().remove(id);
        if removed.is_some() {
            debug!("Plugin unregistered: {}", id);
        }
        removed
    }

    /// Swap the record stored under an existing ID.
    pub fn replace(&self, id: &str, record: Arc<PluginRecord>) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write();
        if !plugins.contains_key(id) {
            return Err(PluginError::NotRegistered(id.to_string()));
        }
        plugins.insert(id.to_string(), record);
        debug!("Plugin replaced: {}", id);
        Ok(())
    }

    /// Look up a record by ID. Decommissioned records are treated as absent.
    pub fn plugin(&self, id: &str) -> Option<Arc<PluginRecord>> {
        let plugins = self.plugins.read();
        plugins
            .get(id)
            .filter(|record| !record.is_decommissioned())
            .cloned()
    }

    /// Look up a record by ID and type.
    pub fn plugin_by_type(&self, id: &str, plugin_type: PluginType) -> Option<Arc<PluginRecord>> {
        self.plugin(id)
            .filter(|record| record.plugin_type() == plugin_type)
    }

    /// All non-decommissioned records of the given types. No types means all
    /// types. The returned order carries no meaning.
    pub fn plugins(&self, types: &[PluginType]) -> Vec<Arc<PluginRecord>> {
        let requested: HashSet<PluginType> = if types.is_empty() {
            PluginType::ALL.into_iter().collect()
        } else {
            types.iter().copied().collect()
        };

        self.plugins
            .read()
            .values()
            .filter(|record| {
                !record.is_decommissioned() && requested.contains(&record.plugin_type())
            })
            .cloned()
            .collect()
    }

    /// The registered renderer plugin, if any.
    pub fn renderer(&self) -> Option<Arc<PluginRecord>> {
        self.plugins
            .read()
            .values()
            .find(|record| record.is_renderer() && !record.is_decommissioned())
            .cloned()
    }

    /// IDs of every registered record, including decommissioned ones. Used
    /// to skip already-installed plugins during a rescan.
    pub fn registered_ids(&self) -> HashSet<String> {
        self.plugins.read().keys().cloned().collect()
    }

    /// Every record, including decommissioned ones. Shutdown must stop
    /// processes that lookups no longer see.
    pub(crate) fn all(&self) -> Vec<Arc<PluginRecord>> {
        self.plugins.read().values().cloned().collect()
    }
}
