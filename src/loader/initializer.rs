//! Prepares admitted records for execution.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PluginError;
use crate::plugin::PluginRecord;
use crate::transport::TransportFactory;

/// Resolves the backend transport for admitted plugin records.
///
/// Frontend-only plugins need no preparation. Core plugins may only run
/// in-process through a whitelisted factory registered by the host; all
/// other backends go through the default factory.
pub struct Initializer {
    default_factory: Option<Arc<dyn TransportFactory>>,
    core_factories: HashMap<String, Arc<dyn TransportFactory>>,
}

impl Initializer {
    pub fn new(
        default_factory: Option<Arc<dyn TransportFactory>>,
        core_factories: HashMap<String, Arc<dyn TransportFactory>>,
    ) -> Self {
        Self {
            default_factory,
            core_factories,
        }
    }

    /// Resolve and attach the record's transport.
    pub fn initialize(
        &self,
        record: &mut PluginRecord,
        factory_override: Option<&Arc<dyn TransportFactory>>,
    ) -> Result<(), PluginError> {
        if !record.has_backend() {
            debug!("Plugin {} has no backend, nothing to initialize", record.id());
            return Ok(());
        }

        let factory = match factory_override {
            Some(factory) => Some(factory),
            None if record.is_core() => self.core_factories.get(record.id()),
            None => self.default_factory.as_ref(),
        };

        match factory {
            Some(factory) => {
                let transport =
                    factory.create(&record.descriptor, record.class, &record.plugin_dir)?;
                record.transport = Some(transport);
                debug!("Resolved transport for plugin {}", record.id());
            }
            None => {
                warn!(
                    "No transport factory available for backend plugin {}",
                    record.id()
                );
            }
        }

        Ok(())
    }
}
