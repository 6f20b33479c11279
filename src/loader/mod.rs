//! Plugin loading orchestration.
//!
//! Runs the full admission pipeline: discover descriptors, read and
//! validate them, classify and evaluate signatures, link nested plugins to
//! their parents, apply signature policy, and resolve transports.

mod initializer;

pub use initializer::Initializer;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ManagerConfig;
use crate::descriptor::{read_descriptor, PluginDescriptor};
use crate::error::PluginError;
use crate::finder::Finder;
use crate::plugin::{PluginRecord, TrustClass};
use crate::signature::{self, SignatureError, SignatureValidator, UnsignedPluginCondition};
use crate::transport::TransportFactory;
use crate::MODULE_FILENAME;

pub struct Loader {
    cfg: Arc<ManagerConfig>,
    finder: Finder,
    initializer: Initializer,
    allow_unsigned_condition: Option<UnsignedPluginCondition>,

    // Per-load rejection map, replaced on every load_all call
    errors: Mutex<HashMap<String, SignatureError>>,
}

impl Loader {
    pub fn new(cfg: Arc<ManagerConfig>, initializer: Initializer) -> Self {
        Self {
            cfg,
            finder: Finder::new(),
            initializer,
            allow_unsigned_condition: None,
            errors: Mutex::new(HashMap::new()),
        }
    }

    /// Install a predicate that may admit unsigned plugins beyond the
    /// configured allowlist.
    pub fn with_unsigned_condition(mut self, condition: UnsignedPluginCondition) -> Self {
        self.allow_unsigned_condition = Some(condition);
        self
    }

    /// Load every admissible plugin under the given roots.
    ///
    /// Plugins whose ID is in `already_registered` are skipped. Signature
    /// rejections do not fail the call; they are collected per plugin id
    /// and exposed through [`Loader::errors`]. The order of the returned
    /// records is unspecified.
    pub async fn load_all(
        &self,
        roots: &[PathBuf],
        already_registered: &HashSet<String>,
    ) -> Result<Vec<Arc<PluginRecord>>, PluginError> {
        self.load_pipeline(roots, already_registered, None).await
    }

    /// Load the single plugin at `dir`, resolving its transport with the
    /// given factory. Used for whitelisted core plugins.
    pub async fn load_with_factory(
        &self,
        dir: &Path,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Arc<PluginRecord>, PluginError> {
        let records = self
            .load_pipeline(&[dir.to_path_buf()], &HashSet::new(), Some(&factory))
            .await?;

        records
            .into_iter()
            .next()
            .ok_or_else(|| PluginError::NothingToLoad(dir.to_path_buf()))
    }

    /// The rejection map of the most recent load, keyed by plugin id.
    pub fn errors(&self) -> HashMap<String, SignatureError> {
        self.errors.lock().clone()
    }

    async fn load_pipeline(
        &self,
        roots: &[PathBuf],
        already_registered: &HashSet<String>,
        factory_override: Option<&Arc<dyn TransportFactory>>,
    ) -> Result<Vec<Arc<PluginRecord>>, PluginError> {
        let descriptor_paths = self.finder.find(roots);

        // Map plugin directory to descriptor; a hard read error aborts the
        // whole load. The BTreeMap keeps every later step deterministic:
        // duplicate stripping is first-seen-wins in lexicographic path order.
        let mut descriptors: BTreeMap<PathBuf, PluginDescriptor> = BTreeMap::new();
        for path in descriptor_paths {
            debug!("Loading plugin descriptor: {:?}", path);
            let descriptor = read_descriptor(&path)?;
            let Some(dir) = path.parent() else {
                continue;
            };
            descriptors.insert(dir.to_path_buf(), descriptor);
        }

        self.strip_duplicates(&mut descriptors, already_registered);

        // Classify and evaluate signatures
        let keys = self.cfg.verifying_keys();
        let mut records: BTreeMap<PathBuf, PluginRecord> = descriptors
            .into_iter()
            .map(|(dir, descriptor)| {
                let class = TrustClass::classify(&dir, &self.cfg);
                let signature = signature::evaluate(&dir, &keys);
                let record = PluginRecord::new(descriptor, dir.clone(), class, signature);
                (dir, record)
            })
            .collect();

        link_nested_plugins(&mut records);

        // Apply signature policy; rejections are collected, not fatal
        let validator = SignatureValidator::new(&self.cfg, self.allow_unsigned_condition.as_ref());
        let effective_states: Vec<_> = records
            .iter()
            .map(|(dir, record)| {
                (
                    dir.clone(),
                    SignatureValidator::effective_state(record, &records),
                )
            })
            .collect();

        let mut errors = HashMap::new();
        let mut admitted = Vec::new();
        for (dir, effective) in effective_states {
            let Some(mut record) = records.remove(&dir) else {
                continue;
            };
            match validator.validate(&record, effective) {
                Ok(()) => {
                    record.effective_signature = effective;
                    self.check_module_file(&record);
                    admitted.push(record);
                }
                Err(err) => {
                    debug!(
                        "Skipping plugin {}: failed signature validation ({})",
                        record.id(),
                        err
                    );
                    errors.insert(record.id().to_string(), err);
                }
            }
        }

        if !errors.is_empty() {
            warn!("Some plugins failed to load: {} rejected", errors.len());
        }
        *self.errors.lock() = errors;

        // A rejected plugin must not leave dangling links behind
        prune_rejected_links(&mut admitted);

        for record in &mut admitted {
            self.initializer.initialize(record, factory_override)?;
        }

        Ok(admitted.into_iter().map(Arc::new).collect())
    }

    fn strip_duplicates(
        &self,
        descriptors: &mut BTreeMap<PathBuf, PluginDescriptor>,
        already_registered: &HashSet<String>,
    ) {
        let mut seen = HashSet::new();
        descriptors.retain(|dir, descriptor| {
            if seen.contains(&descriptor.id) {
                warn!(
                    "Skipping plugin at {:?} as it's a duplicate of {}",
                    dir, descriptor.id
                );
                return false;
            }
            if already_registered.contains(&descriptor.id) {
                debug!("Skipping plugin {} as it's already registered", descriptor.id);
                return false;
            }
            seen.insert(descriptor.id.clone());
            true
        });
    }

    fn check_module_file(&self, record: &PluginRecord) {
        if record.is_renderer() || record.is_core() {
            return;
        }
        let module = record.plugin_dir.join(MODULE_FILENAME);
        if !module.exists() {
            warn!(
                "Plugin {} is missing its frontend loader file at {:?}",
                record.id(),
                module
            );
        }
    }
}

/// Wire up parent/child links using filesystem containment: the nearest
/// ancestor directory that is itself a loaded plugin becomes the parent.
fn link_nested_plugins(records: &mut BTreeMap<PathBuf, PluginRecord>) {
    let links: Vec<(PathBuf, PathBuf)> = records
        .keys()
        .filter_map(|dir| {
            dir.ancestors()
                .skip(1)
                .find(|ancestor| records.contains_key(*ancestor))
                .map(|parent| (dir.clone(), parent.to_path_buf()))
        })
        .collect();

    for (child_dir, parent_dir) in links {
        let Some(parent_id) = records.get(&parent_dir).map(|r| r.id().to_string()) else {
            continue;
        };
        let Some(child) = records.get_mut(&child_dir) else {
            continue;
        };
        let child_id = child.id().to_string();
        child.parent = Some(parent_id);
        if let Some(parent) = records.get_mut(&parent_dir) {
            parent.children.push(child_id);
        }
    }
}

/// Drop links that point at records which did not survive validation, so
/// every admitted child's parent is itself admitted.
fn prune_rejected_links(admitted: &mut [PluginRecord]) {
    let admitted_ids: HashSet<String> =
        admitted.iter().map(|r| r.id().to_string()).collect();

    for record in admitted {
        let parent_rejected = record
            .parent
            .as_ref()
            .is_some_and(|parent| !admitted_ids.contains(parent));
        if parent_rejected {
            record.parent = None;
        }
        record.children.retain(|child| admitted_ids.contains(child));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureInfo;
    use std::fs;

    fn write_plugin(dir: &Path, id: &str, plugin_type: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(crate::DESCRIPTOR_FILENAME),
            format!(r#"{{"id": "{}", "type": "{}"}}"#, id, plugin_type),
        )
        .unwrap();
    }

    fn loader_for(cfg: ManagerConfig) -> Loader {
        Loader::new(Arc::new(cfg), Initializer::new(None, HashMap::new()))
    }

    #[tokio::test]
    async fn test_load_all_admits_core_plugins() {
        let base = tempfile::tempdir().unwrap();
        let cfg = ManagerConfig {
            core_root: base.path().join("core"),
            bundled_root: base.path().join("bundled"),
            external_root: base.path().join("external"),
            ..Default::default()
        };
        write_plugin(&cfg.core_root.join("foo"), "foo", "datasource");

        let loader = loader_for(cfg.clone());
        let loaded = loader
            .load_all(&[cfg.core_root.clone()], &HashSet::new())
            .await
            .unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].class, TrustClass::Core);
        assert!(loader.errors().is_empty());
    }

    #[tokio::test]
    async fn test_already_registered_plugins_are_skipped() {
        let base = tempfile::tempdir().unwrap();
        let cfg = ManagerConfig {
            core_root: base.path().join("core"),
            dev_mode: true,
            ..Default::default()
        };
        write_plugin(&cfg.core_root.join("foo"), "foo", "datasource");
        write_plugin(&cfg.core_root.join("bar"), "bar", "panel");

        let loader = loader_for(cfg.clone());
        let registered: HashSet<String> = ["foo".to_string()].into_iter().collect();
        let loaded = loader
            .load_all(&[cfg.core_root.clone()], &registered)
            .await
            .unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id(), "bar");
    }

    #[tokio::test]
    async fn test_duplicate_ids_keep_first_by_path_order() {
        let base = tempfile::tempdir().unwrap();
        let cfg = ManagerConfig {
            core_root: base.path().join("core"),
            ..Default::default()
        };
        write_plugin(&cfg.core_root.join("a-first"), "foo", "datasource");
        write_plugin(&cfg.core_root.join("b-second"), "foo", "datasource");

        let loader = loader_for(cfg.clone());
        let loaded = loader
            .load_all(&[cfg.core_root.clone()], &HashSet::new())
            .await
            .unwrap();

        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].plugin_dir.ends_with("a-first"));
        // A duplicate is a warning, not an error
        assert!(loader.errors().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_descriptor_aborts_the_load() {
        let base = tempfile::tempdir().unwrap();
        let cfg = ManagerConfig {
            core_root: base.path().join("core"),
            ..Default::default()
        };
        let dir = cfg.core_root.join("broken");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(crate::DESCRIPTOR_FILENAME),
            r#"{"id": "", "type": "datasource"}"#,
        )
        .unwrap();

        let loader = loader_for(cfg.clone());
        let result = loader.load_all(&[cfg.core_root.clone()], &HashSet::new()).await;
        assert!(matches!(result, Err(PluginError::Descriptor(_))));
    }

    #[tokio::test]
    async fn test_nested_plugins_are_linked() {
        let base = tempfile::tempdir().unwrap();
        let cfg = ManagerConfig {
            core_root: base.path().join("core"),
            ..Default::default()
        };
        write_plugin(&cfg.core_root.join("parent"), "parent", "app");
        write_plugin(
            &cfg.core_root.join("parent/datasources/nested"),
            "nested",
            "datasource",
        );

        let loader = loader_for(cfg.clone());
        let loaded = loader
            .load_all(&[cfg.core_root.clone()], &HashSet::new())
            .await
            .unwrap();

        let parent = loaded.iter().find(|r| r.id() == "parent").unwrap();
        let nested = loaded.iter().find(|r| r.id() == "nested").unwrap();
        assert_eq!(nested.parent.as_deref(), Some("parent"));
        assert_eq!(parent.children, vec!["nested".to_string()]);
        assert!(parent.parent.is_none());
    }

    #[test]
    fn test_prune_rejected_links() {
        let make = |id: &str, dir: &str| {
            let descriptor =
                serde_json::from_str(&format!(r#"{{"id": "{}", "type": "app"}}"#, id)).unwrap();
            PluginRecord::new(
                descriptor,
                PathBuf::from(dir),
                TrustClass::External,
                SignatureInfo::unsigned(),
            )
        };

        let mut parent = make("parent", "/e/parent");
        parent.children = vec!["gone".to_string(), "kept".to_string()];
        let mut kept = make("kept", "/e/parent/kept");
        kept.parent = Some("parent".to_string());
        let mut orphan = make("orphan", "/e/rejected/orphan");
        orphan.parent = Some("rejected".to_string());

        let mut admitted = vec![parent, kept, orphan];
        prune_rejected_links(&mut admitted);

        assert_eq!(admitted[0].children, vec!["kept".to_string()]);
        assert_eq!(admitted[1].parent.as_deref(), Some("parent"));
        assert!(admitted[2].parent.is_none());
    }
}
