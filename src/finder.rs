//! Descriptor discovery.
//!
//! Walks the configured plugin roots and yields descriptor file paths.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::DESCRIPTOR_FILENAME;

/// Locates plugin descriptor files beneath a set of root directories.
#[derive(Debug, Default)]
pub struct Finder;

impl Finder {
    pub fn new() -> Self {
        Self
    }

    /// Walk each root recursively and collect descriptor paths.
    ///
    /// Directory symlinks are followed; a visited set of canonical paths
    /// keeps cycles safe. A root that does not exist yields nothing, and IO
    /// errors on individual subdirectories are logged and skipped. The
    /// result is sorted so discovery order is deterministic.
    pub fn find(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();
        let mut visited = HashSet::new();

        for root in roots {
            if !root.exists() {
                debug!("Plugin root does not exist, skipping: {:?}", root);
                continue;
            }
            self.walk(root, &mut visited, &mut found);
        }

        found.into_iter().collect()
    }

    fn walk(&self, dir: &Path, visited: &mut HashSet<PathBuf>, found: &mut BTreeSet<PathBuf>) {
        // Canonical path tracking makes symlink cycles terminate
        let canonical = match fs::canonicalize(dir) {
            Ok(canonical) => canonical,
            Err(err) => {
                warn!("Failed to resolve plugin directory {:?}: {}", dir, err);
                return;
            }
        };
        if !visited.insert(canonical) {
            debug!("Already visited directory, skipping: {:?}", dir);
            return;
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to read plugin directory {:?}: {}", dir, err);
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to read directory entry in {:?}: {}", dir, err);
                    continue;
                }
            };
            let path = entry.path();

            // `is_dir` resolves symlinks, so linked directories are walked too
            if path.is_dir() {
                self.walk(&path, visited, found);
            } else if path
                .file_name()
                .map(|name| name == DESCRIPTOR_FILENAME)
                .unwrap_or(false)
            {
                found.insert(path);
            }
        }
    }
}
