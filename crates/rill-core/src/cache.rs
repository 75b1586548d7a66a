//! Persisted build stores.
//!
//! The output cache maps each source to the artifacts a previous build
//! wrote for it, so `clean` can delete precisely those files. Both the
//! output map and the dependency graph persist as format-versioned JSON
//! under the tool directory; a missing store is a cold start, a corrupt or
//! incompatible one is discarded rather than failing the build.

use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::deps::DependencyTracker;
use crate::{fsx, Error, Result};

/// Bumped when the on-disk layout changes; older stores are discarded.
pub const STORE_FORMAT_VERSION: u32 = 1;

const OUTPUT_MAP_FILE: &str = "output-map.json";
const DEP_GRAPH_FILE: &str = "dep-graph.json";

#[derive(Serialize, Deserialize)]
struct Store<T> {
    format_version: u32,
    data: T,
}

/// Maps each source path to the outputs a build wrote for it.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OutputCache {
    outputs: FxHashMap<PathBuf, FxHashSet<PathBuf>>,
}

impl OutputCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that building `src` wrote `output`.
    pub fn record(&mut self, src: &Path, output: &Path) {
        self.outputs
            .entry(src.to_path_buf())
            .or_default()
            .insert(output.to_path_buf());
    }

    pub fn outputs_of(&self, src: &Path) -> Option<&FxHashSet<PathBuf>> {
        self.outputs.get(src)
    }

    /// Every tracked output, sorted for deterministic deletion order.
    pub fn all_outputs(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = self.outputs.values().flatten().cloned().collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn remove_source(&mut self, src: &Path) {
        self.outputs.remove(src);
    }

    pub fn clear(&mut self) {
        self.outputs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Load the output map from `dir`. `Ok(None)` means cold start.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        load_store(&dir.join(OUTPUT_MAP_FILE))
    }

    /// Persist the output map under `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        save_store(&dir.join(OUTPUT_MAP_FILE), self)
    }
}

impl DependencyTracker {
    /// Load the dependency graph from `dir`. `Ok(None)` means cold start.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        load_store(&dir.join(DEP_GRAPH_FILE))
    }

    /// Persist the dependency graph under `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        save_store(&dir.join(DEP_GRAPH_FILE), self)
    }
}

fn load_store<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fsx::read_file_sync(path)?;
    let store: Store<T> = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Cache(format!("corrupt store {}: {}", path.display(), e)))?;
    if store.format_version != STORE_FORMAT_VERSION {
        return Err(Error::Cache(format!(
            "incompatible store version: expected {}, got {}",
            STORE_FORMAT_VERSION, store.format_version
        )));
    }
    Ok(Some(store.data))
}

fn save_store<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let store = Store {
        format_version: STORE_FORMAT_VERSION,
        data,
    };
    let json = serde_json::to_vec_pretty(&store)?;
    fsx::write_file_sync(path, &json)?;
    Ok(())
}
