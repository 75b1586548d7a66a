//! Configuration file loading.
//!
//! Builds are described in an optional `rill.json`: a list of pipelines
//! (source patterns, named processors, output directory) plus defaults for
//! source maps, encoding, and the watcher. Command-line flags win over
//! file values; file values win over built-in defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const CONFIG_FILE: &str = "rill.json";

/// One declarative pipeline: match sources, run named processors, write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Glob patterns; `!`-prefixed entries exclude.
    pub src: Vec<String>,
    /// Named processors applied in order. Names must be registered with
    /// the engine.
    #[serde(default)]
    pub pipe: Vec<String>,
    /// Output directory; falls back to the top-level `outDir`.
    #[serde(default)]
    pub dest: Option<String>,
}

/// The `rill.json` schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RillConfig {
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
    #[serde(default)]
    pub out_dir: Option<String>,
    #[serde(default)]
    pub source_map: Option<bool>,
    #[serde(default)]
    pub inline_source_map: Option<bool>,
    #[serde(default)]
    pub sources_content: Option<bool>,
    #[serde(default)]
    pub source_root: Option<String>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub watch_debounce_ms: Option<u64>,
    /// Extra watcher ignore patterns, on top of output and cache dirs.
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// A pipeline after merging config and command line.
#[derive(Debug, Clone)]
pub struct ResolvedPipeline {
    pub src: Vec<String>,
    pub pipe: Vec<String>,
    pub dest: Option<String>,
}

impl RillConfig {
    /// Load the config. An explicit `--config` path must exist; the
    /// default `rill.json` is optional.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (rill_core::pathx::resolve_path(cwd, p), true),
            None => (cwd.join(CONFIG_FILE), false),
        };
        if !path.exists() {
            if required {
                return Err(ConfigError::NotFound(path).into());
            }
            return Ok(Self::default());
        }
        let bytes = std::fs::read(&path).map_err(ConfigError::Io)?;
        let config: RillConfig =
            serde_json::from_slice(&bytes).map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Merge command-line patterns with the configured pipelines.
    ///
    /// Patterns on the command line replace the config's pipelines with a
    /// single processor-less copy pipeline.
    pub fn resolve_pipelines(
        &self,
        cli_patterns: &[String],
        cli_out_dir: Option<&str>,
    ) -> Result<Vec<ResolvedPipeline>> {
        let default_dest = cli_out_dir
            .map(str::to_string)
            .or_else(|| self.out_dir.clone());

        if !cli_patterns.is_empty() {
            return Ok(vec![ResolvedPipeline {
                src: cli_patterns.to_vec(),
                pipe: Vec::new(),
                dest: Some(default_dest.unwrap_or_else(|| "out".to_string())),
            }]);
        }

        if self.pipelines.is_empty() {
            return Err(crate::error::CliError::InvalidArgument(
                "no source patterns given and no pipelines configured".to_string(),
            ));
        }

        Ok(self
            .pipelines
            .iter()
            .map(|p| ResolvedPipeline {
                src: p.src.clone(),
                pipe: p.pipe.clone(),
                dest: p
                    .dest
                    .clone()
                    .or_else(|| default_dest.clone())
                    .or_else(|| Some("out".to_string())),
            })
            .collect())
    }

    /// Directories the watcher must never react to: every pipeline
    /// destination plus the cache dir.
    pub fn watch_ignores(&self, pipelines: &[ResolvedPipeline]) -> Vec<String> {
        let mut ignores = self.ignore.clone();
        ignores.push(self.cache_dir.clone().unwrap_or_else(|| ".rill".to_string()));
        for pipeline in pipelines {
            if let Some(dest) = &pipeline.dest {
                ignores.push(dest.clone());
            }
        }
        ignores.sort();
        ignores.dedup();
        ignores
    }

    pub fn resolved_cache_dir(&self, cwd: &Path) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|d| rill_core::pathx::resolve_path(cwd, d))
    }
}
