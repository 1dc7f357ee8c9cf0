//! Configuration file loading for dualstate.
//!
//! Reads `.dualstate/dualstate.json` and provides typed access to all settings.
//! Falls back to sensible defaults when the config file is missing or incomplete.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Directory (relative to the repository root) holding config, db and locks.
pub const STATE_DIR: &str = ".dualstate";

/// Top-level dualstate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DualStateConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
}

/// Granularity of entries in the vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One entry per interface summary.
    #[default]
    Interface,
    /// One entry per code slice of an interface body.
    CodeSlice,
    /// One entry per module.
    Module,
}

/// Hybrid retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default = "default_true")]
    pub traverse_both_directions: bool,
}

/// Vector index tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

/// Safety gate tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Apply loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    #[serde(default = "default_commit_prefix")]
    pub commit_prefix: String,
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

/// Pattern knowledge base location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Extra catalog merged over the built-in one.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_k() -> usize {
    40
}
fn default_max_hops() -> u32 {
    2
}
fn default_dimensions() -> usize {
    256
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_commit_prefix() -> String {
    "dualstate:".to_string()
}
fn default_lock_wait_ms() -> u64 {
    2000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            max_hops: default_max_hops(),
            granularity: Granularity::default(),
            traverse_both_directions: true,
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            commit_prefix: default_commit_prefix(),
            lock_wait_ms: default_lock_wait_ms(),
        }
    }
}

impl DualStateConfig {
    /// Load configuration from `dualstate.json` inside the given state directory.
    /// Returns defaults if the file doesn't exist or can't be parsed.
    pub fn load(state_dir: &Path) -> Self {
        let config_path = state_dir.join("dualstate.json");
        let content = match std::fs::read_to_string(&config_path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(
                    path = %config_path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Load from `<root>/.dualstate/`.
    pub fn load_for_root(root: &Path) -> Self {
        Self::load(&root.join(STATE_DIR))
    }
}
