//! Engine configuration loading and parsing.
//!
//! Parses `cascade.toml` (or an override path provided by the binary) into
//! the runtime options: run mode, scheduling and mapping policies, FIFO
//! allocator, loop count and trace export paths. Unknown fields are ignored
//! (TOML deserialization tolerance) and a missing or unparsable file falls
//! back to defaults, so an embedder can always start with an empty
//! directory.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

/// Iteration driving mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Loop until the stop flag is raised.
    Infinite,
    /// Fixed number of iterations.
    #[default]
    Loop,
    /// One iteration per external `run` call.
    ExternLoop,
}

/// Runtime flavour. Only the PiSDF runtime is built; the legacy
/// single-rate-transformation runtime is rejected at context creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    #[default]
    Pisdf,
    Srdag,
}

/// When jobs are pushed to the runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    #[default]
    Jit,
    Delayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicyConfig {
    #[default]
    List,
    Greedy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MappingPolicyConfig {
    #[default]
    BestFit,
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorConfig {
    #[default]
    Default,
    DefaultNoSync,
    ArchiAware,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default)]
    pub run_mode: RunMode,
    #[serde(default = "EngineConfig::default_loop_count")]
    pub loop_count: u64,
    #[serde(default)]
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub execution_policy: ExecutionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::default(),
            loop_count: Self::default_loop_count(),
            runtime: RuntimeKind::default(),
            execution_policy: ExecutionPolicy::default(),
        }
    }
}

impl EngineConfig {
    const fn default_loop_count() -> u64 {
        1
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct SchedulingConfig {
    #[serde(default)]
    pub policy: SchedulingPolicyConfig,
    #[serde(default)]
    pub mapping: MappingPolicyConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct TraceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Post-execution Gantt, XML flavour.
    #[serde(default)]
    pub gantt_xml: Option<PathBuf>,
    /// Post-execution Gantt, SVG flavour.
    #[serde(default)]
    pub gantt_svg: Option<PathBuf>,
    /// Graph structure export.
    #[serde(default)]
    pub dot: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub trace: TraceConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file string, kept for diagnostics.
    pub raw: Option<String>,
    pub file: ConfigFile,
}

/// Best-effort config path following platform conventions: local working
/// directory first, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("cascade.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("cascade").join("cascade.toml");
    }
    PathBuf::from("cascade.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(
                    target: "config",
                    path = %path.display(),
                    run_mode = ?file.engine.run_mode,
                    policy = ?file.scheduling.policy,
                    mapping = ?file.scheduling.mapping,
                    allocator = ?file.scheduling.allocator,
                    "config_loaded"
                );
                Ok(Config {
                    raw: Some(content),
                    file,
                })
            }
            Err(_e) => {
                // Parse errors fall back to defaults rather than aborting.
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}
