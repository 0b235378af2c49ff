//! Runner configuration (`phaser.toml` or a scenario's `[config]` table).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// What to do when a task phase keeps re-raising objections from its
/// `phase_ready_to_end` hooks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadyToEndOverflow {
    /// Warn and let the phase end anyway.
    #[default]
    ForceEnd,
    /// Abort the run.
    Fatal,
}

/// Runner configuration (TOML).
///
/// Missing fields default to the values of a stock testbench.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Global virtual-time budget for the whole run, in milliseconds.
    pub timeout_ms: u64,

    /// Whether a later `set_timeout` may replace `timeout_ms`.
    pub timeout_overridable: bool,

    /// Drain time applied to objects with no explicit drain time.
    pub default_drain_ms: u64,

    /// Forward raise/drop notifications to ancestors and count subtrees.
    pub propagate_objections: bool,

    /// Bound on `phase_ready_to_end` rounds per task phase execution.
    pub max_ready_to_end_iterations: u32,

    pub ready_to_end_overflow: ReadyToEndOverflow,

    /// Log every phase transition at `info` instead of `debug`.
    pub trace_phases: bool,

    /// Log every objection change at `info` instead of `debug`.
    pub trace_objections: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 9_200_000,
            timeout_overridable: true,
            default_drain_ms: 0,
            propagate_objections: true,
            max_ready_to_end_iterations: 20,
            ready_to_end_overflow: ReadyToEndOverflow::ForceEnd,
            trace_phases: false,
            trace_objections: false,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be > 0"));
        }
        if self.max_ready_to_end_iterations == 0 {
            return Err(anyhow!("max_ready_to_end_iterations must be > 0"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn default_drain(&self) -> Duration {
        Duration::from_millis(self.default_drain_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
        assert_eq!(cfg.timeout(), Duration::from_secs(9200));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("phaser.toml");
        let cfg = RunnerConfig {
            default_drain_ms: 2_000,
            ready_to_end_overflow: ReadyToEndOverflow::Fatal,
            ..RunnerConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("phaser.toml");
        fs::write(&path, "timeout_ms = 500\nready_to_end_overflow = \"fatal\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.timeout_ms, 500);
        assert_eq!(cfg.ready_to_end_overflow, ReadyToEndOverflow::Fatal);
        assert!(cfg.propagate_objections);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("phaser.toml");
        fs::write(&path, "timeout_ms = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("timeout_ms"));
    }
}
