//! ccagent configuration stored in `ccagent.toml` at the project root.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::io::agent::AgentKind;
use crate::io::process::DEFAULT_OUTPUT_LIMIT_BYTES;

/// ccagent configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults
/// below. CLI flags override what is loaded here.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CcagentConfig {
    /// Agent backend used when `--agent` is not given.
    pub agent: AgentKind,

    /// Default iteration budget for `ccagent build`.
    pub max_iterations: u32,

    /// How many persisted progress lines are fed back into story prompts.
    pub progress_tail_lines: usize,

    /// Bound on captured stdout/stderr per external command.
    pub output_limit_bytes: usize,

    pub programs: ProgramsConfig,
}

/// Executable for each agent backend.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProgramsConfig {
    pub codex: String,
    pub claude: String,
}

impl Default for ProgramsConfig {
    fn default() -> Self {
        Self {
            codex: "codex".to_string(),
            claude: "claude".to_string(),
        }
    }
}

impl Default for CcagentConfig {
    fn default() -> Self {
        Self {
            agent: AgentKind::Codex,
            max_iterations: 10,
            progress_tail_lines: 80,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            programs: ProgramsConfig::default(),
        }
    }
}

impl CcagentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.progress_tail_lines == 0 {
            return Err(anyhow!("progress_tail_lines must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.programs.codex.trim().is_empty() {
            return Err(anyhow!("programs.codex must be non-empty"));
        }
        if self.programs.claude.trim().is_empty() {
            return Err(anyhow!("programs.claude must be non-empty"));
        }
        Ok(())
    }

    pub fn program_for(&self, kind: AgentKind) -> &str {
        match kind {
            AgentKind::Codex => &self.programs.codex,
            AgentKind::Claude => &self.programs.claude,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CcagentConfig::default()`.
pub fn load_config(path: &Path) -> Result<CcagentConfig> {
    if !path.exists() {
        let cfg = CcagentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CcagentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
