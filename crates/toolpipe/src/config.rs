use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

fn default_max_output_bytes() -> usize {
    50_000
}

fn default_doom_loop_threshold() -> u32 {
    3
}

fn default_mcp_timeout_secs() -> u64 {
    30
}

/// Pipeline tuning knobs, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ceiling on tool output size before truncation.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Wall-clock limit for a single tool execution. None means unbounded.
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,
    /// Consecutive identical calls before the loop detector intervenes.
    #[serde(default = "default_doom_loop_threshold")]
    pub doom_loop_threshold: u32,
    /// Default timeout for MCP transport calls.
    #[serde(default = "default_mcp_timeout_secs")]
    pub mcp_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: default_max_output_bytes(),
            tool_timeout_secs: None,
            doom_loop_threshold: default_doom_loop_threshold(),
            mcp_timeout_secs: default_mcp_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    pub fn mcp_timeout(&self) -> Duration {
        Duration::from_secs(self.mcp_timeout_secs)
    }
}
