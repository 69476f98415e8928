use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Number of synthetic pages in the document
    #[serde(default = "default_pages")]
    pub pages: usize,

    /// Page analyses allowed to run at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub stages: StageConfig,
}

/// Simulated duration of each pipeline stage, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default = "default_extraction_ms")]
    pub visual_extraction_ms: u64,

    #[serde(default = "default_extraction_ms")]
    pub text_extraction_ms: u64,

    #[serde(default = "default_parameter1_ms")]
    pub parameter1_ms: u64,

    #[serde(default = "default_parameter2_ms")]
    pub parameter2_ms: u64,

    #[serde(default = "default_parameter3_ms")]
    pub parameter3_ms: u64,

    /// Per-page analysis timeout; unset means no timeout
    #[serde(default)]
    pub page_timeout_ms: Option<u64>,
}

fn default_pages() -> usize {
    10
}

fn default_max_concurrency() -> usize {
    4
}

fn default_extraction_ms() -> u64 {
    1000
}

fn default_parameter1_ms() -> u64 {
    1000
}

fn default_parameter2_ms() -> u64 {
    4000
}

fn default_parameter3_ms() -> u64 {
    3000
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            visual_extraction_ms: default_extraction_ms(),
            text_extraction_ms: default_extraction_ms(),
            parameter1_ms: default_parameter1_ms(),
            parameter2_ms: default_parameter2_ms(),
            parameter3_ms: default_parameter3_ms(),
            page_timeout_ms: None,
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            pages: default_pages(),
            max_concurrency: default_max_concurrency(),
            stages: StageConfig::default(),
        }
    }
}

impl StageConfig {
    pub fn page_timeout(&self) -> Option<Duration> {
        self.page_timeout_ms.map(Duration::from_millis)
    }
}

impl FanoutConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        let config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        Ok(config)
    }

    /// Apply command-line overrides and reject unusable values.
    pub fn with_overrides(
        mut self,
        pages: Option<usize>,
        max_concurrency: Option<usize>,
    ) -> Result<Self> {
        if let Some(pages) = pages {
            self.pages = pages;
        }
        if let Some(max_concurrency) = max_concurrency {
            self.max_concurrency = max_concurrency;
        }

        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }

        Ok(self)
    }
}
