//! Bulksend CLI Configuration Management
//!
//! Configuration is read from a TOML file when one is given and falls back to
//! the production defaults otherwise. Missing sections take their defaults.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use bulksend_core::{DispatchSettings, EngineConfig};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the bulksend CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine limits, default settings, channels and reconnect policy
    pub engine: EngineConfig,

    /// Simulated transport used by `send`
    pub dry_run: DryRunConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::production(),
            dry_run: DryRunConfig::default(),
        }
    }
}

/// Behaviour of the simulated transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DryRunConfig {
    /// Share of sends that fail (0.0 - 1.0)
    pub failure_rate: f64,
    /// Simulated delivery latency in milliseconds
    pub latency_ms: u64,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency_ms: 50,
        }
    }
}

impl DryRunConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(CliError::Config(format!(
                "failure_rate must be between 0.0 and 1.0, got {}",
                self.failure_rate
            )));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.dry_run.validate()
    }

    /// Job settings with command-line overrides applied on top of the defaults
    pub fn settings_with_overrides(
        &self,
        batch_size: Option<usize>,
        pdf_interval: Option<f64>,
        batch_interval: Option<f64>,
    ) -> DispatchSettings {
        let defaults = self.engine.default_settings;
        DispatchSettings::new(
            batch_size.unwrap_or(defaults.batch_size),
            pdf_interval.unwrap_or(defaults.pdf_interval_secs),
            batch_interval.unwrap_or(defaults.batch_interval_secs),
        )
    }
}
