//! Centralized Configuration Management
//!
//! This module consolidates the configuration structures used by the dispatch
//! engine: per-job dispatch settings and their allowed ranges, channel buffer
//! sizes, subscription reconnect policy, and the polling fallback interval.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, DispatchResult};

// ----------------------------------------------------------------------------
// Dispatch Settings
// ----------------------------------------------------------------------------

/// Batching and pacing settings for one dispatch job
///
/// Intervals are signed seconds so that out-of-range input reaches validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Contacts per batch
    pub batch_size: usize,
    /// Pause between two contacts of the same batch
    pub pdf_interval_secs: f64,
    /// Pause between two batches
    pub batch_interval_secs: f64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            pdf_interval_secs: 10.0,
            batch_interval_secs: 30.0,
        }
    }
}

impl DispatchSettings {
    pub fn new(batch_size: usize, pdf_interval_secs: f64, batch_interval_secs: f64) -> Self {
        Self {
            batch_size,
            pdf_interval_secs,
            batch_interval_secs,
        }
    }

    /// Zero-delay settings, used by tests and dry runs
    pub fn immediate(batch_size: usize) -> Self {
        Self::new(batch_size, 0.0, 0.0)
    }

    /// Check every field against the allowed ranges
    pub fn validate_against(&self, limits: &SettingsLimits) -> DispatchResult<()> {
        let batch_size = self.batch_size;
        if batch_size < limits.batch_size_min.max(1) || batch_size > limits.batch_size_max {
            return Err(DispatchError::invalid_settings(
                "batch_size",
                batch_size as f64,
                limits.batch_size_min.max(1) as f64,
                limits.batch_size_max as f64,
            ));
        }

        check_interval(
            "pdf_interval",
            self.pdf_interval_secs,
            limits.pdf_interval_min,
            limits.pdf_interval_max,
        )?;
        check_interval(
            "batch_interval",
            self.batch_interval_secs,
            limits.batch_interval_min,
            limits.batch_interval_max,
        )?;

        Ok(())
    }

    pub fn pdf_interval(&self) -> Duration {
        seconds_to_duration(self.pdf_interval_secs)
    }

    pub fn batch_interval(&self) -> Duration {
        seconds_to_duration(self.batch_interval_secs)
    }
}

fn check_interval(field: &str, value: f64, min: f64, max: f64) -> DispatchResult<()> {
    // Negative lower bounds are clamped: intervals are never negative
    let min = min.max(0.0);
    if !value.is_finite() || value < min || value > max {
        return Err(DispatchError::invalid_settings(field, value, min, max));
    }
    Ok(())
}

fn seconds_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

// ----------------------------------------------------------------------------
// Settings Limits
// ----------------------------------------------------------------------------

/// Allowed ranges for `DispatchSettings`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsLimits {
    pub batch_size_min: usize,
    pub batch_size_max: usize,
    pub pdf_interval_min: f64,
    pub pdf_interval_max: f64,
    pub batch_interval_min: f64,
    pub batch_interval_max: f64,
}

impl Default for SettingsLimits {
    fn default() -> Self {
        Self {
            batch_size_min: 1,
            batch_size_max: 200,
            pdf_interval_min: 3.0,
            pdf_interval_max: 30.0,
            batch_interval_min: 5.0,
            batch_interval_max: 300.0,
        }
    }
}

impl SettingsLimits {
    /// Only structural limits: batch size at least one, intervals non-negative
    pub fn unbounded() -> Self {
        Self {
            batch_size_min: 1,
            batch_size_max: u32::MAX as usize,
            pdf_interval_min: 0.0,
            pdf_interval_max: f64::MAX,
            batch_interval_min: 0.0,
            batch_interval_max: f64::MAX,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.batch_size_min > self.batch_size_max {
            return Err("batch_size_min cannot exceed batch_size_max".into());
        }
        if self.pdf_interval_min > self.pdf_interval_max {
            return Err("pdf_interval_min cannot exceed pdf_interval_max".into());
        }
        if self.batch_interval_min > self.batch_interval_max {
            return Err("batch_interval_min cannot exceed batch_interval_max".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the engine's internal channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Broadcast hub carrying session/job/progress changes
    pub engine_event_buffer: usize,
    /// Transport event broadcast (pairing, ready, fatal)
    pub transport_event_buffer: usize,
    /// Per-stream channel between connector and publisher
    pub observer_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            engine_event_buffer: 256,  // Progress events are bursty with zero intervals
            transport_event_buffer: 32,
            observer_buffer: 128,
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            engine_event_buffer: 1024,
            transport_event_buffer: 64,
            observer_buffer: 512,
        }
    }
}

// ----------------------------------------------------------------------------
// Subscription Configuration
// ----------------------------------------------------------------------------

/// Reconnect policy for status/progress streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Delay before a reconnect attempt
    pub reconnect_delay_ms: u64,
    /// Consecutive failed reconnects before the stream is dropped
    pub max_reconnect_attempts: u32,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    /// Upper bound on the delay when backing off
    pub max_delay_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            max_reconnect_attempts: 3,
            backoff_multiplier: 1.0,
            max_delay_ms: 60_000,
        }
    }
}

impl SubscriptionConfig {
    /// Create configuration optimized for testing (fast reconnects)
    pub fn testing() -> Self {
        Self {
            reconnect_delay_ms: 20,
            max_reconnect_attempts: 3,
            backoff_multiplier: 1.0,
            max_delay_ms: 200,
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// ----------------------------------------------------------------------------
// Polling Configuration
// ----------------------------------------------------------------------------

/// Pull-based progress fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 2_000 }
    }
}

impl PollingConfig {
    pub fn testing() -> Self {
        Self { interval_ms: 10 }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Master configuration for the dispatch engine
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Allowed ranges for job settings
    pub limits: SettingsLimits,
    /// Settings used when a caller does not supply its own
    pub default_settings: DispatchSettings,
    /// Channel buffer configuration
    pub channels: ChannelConfig,
    /// Stream reconnect policy
    pub subscriptions: SubscriptionConfig,
    /// Polling fallback
    pub polling: PollingConfig,
}

impl EngineConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder for EngineConfig
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Create configuration optimized for testing: no pacing, fast reconnects
    pub fn testing() -> Self {
        Self {
            limits: SettingsLimits::unbounded(),
            default_settings: DispatchSettings::immediate(2),
            channels: ChannelConfig::testing(),
            subscriptions: SubscriptionConfig::testing(),
            polling: PollingConfig::testing(),
        }
    }

    /// Create configuration for production delivery pacing
    pub fn production() -> Self {
        Self {
            limits: SettingsLimits::default(),
            default_settings: DispatchSettings::default(),
            channels: ChannelConfig::default(),
            subscriptions: SubscriptionConfig::default(),
            polling: PollingConfig::default(),
        }
    }

    /// Builder method for customizing settings limits
    pub fn with_limits(mut self, limits: SettingsLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Builder method for customizing default job settings
    pub fn with_default_settings(mut self, settings: DispatchSettings) -> Self {
        self.default_settings = settings;
        self
    }

    /// Builder method for customizing subscription configuration
    pub fn with_subscriptions(mut self, subscriptions: SubscriptionConfig) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> DispatchResult<()> {
        self.limits.validate().map_err(DispatchError::config_error)?;

        // Validate channel buffer sizes
        if self.channels.engine_event_buffer == 0 {
            return Err(DispatchError::config_error(
                "Engine event buffer size cannot be zero",
            ));
        }
        if self.channels.transport_event_buffer == 0 {
            return Err(DispatchError::config_error(
                "Transport event buffer size cannot be zero",
            ));
        }
        if self.channels.observer_buffer == 0 {
            return Err(DispatchError::config_error(
                "Observer buffer size cannot be zero",
            ));
        }

        // Validate subscription configuration
        if self.subscriptions.backoff_multiplier < 1.0 {
            return Err(DispatchError::config_error(
                "Backoff multiplier cannot be less than 1.0",
            ));
        }
        if self.subscriptions.reconnect_delay_ms > self.subscriptions.max_delay_ms {
            return Err(DispatchError::config_error(
                "Reconnect delay cannot be greater than max delay",
            ));
        }

        if self.polling.interval_ms == 0 {
            return Err(DispatchError::config_error("Polling interval cannot be zero"));
        }

        self.default_settings
            .validate_against(&self.limits)
            .map_err(|e| DispatchError::config_error(format!("default_settings: {}", e)))
    }
}

// ----------------------------------------------------------------------------
// Configuration Builder
// ----------------------------------------------------------------------------

/// Builder for EngineConfig with validation on `build`
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    limits: Option<SettingsLimits>,
    default_settings: Option<DispatchSettings>,
    channels: Option<ChannelConfig>,
    subscriptions: Option<SubscriptionConfig>,
    polling: Option<PollingConfig>,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Use testing preset as base (can be further customized)
    pub fn testing(self) -> Self {
        let preset = EngineConfig::testing();
        Self {
            limits: Some(preset.limits),
            default_settings: Some(preset.default_settings),
            channels: Some(preset.channels),
            subscriptions: Some(preset.subscriptions),
            polling: Some(preset.polling),
        }
    }

    pub fn limits(mut self, limits: SettingsLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn default_settings(mut self, settings: DispatchSettings) -> Self {
        self.default_settings = Some(settings);
        self
    }

    pub fn channels(mut self, config: ChannelConfig) -> Self {
        self.channels = Some(config);
        self
    }

    pub fn subscriptions(mut self, config: SubscriptionConfig) -> Self {
        self.subscriptions = Some(config);
        self
    }

    pub fn polling(mut self, config: PollingConfig) -> Self {
        self.polling = Some(config);
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> DispatchResult<EngineConfig> {
        let config = self.build_unchecked();
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration without validation
    pub fn build_unchecked(self) -> EngineConfig {
        EngineConfig {
            limits: self.limits.unwrap_or_default(),
            default_settings: self.default_settings.unwrap_or_default(),
            channels: self.channels.unwrap_or_default(),
            subscriptions: self.subscriptions.unwrap_or_default(),
            polling: self.polling.unwrap_or_default(),
        }
    }
}
