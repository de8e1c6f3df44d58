//! Scheduler configuration
//!
//! Loaded from JSON (every field optional) or built in code, then validated
//! before any pool or executor is created.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, SchedulerError};
use crate::types::Mode;

/// Sizing of one worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker slots (frames in flight)
    pub slots: usize,

    /// Concurrent executor streams; defaults to one per slot
    pub streams: Option<usize>,
}

impl PoolConfig {
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            streams: None,
        }
    }

    pub fn with_streams(mut self, streams: usize) -> Self {
        self.streams = Some(streams);
        self
    }

    pub fn streams(&self) -> usize {
        self.streams.unwrap_or(self.slots)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Configuration for both pools and the starting mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Throughput-oriented pool used in `Primary` mode
    pub primary: PoolConfig,

    /// Latency-oriented pool used in `LowLatency` mode
    pub low_latency: PoolConfig,

    /// Mode the run starts in
    pub initial_mode: Mode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            primary: PoolConfig::new(4),
            low_latency: PoolConfig::new(1),
            initial_mode: Mode::Primary,
        }
    }
}

impl SchedulerConfig {
    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: SchedulerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::info!("Loaded scheduler config from {}", path.display());
        Ok(config)
    }

    pub fn pool(&self, mode: Mode) -> &PoolConfig {
        match mode {
            Mode::Primary => &self.primary,
            Mode::LowLatency => &self.low_latency,
        }
    }

    pub fn pool_mut(&mut self, mode: Mode) -> &mut PoolConfig {
        match mode {
            Mode::Primary => &mut self.primary,
            Mode::LowLatency => &mut self.low_latency,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for mode in Mode::ALL {
            let pool = self.pool(mode);
            if pool.slots == 0 {
                return Err(SchedulerError::config(format!(
                    "{} pool needs at least one slot",
                    mode
                )));
            }
            if pool.streams() == 0 {
                return Err(SchedulerError::config(format!(
                    "{} pool needs at least one stream",
                    mode
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.primary.slots, 4);
        assert_eq!(config.primary.streams(), 4);
        assert_eq!(config.low_latency.slots, 1);
        assert_eq!(config.initial_mode, Mode::Primary);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"primary": {"slots": 8, "streams": 2}, "initial_mode": "low_latency"}"#)
                .unwrap();

        assert_eq!(config.primary.slots, 8);
        assert_eq!(config.primary.streams(), 2);
        assert_eq!(config.low_latency, PoolConfig::new(1));
        assert_eq!(config.initial_mode, Mode::LowLatency);
    }

    #[test]
    fn test_zero_sized_pools_rejected() {
        let mut config = SchedulerConfig::default();
        config.low_latency.slots = 0;
        assert!(matches!(config.validate(), Err(SchedulerError::Config(_))));

        let mut config = SchedulerConfig::default();
        *config.pool_mut(Mode::Primary) = PoolConfig::new(2).with_streams(0);
        assert!(matches!(config.validate(), Err(SchedulerError::Config(_))));
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!(
            "frame_scheduler_config_{}.json",
            std::process::id()
        ));
        {
            let mut file = fs::File::create(&path).unwrap();
            writeln!(file, r#"{{"primary": {{"slots": 3}}}}"#).unwrap();
        }

        let config = SchedulerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.primary.slots, 3);
        assert_eq!(config.low_latency.slots, 1);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = SchedulerConfig::from_json_file("/nonexistent/scheduler.json");
        assert!(matches!(result, Err(SchedulerError::Io(_))));
    }
}
