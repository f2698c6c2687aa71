//! Configuration system using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. A TOML file (`config/gg_daq.toml` unless another path is given)
//! 3. Environment variables prefixed with `GG_DAQ_`, nested with `__`
//!    (e.g. `GG_DAQ_SERIAL__BAUD_RATE=115200`)
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use gg_daq::config::DaqConfig;
//!
//! let config = DaqConfig::load()?;
//! config.validate()?;
//! println!("Polling every {:?}", config.serial.poll_timeout());
//! # Ok::<(), gg_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::DecoderLimits;
use crate::error::{AppResult, DaqError};
use crate::storage::ExportFormat;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/gg_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "GG_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Stream decoder bounds
    #[serde(default)]
    pub decoder: DecoderLimits,
    /// Export settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "gg-daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate; ignored by USB CDC devices
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Upper bound on a single poll, and therefore on stop latency
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Maximum bytes read per poll
    #[serde(default = "default_read_size")]
    pub read_size: usize,
}

impl SerialConfig {
    /// Poll timeout as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            poll_timeout_ms: default_poll_timeout_ms(),
            read_size: default_read_size(),
        }
    }
}

/// Export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory finalized tables are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File format of the finalized table
    #[serde(default)]
    pub format: ExportFormat,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: ExportFormat::default(),
        }
    }
}

// Default value functions
fn default_baud_rate() -> u32 {
    9600
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_read_size() -> usize {
    256
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl DaqConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DaqConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level = self.application.log_level.to_lowercase();
        if !valid_levels.contains(&level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.poll_timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "serial.poll_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.serial.read_size == 0 {
            return Err(DaqError::Configuration(
                "serial.read_size must be greater than zero".to_string(),
            ));
        }

        if self.decoder.max_length == 0
            || self.decoder.max_entries == 0
            || self.decoder.max_depth == 0
        {
            return Err(DaqError::Configuration(
                "decoder limits must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DaqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.poll_timeout(), Duration::from_millis(100));
        assert_eq!(config.serial.read_size, 256);
        assert_eq!(config.storage.format, ExportFormat::Csv);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaqConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.serial, SerialConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gg_daq.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            [application]
            name = "bench"
            log_level = "debug"

            [serial]
            poll_timeout_ms = 50

            [storage]
            output_dir = "captures"
            format = "json"
            "#
        )
        .unwrap();

        let config = DaqConfig::load_from(&path).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.serial.poll_timeout_ms, 50);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.storage.output_dir, PathBuf::from("captures"));
        assert_eq!(config.storage.format, ExportFormat::Json);
        assert_eq!(config.decoder, DecoderLimits::default());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = DaqConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = DaqConfig::default();
        config.serial.poll_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_decoder_limits_rejected() {
        let mut config = DaqConfig::default();
        config.decoder.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = DaqConfig::default();
        config.decoder.max_length = 0;
        assert!(config.validate().is_err());
    }
}
