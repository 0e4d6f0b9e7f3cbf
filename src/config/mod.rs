//! Configuration management for reportstream
//!
//! Configuration comes from three places:
//! - Configuration file (TOML format)
//! - Command-line arguments
//! - Default values
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Configuration file
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encoder::frame::DEFAULT_MESSAGE;
use crate::encoder::sink::DEFAULT_HIGH_WATER_MARK;
use crate::error::{ConfigError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Encoder configuration
    #[serde(default)]
    pub stream: StreamConfig,

    /// CSV output configuration
    #[serde(default)]
    pub csv: CsvConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Output format (json, csv)
    #[serde(default = "default_format")]
    pub format: StreamFormat,

    /// Records pulled per tick from a finite source
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between ticks in milliseconds (0 yields instead)
    #[serde(default)]
    pub inter_chunk_delay_ms: u64,

    /// Envelope message for JSON output
    #[serde(default = "default_message")]
    pub message: String,

    /// Bytes buffered by the output writer before it applies backpressure
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
}

/// CSV output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CsvConfig {
    /// Ordered column names
    #[serde(default)]
    pub columns: Vec<String>,

    /// Attachment filename; also names the output file when `-o` is a directory
    #[serde(default = "default_csv_filename")]
    pub filename: String,
}

/// Wire format of an encoded stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// `{"success":true,"message":...,"data":[...]}`
    Json,

    /// Header line followed by one line per record
    Csv,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_format() -> StreamFormat {
    StreamFormat::Json
}

fn default_chunk_size() -> usize {
    100
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

fn default_csv_filename() -> String {
    "reporte.csv".to_string()
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            chunk_size: default_chunk_size(),
            inter_chunk_delay_ms: 0,
            message: default_message(),
            high_water_mark: default_high_water_mark(),
        }
    }
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            filename: default_csv_filename(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Explicit path, or `None` for the default location
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration; defaults when no path was
    ///   given and the default file does not exist
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_config_path(), false),
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigError::FileNotFound(path.display().to_string()).into());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - `<config dir>/reportstream/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reportstream")
            .join("config.toml")
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        if self.stream.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.chunk_size".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if self.stream.high_water_mark == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.high_water_mark".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if self.csv.filename.trim().is_empty() {
            return Err(ConfigError::MissingField("csv.filename".to_string()).into());
        }

        Ok(())
    }
}

impl StreamConfig {
    /// Get the inter-chunk delay as Duration
    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl StreamFormat {
    /// Parse a format name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(StreamFormat::Json),
            "csv" => Some(StreamFormat::Csv),
            _ => None,
        }
    }

    /// File extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            StreamFormat::Json => "json",
            StreamFormat::Csv => "csv",
        }
    }
}
