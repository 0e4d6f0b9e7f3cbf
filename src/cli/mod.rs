//! Command-line interface for reportstream
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and validation
//! - Merging command-line overrides into the configuration
//! - Subcommands (version, completion, config)

mod completion;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{Config, LogLevel, StreamFormat};
use crate::error::{ConfigError, Result};

pub use completion::generate_completion;

/// Streaming JSON/CSV encoder for report result sets
#[derive(Parser, Debug)]
#[command(
    name = "reportstream",
    version,
    about = "Stream a result set as a JSON envelope or CSV",
    long_about = "Encodes a JSON array (or a JSON Lines stream) of records into a
{\"success\":true,\"message\":...,\"data\":[...]} envelope or a CSV document,
writing it in chunks with backpressure instead of building it in memory."
)]
pub struct CliArgs {
    /// Input file: a JSON array, an object with a `data` array, or JSON Lines
    ///
    /// Use `-` or omit to read standard input.
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Output format (json, csv)
    #[arg(short = 'f', long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// CSV columns in output order
    ///
    /// Example: reportstream --format csv --columns cuenta,descripcion,saldo
    #[arg(long, value_name = "COLUMNS", value_delimiter = ',')]
    pub columns: Vec<String>,

    /// Records per chunk
    #[arg(long, value_name = "N")]
    pub chunk_size: Option<usize>,

    /// Pause between chunks in milliseconds
    #[arg(long, value_name = "MS")]
    pub delay_ms: Option<u64>,

    /// Envelope message for JSON output
    #[arg(short = 'm', long, value_name = "TEXT")]
    pub message: Option<String>,

    /// Output file or directory (defaults to standard output)
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Treat the input as JSON Lines and encode it as it is read
    #[arg(long)]
    pub lines: bool,

    /// Show a progress bar on stderr
    #[arg(long)]
    pub progress: bool,

    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands for reportstream
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version,

    /// Generate shell completion script
    Completion {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        #[arg(value_name = "SHELL")]
        shell: String,
    },

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Effective configuration (file merged with arguments)
    config: Config,
}

impl CliInterface {
    /// Create a new CLI interface from the process arguments
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Create a CLI interface from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration from file and merge with arguments
    ///
    /// # Arguments
    /// * `args` - Command-line arguments
    ///
    /// # Returns
    /// * `Result<Config>` - Effective configuration or error
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = Config::load_from_file(args.config_file.as_deref())?;

        if let Err(e) = config.validate() {
            eprintln!("Warning: Configuration validation failed: {}", e);
            eprintln!("Using default configuration instead.");
            config = Config::default();
        }

        Self::apply_args_to_config(&mut config, args)?;
        config.validate()?;

        Ok(config)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the CLI arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Input path, `None` for standard input
    pub fn input_path(&self) -> Option<&Path> {
        self.args
            .input
            .as_deref()
            .filter(|p| p.as_os_str() != "-")
    }

    /// Config file path given on the command line
    pub fn config_path(&self) -> Option<&Path> {
        self.args.config_file.as_deref()
    }

    /// Apply CLI arguments to configuration
    ///
    /// Overrides configuration values with CLI arguments where provided
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) -> Result<()> {
        Self::apply_stream_args(config, args)?;
        Self::apply_csv_args(config, args);
        Self::apply_logging_args(config, args);
        Ok(())
    }

    /// Apply encoder-related CLI arguments to configuration
    fn apply_stream_args(config: &mut Config, args: &CliArgs) -> Result<()> {
        if let Some(format_str) = &args.format {
            config.stream.format = Self::parse_stream_format(format_str)?;
        }

        if let Some(chunk_size) = args.chunk_size {
            config.stream.chunk_size = chunk_size;
        }

        if let Some(delay_ms) = args.delay_ms {
            config.stream.inter_chunk_delay_ms = delay_ms;
        }

        if let Some(message) = &args.message {
            config.stream.message = message.clone();
        }

        Ok(())
    }

    /// Apply CSV-related CLI arguments to configuration
    fn apply_csv_args(config: &mut Config, args: &CliArgs) {
        let columns: Vec<String> = args
            .columns
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        if !columns.is_empty() {
            config.csv.columns = columns;
        }
    }

    /// Apply logging-related CLI arguments to configuration
    fn apply_logging_args(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };
    }

    /// Parse output format string
    fn parse_stream_format(format_str: &str) -> Result<StreamFormat> {
        StreamFormat::parse(format_str).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "format".to_string(),
                value: format_str.to_string(),
            }
            .into()
        })
    }

    /// Handle subcommands
    ///
    /// # Returns
    /// * `Result<bool>` - True if subcommand was handled, false to continue
    pub fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Some(Commands::Version) => {
                self.show_version();
                Ok(true)
            }
            Some(Commands::Completion { shell }) => {
                generate_completion(shell)?;
                Ok(true)
            }
            Some(Commands::Config { show, validate }) => {
                self.handle_config_command(*show, *validate)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Show version information
    fn show_version(&self) {
        println!("reportstream version {}", env!("CARGO_PKG_VERSION"));
        println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
    }

    /// Handle config subcommand
    ///
    /// # Arguments
    /// * `show` - Whether to show configuration
    /// * `validate` - Whether to validate configuration
    fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.validate_config_file();
        }

        if show || !validate {
            self.show_config()?;
        }

        Ok(())
    }

    /// Validate configuration file
    fn validate_config_file(&self) {
        let path = self.get_config_path();
        println!("Validating configuration file: {}", path.display());

        if !path.exists() {
            println!("❌ Configuration file does not exist");
            return;
        }

        match Config::load_from_file(Some(&path)) {
            Ok(config) => match config.validate() {
                Ok(()) => println!("✅ Configuration is valid"),
                Err(e) => println!("❌ Configuration validation failed: {}", e),
            },
            Err(e) => println!("❌ Failed to load configuration: {}", e),
        }
    }

    /// Show effective configuration
    fn show_config(&self) -> Result<()> {
        let path = self.get_config_path();
        println!("Configuration file: {}", path.display());
        println!();
        println!("=== Effective Configuration ===");
        println!();
        println!("{}", self.config.to_toml()?);
        Ok(())
    }

    /// Get configuration file path (from args or default)
    fn get_config_path(&self) -> PathBuf {
        self.args
            .config_file
            .clone()
            .unwrap_or_else(Config::default_config_path)
    }
}
