//! reportstream - streaming JSON/CSV encoder
//!
//! Reads a result set and writes it as a JSON envelope or a CSV document,
//! chunk by chunk, to standard output or a file.
//!
//! # Usage
//!
//! ```bash
//! # JSON envelope from a JSON array
//! reportstream saldos.json > respuesta.json
//!
//! # CSV with explicit columns
//! reportstream saldos.json --format csv --columns cuenta,saldo -o saldos.csv
//!
//! # Encode JSON Lines as they arrive
//! producer | reportstream --lines --format csv --columns id,nombre
//! ```

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use reportstream::cli::CliInterface;
use reportstream::config::{Config, StreamFormat};
use reportstream::encoder::{
    self, EncodeOptions, EncodeReport, EncodeSession, FrameSink, JsonLinesSource, RecordSource, WriterSink,
};
use reportstream::error::{ConfigError, ReportError, Result, StreamError};
use reportstream::transport;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle subcommands or encode the input
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;

    initialize_logging(cli.config());

    if cli.handle_subcommand()? {
        return Ok(());
    }

    encode(&cli).await
}

/// Encode the input to the configured output
async fn encode(cli: &CliInterface) -> Result<()> {
    let config = cli.config();
    if config.stream.format == StreamFormat::Csv && config.csv.columns.is_empty() {
        return Err(ConfigError::MissingField("csv.columns (pass --columns)".to_string()).into());
    }

    let source = open_source(cli.input_path(), cli.args().lines).await?;
    let output = cli.args().output.as_deref().map(|p| output_path(p, config));
    let output = output.as_deref();
    let sink = open_sink(output, config.stream.high_water_mark).await?;
    let builder = encoder::builder_for::<Value>(config);

    let options =
        EncodeOptions::from_config(&config.stream).with_progress_bar(cli.args().progress);
    let session = EncodeSession::new(source, sink, builder, options);
    debug!(
        "Session {} -> {}",
        session.id(),
        output.map_or_else(|| "stdout".to_string(), |p| p.display().to_string())
    );

    // Ctrl+C cancels the session instead of killing the process mid-write
    let cancel_token = session.cancellation_token();
    let ctrl_c_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling encode session");
                cancel_token.cancel();
            }
            Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    let report = session.run().await;
    ctrl_c_handle.abort();

    settle(config, output, report).await
}

/// Turn the session report into the exit result
///
/// A failure that reached the consumer leaves the truncated stream in place;
/// otherwise the error body takes its place.
async fn settle(config: &Config, output: Option<&Path>, report: EncodeReport) -> Result<()> {
    let output_started = report.output_started();
    match report.error {
        None => {
            info!(
                "Encoded {} records ({} bytes) in {} ms",
                report.records_emitted, report.bytes_pushed, report.elapsed_ms
            );
            Ok(())
        }
        Some(error) => {
            if !output_started {
                debug!("Nothing was delivered, writing the error body instead");
                write_fallback(config, output, &error).await?;
            }
            Err(error.into())
        }
    }
}

/// Open the record source
///
/// # Arguments
/// * `input` - Input file, `None` for standard input
/// * `lines` - Read JSON Lines lazily instead of a whole JSON document
async fn open_source(input: Option<&Path>, lines: bool) -> Result<RecordSource<Value>> {
    let mut reader: Box<dyn AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };

    if lines {
        return Ok(RecordSource::lazy(JsonLinesSource::new(BufReader::new(reader))));
    }

    let mut text = String::new();
    reader.read_to_string(&mut text).await?;
    let records = parse_records(&text)?;
    debug!("Loaded {} records", records.len());
    Ok(RecordSource::from_vec(records))
}

/// Records of a JSON document: a bare array, or the `data` array of an object
fn parse_records(text: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(ReportError::Generic(
                "Input object has no \"data\" array".to_string(),
            )),
        },
        _ => Err(ReportError::Generic(
            "Input must be a JSON array of records".to_string(),
        )),
    }
}

/// Output file for `-o`; a directory gets the configured attachment name
fn output_path(output: &Path, config: &Config) -> PathBuf {
    if output.is_dir() {
        let name = Path::new(&config.csv.filename).with_extension(config.stream.format.extension());
        output.join(name)
    } else {
        output.to_path_buf()
    }
}

/// Open the output sink, standard output unless a file is given
async fn open_sink(output: Option<&Path>, high_water_mark: usize) -> Result<Box<dyn FrameSink>> {
    let sink: Box<dyn FrameSink> = match output {
        Some(path) => Box::new(WriterSink::new(
            tokio::fs::File::create(path).await?,
            high_water_mark,
        )),
        None => Box::new(WriterSink::new(tokio::io::stdout(), high_water_mark)),
    };
    Ok(sink)
}

/// Write the error body in place of a stream that never started
async fn write_fallback(config: &Config, output: Option<&Path>, error: &StreamError) -> Result<()> {
    let body = transport::fallback_body(config.stream.format, error)?;
    match output {
        Some(path) => tokio::fs::write(path, body.as_bytes()).await?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(body.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

/// Initialize logging system
///
/// Logs go to stderr; stdout carries the encoded output.
fn initialize_logging(config: &Config) {
    let level = config.logging.level.to_tracing_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
