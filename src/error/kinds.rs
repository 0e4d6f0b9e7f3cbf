use std::{fmt, io};

/// Crate-wide `Result` type using [`ReportError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, ReportError>;

/// Top-level error type for reportstream operations.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum ReportError {
    /// Encoding session errors.
    Stream(StreamError),

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors.
    Io(io::Error),

    /// JSON input errors.
    Json(serde_json::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Errors that drive an encode session to `Failed`.
///
/// Cloned so that one failure can be handed to the error callback,
/// to the sink being destroyed and to the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The record source failed to produce the next record.
    Source(String),

    /// A record could not be converted to the target frame format.
    Serialization(String),

    /// The downstream consumer failed or went away.
    Sink(SinkError),

    /// The session was cancelled through its handle.
    Cancelled,
}

/// Sink-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The consumer closed before the stream ended.
    Closed,

    /// Writing to the underlying transport failed.
    Write(String),

    /// The stream was destroyed by the producer.
    Aborted(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },

    /// Anything else.
    Generic(String),
}

impl StreamError {
    /// Short machine-readable kind, used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Source(_) => "source_error",
            StreamError::Serialization(_) => "serialization_error",
            StreamError::Sink(_) => "sink_error",
            StreamError::Cancelled => "cancelled",
        }
    }

    /// Whether the failure came from the consumer side.
    ///
    /// When it did there is nobody left to receive more frames.
    pub fn is_consumer_gone(&self) -> bool {
        matches!(
            self,
            StreamError::Sink(SinkError::Closed) | StreamError::Cancelled
        )
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Stream(e) => write!(f, "Stream error: {e}"),
            ReportError::Config(e) => write!(f, "Configuration error: {e}"),
            ReportError::Io(e) => write!(f, "I/O error: {e}"),
            ReportError::Json(e) => write!(f, "Invalid JSON input: {e}"),
            ReportError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Source(msg) => write!(f, "Source failed: {msg}"),
            StreamError::Serialization(msg) => write!(f, "Cannot serialize record: {msg}"),
            StreamError::Sink(e) => write!(f, "{e}"),
            StreamError::Cancelled => write!(f, "Encoding cancelled"),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Closed => write!(f, "Sink closed before end of stream"),
            SinkError::Write(msg) => write!(f, "Sink write failed: {msg}"),
            SinkError::Aborted(msg) => write!(f, "Stream aborted: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
            ConfigError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Stream(e) => Some(e),
            ReportError::Config(e) => Some(e),
            ReportError::Io(e) => Some(e),
            ReportError::Json(e) => Some(e),
            ReportError::Generic(_) => None,
        }
    }
}
impl std::error::Error for StreamError {}
impl std::error::Error for SinkError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions ========================= */

impl From<io::Error> for ReportError {
    fn from(err: io::Error) -> Self {
        ReportError::Io(err)
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::Json(err)
    }
}

impl From<StreamError> for ReportError {
    fn from(err: StreamError) -> Self {
        ReportError::Stream(err)
    }
}

impl From<SinkError> for StreamError {
    fn from(err: SinkError) -> Self {
        StreamError::Sink(err)
    }
}

impl From<SinkError> for ReportError {
    fn from(err: SinkError) -> Self {
        ReportError::Stream(StreamError::Sink(err))
    }
}

impl From<ConfigError> for ReportError {
    fn from(err: ConfigError) -> Self {
        ReportError::Config(err)
    }
}

impl From<String> for ReportError {
    fn from(msg: String) -> Self {
        ReportError::Generic(msg)
    }
}

impl From<&str> for ReportError {
    fn from(msg: &str) -> Self {
        ReportError::Generic(msg.to_owned())
    }
}
