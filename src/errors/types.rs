//! Error type definitions for tvmux
//!
//! A hierarchical error system: each subsystem has its own error enum,
//! and `AppError` ties them together at the service boundary. Policy
//! (skip vs abort vs surface) is decided by the caller based on the
//! variant, not encoded here.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Provider download / parse errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Persistence errors (settings.json, xepg.json, urls.json, ...)
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Shared-stream buffer errors
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// A merge or emit was requested while another is running
    #[error("A scan is already in progress")]
    ScanInProgress,

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Broken internal invariant (duplicate xId, corrupt state). Fatal:
    /// the caller must refuse to continue emitting.
    #[error("Invariant violation: {message}")]
    Invariant { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Provider (playlist / guide / tuner source) errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// Non-2xx status from the upstream provider
    #[error("HTTP error: {status} from {url}")]
    Status { status: u16, url: String },

    /// Network-level failure reaching the provider
    #[error("Connection failed: {url}: {message}")]
    Connection { url: String, message: String },

    /// Parsing errors for downloaded source data
    #[error("Parse error: {kind} - {message}")]
    Parse { kind: String, message: String },

    /// The source location is neither a URL nor a readable path
    #[error("Invalid source location: {location}")]
    InvalidLocation { location: String },

    /// The provider id is not configured
    #[error("Unknown provider: {id}")]
    UnknownProvider { id: String },
}

/// Persistence layer errors
#[derive(Error, Debug)]
pub enum PersistError {
    /// Filesystem failures while writing or renaming state files
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failures
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared-stream buffer errors
#[derive(Error, Debug)]
pub enum BufferError {
    /// Upstream returned a non-success status on the initial GET
    #[error("Upstream status {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    /// Transport failed and all resume attempts were exhausted
    #[error("Upstream failed after {retries} retries: {message}")]
    RetriesExhausted { retries: u32, message: String },

    /// The session was torn down while a reader was waiting
    #[error("Stream session closed")]
    SessionClosed,

    /// A reader saw no data within the configured client timeout
    #[error("Client timed out waiting for segment {segment}")]
    ClientTimeout { segment: u64 },

    /// Virtual filesystem failure in the segment store
    #[error("Segment store error: {0}")]
    Store(#[from] std::io::Error),

    /// The stream id does not resolve to an upstream URL
    #[error("Unknown stream id: {id}")]
    UnknownStream { id: String },

    /// Loopback upstreams are rejected unless explicitly allowed
    #[error("Loopback upstream not allowed: {url}")]
    LoopbackForbidden { url: String },
}

impl AppError {
    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invariant violation error
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}

impl SourceError {
    /// Create a parse error
    pub fn parse<K: Into<String>, M: Into<String>>(kind: K, message: M) -> Self {
        Self::Parse {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl PersistError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io<P: Into<String>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
