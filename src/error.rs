use thiserror::Error;

/// Failures of a single probe execution or of engine setup.
///
/// Transport variants are folded into `ProbeResult::error` by the engine and
/// never escape a probing task.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("connection timed out after {0}ms")]
    ConnectTimeout(u64),

    #[error("address resolution failed for {target}: {reason}")]
    Resolve { target: String, reason: String },

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("read timed out after {0}ms")]
    ReadTimeout(u64),

    #[error("read failed: connection closed without data")]
    EmptyResponse,

    #[error("probe {probe} exceeded its {secs}s deadline")]
    ProbeDeadline { probe: String, secs: u64 },

    #[error("probing cancelled")]
    Cancelled,

    #[error("probing timed out after {0}ms")]
    Timeout(u64),

    #[error("concurrency limiter closed")]
    LimiterClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while registering probe definitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("not a probe line: {0}")]
    NotAProbeLine(String),

    #[error("invalid probe format: {0}")]
    InvalidFormat(String),

    #[error("unsupported transport type: {0}")]
    UnsupportedTransport(String),

    #[error("malformed escape sequence at offset {offset}: {reason}")]
    MalformedEscape { offset: usize, reason: String },

    #[error("invalid port list: {0}")]
    InvalidPorts(String),

    #[error("probe {0} already registered")]
    Duplicate(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed {protocol} frame: {reason}")]
    Malformed {
        protocol: &'static str,
        reason: String,
    },
}
