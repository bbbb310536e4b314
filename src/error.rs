use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BifrostError>;

/// Unified error type for the whole router.
#[derive(Debug, Clone, Error)]
pub enum BifrostError {
    // IO errors
    #[error("IO error: {0}")]
    Io(String),
    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),

    // Configuration errors, rejected at startup
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("Invalid upstream address: {0}")]
    InvalidUpstreamAddress(String),
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("Invalid cache size: {0}")]
    InvalidCacheSize(String),
    #[error("Unknown plugin type: {0}")]
    UnknownPluginType(String),
    #[error("Unknown plugin reference: {0}")]
    UnknownPluginReference(String),
    #[error("Duplicate plugin tag: {0}")]
    DuplicatePluginTag(String),
    #[error("Unknown jump target: {0}")]
    UnknownJumpTarget(String),
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
    #[error("Invalid plugin args for {0}: {1}")]
    InvalidPluginArgs(String, String),
    #[error("Configuration parse error: {0}")]
    ConfigParseError(String),

    // Wire format errors
    #[error("Message parse error: {0}")]
    ParseError(String),
    #[error("Message pack error: {0}")]
    PackError(String),

    // Query-time errors
    #[error("Operation timed out")]
    Timeout,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Pipeline depth exceeded")]
    PipelineDepthExceeded,
    #[error("No upstream produced a response")]
    NoUpstreamResponse,
    #[error("Upstream {0} exchange failed: {1}")]
    UpstreamExchange(String, String),
    #[error("Fallback failed: both branches produced no response")]
    FallbackFailed,
    #[error("Coalesced query produced no response")]
    EmptyCoalescedResponse,

    // Server state errors
    #[error("Server is shutting down")]
    ServerShutdown,
}

impl From<std::io::Error> for BifrostError {
    fn from(err: std::io::Error) -> Self {
        BifrostError::IoError(Arc::new(err))
    }
}

impl From<crate::dns::ParseError> for BifrostError {
    fn from(err: crate::dns::ParseError) -> Self {
        BifrostError::ParseError(err.to_string())
    }
}
