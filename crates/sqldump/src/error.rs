//! Error types for the export library.

use thiserror::Error;

/// Main error type for export operations.
///
/// The set of kinds is closed; lower-level faults are translated into one
/// of these at the point where they are observed.
#[derive(Error, Debug)]
pub enum DumpError {
    /// Invalid configuration (unknown provider, bad mapping spec, cyclic
    /// template references, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to reach or authenticate against the source database.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The source accepted the connection but rejected or failed the query.
    #[error("Query error: {0}")]
    Query(String),

    /// The source rejected the operation for lack of privileges.
    #[error("Permission error: {0}")]
    Permission(String),

    /// The query is not a read-only statement.
    #[error("Security error: {0}")]
    Security(String),

    /// Schema mismatch or invalid schema (duplicate columns, incompatible
    /// target shape).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Output I/O failure (file creation, write, finalize).
    #[error("Output error: {0}")]
    Output(String),

    /// A transformer failed on a row.
    #[error("Transform error: {0}")]
    Transform(String),

    /// The export was cancelled (SIGINT, etc.)
    #[error("Export cancelled")]
    Cancelled,

    /// Invariant violation inside the pipeline itself.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DumpError {
    /// Map the error to a process exit code.
    ///
    /// 1 for generic failures, 2 for security violations, 130 for
    /// user-initiated cancellation.
    pub fn exit_code(&self) -> u8 {
        match self {
            DumpError::Security(_) => 2,
            DumpError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

impl From<std::io::Error> for DumpError {
    fn from(e: std::io::Error) -> Self {
        DumpError::Output(e.to_string())
    }
}

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, DumpError>;
