//! Error types for ponder operations.
//!
//! Errors carry a structured [`ErrorCode`] so callers can tell retryable
//! failures (timeouts, flaky collaborators) apart from broken invariants.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for ponder operations.
pub type PonderResult<T> = Result<T, PonderError>;

/// Main error type for all ponder operations.
#[derive(Error, Debug)]
pub enum PonderError {
    /// An external call did not finish within its deadline.
    #[error("Timeout: {operation} did not complete within {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
        code: ErrorCode,
    },

    /// Interpretation of raw events failed.
    #[error("Interpretation error: {message}")]
    Interpretation {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Response generation failed.
    #[error("Generation error: {message}")]
    Generation {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Embedding generation failed.
    #[error("Embedding error: {message}")]
    Embedding {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Day summarisation failed.
    #[error("Summarization error: {message}")]
    Summarization {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A tool backend reported a failure.
    #[error("Tool error: {tool}: {message}")]
    Tool {
        tool: String,
        message: String,
        code: ErrorCode,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A component detected a broken internal invariant.
    #[error("Invariant violation in {component}: {message}")]
    InvariantViolation {
        component: &'static str,
        message: String,
        code: ErrorCode,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Timeout (TMO_xxx)
    TmoExternalCall,

    // Interpretation (INT_xxx)
    InterpFailed,
    InterpCountMismatch,

    // Generation (GEN_xxx)
    GenFailed,

    // Embedding (EMB_xxx)
    EmbGenerationFailed,
    EmbEmptyVector,

    // Summarization (SUM_xxx)
    SumFailed,

    // Tool (TOOL_xxx)
    ToolNotFound,
    ToolExecutionFailed,

    // Database (DB_xxx)
    DbConnectionFailed,
    DbOperationFailed,

    // Invariants (INV_xxx)
    InvCapacityExceeded,
    InvIllegalTransition,
    InvDuplicateId,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TmoExternalCall => "TMO_001",
            ErrorCode::InterpFailed => "ITP_001",
            ErrorCode::InterpCountMismatch => "ITP_002",
            ErrorCode::GenFailed => "GEN_001",
            ErrorCode::EmbGenerationFailed => "EMB_001",
            ErrorCode::EmbEmptyVector => "EMB_002",
            ErrorCode::SumFailed => "SUM_001",
            ErrorCode::ToolNotFound => "TOOL_001",
            ErrorCode::ToolExecutionFailed => "TOOL_002",
            ErrorCode::DbConnectionFailed => "DB_001",
            ErrorCode::DbOperationFailed => "DB_002",
            ErrorCode::InvCapacityExceeded => "INV_001",
            ErrorCode::InvIllegalTransition => "INV_002",
            ErrorCode::InvDuplicateId => "INV_003",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PonderError {
    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
            code: ErrorCode::TmoExternalCall,
        }
    }

    /// Create an interpretation error.
    pub fn interpretation(message: impl Into<String>) -> Self {
        Self::Interpretation {
            message: message.into(),
            code: ErrorCode::InterpFailed,
            source: None,
        }
    }

    /// Create a generation error.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            code: ErrorCode::GenFailed,
            source: None,
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            code: ErrorCode::EmbGenerationFailed,
            source: None,
        }
    }

    /// Create a summarization error.
    pub fn summarization(message: impl Into<String>) -> Self {
        Self::Summarization {
            message: message.into(),
            code: ErrorCode::SumFailed,
            source: None,
        }
    }

    /// Create a tool error.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
            code: ErrorCode::ToolExecutionFailed,
        }
    }

    /// Create a tool-not-found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        let tool = tool.into();
        Self::Tool {
            message: format!("no tool registered under '{}'", tool),
            tool,
            code: ErrorCode::ToolNotFound,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create an invariant violation error.
    pub fn invariant(component: &'static str, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            component,
            message: message.into(),
            code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { code, .. } => *code,
            Self::Interpretation { code, .. } => *code,
            Self::Generation { code, .. } => *code,
            Self::Embedding { code, .. } => *code,
            Self::Summarization { code, .. } => *code,
            Self::Tool { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::InvariantViolation { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether the failed operation may succeed if attempted again.
    ///
    /// Invariant violations and configuration problems are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Interpretation { .. }
                | Self::Generation { .. }
                | Self::Embedding { .. }
                | Self::Summarization { .. }
                | Self::Tool { .. }
        )
    }

    /// Whether this error reports a broken invariant.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

impl From<rusqlite::Error> for PonderError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}
