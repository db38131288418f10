//! Error types for the typewire domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Only configuration,
//! validation, transport, payment and cancellation errors ever reach the
//! caller of a run; parse failures never become errors at all.

use thiserror::Error;

/// Maximum number of characters of a raw vendor reply kept in an error.
pub const RAW_DUMP_LIMIT: usize = 500;

/// The top-level error type for all typewire operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Input validation ---
    #[error("Input validation failed: {message}")]
    Validation { message: String },

    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Payment errors ---
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Operation cancelled")]
    Cancelled,

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Shorthand for an input validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("{vendor} reply is missing the expected text field: {raw}")]
    MissingReplyField { vendor: String, raw: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl TransportError {
    /// Build a `MissingReplyField` error, truncating the raw reply dump.
    pub fn missing_reply(vendor: impl Into<String>, raw: &str) -> Self {
        TransportError::MissingReplyField {
            vendor: vendor.into(),
            raw: truncate(raw, RAW_DUMP_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Payment required but no wallet is configured: {body}")]
    NoWallet { body: String },

    #[error("Payment still required after paying once: {body}")]
    StillRequired { body: String },

    #[error("Invalid payment demand: {0}")]
    InvalidDemand(String),

    #[error("Request cannot be replayed after payment")]
    NotReplayable,

    #[error("Transfer transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Transfer {signature} not confirmed after {timeout_secs}s")]
    ConfirmationTimeout { signature: String, timeout_secs: u64 },

    #[error("Wallet error: {0}")]
    Wallet(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool discovery failed at {server}: {reason}")]
    DiscoveryFailed { server: String, reason: String },

    #[error("Tool invocation failed: {tool_name}: {reason}")]
    InvocationFailed { tool_name: String, reason: String },

    #[error("Tool not found: {0}")]
    NotFound(String),
}

/// Truncate `text` to at most `limit` characters, marking the cut.
pub fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
