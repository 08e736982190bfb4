//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// Errors that can occur while talking SMTP to the downstream listener.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent something that is not an SMTP response.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The peer answered with an error status code.
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    /// The connection was closed mid-dialogue.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
