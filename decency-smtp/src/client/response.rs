//! SMTP response representation and line parsing.

use super::error::{ClientError, Result};

/// A complete SMTP response, possibly multi-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The SMTP status code.
    pub code: u16,
    /// All message lines in the response.
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The message lines joined with newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// `true` for 2xx codes.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// `true` for the 354 "start mail input" reply.
    #[must_use]
    pub const fn is_data_go_ahead(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// `true` for 5xx codes.
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parse one response line into `(code, is_last, message)`.
    ///
    /// # Errors
    /// `ClientError::ParseError` when the line does not follow
    /// `NNN[- ]text`.
    pub fn parse_line(line: &str) -> Result<(u16, bool, String)> {
        if line.len() < 3 {
            return Err(ClientError::ParseError(format!(
                "response line too short: {line:?}"
            )));
        }

        let code = line[..3]
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("invalid status code: {line:?}")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(other) => {
                return Err(ClientError::ParseError(format!(
                    "invalid separator {:?} in {line:?}",
                    char::from(*other)
                )));
            }
        };

        let message = line.get(4..).unwrap_or_default().to_string();
        Ok((code, is_last, message))
    }
}
