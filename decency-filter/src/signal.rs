//! Signal taxonomy raised by filter modules and the engine's guards.
//!
//! These are the tagged variants the pipeline dispatches on: the first
//! three classify and stop the run, the rest are logged and skipped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterSignal {
    /// The module classified the message as spam.
    #[error("{0}")]
    Spam(String),

    /// The module found a virus; the payload is the scanner's label.
    #[error("{0}")]
    Virus(String),

    /// The module wants the message silently swallowed.
    #[error("message dropped")]
    Drop,

    /// The engine's per-module deadline fired.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// The message exceeds the module's declared size limit.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    FileTooBig { size: u64, limit: u64 },

    /// Anything else: broken command, unreadable spool file, cache
    /// trouble. Never classifies, never crashes the worker.
    #[error("{0}")]
    Failed(String),
}

impl FilterSignal {
    /// Whether this signal terminates the module chain.
    pub const fn classifies(&self) -> bool {
        matches!(self, Self::Spam(_) | Self::Virus(_) | Self::Drop)
    }
}

impl From<std::io::Error> for FilterSignal {
    fn from(err: std::io::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<decency_spool::CacheError> for FilterSignal {
    fn from(err: decency_spool::CacheError) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<decency_common::session::SessionError> for FilterSignal {
    fn from(err: decency_common::session::SessionError) -> Self {
        Self::Failed(err.to_string())
    }
}
