//! Per-message scoring session.
//!
//! One [`MessageSession`] exists per pipeline run. The engine owns it and
//! lends it mutably to each filter module in turn; modules accumulate
//! score, details and flags on it and must not retain the borrow.

use std::path::{Path, PathBuf};

use ahash::AHashSet;

use crate::{
    envelope::Envelope,
    mime::{MimeError, MimeMessage},
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to read spool file {path}: {source}")]
    Spool {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Mime(#[from] MimeError),
}

#[derive(Debug)]
pub struct MessageSession {
    /// Stable identifier, derived from the spool file name.
    id: String,
    /// The MTA's queue identifier; immutable once captured.
    queue_id: Option<String>,
    /// Predecessor queue-id when the MTA rewrote the message into this one.
    pub prev_id: Option<String>,
    /// Successor queue-id learned from the re-injection reply.
    pub next_id: Option<String>,
    file: PathBuf,
    file_size: u64,
    pub envelope: Envelope,
    mime: Option<MimeMessage>,
    spam_score: f64,
    spam_details: Vec<String>,
    virus: Option<String>,
    flags: AHashSet<String>,
}

impl MessageSession {
    /// Open a session over an already-spooled message.
    ///
    /// # Errors
    /// If the spool file cannot be stat'ed.
    pub fn open(file: impl Into<PathBuf>, envelope: Envelope) -> Result<Self, SessionError> {
        let file = file.into();
        let file_size = std::fs::metadata(&file)
            .map_err(|source| SessionError::Spool {
                path: file.clone(),
                source,
            })?
            .len();

        let id = file
            .file_name()
            .map_or_else(|| "mail-unknown".to_string(), |name| {
                name.to_string_lossy().into_owned()
            });

        Ok(Self {
            id,
            queue_id: None,
            prev_id: None,
            next_id: None,
            file,
            file_size,
            envelope,
            mime: None,
            spam_score: 0.0,
            spam_details: Vec::new(),
            virus: None,
            flags: AHashSet::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn queue_id(&self) -> Option<&str> {
        self.queue_id.as_deref()
    }

    /// Record the queue-id. The first capture wins; later attempts are
    /// ignored so the correlation key can never change mid-run.
    pub fn set_queue_id(&mut self, queue_id: impl Into<String>) {
        if self.queue_id.is_none() {
            self.queue_id = Some(queue_id.into());
        }
    }

    pub const fn spam_score(&self) -> f64 {
        self.spam_score
    }

    /// Apply a signed score delta with its per-module rationale.
    pub fn add_spam_score(&mut self, delta: f64, detail: impl Into<String>) {
        self.bump_score(delta);
        self.push_spam_detail(detail);
    }

    /// Apply a signed score delta without a rationale entry. Used when
    /// the rationale travels separately, e.g. inside a classification
    /// signal the engine appends itself.
    pub fn bump_score(&mut self, delta: f64) {
        self.spam_score += delta;
    }

    pub fn push_spam_detail(&mut self, detail: impl Into<String>) {
        self.spam_details.push(detail.into());
    }

    pub fn spam_details(&self) -> &[String] {
        &self.spam_details
    }

    /// Pipe-delimited rationale, as stamped into `X-Decency-SpamInfo`.
    pub fn spam_info(&self) -> String {
        self.spam_details.join("|")
    }

    pub fn virus(&self) -> Option<&str> {
        self.virus.as_deref()
    }

    pub fn set_virus(&mut self, label: impl Into<String>) {
        self.virus = Some(label.into());
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: impl Into<String>) {
        self.flags.insert(flag.into());
    }

    pub fn del_flag(&mut self, flag: &str) {
        self.flags.remove(flag);
    }

    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }

    /// The lazily-parsed MIME view. First access reads the spool file;
    /// later accesses (including header mutation) reuse the cached copy.
    ///
    /// # Errors
    /// If the spool file cannot be read or its header block is unparseable.
    pub fn mime(&mut self) -> Result<&mut MimeMessage, SessionError> {
        let mime = match self.mime.take() {
            Some(mime) => mime,
            None => {
                let raw = std::fs::read(&self.file).map_err(|source| SessionError::Spool {
                    path: self.file.clone(),
                    source,
                })?;
                MimeMessage::parse(&raw)?
            }
        };

        Ok(self.mime.insert(mime))
    }

    /// The message as it should leave the filter: the rewritten MIME copy
    /// when headers were touched, the raw spool bytes otherwise.
    ///
    /// # Errors
    /// If the spool file cannot be read.
    pub fn message_bytes(&self) -> Result<Vec<u8>, SessionError> {
        self.mime.as_ref().map_or_else(
            || {
                std::fs::read(&self.file).map_err(|source| SessionError::Spool {
                    path: self.file.clone(),
                    source,
                })
            },
            |mime| Ok(mime.to_bytes()),
        )
    }
}
