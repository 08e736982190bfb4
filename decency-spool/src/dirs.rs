//! Spool directory layout.
//!
//! ```text
//! spool_dir/
//!   mail-<ulid>         raw received message
//!   mail-<ulid>.info    sidecar: envelope metadata (from/to/size)
//!   temp/               per-filter scratch files
//!   queue/              in-flight (reserved)
//!   mime/               MIME scratch
//!   failure/            re-inject failures kept for manual recovery
//!   quarantine/         virus-quarantined messages
//! ```
//!
//! Uniqueness of every file created here comes from ULID suffixes, so
//! concurrent workers never collide.

use std::path::{Path, PathBuf};

use decency_common::envelope::Envelope;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Result, SpoolError};

const SIDECAR_SUFFIX: &str = "info";

#[derive(Debug, Clone)]
pub struct SpoolDirs {
    root: PathBuf,
    temp: PathBuf,
    queue: PathBuf,
    mime: PathBuf,
    failure: PathBuf,
    quarantine: PathBuf,
}

impl SpoolDirs {
    /// Create (or adopt) the spool layout under `root`.
    ///
    /// # Errors
    /// If `root` exists but is not a directory, or any subdirectory
    /// cannot be created.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.exists() && !root.is_dir() {
            return Err(SpoolError::NotDirectory(root));
        }

        let dirs = Self {
            temp: root.join("temp"),
            queue: root.join("queue"),
            mime: root.join("mime"),
            failure: root.join("failure"),
            quarantine: root.join("quarantine"),
            root,
        };

        for dir in [
            &dirs.root,
            &dirs.temp,
            &dirs.queue,
            &dirs.mime,
            &dirs.failure,
            &dirs.quarantine,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| SpoolError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(dirs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp(&self) -> &Path {
        &self.temp
    }

    pub fn queue(&self) -> &Path {
        &self.queue
    }

    pub fn mime(&self) -> &Path {
        &self.mime
    }

    pub fn failure(&self) -> &Path {
        &self.failure
    }

    pub fn quarantine(&self) -> &Path {
        &self.quarantine
    }

    /// A fresh, unique spool file path for an incoming message.
    pub fn spool_file(&self) -> PathBuf {
        self.root.join(format!("mail-{}", Ulid::new()))
    }

    /// A fresh scratch file under `temp/` for filter output capture.
    pub fn scratch_file(&self, prefix: &str) -> PathBuf {
        self.temp.join(format!("{prefix}-{}", Ulid::new()))
    }

    /// A fresh scratch file under `mime/` for materialized message copies.
    pub fn mime_file(&self) -> PathBuf {
        self.mime.join(format!("mime-{}", Ulid::new()))
    }

    /// Target path for a quarantined message:
    /// `quarantine/<timestamp>_FROM_<from>_TO_<to>-<ulid>`.
    pub fn quarantine_file(&self, from: &str, to: &str) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        self.quarantine.join(format!(
            "{stamp}_FROM_{}_TO_{}-{}",
            mangle_address(from),
            mangle_address(to),
            Ulid::new()
        ))
    }

    /// Target path under `failure/` for a message whose re-injection failed.
    pub fn failure_file(&self, spool_file: &Path) -> PathBuf {
        let name = spool_file
            .file_name()
            .map_or_else(|| "mail-unknown".to_string(), |name| {
                name.to_string_lossy().into_owned()
            });
        self.failure.join(name)
    }
}

/// Make a mail address filesystem-safe: `@` becomes `-at-`, anything
/// outside `[A-Za-z0-9._-]` becomes `_`.
fn mangle_address(address: &str) -> String {
    let mut out = String::with_capacity(address.len() + 4);
    for ch in address.chars() {
        match ch {
            '@' => out.push_str("-at-"),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}

/// Envelope metadata written next to each spool file so operators can
/// recover messages by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    pub from: Option<String>,
    pub to: Vec<String>,
    pub size: u64,
}

impl Sidecar {
    pub fn from_envelope(envelope: &Envelope, size: u64) -> Self {
        Self {
            from: envelope.sender().map(ToString::to_string),
            to: envelope.recipients().to_vec(),
            size,
        }
    }

    pub fn envelope(&self) -> Envelope {
        Envelope::new(self.from.clone(), self.to.clone())
    }

    /// Sidecar path for a spool file (`mail-…` → `mail-….info`).
    pub fn path_for(spool_file: &Path) -> PathBuf {
        let mut path = spool_file.as_os_str().to_owned();
        path.push(".");
        path.push(SIDECAR_SUFFIX);
        PathBuf::from(path)
    }

    /// # Errors
    /// If the sidecar cannot be serialized or written.
    pub fn write(&self, spool_file: &Path) -> Result<()> {
        let path = Self::path_for(spool_file);
        let contents = serde_json::to_vec_pretty(self).map_err(|source| SpoolError::Sidecar {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, contents).map_err(|source| SpoolError::Io { path, source })
    }

    /// # Errors
    /// If the sidecar is missing or malformed.
    pub fn read(spool_file: &Path) -> Result<Self> {
        let path = Self::path_for(spool_file);
        let contents =
            std::fs::read(&path).map_err(|source| SpoolError::Io {
                path: path.clone(),
                source,
            })?;
        serde_json::from_slice(&contents).map_err(|source| SpoolError::Sidecar { path, source })
    }
}
