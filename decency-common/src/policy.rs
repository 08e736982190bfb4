//! Process-wide disposition policy.
//!
//! Deserialized once at startup from the daemon configuration and passed
//! as an immutable context into the pipeline; nothing mutates it afterwards.

use serde::Deserialize;

/// How spam classification is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpamBehavior {
    /// Run the modules for their side effects but never classify.
    Ignore,
    /// Any negative score delta terminates the run as spam.
    Strict,
    /// Compare the cumulative score against [`SpamPolicy::threshold`].
    #[default]
    Scoring,
}

/// What to do with a message once it has been classified as spam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpamHandle {
    /// Stamp headers (and optionally the Subject) and re-inject.
    #[default]
    Tag,
    /// Reject towards the MTA so it generates the DSN.
    Bounce,
    /// Swallow the message silently.
    Delete,
    /// Re-inject unmodified.
    Ignore,
}

/// What to do with a message carrying a virus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VirusHandle {
    /// Re-inject unmodified.
    Ignore,
    /// Reject towards the MTA.
    Bounce,
    /// Swallow the message.
    Delete,
    /// Copy the spool file into the quarantine directory, then delete.
    #[default]
    Quarantine,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpamPolicy {
    pub behavior: SpamBehavior,
    /// Spam when the cumulative score is at or below this value
    /// (more-negative = more-spammy). Only meaningful under `scoring`.
    pub threshold: f64,
    pub handle: SpamHandle,
    /// Prefix prepended to the Subject header in tag mode.
    pub subject_prefix: Option<String>,
}

impl Default for SpamPolicy {
    fn default() -> Self {
        Self {
            behavior: SpamBehavior::default(),
            threshold: -100.0,
            handle: SpamHandle::default(),
            subject_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VirusPolicy {
    pub handle: VirusHandle,
}

/// Who gets a synthesized notification message, and from what template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationPolicy {
    pub notify_sender: bool,
    pub notify_recipient: bool,
    /// Sender address used on synthesized notifications.
    pub from: Option<String>,
    /// Optional template file; `%from%`, `%to%`, `%reason%` are substituted.
    pub template: Option<std::path::PathBuf>,
}

impl NotificationPolicy {
    pub const fn is_enabled(&self) -> bool {
        self.notify_sender || self.notify_recipient
    }
}

/// The complete disposition policy, one per process.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispositionPolicy {
    pub spam: SpamPolicy,
    pub virus: VirusPolicy,
    pub notification: NotificationPolicy,
    /// Stamp result/score/details headers even on clean messages.
    pub noisy_headers: bool,
}
