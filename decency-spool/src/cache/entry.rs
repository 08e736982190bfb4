use decency_common::session::MessageSession;
use serde::{Deserialize, Serialize};

/// Snapshot of a scoring session as shared across the daemons.
///
/// Created by the Policy server when it first sees an envelope, inherited
/// by the content filter at pipeline start, rewritten at pipeline end and
/// again by the log parser when it observes queue events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: String,
    pub prev_id: Option<String>,
    pub next_id: Option<String>,
    pub orig_from: Option<String>,
    pub is_bounce: bool,
    pub score: f64,
    pub details: Vec<String>,
    pub flags: Vec<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
}

impl QueueEntry {
    /// Cache key for a queue identifier.
    pub fn key(queue_id: &str) -> String {
        format!("QUEUE-{queue_id}")
    }

    /// Snapshot the session for persistence at pipeline end.
    pub fn from_session(session: &MessageSession) -> Self {
        Self {
            queue_id: session.queue_id().unwrap_or_default().to_string(),
            prev_id: session.prev_id.clone(),
            next_id: session.next_id.clone(),
            orig_from: session.envelope.sender().map(ToString::to_string),
            is_bounce: session.envelope.sender().is_none(),
            score: session.spam_score(),
            details: session.spam_details().to_vec(),
            flags: session.flags().map(ToString::to_string).collect(),
            from: session.envelope.sender().map(ToString::to_string),
            to: session.envelope.recipients().to_vec(),
        }
    }

    /// Merge an inherited entry into a freshly-opened session: score and
    /// details accumulate, flags are unioned, envelope fields only fill
    /// gaps left by the ingress transaction.
    pub fn apply_to(&self, session: &mut MessageSession) {
        if self.score != 0.0 || !self.details.is_empty() {
            let detail = if self.details.is_empty() {
                format!("inherited: {}", self.score)
            } else {
                self.details.join("|")
            };
            session.add_spam_score(self.score, detail);
        }

        for flag in &self.flags {
            session.set_flag(flag.clone());
        }

        if let Some(prev) = &self.prev_id {
            session.prev_id.get_or_insert_with(|| prev.clone());
        }

        if session.envelope.sender().is_none()
            && let Some(from) = &self.from
        {
            let _ = session.envelope.set_sender(from);
        }
    }
}
