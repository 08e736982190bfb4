//! Queue-cache correlation at pipeline entry and exit.
//!
//! At entry: the queue-id is pulled out of the newest `Received` header,
//! any Policy-server snapshot under `QUEUE-<id>` is inherited, and a
//! signed scoring header is merged iff its signature verifies. At exit:
//! the current, successor and predecessor entries are (re)written so the
//! log parser can keep correlating.

use std::{path::PathBuf, sync::LazyLock};

use regex::Regex;
use serde::Deserialize;

use decency_common::session::MessageSession;
use decency_filter::{
    PolicyScoringVerifier,
    scoring::{SCORING_HEADER, SCORING_SIGNATURE_HEADER},
};
use decency_spool::{QueueCache, QueueEntry};

/// Queue-id token as the MTA stamps it: `... by mx (Postfix) with ESMTP
/// id 4BF7A21 ...`.
static QUEUE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"E?SMTP id ([A-Z0-9]+)").expect("pattern compiles"));

/// Scoring-handshake settings, read once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Whether a verified `X-Decency-Scoring` header may contribute score.
    pub accept_scoring: bool,
    /// PEM public key matching the Policy server's signing key.
    pub verify_key: Option<PathBuf>,
}

/// Extract the queue-id from the newest `Received` header (the hop that
/// handed the message to us).
pub fn extract_queue_id(session: &mut MessageSession) -> Option<String> {
    let mime = match session.mime() {
        Ok(mime) => mime,
        Err(err) => {
            tracing::debug!("No MIME view for queue-id extraction: {err}");
            return None;
        }
    };

    mime.header_values("Received").find_map(|received| {
        QUEUE_ID
            .captures(received)
            .and_then(|captures| captures.get(1))
            .map(|token| token.as_str().to_string())
    })
}

/// Populate a fresh session from the cache and (optionally) the signed
/// scoring header. Never fails: correlation is best-effort and a message
/// without history simply starts at score zero.
pub async fn correlate(
    session: &mut MessageSession,
    cache: &QueueCache,
    verifier: Option<&PolicyScoringVerifier>,
) {
    if let Some(queue_id) = extract_queue_id(session) {
        session.set_queue_id(queue_id);
    }

    if let Some(queue_id) = session.queue_id().map(ToString::to_string) {
        match cache.get::<QueueEntry>(&QueueEntry::key(&queue_id)).await {
            Ok(Some(entry)) => {
                tracing::debug!(%queue_id, "Inheriting cached scoring session");
                entry.apply_to(session);
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(%queue_id, "Cache read failed: {err}"),
        }
    }

    merge_scoring_header(session, verifier);
}

/// Merge the Policy server's signed score, dropping anything unsigned or
/// forged. `verifier` is `None` when `accept_scoring` is off or no key is
/// configured; the headers are then ignored entirely.
fn merge_scoring_header(session: &mut MessageSession, verifier: Option<&PolicyScoringVerifier>) {
    let Some(verifier) = verifier else {
        return;
    };

    let Ok(mime) = session.mime() else {
        return;
    };

    let payload = mime.header(SCORING_HEADER).map(ToString::to_string);
    let signature = mime.header(SCORING_SIGNATURE_HEADER).map(ToString::to_string);

    let (payload, signature) = match (payload, signature) {
        (Some(payload), Some(signature)) => (payload, signature),
        (Some(_), None) => {
            tracing::error!("Dropping unsigned scoring payload");
            return;
        }
        _ => return,
    };

    match verifier.verify(&payload, &signature) {
        Ok(scoring) => {
            if let Some(queue_id) = session.queue_id()
                && scoring.queue_id != queue_id
            {
                tracing::warn!(
                    header = %scoring.queue_id,
                    session = %queue_id,
                    "Scoring payload is for a different queue-id, ignoring"
                );
                return;
            }

            session.bump_score(scoring.score);
            if scoring.details.is_empty() {
                session.push_spam_detail(format!("policy-scoring: {}", scoring.score));
            } else {
                for detail in scoring.details {
                    session.push_spam_detail(detail);
                }
            }
        }
        Err(err) => {
            tracing::warn!("Ignoring scoring header that failed verification: {err}");
        }
    }
}

/// Persist the session back into the cache: the current entry, a
/// successor entry keyed by the re-injection queue-id, and a refresh of
/// the predecessor so linked entries expire together.
pub async fn persist(session: &MessageSession, cache: &QueueCache) {
    let Some(queue_id) = session.queue_id() else {
        return;
    };

    let entry = QueueEntry::from_session(session);
    if let Err(err) = cache.set(&QueueEntry::key(queue_id), &entry).await {
        tracing::warn!(%queue_id, "Cache write failed: {err}");
    }

    if let Some(next_id) = &session.next_id {
        let successor = QueueEntry {
            queue_id: next_id.clone(),
            prev_id: Some(queue_id.to_string()),
            next_id: None,
            ..entry.clone()
        };
        if let Err(err) = cache.set(&QueueEntry::key(next_id), &successor).await {
            tracing::warn!(%next_id, "Cache write failed: {err}");
        }
    }

    if let Some(prev_id) = &session.prev_id
        && let Err(err) = cache.touch(&QueueEntry::key(prev_id)).await
    {
        tracing::warn!(%prev_id, "Cache touch failed: {err}");
    }
}
