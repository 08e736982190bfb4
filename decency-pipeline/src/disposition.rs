//! Maps the pipeline's terminal status plus the configured policy onto
//! the final action: re-inject (possibly tagged), bounce, delete or
//! quarantine.

use std::sync::Arc;

use decency_common::{
    policy::{DispositionPolicy, SpamHandle, VirusHandle},
    session::MessageSession,
    status::{Disposition, PipelineStatus},
};
use decency_spool::SpoolDirs;

use crate::{notify::Notifier, reinject::Reinjector};

const RESULT_HEADER: &str = "X-Decency-Result";
const SCORE_HEADER: &str = "X-Decency-Score";
const SPAM_INFO_HEADER: &str = "X-Decency-SpamInfo";

pub struct DispositionEngine {
    policy: Arc<DispositionPolicy>,
    spool: Arc<SpoolDirs>,
    reinjector: Reinjector,
    notifier: Notifier,
}

impl DispositionEngine {
    pub fn new(
        policy: Arc<DispositionPolicy>,
        spool: Arc<SpoolDirs>,
        reinjector: Reinjector,
        notifier: Notifier,
    ) -> Self {
        Self {
            policy,
            spool,
            reinjector,
            notifier,
        }
    }

    /// Apply the policy to a finished pipeline run. The returned detail
    /// string becomes the 550 text when the disposition rejects.
    pub async fn dispose(
        &self,
        session: &mut MessageSession,
        status: PipelineStatus,
    ) -> (Disposition, String) {
        match status {
            PipelineStatus::Drop => {
                // Swallowed: the MTA is told 250 and nothing goes
                // downstream.
                (Disposition::Ok, "message dropped".to_string())
            }

            PipelineStatus::Ok => {
                if self.policy.noisy_headers
                    && let Err(err) = stamp(session, "GOOD", true)
                {
                    tracing::error!("Failed to stamp result headers: {err}");
                }
                self.reinject(session).await
            }

            PipelineStatus::Spam => self.dispose_spam(session).await,
            PipelineStatus::Virus => self.dispose_virus(session).await,
        }
    }

    async fn dispose_spam(&self, session: &mut MessageSession) -> (Disposition, String) {
        let detail = format!(
            "spam (score {}): {}",
            session.spam_score(),
            session.spam_info()
        );

        match self.policy.spam.handle {
            SpamHandle::Ignore => self.reinject(session).await,

            SpamHandle::Bounce => (Disposition::Bounce, detail),

            SpamHandle::Delete => {
                self.notifier
                    .notify_removal(&self.reinjector, session, &detail)
                    .await;
                (Disposition::Deleted, detail)
            }

            SpamHandle::Tag => {
                if let Err(err) = stamp(session, "SPAM", self.policy.noisy_headers) {
                    tracing::error!("Failed to stamp spam headers: {err}");
                    return (Disposition::Error, err.to_string());
                }
                if let Some(prefix) = &self.policy.spam.subject_prefix
                    && let Ok(mime) = session.mime()
                {
                    mime.prefix_subject(prefix);
                }
                self.reinject(session).await
            }
        }
    }

    async fn dispose_virus(&self, session: &mut MessageSession) -> (Disposition, String) {
        let label = session.virus().unwrap_or("UNKNOWN").to_string();
        let detail = format!("virus: {label}");

        match self.policy.virus.handle {
            VirusHandle::Ignore => self.reinject(session).await,

            VirusHandle::Bounce => (Disposition::Bounce, detail),

            VirusHandle::Delete => {
                self.notifier
                    .notify_removal(&self.reinjector, session, &detail)
                    .await;
                (Disposition::Deleted, detail)
            }

            VirusHandle::Quarantine => {
                let target = self.spool.quarantine_file(
                    session.envelope.sender().unwrap_or("unknown"),
                    session.envelope.first_recipient().unwrap_or("unknown"),
                );

                match tokio::fs::copy(session.file(), &target).await {
                    Ok(_) => {
                        tracing::info!(
                            virus = %label,
                            quarantined = %target.display(),
                            "Message quarantined"
                        );
                        self.notifier
                            .notify_removal(&self.reinjector, session, &detail)
                            .await;
                        (Disposition::Deleted, detail)
                    }
                    Err(err) => {
                        tracing::error!("Quarantine copy failed: {err}");
                        (Disposition::Error, format!("quarantine failed: {err}"))
                    }
                }
            }
        }
    }

    /// Hand the (possibly rewritten) message to the downstream listener;
    /// on failure keep a copy for manual recovery and report ERROR so the
    /// MTA holds on to the original.
    async fn reinject(&self, session: &mut MessageSession) -> (Disposition, String) {
        let message = match session.message_bytes() {
            Ok(message) => message,
            Err(err) => return self.keep_for_recovery(session, err.to_string()).await,
        };

        let from = session.envelope.sender_or_null().to_string();
        let recipients = session.envelope.recipients().to_vec();

        match self.reinjector.submit(&from, &recipients, &message).await {
            Ok(next_id) => {
                session.next_id = next_id;
                (Disposition::Ok, "re-injected".to_string())
            }
            Err(err) => {
                self.keep_for_recovery(session, format!("re-injection failed: {err}"))
                    .await
            }
        }
    }

    async fn keep_for_recovery(
        &self,
        session: &MessageSession,
        detail: String,
    ) -> (Disposition, String) {
        let target = self.spool.failure_file(session.file());
        if let Err(err) = tokio::fs::copy(session.file(), &target).await {
            tracing::error!("Failed to keep a recovery copy: {err}");
        } else {
            tracing::warn!(kept = %target.display(), "{detail}");
        }

        (Disposition::Error, detail)
    }
}

/// Stamp the result headers. `with_info` additionally records the
/// pipe-delimited per-module rationale.
fn stamp(
    session: &mut MessageSession,
    result: &str,
    with_info: bool,
) -> Result<(), decency_common::session::SessionError> {
    let score = session.spam_score();
    let info = session.spam_info();

    let mime = session.mime()?;
    mime.set_header(RESULT_HEADER, result);
    mime.set_header(SCORE_HEADER, &score.to_string());
    if with_info && !info.is_empty() {
        mime.set_header(SPAM_INFO_HEADER, &info);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use decency_common::{envelope::Envelope, policy::SpamPolicy};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::reinject::ReinjectConfig;

    fn fixture(policy: DispositionPolicy) -> (tempfile::TempDir, DispositionEngine) {
        let dir = tempfile::tempdir().unwrap();
        let spool = Arc::new(SpoolDirs::create(dir.path().join("spool")).unwrap());

        // Port 9 on loopback: nothing listens there, so any test that
        // actually re-injects fails over to the recovery path.
        let reinjector = Reinjector::new(&ReinjectConfig {
            target: "127.0.0.1:9".to_string(),
            helo: "filter.test".to_string(),
        });
        let notifier = Notifier::new(policy.notification.clone()).unwrap();

        let engine = DispositionEngine::new(Arc::new(policy), spool, reinjector, notifier);
        (dir, engine)
    }

    fn session(dir: &tempfile::TempDir) -> MessageSession {
        let path = dir.path().join("spool").join("mail-dispose");
        std::fs::write(&path, b"Subject: hello\r\n\r\nbody\r\n").unwrap();

        let mut envelope = Envelope::default();
        envelope.set_sender("a@x.org").unwrap();
        envelope.add_recipient("b@y.net").unwrap();
        MessageSession::open(path, envelope).unwrap()
    }

    #[tokio::test]
    async fn drop_swallows_without_contacting_downstream() {
        let (dir, engine) = fixture(DispositionPolicy::default());
        let mut session = session(&dir);

        let (disposition, _) = engine.dispose(&mut session, PipelineStatus::Drop).await;
        assert_eq!(disposition, Disposition::Ok);
        assert_eq!(session.next_id, None);
    }

    #[tokio::test]
    async fn spam_bounce_rejects_with_the_score() {
        let (dir, engine) = fixture(DispositionPolicy {
            spam: SpamPolicy {
                handle: SpamHandle::Bounce,
                ..SpamPolicy::default()
            },
            ..DispositionPolicy::default()
        });

        let mut session = session(&dir);
        session.add_spam_score(-160.0, "test: -160");

        let (disposition, detail) = engine.dispose(&mut session, PipelineStatus::Spam).await;
        assert_eq!(disposition, Disposition::Bounce);
        assert!(detail.contains("-160"));
    }

    #[tokio::test]
    async fn spam_delete_is_silent_towards_the_sender() {
        let (dir, engine) = fixture(DispositionPolicy {
            spam: SpamPolicy {
                handle: SpamHandle::Delete,
                ..SpamPolicy::default()
            },
            ..DispositionPolicy::default()
        });

        let mut session = session(&dir);
        let (disposition, _) = engine.dispose(&mut session, PipelineStatus::Spam).await;
        assert_eq!(disposition, Disposition::Deleted);
    }

    #[tokio::test]
    async fn spam_tag_stamps_headers_before_reinjection() {
        let (dir, engine) = fixture(DispositionPolicy {
            spam: SpamPolicy {
                handle: SpamHandle::Tag,
                subject_prefix: Some("[SPAM]".to_string()),
                ..SpamPolicy::default()
            },
            noisy_headers: true,
            ..DispositionPolicy::default()
        });

        let mut session = session(&dir);
        session.add_spam_score(-160.0, "a: -60|b: -100");

        // Downstream refuses (port 9), but the rewrite happened first.
        let (disposition, _) = engine.dispose(&mut session, PipelineStatus::Spam).await;
        assert_eq!(disposition, Disposition::Error);

        let mime = session.mime().unwrap();
        assert_eq!(mime.header(RESULT_HEADER), Some("SPAM"));
        assert_eq!(mime.header(SCORE_HEADER), Some("-160"));
        assert_eq!(mime.header("Subject"), Some("[SPAM] hello"));
    }

    #[tokio::test]
    async fn virus_quarantine_copies_the_spool_file() {
        let (dir, engine) = fixture(DispositionPolicy::default());

        let mut session = session(&dir);
        session.set_virus("Eicar-Test");

        let (disposition, detail) = engine.dispose(&mut session, PipelineStatus::Virus).await;
        assert_eq!(disposition, Disposition::Deleted);
        assert!(detail.contains("Eicar-Test"));

        let quarantine = dir.path().join("spool").join("quarantine");
        let entries: Vec<_> = std::fs::read_dir(&quarantine).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(name.contains("_FROM_a-at-x.org_TO_b-at-y.net-"));
    }

    #[tokio::test]
    async fn reinject_failure_keeps_a_recovery_copy() {
        let (dir, engine) = fixture(DispositionPolicy::default());

        let mut session = session(&dir);
        let (disposition, detail) = engine.dispose(&mut session, PipelineStatus::Ok).await;

        assert_eq!(disposition, Disposition::Error);
        assert!(detail.contains("re-injection failed"));

        let failure = dir.path().join("spool").join("failure");
        assert_eq!(std::fs::read_dir(&failure).unwrap().count(), 1);
    }
}
