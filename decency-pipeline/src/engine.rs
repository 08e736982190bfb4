//! Ordered execution of the filter module chain.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use decency_common::{
    internal,
    policy::DispositionPolicy,
    session::MessageSession,
    status::{Disposition, PipelineStatus},
};
use decency_filter::{FilterModule, FilterSignal, PolicyScoringVerifier};
use decency_smtp::{MessageHandler, SpooledMessage, Verdict};
use decency_spool::QueueCache;

use crate::{correlate, disposition::DispositionEngine};

pub struct PipelineEngine {
    modules: Vec<Arc<dyn FilterModule>>,
    policy: Arc<DispositionPolicy>,
    disposition: DispositionEngine,
    cache: QueueCache,
    verifier: Option<PolicyScoringVerifier>,
}

impl PipelineEngine {
    pub fn new(
        modules: Vec<Arc<dyn FilterModule>>,
        policy: Arc<DispositionPolicy>,
        disposition: DispositionEngine,
        cache: QueueCache,
    ) -> Self {
        Self {
            modules,
            policy,
            disposition,
            cache,
            verifier: None,
        }
    }

    /// Accept verified Policy-server scoring headers.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Option<PolicyScoringVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn policy(&self) -> &DispositionPolicy {
        &self.policy
    }

    /// One full pipeline run over an owned session.
    pub async fn run(&self, session: &mut MessageSession) -> (Disposition, String) {
        correlate::correlate(session, &self.cache, self.verifier.as_ref()).await;

        let mut status = self.run_modules(session).await;

        for module in &self.modules {
            if let Some(mutated) = module.hook_pre_finish(session, status).await {
                status = mutated;
            }
        }

        let (disposition, detail) = self.disposition.dispose(session, status).await;

        for module in &self.modules {
            module.hook_post_finish(session, status).await;
        }

        correlate::persist(session, &self.cache).await;
        cleanup_spool(session).await;

        internal!(
            level = INFO,
            "{} queue_id={:?} status={status} disposition={disposition} score={}",
            session.id(),
            session.queue_id(),
            session.spam_score()
        );

        (disposition, detail)
    }

    async fn run_modules(&self, session: &mut MessageSession) -> PipelineStatus {
        let mut status = PipelineStatus::Ok;

        for module in &self.modules {
            if module.disabled() {
                continue;
            }

            let max_size = module.max_size();
            if max_size > 0 && session.file_size() > max_size {
                let signal = FilterSignal::FileTooBig {
                    size: session.file_size(),
                    limit: max_size,
                };
                tracing::debug!(module = module.name(), "Skipping: {signal}");
                continue;
            }

            let score_before = session.spam_score();
            let started = Instant::now();

            let outcome = if module.timeout() > 0 {
                // One grace second on top of the module's own limit.
                let deadline = Duration::from_secs(module.timeout() + 1);
                match tokio::time::timeout(deadline, module.handle(session)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FilterSignal::Timeout(module.timeout())),
                }
            } else {
                module.handle(session).await
            };

            let mut finished = false;
            match outcome {
                Ok(()) => {}

                Err(FilterSignal::Spam(detail)) => {
                    session.push_spam_detail(detail);
                    // A virus found earlier in this run outranks spam.
                    status = if session.virus().is_some() {
                        PipelineStatus::Virus
                    } else {
                        PipelineStatus::Spam
                    };
                    finished = true;
                }

                Err(FilterSignal::Virus(label)) => {
                    session.push_spam_detail(format!("{}: {label}", module.name()));
                    session.set_virus(label);
                    status = PipelineStatus::Virus;
                    finished = true;
                }

                Err(FilterSignal::Drop) => {
                    status = PipelineStatus::Drop;
                    finished = true;
                }

                Err(signal @ FilterSignal::Timeout(_)) => {
                    tracing::error!(module = module.name(), "{signal}");
                }

                Err(signal @ FilterSignal::FileTooBig { .. }) => {
                    tracing::debug!(module = module.name(), "{signal}");
                }

                Err(FilterSignal::Failed(reason)) => {
                    tracing::error!(module = module.name(), "Module failed: {reason}");
                }
            }

            let delta = session.spam_score() - score_before;
            tracing::info!(
                target: "decency::stats",
                module = module.name(),
                status = %status,
                delta,
                elapsed_ms = started.elapsed().as_millis() as u64,
            );

            if finished {
                break;
            }
        }

        status
    }
}

/// Remove the spool file and its sidecar; disposition already copied
/// whatever needs to survive (quarantine, failure recovery).
async fn cleanup_spool(session: &MessageSession) {
    let sidecar = decency_spool::Sidecar::path_for(session.file());
    if let Err(err) = tokio::fs::remove_file(session.file()).await {
        tracing::warn!("Failed to remove spool file: {err}");
    }
    let _ = tokio::fs::remove_file(sidecar).await;
}

#[async_trait]
impl MessageHandler for PipelineEngine {
    async fn handle(&self, message: SpooledMessage) -> Verdict {
        let mut session = match MessageSession::open(message.file, message.envelope) {
            Ok(session) => session,
            Err(err) => {
                tracing::error!("Cannot open session over spooled message: {err}");
                return Verdict::reject("content filter failure");
            }
        };

        let (disposition, detail) = self.run(&mut session).await;
        if disposition.accepts() {
            Verdict::accept()
        } else {
            Verdict::reject(detail)
        }
    }
}
