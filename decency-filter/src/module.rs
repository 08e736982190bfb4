//! The contract every filter module satisfies, plus the capability
//! interface for trainable modules.

use std::fmt::Debug;

use async_trait::async_trait;
use decency_common::{
    policy::{SpamBehavior, SpamPolicy},
    session::MessageSession,
    status::PipelineStatus,
};

use crate::signal::FilterSignal;

/// Corpus label used by the offline training driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusLabel {
    Spam,
    Ham,
}

/// A single stage of the content-filter chain.
///
/// Modules are handed the session mutably for the duration of `handle`
/// and must not retain the borrow. A classifying outcome is reported by
/// returning the matching [`FilterSignal`]; plain `Ok(())` means "no
/// opinion, keep going".
#[async_trait]
pub trait FilterModule: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Seconds the engine allows one `handle` call; 0 means unguarded.
    fn timeout(&self) -> u64 {
        0
    }

    /// Skip messages above this many bytes; 0 means no limit.
    fn max_size(&self) -> u64 {
        0
    }

    fn disabled(&self) -> bool {
        false
    }

    async fn handle(&self, session: &mut MessageSession) -> Result<(), FilterSignal>;

    /// Called once per run after the module chain, before disposition.
    /// A returned status replaces the current one.
    async fn hook_pre_finish(
        &self,
        _session: &mut MessageSession,
        _status: PipelineStatus,
    ) -> Option<PipelineStatus> {
        None
    }

    /// Called once per run after disposition, for cleanup or accounting.
    async fn hook_post_finish(&self, _session: &mut MessageSession, _status: PipelineStatus) {}

    /// Capability query: the training driver only talks to modules that
    /// expose this.
    fn as_trainable(&self) -> Option<&dyn Trainable> {
        None
    }
}

/// Capability interface for modules whose backing classifier can learn.
#[async_trait]
pub trait Trainable: Send + Sync {
    fn train_disabled(&self) -> bool {
        false
    }

    async fn train(
        &self,
        session: &mut MessageSession,
        label: CorpusLabel,
    ) -> Result<(), FilterSignal>;

    async fn untrain(
        &self,
        session: &mut MessageSession,
        label: CorpusLabel,
    ) -> Result<(), FilterSignal>;
}

/// Record a module's verdict on the session and decide whether it
/// crosses into a spam classification under the process-wide policy.
///
/// Non-classifying contributions land in the session's detail list here;
/// a classifying one travels inside the returned [`FilterSignal::Spam`]
/// and is appended by the engine, so each contributing module yields
/// exactly one detail entry either way.
///
/// # Errors
/// `FilterSignal::Spam` when the policy says this contribution crosses
/// the line.
pub fn contribute(
    session: &mut MessageSession,
    policy: &SpamPolicy,
    delta: f64,
    detail: String,
) -> Result<(), FilterSignal> {
    let crosses = match policy.behavior {
        SpamBehavior::Ignore => false,
        SpamBehavior::Strict => delta < 0.0,
        SpamBehavior::Scoring => session.spam_score() + delta <= policy.threshold,
    };

    if crosses {
        session.bump_score(delta);
        Err(FilterSignal::Spam(detail))
    } else {
        if delta != 0.0 {
            session.add_spam_score(delta, detail);
        }
        Ok(())
    }
}
