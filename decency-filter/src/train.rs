//! Offline training driver.
//!
//! Feeds a labeled corpus directory into every trainable module. A module
//! that already classifies a sample correctly is skipped; the rest get
//! their training command invoked, and per-module counts land in three
//! buckets: `not_required`, `trained`, `errors`.

use std::path::{Path, PathBuf};

use decency_common::{envelope::Envelope, session::MessageSession};

use crate::{
    module::{CorpusLabel, FilterModule},
    signal::FilterSignal,
};

/// What happens to a corpus file once every module has seen it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumedAction {
    Keep,
    Delete,
    MoveTo(PathBuf),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainingOutcome {
    /// The module already classified the sample correctly.
    pub not_required: usize,
    /// The training command ran and exited cleanly.
    pub trained: usize,
    /// The module or its training command failed on the sample.
    pub errors: usize,
}

#[derive(Debug, Default)]
pub struct TrainingReport {
    /// Per-module buckets, in module declaration order.
    pub modules: Vec<(String, TrainingOutcome)>,
    /// Corpus files fed through the modules.
    pub files: usize,
}

impl TrainingReport {
    fn bucket(&mut self, module: &str) -> &mut TrainingOutcome {
        if let Some(index) = self.modules.iter().position(|(name, _)| name == module) {
            return &mut self.modules[index].1;
        }
        self.modules.push((module.to_string(), TrainingOutcome::default()));
        let last = self.modules.len() - 1;
        &mut self.modules[last].1
    }
}

/// Whether the module's own verdict on the sample already matches the
/// corpus label: a spam sample must score negative (or classify), a ham
/// sample must stay non-negative and unclassified.
fn classified_correctly(
    label: CorpusLabel,
    delta: f64,
    outcome: &Result<(), FilterSignal>,
) -> bool {
    let classified = matches!(outcome, Err(signal) if signal.classifies());
    match label {
        CorpusLabel::Spam => classified || delta < 0.0,
        CorpusLabel::Ham => !classified && delta >= 0.0,
    }
}

/// Drive one corpus directory through every trainable module.
///
/// # Errors
/// Only if the corpus directory itself is unreadable. Per-file and
/// per-module failures are counted, logged and skipped.
pub async fn train_corpus(
    modules: &[std::sync::Arc<dyn FilterModule>],
    corpus: &Path,
    label: CorpusLabel,
    action: &ConsumedAction,
) -> std::io::Result<TrainingReport> {
    let mut report = TrainingReport::default();

    if let ConsumedAction::MoveTo(target) = action {
        std::fs::create_dir_all(target)?;
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(corpus)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let mut session = match MessageSession::open(&path, Envelope::default()) {
            Ok(session) => session,
            Err(err) => {
                tracing::error!(file = %path.display(), "Skipping unreadable corpus file: {err}");
                continue;
            }
        };
        report.files += 1;

        for module in modules {
            let Some(trainable) = module.as_trainable() else {
                continue;
            };
            if module.disabled() || trainable.train_disabled() {
                continue;
            }

            let score_before = session.spam_score();
            let outcome = module.handle(&mut session).await;
            let delta = session.spam_score() - score_before;

            let bucket = report.bucket(module.name());
            if classified_correctly(label, delta, &outcome) {
                bucket.not_required += 1;
                continue;
            }

            match trainable.train(&mut session, label).await {
                Ok(()) => bucket.trained += 1,
                Err(err) => {
                    bucket.errors += 1;
                    tracing::error!(
                        module = module.name(),
                        file = %path.display(),
                        "Training failed: {err}"
                    );
                }
            }
        }

        consume(&path, action);
    }

    Ok(report)
}

fn consume(path: &Path, action: &ConsumedAction) {
    let result = match action {
        ConsumedAction::Keep => Ok(()),
        ConsumedAction::Delete => std::fs::remove_file(path),
        ConsumedAction::MoveTo(target) => {
            let destination = target.join(
                path.file_name()
                    .map_or_else(|| "corpus-file".into(), ToOwned::to_owned),
            );
            std::fs::rename(path, destination)
        }
    };

    if let Err(err) = result {
        tracing::warn!(file = %path.display(), "Failed to consume corpus file: {err}");
    }
}
