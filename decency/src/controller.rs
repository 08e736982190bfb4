//! Top-level wiring: configuration in, running daemon (or training run)
//! out. Everything here is startup code, so failures are fatal by design.

use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use serde::Deserialize;
use tokio::sync::broadcast;

use decency_common::{Signal, internal, logging, policy::DispositionPolicy};
use decency_filter::{
    CmdFilter, CorpusLabel, FilterModule, PolicyScoringVerifier,
    modules::{CommandFilter, CommandFilterConfig, VirusFilter, VirusFilterConfig},
    train::{ConsumedAction, TrainingReport, train_corpus},
};
use decency_pipeline::{
    DispositionEngine, Notifier, PipelineEngine, ReinjectConfig, Reinjector, ScoringConfig,
};
use decency_smtp::{Frontend, FrontendConfig};
use decency_spool::{CacheStore, FileCache, MemoryCache, QueueCache, SpoolDirs};

/// Which backend carries the shared queue cache.
#[derive(Debug, Clone, Default, Deserialize)]
pub enum CacheConfig {
    /// In-process only; fine for a single-daemon deployment and tests.
    #[default]
    Memory,
    /// Directory shared with the Policy server and log parser.
    File { dir: PathBuf },
}

/// One configured filter module, in declaration (= execution) order.
#[derive(Debug, Clone, Deserialize)]
pub enum ModuleSpec {
    Command(CommandFilterConfig),
    Antivirus(VirusFilterConfig),
}

#[derive(Debug, Deserialize)]
pub struct Decency {
    frontend: FrontendConfig,
    spool_dir: PathBuf,
    reinject: ReinjectConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    policy: DispositionPolicy,
    #[serde(default)]
    scoring: ScoringConfig,
    #[serde(default, alias = "module")]
    modules: Vec<ModuleSpec>,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(16);
    sender
});

/// Everything the daemon and the training driver share.
#[derive(Debug)]
struct Runtime {
    spool: Arc<SpoolDirs>,
    cache: QueueCache,
    policy: Arc<DispositionPolicy>,
    modules: Vec<Arc<dyn FilterModule>>,
    reinject: ReinjectConfig,
    verifier: Option<PolicyScoringVerifier>,
}

impl Decency {
    fn into_runtime(self) -> anyhow::Result<(Runtime, FrontendConfig)> {
        let spool = Arc::new(SpoolDirs::create(&self.spool_dir)?);

        let store: Arc<dyn CacheStore> = match self.cache {
            CacheConfig::Memory => Arc::new(MemoryCache::new()),
            CacheConfig::File { dir } => Arc::new(FileCache::create(dir)?),
        };
        let cache = QueueCache::new(store);

        let policy = Arc::new(self.policy);

        let verifier = if self.scoring.accept_scoring {
            let key = self.scoring.verify_key.as_deref().ok_or_else(|| {
                anyhow::anyhow!("scoring.accept_scoring is set but scoring.verify_key is not")
            })?;
            Some(PolicyScoringVerifier::from_pem_file(key)?)
        } else {
            None
        };

        let mut modules: Vec<Arc<dyn FilterModule>> = Vec::with_capacity(self.modules.len());
        for spec in self.modules {
            modules.push(build_module(
                spec,
                &spool,
                &cache,
                &policy,
            )?);
        }

        Ok((
            Runtime {
                spool,
                cache,
                policy,
                modules,
                reinject: self.reinject,
                verifier,
            },
            self.frontend,
        ))
    }

    /// Run the content-filter daemon until a shutdown signal arrives.
    ///
    /// # Errors
    /// On any configuration problem (these abort startup) or a fatal
    /// accept-loop failure.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let (runtime, frontend_config) = self.into_runtime()?;

        let reinjector = Reinjector::new(&runtime.reinject);
        let notifier = Notifier::new(runtime.policy.notification.clone())?;
        let disposition = DispositionEngine::new(
            Arc::clone(&runtime.policy),
            Arc::clone(&runtime.spool),
            reinjector,
            notifier,
        );

        let engine = Arc::new(
            PipelineEngine::new(
                runtime.modules,
                runtime.policy,
                disposition,
                runtime.cache,
            )
            .with_verifier(runtime.verifier),
        );

        let frontend = Frontend::bind(&frontend_config, runtime.spool, engine).await?;

        internal!(level = INFO, "Decency content filter running");

        let server = tokio::spawn(frontend.serve(SHUTDOWN_BROADCAST.subscribe()));

        wait_for_shutdown().await?;
        SHUTDOWN_BROADCAST.send(Signal::Shutdown)?;

        server.await??;
        internal!(level = INFO, "Shutting down...");
        Ok(())
    }

    /// Feed a labeled corpus through every trainable module.
    ///
    /// # Errors
    /// On configuration problems or an unreadable corpus directory.
    pub async fn train(
        self,
        corpus: &std::path::Path,
        label: CorpusLabel,
        action: ConsumedAction,
    ) -> anyhow::Result<TrainingReport> {
        logging::init();

        let (runtime, _) = self.into_runtime()?;
        Ok(train_corpus(&runtime.modules, corpus, label, &action).await?)
    }
}

fn build_module(
    spec: ModuleSpec,
    spool: &Arc<SpoolDirs>,
    cache: &QueueCache,
    policy: &Arc<DispositionPolicy>,
) -> anyhow::Result<Arc<dyn FilterModule>> {
    Ok(match spec {
        ModuleSpec::Command(config) => {
            let cmd = CmdFilter::new(
                config.settings.name.clone(),
                Arc::clone(spool),
                cache.clone(),
            );
            Arc::new(CommandFilter::from_config(config, cmd, Arc::clone(policy))?)
        }
        ModuleSpec::Antivirus(config) => {
            let cmd = CmdFilter::new(
                config.settings.name.clone(),
                Arc::clone(spool),
                cache.clone(),
            );
            Arc::new(VirusFilter::from_config(config, cmd)?)
        }
    })
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C received, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    Ok(())
}
