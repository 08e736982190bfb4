//! Generic external-program spam filter.
//!
//! The program receives the message (stdin or `%file%`), and its verdict
//! is read from either a score line in the report (when `score_pattern`
//! is configured) or the exit code: listed codes mean "spam", everything
//! else "innocent". The configured weights translate the verdict into a
//! score delta.

use std::sync::Arc;

use async_trait::async_trait;
use decency_common::{policy::DispositionPolicy, session::MessageSession};
use regex::Regex;
use serde::Deserialize;

use crate::{
    cmd::{CmdFilter, CmdOutput, CommandSpec},
    config::{ModuleInitError, ModuleSettings},
    module::{contribute, CorpusLabel, FilterModule, Trainable},
    signal::FilterSignal,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CommandFilterConfig {
    pub settings: ModuleSettings,
    /// The classification command; `%user%` and `%file%` are substituted.
    pub cmd_filter: Vec<String>,
    /// Optional per-recipient user lookup program.
    #[serde(default)]
    pub cmd_user: Option<Vec<String>>,
    #[serde(default)]
    pub default_user: Option<String>,
    /// Exit codes the program uses to say "this is spam".
    #[serde(default = "default_spam_exit_codes")]
    pub spam_exit_codes: Vec<i32>,
    /// Regex with one capture group extracting a signed score from the
    /// report; overrides the exit-code verdict when it matches.
    #[serde(default)]
    pub score_pattern: Option<String>,
    #[serde(default)]
    pub cmd_learn_spam: Option<Vec<String>>,
    #[serde(default)]
    pub cmd_unlearn_spam: Option<Vec<String>>,
    #[serde(default)]
    pub cmd_learn_ham: Option<Vec<String>>,
    #[serde(default)]
    pub cmd_unlearn_ham: Option<Vec<String>>,
}

fn default_spam_exit_codes() -> Vec<i32> {
    vec![1]
}

#[derive(Debug)]
pub struct CommandFilter {
    settings: ModuleSettings,
    policy: Arc<DispositionPolicy>,
    cmd: CmdFilter,
    cmd_filter: CommandSpec,
    spam_exit_codes: Vec<i32>,
    score_pattern: Option<Regex>,
    cmd_learn_spam: Option<CommandSpec>,
    cmd_unlearn_spam: Option<CommandSpec>,
    cmd_learn_ham: Option<CommandSpec>,
    cmd_unlearn_ham: Option<CommandSpec>,
}

impl CommandFilter {
    /// # Errors
    /// On an empty command or an invalid score pattern; both refuse to
    /// start the daemon.
    pub fn from_config(
        config: CommandFilterConfig,
        cmd: CmdFilter,
        policy: Arc<DispositionPolicy>,
    ) -> Result<Self, ModuleInitError> {
        let name = config.settings.name.clone();

        let optional = |what: &'static str, argv: Option<Vec<String>>| {
            argv.map(|argv| CommandSpec::new(&name, what, argv))
                .transpose()
        };

        let score_pattern = config
            .score_pattern
            .map(|pattern| {
                Regex::new(&pattern).map_err(|source| ModuleInitError::InvalidPattern {
                    module: name.clone(),
                    pattern,
                    source,
                })
            })
            .transpose()?;

        let cmd = cmd
            .with_cmd_user(optional("cmd_user", config.cmd_user)?)
            .with_default_user(config.default_user);

        Ok(Self {
            cmd_filter: CommandSpec::new(&name, "cmd_filter", config.cmd_filter)?,
            cmd_learn_spam: optional("cmd_learn_spam", config.cmd_learn_spam)?,
            cmd_unlearn_spam: optional("cmd_unlearn_spam", config.cmd_unlearn_spam)?,
            cmd_learn_ham: optional("cmd_learn_ham", config.cmd_learn_ham)?,
            cmd_unlearn_ham: optional("cmd_unlearn_ham", config.cmd_unlearn_ham)?,
            score_pattern,
            spam_exit_codes: config.spam_exit_codes,
            settings: config.settings,
            policy,
            cmd,
        })
    }

    /// Translate the report and exit code into a score delta.
    fn handle_filter_result(&self, output: &CmdOutput) -> Result<f64, FilterSignal> {
        if output.report.is_empty() {
            // An empty report means the command is misconfigured, not
            // that the message is clean; contribute nothing.
            return Err(FilterSignal::Failed(
                "filter produced no output, check the command configuration".to_string(),
            ));
        }

        if let Some(pattern) = &self.score_pattern
            && let Some(captures) = pattern.captures(&output.report)
            && let Some(matched) = captures.get(1)
            && let Ok(score) = matched.as_str().parse::<f64>()
        {
            return Ok(score);
        }

        Ok(if self.spam_exit_codes.contains(&output.exit_code) {
            self.settings.weight_spam
        } else {
            self.settings.weight_innocent
        })
    }

    async fn run_training(
        &self,
        spec: Option<&CommandSpec>,
        session: &mut MessageSession,
    ) -> Result<(), FilterSignal> {
        let Some(spec) = spec else {
            return Err(FilterSignal::Failed(
                "no training command configured".to_string(),
            ));
        };

        let user = self.cmd.resolve_user(session, None).await?;
        let output = self.cmd.run(spec, session, user.as_deref()).await?;
        if output.exit_code == 0 {
            Ok(())
        } else {
            Err(FilterSignal::Failed(format!(
                "training command exited with {}",
                output.exit_code
            )))
        }
    }
}

#[async_trait]
impl FilterModule for CommandFilter {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn timeout(&self) -> u64 {
        self.settings.timeout
    }

    fn max_size(&self) -> u64 {
        self.settings.max_size
    }

    fn disabled(&self) -> bool {
        self.settings.disable
    }

    async fn handle(&self, session: &mut MessageSession) -> Result<(), FilterSignal> {
        let user = self.cmd.resolve_user(session, None).await?;
        let output = self
            .cmd
            .run(&self.cmd_filter, session, user.as_deref())
            .await?;

        let delta = self.handle_filter_result(&output)?;
        let detail = format!(
            "{}: score={delta}; exit={}",
            self.settings.name, output.exit_code
        );

        contribute(session, &self.policy.spam, delta, detail)
    }

    fn as_trainable(&self) -> Option<&dyn Trainable> {
        Some(self)
    }
}

#[async_trait]
impl Trainable for CommandFilter {
    fn train_disabled(&self) -> bool {
        self.settings.disable_train
    }

    async fn train(
        &self,
        session: &mut MessageSession,
        label: CorpusLabel,
    ) -> Result<(), FilterSignal> {
        let spec = match label {
            CorpusLabel::Spam => self.cmd_learn_spam.as_ref(),
            CorpusLabel::Ham => self.cmd_learn_ham.as_ref(),
        };
        self.run_training(spec, session).await
    }

    async fn untrain(
        &self,
        session: &mut MessageSession,
        label: CorpusLabel,
    ) -> Result<(), FilterSignal> {
        let spec = match label {
            CorpusLabel::Spam => self.cmd_unlearn_spam.as_ref(),
            CorpusLabel::Ham => self.cmd_unlearn_ham.as_ref(),
        };
        self.run_training(spec, session).await
    }
}
