//! Shared plumbing for modules that delegate classification to an
//! external program (DSPAM-alikes, SpamAssassin-alikes, virus scanners).
//!
//! Placeholders `%user%` and `%file%` are substituted per argv element,
//! never through a shell, so message content and recipient addresses can
//! not smuggle shell syntax into the command line.

use std::{path::Path, process::Stdio, sync::Arc};

use decency_common::session::MessageSession;
use decency_spool::{QueueCache, SpoolDirs};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::{config::ModuleInitError, signal::FilterSignal};

const USER_PLACEHOLDER: &str = "%user%";
const FILE_PLACEHOLDER: &str = "%file%";

/// An argv template: program followed by its arguments, possibly
/// containing placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CommandSpec(Vec<String>);

impl CommandSpec {
    /// # Errors
    /// If the argv is empty.
    pub fn new(module: &str, what: &'static str, argv: Vec<String>) -> Result<Self, ModuleInitError> {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(ModuleInitError::EmptyCommand {
                module: module.to_string(),
                what,
            });
        }
        Ok(Self(argv))
    }

    pub fn program(&self) -> &str {
        &self.0[0]
    }

    /// Whether the message is handed over as a temp file path rather
    /// than piped to stdin.
    pub fn wants_file(&self) -> bool {
        self.0.iter().any(|arg| arg.contains(FILE_PLACEHOLDER))
    }

    pub fn wants_user(&self) -> bool {
        self.0.iter().any(|arg| arg.contains(USER_PLACEHOLDER))
    }

    fn substituted(&self, user: Option<&str>, file: Option<&str>) -> Vec<String> {
        self.0
            .iter()
            .skip(1)
            .map(|arg| {
                let mut arg = arg.clone();
                if let Some(user) = user {
                    arg = arg.replace(USER_PLACEHOLDER, user);
                }
                if let Some(file) = file {
                    arg = arg.replace(FILE_PLACEHOLDER, file);
                }
                arg
            })
            .collect()
    }
}

/// What came back from the external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    /// Combined stdout+stderr up to the first blank line — the report
    /// header block the result parsers work on.
    pub report: String,
    pub exit_code: i32,
}

/// The command-execution half shared by all external-program modules.
#[derive(Debug, Clone)]
pub struct CmdFilter {
    name: String,
    spool: Arc<SpoolDirs>,
    cache: QueueCache,
    cmd_user: Option<CommandSpec>,
    default_user: Option<String>,
}

impl CmdFilter {
    pub fn new(name: impl Into<String>, spool: Arc<SpoolDirs>, cache: QueueCache) -> Self {
        Self {
            name: name.into(),
            spool,
            cache,
            cmd_user: None,
            default_user: None,
        }
    }

    #[must_use]
    pub fn with_cmd_user(mut self, cmd_user: Option<CommandSpec>) -> Self {
        self.cmd_user = cmd_user;
        self
    }

    #[must_use]
    pub fn with_default_user(mut self, default_user: Option<String>) -> Self {
        self.default_user = default_user;
        self
    }

    /// Resolve what `%user%` stands for, in order: the configured
    /// `cmd_user` program (fed the recipient on stdin, result cached per
    /// recipient), the module's own fallback, the configured default
    /// user, the envelope recipient.
    ///
    /// # Errors
    /// Only on cache backend failure; a broken `cmd_user` program just
    /// falls through the chain.
    pub async fn resolve_user(
        &self,
        session: &MessageSession,
        module_fallback: Option<&str>,
    ) -> Result<Option<String>, FilterSignal> {
        let recipient = session.envelope.first_recipient();

        if let Some(cmd_user) = &self.cmd_user
            && let Some(recipient) = recipient
        {
            let key = format!("USER-{recipient}");
            if let Some(cached) = self.cache.get::<String>(&key).await? {
                return Ok(Some(cached));
            }

            match self.lookup_user(cmd_user, recipient).await {
                Ok(Some(user)) => {
                    self.cache.set(&key, &user).await?;
                    return Ok(Some(user));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        module = %self.name,
                        recipient,
                        "User lookup command failed: {err}"
                    );
                }
            }
        }

        Ok(module_fallback
            .map(ToString::to_string)
            .or_else(|| self.default_user.clone())
            .or_else(|| recipient.map(ToString::to_string)))
    }

    async fn lookup_user(
        &self,
        cmd_user: &CommandSpec,
        recipient: &str,
    ) -> Result<Option<String>, FilterSignal> {
        let mut child = tokio::process::Command::new(cmd_user.program())
            .args(cmd_user.substituted(Some(recipient), None))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A lookup program that ignores stdin closes the pipe early;
            // that is not an error.
            let _ = stdin.write_all(recipient.as_bytes()).await;
            let _ = stdin.write_all(b"\n").await;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Ok(None);
        }

        let user = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok((!user.is_empty()).then_some(user))
    }

    /// Run a command template against the session's message.
    ///
    /// stdout and stderr are captured into a single scratch file under
    /// `spool/temp` (stdout first), and the content up to the first blank
    /// line plus the raw exit code is handed back.
    ///
    /// # Errors
    /// If the message cannot be materialized or the program cannot be
    /// spawned. A non-zero exit is *not* an error here; result parsers
    /// decide what exit codes mean.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        session: &MessageSession,
        user: Option<&str>,
    ) -> Result<CmdOutput, FilterSignal> {
        let message = session.message_bytes()?;

        let temp_file = if spec.wants_file() {
            let path = self.spool.mime_file();
            tokio::fs::write(&path, &message).await?;
            Some(path)
        } else {
            None
        };

        let result = self
            .spawn_and_capture(spec, user, temp_file.as_deref(), &message)
            .await;

        if let Some(path) = temp_file {
            let _ = tokio::fs::remove_file(path).await;
        }

        result
    }

    async fn spawn_and_capture(
        &self,
        spec: &CommandSpec,
        user: Option<&str>,
        temp_file: Option<&Path>,
        message: &[u8],
    ) -> Result<CmdOutput, FilterSignal> {
        let file_arg = temp_file.map(|path| path.to_string_lossy().into_owned());

        let mut command = tokio::process::Command::new(spec.program());
        command
            .args(spec.substituted(user, file_arg.as_deref()))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command.stdin(if temp_file.is_some() {
            Stdio::null()
        } else {
            Stdio::piped()
        });

        let mut child = command.spawn().map_err(|err| {
            FilterSignal::Failed(format!(
                "failed to spawn {:?}: {err}",
                spec.program()
            ))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let message = message.to_vec();
            // Feed stdin concurrently with output collection; a filter
            // writing its report before draining stdin must not deadlock.
            tokio::spawn(async move {
                let _ = stdin.write_all(&message).await;
                let _ = stdin.shutdown().await;
            });
        }

        let output = child.wait_with_output().await?;

        let scratch = self.spool.scratch_file(&self.name);
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        tokio::fs::write(&scratch, &combined).await?;

        let report = header_block(&String::from_utf8_lossy(&combined));
        let _ = tokio::fs::remove_file(&scratch).await;

        Ok(CmdOutput {
            report,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Everything up to (not including) the first blank line.
fn header_block(combined: &str) -> String {
    let mut block = Vec::new();
    for line in combined.lines() {
        if line.trim().is_empty() {
            break;
        }
        block.push(line);
    }
    block.join("\n")
}
