//! External virus scanner module.
//!
//! Exit code semantics follow the scanner's convention (configured, not
//! assumed): one set of codes means "infected", zero means "clean",
//! anything else is a scanner failure. The virus label is captured from
//! the report when a pattern is configured.

use std::sync::Arc;

use async_trait::async_trait;
use decency_common::session::MessageSession;
use regex::Regex;
use serde::Deserialize;

use crate::{
    cmd::{CmdFilter, CommandSpec},
    config::{ModuleInitError, ModuleSettings},
    module::FilterModule,
    signal::FilterSignal,
};

const UNKNOWN_VIRUS: &str = "UNKNOWN";

#[derive(Debug, Clone, Deserialize)]
pub struct VirusFilterConfig {
    pub settings: ModuleSettings,
    /// The scan command; `%file%` is substituted, stdin is used otherwise.
    pub cmd_scan: Vec<String>,
    /// Exit codes meaning "infected".
    #[serde(default = "default_infected_exit_codes")]
    pub infected_exit_codes: Vec<i32>,
    /// Regex with one capture group extracting the virus label from the
    /// report, e.g. `": (.+) FOUND"`.
    #[serde(default)]
    pub name_pattern: Option<String>,
}

fn default_infected_exit_codes() -> Vec<i32> {
    vec![1]
}

#[derive(Debug)]
pub struct VirusFilter {
    settings: ModuleSettings,
    cmd: CmdFilter,
    cmd_scan: CommandSpec,
    infected_exit_codes: Vec<i32>,
    name_pattern: Option<Regex>,
}

impl VirusFilter {
    /// # Errors
    /// On an empty scan command or an invalid name pattern.
    pub fn from_config(config: VirusFilterConfig, cmd: CmdFilter) -> Result<Self, ModuleInitError> {
        let name = config.settings.name.clone();

        let name_pattern = config
            .name_pattern
            .map(|pattern| {
                Regex::new(&pattern).map_err(|source| ModuleInitError::InvalidPattern {
                    module: name.clone(),
                    pattern,
                    source,
                })
            })
            .transpose()?;

        Ok(Self {
            cmd_scan: CommandSpec::new(&name, "cmd_scan", config.cmd_scan)?,
            infected_exit_codes: config.infected_exit_codes,
            name_pattern,
            settings: config.settings,
            cmd,
        })
    }

    fn virus_label(&self, report: &str) -> String {
        self.name_pattern
            .as_ref()
            .and_then(|pattern| pattern.captures(report))
            .and_then(|captures| captures.get(1))
            .map_or_else(
                || UNKNOWN_VIRUS.to_string(),
                |matched| matched.as_str().trim().to_string(),
            )
    }
}

#[async_trait]
impl FilterModule for VirusFilter {
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
        let output = self.cmd.run(&self.cmd_scan, session, None).await?;

        if self.infected_exit_codes.contains(&output.exit_code) {
            return Err(FilterSignal::Virus(self.virus_label(&output.report)));
        }

        if output.exit_code == 0 {
            return Ok(());
        }

        Err(FilterSignal::Failed(format!(
            "scanner exited with {}: {}",
            output.exit_code, output.report
        )))
    }
}

#[cfg(test)]
mod tests {
    use decency_common::envelope::Envelope;
    use decency_spool::{MemoryCache, QueueCache, SpoolDirs};

    use super::*;

    fn fixture(cmd_scan: Vec<String>) -> (tempfile::TempDir, VirusFilter) {
        let dir = tempfile::tempdir().unwrap();
        let spool = Arc::new(SpoolDirs::create(dir.path().join("spool")).unwrap());
        let cache = QueueCache::new(Arc::new(MemoryCache::new()));

        let config = VirusFilterConfig {
            settings: ModuleSettings {
                name: "avtest".to_string(),
                ..ModuleSettings::default()
            },
            cmd_scan,
            infected_exit_codes: vec![1],
            name_pattern: Some(r": (.+) FOUND".to_string()),
        };

        let filter =
            VirusFilter::from_config(config, CmdFilter::new("avtest", spool, cache)).unwrap();
        (dir, filter)
    }

    fn session(dir: &tempfile::TempDir) -> MessageSession {
        let path = dir.path().join("mail-av");
        std::fs::write(&path, b"Subject: x\r\n\r\nbody\r\n").unwrap();
        MessageSession::open(path, Envelope::default()).unwrap()
    }

    #[tokio::test]
    async fn clean_exit_is_no_opinion() {
        let (dir, filter) = fixture(vec!["cat".into()]);
        let mut session = session(&dir);
        assert!(filter.handle(&mut session).await.is_ok());
        assert_eq!(session.virus(), None);
    }

    #[tokio::test]
    async fn infected_exit_raises_virus_with_the_captured_label() {
        let (dir, filter) = fixture(vec![
            "sh".into(),
            "-c".into(),
            "echo 'stream: Eicar-Test-Signature FOUND'; exit 1".into(),
        ]);
        let mut session = session(&dir);

        let result = filter.handle(&mut session).await;
        match result {
            Err(FilterSignal::Virus(label)) => assert_eq!(label, "Eicar-Test-Signature"),
            other => panic!("expected a virus signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unexpected_exit_is_a_scanner_failure() {
        let (dir, filter) = fixture(vec!["sh".into(), "-c".into(), "echo oops; exit 7".into()]);
        let mut session = session(&dir);

        let result = filter.handle(&mut session).await;
        assert!(matches!(result, Err(FilterSignal::Failed(_))));
    }
}
