//! Synthesized notification messages for silently-removed mail.
//!
//! Sent with the null envelope sender through the regular re-injection
//! leg so they can never generate a notification loop.

use decency_common::{policy::NotificationPolicy, session::MessageSession};

use crate::reinject::Reinjector;

const DEFAULT_FROM: &str = "postmaster";

const DEFAULT_TEMPLATE: &str = "From: %from%\r\n\
To: %to%\r\n\
Subject: Message handling notification\r\n\
Date: %date%\r\n\
MIME-Version: 1.0\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
A message involving your address was removed by the content filter.\r\n\
\r\n\
Reason: %reason%\r\n";

#[derive(Debug, Clone)]
pub struct Notifier {
    policy: NotificationPolicy,
    template: String,
}

impl Notifier {
    /// Load the notifier, reading the template file if one is configured.
    ///
    /// # Errors
    /// If the configured template file is unreadable; that is a startup
    /// error, not something to discover on the first spam message.
    pub fn new(policy: NotificationPolicy) -> std::io::Result<Self> {
        let template = match &policy.template {
            Some(path) => std::fs::read_to_string(path)?,
            None => DEFAULT_TEMPLATE.to_string(),
        };

        Ok(Self { policy, template })
    }

    pub const fn is_enabled(&self) -> bool {
        self.policy.is_enabled()
    }

    /// Tell the configured parties that their message was removed.
    /// Failures are logged, never propagated: the disposition already
    /// happened.
    pub async fn notify_removal(
        &self,
        reinjector: &Reinjector,
        session: &MessageSession,
        reason: &str,
    ) {
        if !self.is_enabled() {
            return;
        }

        let mut targets = Vec::new();
        if self.policy.notify_sender
            && let Some(sender) = session.envelope.sender()
        {
            targets.push(sender.to_string());
        }
        if self.policy.notify_recipient {
            targets.extend(session.envelope.recipients().iter().cloned());
        }

        for target in targets {
            let message = self.render(&target, reason);
            // Null sender: notifications must not bounce back and forth.
            match reinjector.submit("", &[target.clone()], &message).await {
                Ok(_) => tracing::debug!(to = %target, "Notification submitted"),
                Err(err) => {
                    tracing::error!(to = %target, "Failed to submit notification: {err}");
                }
            }
        }
    }

    fn render(&self, to: &str, reason: &str) -> Vec<u8> {
        let from = self.policy.from.as_deref().unwrap_or(DEFAULT_FROM);
        self.template
            .replace("%from%", from)
            .replace("%to%", to)
            .replace("%date%", &chrono::Utc::now().to_rfc2822())
            .replace("%reason%", reason)
            .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_renders_all_placeholders() {
        let notifier = Notifier::new(NotificationPolicy {
            notify_recipient: true,
            from: Some("filter@example.org".to_string()),
            ..NotificationPolicy::default()
        })
        .unwrap();

        let message = String::from_utf8(notifier.render("b@y.net", "virus Eicar-Test")).unwrap();
        assert!(message.contains("From: filter@example.org\r\n"));
        assert!(message.contains("To: b@y.net\r\n"));
        assert!(message.contains("Reason: virus Eicar-Test\r\n"));
        assert!(!message.contains('%'));
    }

    #[test]
    fn custom_template_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.txt");
        std::fs::write(&path, "To: %to%\r\n\r\n%reason%\r\n").unwrap();

        let notifier = Notifier::new(NotificationPolicy {
            notify_sender: true,
            template: Some(path),
            ..NotificationPolicy::default()
        })
        .unwrap();

        let message = String::from_utf8(notifier.render("a@x.org", "spam")).unwrap();
        assert_eq!(message, "To: a@x.org\r\n\r\nspam\r\n");
    }

    #[test]
    fn missing_template_file_is_a_startup_error() {
        let result = Notifier::new(NotificationPolicy {
            template: Some("/nonexistent/notify.txt".into()),
            ..NotificationPolicy::default()
        });
        assert!(result.is_err());
    }
}
