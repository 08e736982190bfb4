use std::fmt;

/// Terminal classification of a pipeline run.
///
/// Every message starts at `Ok`; the first module that raises a
/// classifying signal moves the run to `Spam`, `Virus` or `Drop` and
/// stops further modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineStatus {
    #[default]
    Ok,
    Spam,
    Virus,
    Drop,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Spam => "SPAM",
            Self::Virus => "VIRUS",
            Self::Drop => "DROP",
        })
    }
}

/// Final action taken on a message once the pipeline and the configured
/// policy have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Message was (possibly rewritten and) re-injected, or swallowed on
    /// an explicit drop. The MTA is told 250.
    Ok,
    /// Message was removed; the MTA is told 250 and the sender never
    /// learns about it.
    Deleted,
    /// The MTA is told 550 so it generates the bounce notification.
    Bounce,
    /// Something went wrong after acceptance (typically re-injection);
    /// the MTA is told 550 and keeps the message queued.
    Error,
}

impl Disposition {
    /// Whether the ingress SMTP session should answer 250 (accept) or
    /// 550 (reject) for this outcome.
    pub const fn accepts(self) -> bool {
        matches!(self, Self::Ok | Self::Deleted)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Deleted => "DELETED",
            Self::Bounce => "BOUNCE",
            Self::Error => "ERROR",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_is_uppercase() {
        assert_eq!(PipelineStatus::Ok.to_string(), "OK");
        assert_eq!(PipelineStatus::Spam.to_string(), "SPAM");
        assert_eq!(PipelineStatus::Virus.to_string(), "VIRUS");
        assert_eq!(PipelineStatus::Drop.to_string(), "DROP");
    }

    #[test]
    fn disposition_accepts() {
        assert!(Disposition::Ok.accepts());
        assert!(Disposition::Deleted.accepts());
        assert!(!Disposition::Bounce.accepts());
        assert!(!Disposition::Error.accepts());
    }
}
