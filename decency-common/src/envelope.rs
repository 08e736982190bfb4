use mailparse::MailAddr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Invalid address {0:?}: {1}")]
    InvalidAddress(String, String),
}

/// SMTP envelope captured during the ingress transaction.
///
/// Addresses are kept as plain strings (that is what `MAIL FROM` and
/// `RCPT TO` carry) but validated through `mailparse` on the way in.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Envelope {
    /// Build an envelope from already-validated addresses.
    pub fn new(sender: Option<String>, recipients: Vec<String>) -> Self {
        Self { sender, recipients }
    }

    /// Validate and record the envelope sender. An empty address is the
    /// null sender (bounces) and is stored as `None`.
    ///
    /// # Errors
    /// If the address does not parse as a mail address.
    pub fn set_sender(&mut self, address: &str) -> Result<(), EnvelopeError> {
        let address = address.trim();
        if address.is_empty() {
            self.sender = None;
            return Ok(());
        }

        self.sender = Some(validated(address)?);
        Ok(())
    }

    /// Validate and append an envelope recipient.
    ///
    /// # Errors
    /// If the address does not parse as a mail address.
    pub fn add_recipient(&mut self, address: &str) -> Result<(), EnvelopeError> {
        self.recipients.push(validated(address.trim())?);
        Ok(())
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// The sender, or the null-sender spelling for bounce notifications.
    pub fn sender_or_null(&self) -> &str {
        self.sender.as_deref().unwrap_or("")
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn first_recipient(&self) -> Option<&str> {
        self.recipients.first().map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        !self.recipients.is_empty()
    }
}

/// Extract the bare `user@domain` form out of whatever the peer sent
/// (angle brackets, display names).
fn validated(address: &str) -> Result<String, EnvelopeError> {
    let stripped = address
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(address);

    let mut parsed = mailparse::addrparse(stripped)
        .map_err(|err| EnvelopeError::InvalidAddress(address.to_string(), err.to_string()))?;

    if parsed.len() != 1 {
        return Err(EnvelopeError::InvalidAddress(
            address.to_string(),
            "expected a single address".to_string(),
        ));
    }

    match parsed.remove(0) {
        MailAddr::Single(single) => Ok(single.addr),
        MailAddr::Group(_) => Err(EnvelopeError::InvalidAddress(
            address.to_string(),
            "group addresses are not valid in the envelope".to_string(),
        )),
    }
}
