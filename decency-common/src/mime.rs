//! Owned MIME view with a mutable header block.
//!
//! `mailparse` gives a read-only tree, which is all the filter modules
//! need; header rewriting (result stamping, Subject prefixing) works on
//! this owned copy and re-emits the message byte-for-byte apart from the
//! edited headers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MimeError {
    #[error("Failed to parse message headers: {0}")]
    Parse(#[from] mailparse::MailParseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

/// A message split into an editable header block and an opaque body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeMessage {
    headers: Vec<Header>,
    body: Vec<u8>,
}

impl MimeMessage {
    /// Parse the header block out of a raw message.
    ///
    /// # Errors
    /// If the header block is not parseable at all. A missing blank line
    /// (headers only) is accepted, matching what MTAs hand over.
    pub fn parse(raw: &[u8]) -> Result<Self, MimeError> {
        let (parsed, body_offset) = mailparse::parse_headers(raw)?;

        let headers = parsed
            .into_iter()
            .map(|header| Header {
                name: header.get_key(),
                value: header.get_value(),
            })
            .collect();

        Ok(Self {
            headers,
            body: raw.get(body_offset..).unwrap_or_default().to_vec(),
        })
    }

    /// First value of the named header, if present. Lookup is
    /// case-insensitive as header names are.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// All values of the named header, in file order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// Replace every occurrence of the named header with a single value,
    /// or append it if absent. This is what keeps result stamping
    /// idempotent across repeated runs.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.headers.push(Header {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers
            .retain(|header| !header.name.eq_ignore_ascii_case(name));
    }

    /// Prepend `prefix` to the Subject, creating the header when missing
    /// and leaving an already-prefixed Subject alone.
    pub fn prefix_subject(&mut self, prefix: &str) {
        let subject = self.header("Subject").unwrap_or_default().to_string();
        if subject.starts_with(prefix) {
            return;
        }

        let prefixed = if subject.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix} {subject}")
        };
        self.set_header("Subject", &prefixed);
    }

    /// Re-emit the message: CRLF-terminated header block, blank line,
    /// body bytes untouched.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 256);
        for header in &self.headers {
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
