//! Minimal SMTP client used for re-injecting filtered messages into the
//! downstream MTA listener. Both legs are loopback plumbing between the
//! MTA and this filter, so there is no TLS here.

mod error;
mod response;

pub use error::{ClientError, Result};
pub use response::Response;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use decency_common::{incoming, outgoing};

/// An SMTP client over a plain TCP connection.
pub struct SmtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SmtpClient {
    /// Connect and leave the greeting unread; call [`Self::read_response`]
    /// to collect it.
    ///
    /// # Errors
    /// If the TCP connection fails.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    /// Read one (possibly multi-line) SMTP response.
    ///
    /// # Errors
    /// On connection loss or a malformed response line.
    pub async fn read_response(&mut self) -> Result<Response> {
        let mut lines = Vec::new();
        let mut code = None;

        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            incoming!("{}", line.trim_end());

            let (line_code, is_last, message) = Response::parse_line(line.trim_end())?;
            match code {
                None => code = Some(line_code),
                Some(previous) if previous != line_code => {
                    return Err(ClientError::ParseError(format!(
                        "status code changed mid-response: {previous} then {line_code}"
                    )));
                }
                Some(_) => {}
            }

            lines.push(message);
            if is_last {
                break;
            }
        }

        Ok(Response::new(code.unwrap_or(0), lines))
    }

    /// Send one command line and read the reply.
    ///
    /// # Errors
    /// On I/O failure or a malformed reply.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.read_response().await
    }

    /// # Errors
    /// On I/O failure or a malformed reply.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// # Errors
    /// On I/O failure or a malformed reply.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    /// On I/O failure or a malformed reply.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    /// On I/O failure or a malformed reply.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    /// On I/O failure or a malformed reply.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Stream the message body after a 354: every line is CRLF-normalized
    /// and dot-stuffed, and the terminating `.` is appended. The returned
    /// response is the server's final word on the transaction.
    ///
    /// # Errors
    /// On I/O failure or a malformed reply.
    pub async fn send_data(&mut self, message: &[u8]) -> Result<Response> {
        for line in split_lines(message) {
            if line.first() == Some(&b'.') {
                self.writer.write_all(b".").await?;
            }
            self.writer.write_all(line).await?;
            self.writer.write_all(b"\r\n").await?;
        }

        self.writer.write_all(b".\r\n").await?;
        outgoing!(".");
        self.read_response().await
    }

    /// # Errors
    /// On I/O failure or a malformed reply.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }
}

/// Split on LF, tolerating both bare-LF and CRLF input, without the line
/// terminators. Interior blank lines survive; a trailing newline does not
/// produce a spurious empty final line.
fn split_lines(message: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut lines: Vec<&[u8]> = message.split(|byte| *byte == b'\n').collect();
    if let Some(last) = lines.last()
        && last.is_empty()
    {
        lines.pop();
    }

    lines
        .into_iter()
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}
