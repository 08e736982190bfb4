//! One ingress SMTP session: the HELO/EHLO, MAIL, RCPT, DATA, RSET,
//! NOOP, QUIT subset the MTA needs to hand a message over.

use std::{net::SocketAddr, sync::Arc};

use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::TcpStream,
};

use decency_common::{envelope::Envelope, incoming, internal, outgoing};
use decency_spool::{Sidecar, SpoolDirs, SpoolError};

use crate::server::{MessageHandler, SpooledMessage, Verdict};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Spool(#[from] SpoolError),
}

pub(crate) struct Session<Handler> {
    stream: TcpStream,
    peer: SocketAddr,
    banner: Arc<str>,
    spool: Arc<SpoolDirs>,
    handler: Arc<Handler>,
}

/// Transaction state between commands.
#[derive(Default)]
struct Transaction {
    helo: Option<String>,
    envelope: Envelope,
    has_sender: bool,
}

impl Transaction {
    fn reset_mail(&mut self) {
        self.envelope = Envelope::default();
        self.has_sender = false;
    }
}

impl<Handler: MessageHandler> Session<Handler> {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        banner: Arc<str>,
        spool: Arc<SpoolDirs>,
        handler: Arc<Handler>,
    ) -> Self {
        Self {
            stream,
            peer,
            banner,
            spool,
            handler,
        }
    }

    pub(crate) async fn run(self) -> Result<(), SessionError> {
        let Self {
            stream,
            peer,
            banner,
            spool,
            handler,
        } = self;

        internal!("Session from {peer} connected");

        let (read, write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut writer = BufWriter::new(write);

        send(&mut writer, &format!("220 {banner} ESMTP Decency")).await?;

        let mut transaction = Transaction::default();

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                internal!("Session from {peer} hung up");
                return Ok(());
            }
            let line = line.trim_end();
            incoming!("{line}");

            let (command, argument) = split_command(line);

            let reply = match command.as_str() {
                "HELO" | "EHLO" => {
                    transaction = Transaction {
                        helo: Some(argument.to_string()),
                        ..Transaction::default()
                    };
                    format!("250 {banner} says hello to {argument}")
                }

                "MAIL" => handle_mail(&mut transaction, argument),
                "RCPT" => handle_rcpt(&mut transaction, argument),

                "DATA" => {
                    if !transaction.envelope.is_complete() {
                        "503 Need RCPT TO first".to_string()
                    } else {
                        send(&mut writer, "354 End data with <CR><LF>.<CR><LF>").await?;

                        let reply = receive_message(
                            &mut reader,
                            &spool,
                            handler.as_ref(),
                            &transaction.envelope,
                        )
                        .await?;
                        transaction.reset_mail();
                        reply
                    }
                }

                "RSET" => {
                    transaction.reset_mail();
                    "250 Ok".to_string()
                }
                "NOOP" => "250 Ok".to_string(),
                "QUIT" => {
                    send(&mut writer, &format!("221 {banner} closing connection")).await?;
                    return Ok(());
                }
                _ => "500 Unrecognized command".to_string(),
            };

            send(&mut writer, &reply).await?;
        }
    }
}

fn split_command(line: &str) -> (String, &str) {
    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_ascii_uppercase();
    (command, parts.next().unwrap_or_default().trim())
}

fn handle_mail(transaction: &mut Transaction, argument: &str) -> String {
    if transaction.helo.is_none() {
        return "503 Say HELO first".to_string();
    }

    let Some(address) = strip_prefix_ci(argument, "FROM:") else {
        return "501 Syntax: MAIL FROM:<address>".to_string();
    };

    match transaction.envelope.set_sender(address) {
        Ok(()) => {
            transaction.has_sender = true;
            "250 Ok".to_string()
        }
        Err(err) => format!("501 {err}"),
    }
}

fn handle_rcpt(transaction: &mut Transaction, argument: &str) -> String {
    if !transaction.has_sender {
        return "503 Need MAIL FROM first".to_string();
    }

    let Some(address) = strip_prefix_ci(argument, "TO:") else {
        return "501 Syntax: RCPT TO:<address>".to_string();
    };

    match transaction.envelope.add_recipient(address) {
        Ok(()) => "250 Ok".to_string(),
        Err(err) => format!("501 {err}"),
    }
}

/// Spool the DATA stream, then run the pipeline and turn its verdict
/// into the SMTP reply.
async fn receive_message<Handler: MessageHandler>(
    reader: &mut (impl AsyncBufReadExt + Unpin),
    spool: &SpoolDirs,
    handler: &Handler,
    envelope: &Envelope,
) -> Result<String, SessionError> {
    let spool_file = spool.spool_file();
    let mut size: u64 = 0;

    {
        let file = tokio::fs::File::create(&spool_file).await?;
        let mut writer = BufWriter::new(file);

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                // Peer vanished mid-DATA; drop the partial spool file.
                drop(writer);
                let _ = tokio::fs::remove_file(&spool_file).await;
                return Ok("451 Connection lost during DATA".to_string());
            }

            let line = line.trim_end_matches(['\r', '\n']);
            if line == "." {
                break;
            }

            // Reverse transparency stuffing (RFC 5321 §4.5.2).
            let line = line.strip_prefix('.').map_or(line, |stuffed| {
                if line.starts_with("..") { stuffed } else { line }
            });

            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
            size += line.len() as u64 + 2;
        }

        writer.flush().await?;
    }

    Sidecar::from_envelope(envelope, size).write(&spool_file)?;

    let verdict = handler
        .handle(SpooledMessage {
            file: spool_file,
            envelope: envelope.clone(),
        })
        .await;

    Ok(render_verdict(&verdict))
}

fn render_verdict(verdict: &Verdict) -> String {
    if verdict.accepted {
        "250 Ok".to_string()
    } else {
        let detail = if verdict.detail.is_empty() {
            "Rejected by content filter"
        } else {
            &verdict.detail
        };
        format!("550 {detail}")
    }
}

fn strip_prefix_ci<'a>(argument: &'a str, prefix: &str) -> Option<&'a str> {
    argument
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| argument.get(prefix.len()..))
        .map(str::trim)
}

async fn send(
    writer: &mut (impl AsyncWriteExt + Unpin),
    reply: &str,
) -> Result<(), SessionError> {
    outgoing!("{reply}");
    writer.write_all(reply.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn command_split_is_case_insensitive() {
        assert_eq!(split_command("mail FROM:<a@b>"), ("MAIL".to_string(), "FROM:<a@b>"));
        assert_eq!(split_command("QUIT"), ("QUIT".to_string(), ""));
    }

    #[test]
    fn mail_requires_helo() {
        let mut transaction = Transaction::default();
        let reply = handle_mail(&mut transaction, "FROM:<a@x.org>");
        assert!(reply.starts_with("503"));
    }

    #[test]
    fn rcpt_requires_mail() {
        let mut transaction = Transaction {
            helo: Some("mta".to_string()),
            ..Transaction::default()
        };
        assert!(handle_rcpt(&mut transaction, "TO:<b@y.net>").starts_with("503"));

        assert!(handle_mail(&mut transaction, "from:<a@x.org>").starts_with("250"));
        assert!(handle_rcpt(&mut transaction, "to:<b@y.net>").starts_with("250"));
        assert_eq!(transaction.envelope.recipients(), ["b@y.net"]);
    }

    #[test]
    fn null_sender_is_accepted() {
        let mut transaction = Transaction {
            helo: Some("mta".to_string()),
            ..Transaction::default()
        };
        assert!(handle_mail(&mut transaction, "FROM:<>").starts_with("250"));
        assert!(transaction.has_sender);
        assert_eq!(transaction.envelope.sender(), None);
    }

    #[test]
    fn verdicts_render_as_smtp_replies() {
        assert_eq!(render_verdict(&Verdict::accept()), "250 Ok");
        assert_eq!(
            render_verdict(&Verdict::reject("spam score -160")),
            "550 spam score -160"
        );
    }
}
