//! Re-submission of filtered messages into the downstream MTA listener.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use decency_smtp::{ClientError, Response, SmtpClient};

/// The downstream acknowledges the DATA terminator with a line like
/// `250 2.0.0 Ok: queued as 4BF7A21`; that token becomes the session's
/// successor queue-id.
static QUEUED_AS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"queued as ([A-Z0-9]+)").expect("pattern compiles"));

#[derive(Debug, Error)]
pub enum ReinjectError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Downstream refused {stage}: {code} {message}")]
    Refused {
        stage: &'static str,
        code: u16,
        message: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReinjectConfig {
    /// `host:port` of the MTA listener taking filtered mail back.
    pub target: String,
    #[serde(default = "default_helo")]
    pub helo: String,
}

fn default_helo() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// SMTP client wrapper speaking the re-injection leg.
#[derive(Debug, Clone)]
pub struct Reinjector {
    target: String,
    helo: String,
}

impl Reinjector {
    pub fn new(config: &ReinjectConfig) -> Self {
        Self {
            target: config.target.clone(),
            helo: config.helo.clone(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Submit a message and learn the queue-id the downstream assigned.
    ///
    /// # Errors
    /// On connection failure or any refused transaction stage. The caller
    /// moves the spool file to the failure directory and reports ERROR.
    pub async fn submit(
        &self,
        from: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Result<Option<String>, ReinjectError> {
        let mut client = SmtpClient::connect(&self.target).await?;

        let greeting = client.read_response().await?;
        expect_success("greeting", &greeting)?;

        expect_success("HELO", &client.helo(&self.helo).await?)?;
        expect_success("MAIL FROM", &client.mail_from(from).await?)?;
        for recipient in recipients {
            expect_success("RCPT TO", &client.rcpt_to(recipient).await?)?;
        }

        let go_ahead = client.data().await?;
        if !go_ahead.is_data_go_ahead() {
            return Err(ReinjectError::Refused {
                stage: "DATA",
                code: go_ahead.code,
                message: go_ahead.message(),
            });
        }

        let accepted = client.send_data(message).await?;
        expect_success("message data", &accepted)?;

        // The message is queued; a failed QUIT is not worth an ERROR.
        let _ = client.quit().await;

        Ok(queue_id_from(&accepted.message()))
    }
}

fn expect_success(stage: &'static str, response: &Response) -> Result<(), ReinjectError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(ReinjectError::Refused {
            stage,
            code: response.code,
            message: response.message(),
        })
    }
}

fn queue_id_from(reply: &str) -> Option<String> {
    QUEUED_AS
        .captures(reply)
        .and_then(|captures| captures.get(1))
        .map(|token| token.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
    };

    use super::*;

    #[test]
    fn queue_id_is_parsed_from_the_final_reply() {
        assert_eq!(
            queue_id_from("2.0.0 Ok: queued as 4BF7A21").as_deref(),
            Some("4BF7A21")
        );
        assert_eq!(queue_id_from("2.0.0 Ok"), None);
    }

    /// One-shot downstream that accepts a full transaction and echoes a
    /// fixed queue-id.
    async fn accepting_downstream() -> (std::net::SocketAddr, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read);
            let mut received = Vec::new();

            write.write_all(b"220 downstream ESMTP\r\n").await.unwrap();

            let mut in_data = false;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();

                if in_data {
                    if line == "." {
                        in_data = false;
                        write
                            .write_all(b"250 2.0.0 Ok: queued as ABC123\r\n")
                            .await
                            .unwrap();
                    } else {
                        received.push(line);
                    }
                    continue;
                }

                let upper = line.to_ascii_uppercase();
                if upper.starts_with("DATA") {
                    in_data = true;
                    write.write_all(b"354 go ahead\r\n").await.unwrap();
                } else if upper.starts_with("QUIT") {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                } else {
                    write.write_all(b"250 Ok\r\n").await.unwrap();
                }
            }

            received
        });

        (addr, handle)
    }

    #[tokio::test]
    async fn full_transaction_learns_the_queue_id() {
        let (addr, handle) = accepting_downstream().await;

        let reinjector = Reinjector {
            target: addr.to_string(),
            helo: "filter.test".to_string(),
        };

        let next_id = reinjector
            .submit(
                "a@x.org",
                &["b@y.net".to_string()],
                b"Subject: pass\r\n\r\n.leading dot\r\nbody\r\n",
            )
            .await
            .unwrap();

        assert_eq!(next_id.as_deref(), Some("ABC123"));

        let received = handle.await.unwrap();
        // Transparency stuffing applied on the wire.
        assert!(received.contains(&"..leading dot".to_string()));
    }

    #[tokio::test]
    async fn refused_connection_is_a_reinject_error() {
        // Bind-then-drop leaves a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reinjector = Reinjector {
            target: addr.to_string(),
            helo: "filter.test".to_string(),
        };

        let result = reinjector.submit("a@x.org", &["b@y.net".to_string()], b"x").await;
        assert!(matches!(result, Err(ReinjectError::Client(_))));
    }
}
