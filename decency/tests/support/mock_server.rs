//! Mock downstream MTA listener for end-to-end tests: accepts the SMTP
//! subset the re-injector speaks, records complete transactions and
//! acknowledges the DATA terminator with a fixed queue-id.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::Mutex,
};

pub const MOCK_QUEUE_ID: &str = "ABC123";

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub from: String,
    pub to: Vec<String>,
    pub data: String,
}

impl ReceivedMessage {
    /// First value of a header in the recorded message, if any.
    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.data.lines().find_map(|line| {
            line.to_ascii_lowercase()
                .starts_with(&prefix)
                .then(|| line[prefix.len()..].trim().to_string())
        })
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    messages: Arc<Mutex<Vec<ReceivedMessage>>>,
}

impl MockSmtpServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let addr = listener.local_addr().expect("mock addr");
        let messages = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&messages);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve_connection(stream, recorded).await;
                });
            }
        });

        Self { addr, messages }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn messages(&self) -> Vec<ReceivedMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.lock().await.len()
    }

    /// Wait until `expected` transactions were recorded.
    ///
    /// # Panics
    /// If the count is not reached within the timeout.
    pub async fn wait_for_messages(&self, expected: usize, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            loop {
                if self.message_count().await >= expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("mock server did not receive the expected messages in time");
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    recorded: Arc<Mutex<Vec<ReceivedMessage>>>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    write.write_all(b"220 mock ESMTP\r\n").await?;

    let mut from = String::new();
    let mut to = Vec::new();
    let mut data = String::new();
    let mut in_data = false;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end().to_string();

        if in_data {
            if line == "." {
                in_data = false;
                recorded.lock().await.push(ReceivedMessage {
                    from: from.clone(),
                    to: to.clone(),
                    data: std::mem::take(&mut data),
                });
                write
                    .write_all(format!("250 2.0.0 Ok: queued as {MOCK_QUEUE_ID}\r\n").as_bytes())
                    .await?;
            } else {
                let line = line.strip_prefix('.').map_or(line.as_str(), |stuffed| {
                    if line.starts_with("..") { stuffed } else { line.as_str() }
                });
                data.push_str(line);
                data.push_str("\r\n");
            }
            continue;
        }

        let upper = line.to_ascii_uppercase();
        if upper.starts_with("DATA") {
            in_data = true;
            write.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await?;
        } else if upper.starts_with("MAIL FROM:") {
            from = line[10..].trim().trim_matches(['<', '>']).to_string();
            write.write_all(b"250 Ok\r\n").await?;
        } else if upper.starts_with("RCPT TO:") {
            to.push(line[8..].trim().trim_matches(['<', '>']).to_string());
            write.write_all(b"250 Ok\r\n").await?;
        } else if upper.starts_with("QUIT") {
            write.write_all(b"221 bye\r\n").await?;
            return Ok(());
        } else {
            write.write_all(b"250 Ok\r\n").await?;
        }
    }
}
