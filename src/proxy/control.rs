use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::cli::config::ProxySettings;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control channel timed out")]
    Timeout,

    #[error("control command `{command}` rejected: {reply}")]
    Rejected { command: &'static str, reply: String },
}

/// Client for the proxy's control port
#[derive(Debug, Clone)]
pub struct ControlClient {
    addr: String,
    password: String,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(settings: &ProxySettings) -> Self {
        Self {
            addr: settings.control_addr.clone(),
            password: settings.control_password.clone(),
            timeout: Duration::from_secs(settings.control_timeout_secs.max(1)),
        }
    }

    /// Authenticate and request a fresh circuit
    pub async fn new_identity(&self) -> Result<(), ControlError> {
        timeout(self.timeout, self.exchange())
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    async fn exchange(&self) -> Result<(), ControlError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let auth = format!("AUTHENTICATE \"{}\"\r\n", escape_password(&self.password));
        send(&mut writer, &mut reader, "AUTHENTICATE", &auth).await?;
        send(&mut writer, &mut reader, "SIGNAL NEWNYM", "SIGNAL NEWNYM\r\n").await?;

        // Polite close; the reply is irrelevant
        let _ = writer.write_all(b"QUIT\r\n").await;
        debug!("New identity requested via {}", self.addr);
        Ok(())
    }
}

async fn send<W, R>(writer: &mut W, reader: &mut R, command: &'static str, line: &str) -> Result<(), ControlError>
where
    W: AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;

    let mut reply = String::new();
    reader.read_line(&mut reply).await?;
    let reply = reply.trim_end().to_string();

    if reply.starts_with("250") {
        Ok(())
    } else {
        Err(ControlError::Rejected { command, reply })
    }
}

fn escape_password(password: &str) -> String {
    password.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Fake control port answering each command line with the next scripted reply
    async fn fake_control(replies: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let mut received = Vec::new();
            for reply in replies {
                match lines.next_line().await.unwrap() {
                    Some(line) => received.push(line),
                    None => break,
                }
                writer.write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });

        (addr, handle)
    }

    fn settings(addr: &str, password: &str) -> ProxySettings {
        ProxySettings {
            control_addr: addr.to_string(),
            control_password: password.to_string(),
            control_timeout_secs: 2,
            ..ProxySettings::default()
        }
    }

    #[tokio::test]
    async fn test_new_identity_sends_auth_then_signal() {
        let (addr, server) = fake_control(vec!["250 OK\r\n", "250 OK\r\n"]).await;
        let client = ControlClient::new(&settings(&addr, "s3cret"));

        client.new_identity().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, vec!["AUTHENTICATE \"s3cret\"", "SIGNAL NEWNYM"]);
    }

    #[tokio::test]
    async fn test_rejected_authentication() {
        let (addr, _server) = fake_control(vec!["515 Authentication failed\r\n"]).await;
        let client = ControlClient::new(&settings(&addr, "wrong"));

        match client.new_identity().await {
            Err(ControlError::Rejected { command, reply }) => {
                assert_eq!(command, "AUTHENTICATE");
                assert!(reply.starts_with("515"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_control_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = ControlClient::new(&settings(&addr, ""));
        assert!(client.new_identity().await.is_err());
    }

    #[test]
    fn test_password_escaping() {
        assert_eq!(escape_password(r#"a"b\c"#), r#"a\"b\\c"#);
    }
}
