//! Scripted SMTP server and token endpoint doubles.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use relaymail::XOAuth2Authenticator;
use relaymail_oauth::{Credentials, HttpClient, HttpRequest, HttpResponse, TokenProvider};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// How the server answers `AUTH XOAUTH2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accept,
    /// Sends an XOAUTH2 error challenge, then 535 after the empty line.
    Challenge,
}

/// SMTP server on 127.0.0.1 that records every line it receives.
#[derive(Debug, Clone)]
pub struct SmtpServer {
    pub port: u16,
    pub lines: Arc<Mutex<Vec<String>>>,
}

impl SmtpServer {
    pub async fn start(outcome: AuthOutcome) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let lines = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&lines);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(session(socket, outcome, Arc::clone(&recorded)));
            }
        });

        Self { port, lines }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn auth_lines(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with("AUTH"))
            .collect()
    }
}

async fn session(
    socket: tokio::net::TcpStream,
    outcome: AuthOutcome,
    recorded: Arc<Mutex<Vec<String>>>,
) {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    write.write_all(b"220 localhost ESMTP test\r\n").await.unwrap();

    while let Ok(Some(line)) = lines.next_line().await {
        recorded.lock().unwrap().push(line.clone());
        let reply: String = if line.starts_with("EHLO") {
            "250-localhost\r\n250-SIZE 1048576\r\n250 AUTH LOGIN XOAUTH2\r\n".into()
        } else if line.starts_with("AUTH XOAUTH2") {
            match outcome {
                AuthOutcome::Accept => "235 2.7.0 Authentication successful\r\n".into(),
                AuthOutcome::Challenge => {
                    let report = r#"{"status":"401","schemes":"bearer","scope":"https://outlook.office365.com/.default"}"#;
                    format!("334 {}\r\n", STANDARD.encode(report))
                }
            }
        } else if line.is_empty() {
            "535 5.7.3 Authentication unsuccessful\r\n".into()
        } else if line == "DATA" {
            write.write_all(b"354 Start mail input\r\n").await.unwrap();
            while let Ok(Some(body)) = lines.next_line().await {
                if body == "." {
                    break;
                }
                recorded.lock().unwrap().push(body);
            }
            "250 2.6.0 Queued\r\n".into()
        } else if line == "QUIT" {
            write.write_all(b"221 2.0.0 Bye\r\n").await.unwrap();
            return;
        } else {
            "250 OK\r\n".into()
        };
        write.write_all(reply.as_bytes()).await.unwrap();
    }
}

/// Token endpoint double answering every request the same way.
#[derive(Debug)]
pub struct TokenEndpoint {
    status: u16,
    body: String,
    pub calls: AtomicUsize,
}

impl TokenEndpoint {
    pub fn new(status: u16, body: &str) -> Arc<Self> {
        Arc::new(Self {
            status,
            body: body.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for TokenEndpoint {
    async fn send(&self, _request: HttpRequest) -> relaymail_oauth::Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse::new(self.status, self.body.clone()))
    }
}

pub fn authenticator(endpoint: &Arc<TokenEndpoint>) -> Arc<XOAuth2Authenticator> {
    let http: Arc<dyn HttpClient> = endpoint.clone();
    let provider = TokenProvider::builder(Credentials::new("contoso.onmicrosoft.com", "client", "secret"))
        .http_client(http)
        .build()
        .unwrap();
    Arc::new(XOAuth2Authenticator::new(Arc::new(provider)))
}

/// Decodes the payload of an `AUTH XOAUTH2 <payload>` line.
pub fn xoauth2_payload(line: &str) -> String {
    let encoded = line.trim_start_matches("AUTH XOAUTH2 ");
    String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
}
