#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailsink::{Config, Handler, Logger, Session};
use rcgen::{generate_simple_self_signed, CertifiedKey};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub const HOSTNAME: &str = "mx.test";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub body: Vec<u8>,
}

pub type Mailbox = Arc<Mutex<Vec<Received>>>;

/// A handler that remembers every message and answers with `reply`.
pub fn recorder(reply: &'static str) -> (Arc<dyn Handler>, Mailbox) {
    let mailbox: Mailbox = Arc::new(Mutex::new(Vec::new()));
    let sink = mailbox.clone();
    let handler = move |sender: Option<&str>, recipients: &[String], body: &[u8]| -> anyhow::Result<String> {
        sink.lock().unwrap().push(Received {
            sender: sender.map(str::to_string),
            recipients: recipients.to_vec(),
            body: body.to_vec(),
        });
        Ok(reply.to_string())
    };
    (Arc::new(handler), mailbox)
}

pub fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// Runs a session over an in-memory pipe and returns the client end.
pub fn spawn_session(config: Config, handler: Arc<dyn Handler>) -> (Client<DuplexStream>, JoinHandle<mailsink::Result<()>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let session = Session::new(server, peer(), Arc::new(config), handler, Logger::disabled());
    (Client::new(client), tokio::spawn(session.run()))
}

/// Line-oriented SMTP client end used by the tests.
pub struct Client<S> {
    stream: BufReader<S>,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{}\r\n", line).as_bytes()).await;
    }

    /// Reads one complete reply, following `250-` continuation lines.
    pub async fn reply(&mut self) -> String {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read_line(&mut line))
                .await
                .expect("timed out waiting for a reply")
                .unwrap();
            assert!(n > 0, "connection closed while reading a reply: {:?}", reply);
            reply.push_str(&line);
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                return reply;
            }
        }
    }

    pub async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.reply().await
    }

    /// Everything the server still sends until it closes the connection.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.stream.read_to_end(&mut rest))
            .await
            .expect("server did not close the connection");
        rest
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

/// Throwaway self-signed credentials for `localhost`.
pub struct TlsFixture {
    pub acceptor: TlsAcceptor,
    pub connector: TlsConnector,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    _dir: tempfile::TempDir,
}

pub fn tls_fixture() -> TlsFixture {
    let CertifiedKey { cert, key_pair } = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

    let acceptor = mailsink::tls::load_acceptor(&cert_path, &key_path).unwrap();

    let mut roots = rustls::RootCertStore::empty();
    roots.add(&rustls::Certificate(cert.der().to_vec())).unwrap();
    let client_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    TlsFixture {
        acceptor,
        connector: TlsConnector::from(Arc::new(client_config)),
        cert_path,
        key_path,
        _dir: dir,
    }
}

pub fn server_name() -> rustls::ServerName {
    rustls::ServerName::try_from("localhost").unwrap()
}

pub fn config() -> Config {
    Config::new(HOSTNAME)
}

pub fn ehlo_reply(starttls: bool) -> String {
    let mut reply = format!("250-{}\r\n250-8BITMIME\r\n", HOSTNAME);
    if starttls {
        reply.push_str("250-STARTTLS\r\n");
    }
    reply.push_str("250 OK\r\n");
    reply
}
