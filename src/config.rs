use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};
use crate::tls;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "mailsink",
    about = "A minimal SMTP receiver with STARTTLS that prints received mail",
    author = "2026, Philippe TEMESI <https://www.tems.be>"
)]
pub struct Opt {
    /// Listening address
    #[structopt(short = "a", long = "address", default_value = "0.0.0.0")]
    pub address: String,

    /// Listening port (587 is the submission port with STARTTLS)
    #[structopt(short = "p", long = "port", default_value = "587")]
    pub port: u16,

    /// Name announced in the greeting and EHLO reply (default: machine hostname)
    #[structopt(long = "hostname")]
    pub hostname: Option<String>,

    /// TLS certificate chain (PEM)
    #[structopt(long = "tls-cert", parse(from_os_str))]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[structopt(long = "tls-key", parse(from_os_str))]
    pub tls_key: Option<PathBuf>,

    /// Disable STARTTLS even when a certificate is given
    #[structopt(long = "no-tls")]
    pub no_tls: bool,

    /// Idle timeout in seconds before a silent connection is closed
    #[structopt(long = "timeout", default_value = "30")]
    pub timeout: u64,

    /// Seconds a client gets to finish the TLS handshake after STARTTLS
    #[structopt(long = "handshake-timeout", default_value = "60")]
    pub handshake_timeout: u64,

    /// Largest message body accepted, in bytes
    #[structopt(long = "max-message-size", default_value = "33554432")]
    pub max_message_size: usize,

    /// Seconds running sessions may keep going after Ctrl+C
    #[structopt(long = "shutdown-grace", default_value = "10")]
    pub shutdown_grace: u64,

    /// Log file path
    #[structopt(long = "logs", parse(from_os_str))]
    pub log_file: Option<PathBuf>,

    /// Directory to save received messages
    #[structopt(long = "data", parse(from_os_str))]
    pub data_dir: Option<PathBuf>,

    /// Verbose mode - display every command and reply
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,

    /// Enable raw display (not filtered) - DANGEROUS
    #[structopt(short = "r", long = "raw")]
    pub raw_display: bool,
}

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);
/// Longest command or DATA line, terminator included.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Listener settings, fixed for the life of the process and shared by all sessions.
#[derive(Clone)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub hostname: String,
    pub idle_timeout: Duration,
    pub shutdown_grace: Duration,
    pub handshake_timeout: Duration,
    pub max_line_length: usize,
    pub max_message_size: usize,
    pub tls: Option<TlsAcceptor>,
}

impl Config {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 587,
            hostname: hostname.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_line_length: MAX_LINE_LENGTH,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tls: None,
        }
    }

    /// Loads the TLS credentials right away, so a bad certificate or key
    /// stops startup instead of failing per connection.
    pub fn from_opt(opt: &Opt) -> Result<Self> {
        let hostname = opt
            .hostname
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned());

        let tls = if opt.no_tls {
            None
        } else {
            match (&opt.tls_cert, &opt.tls_key) {
                (Some(cert_path), Some(key_path)) => Some(tls::load_acceptor(cert_path, key_path)?),
                (None, None) => None,
                _ => return Err(Error::MissingCredential),
            }
        };

        Ok(Self {
            address: opt.address.clone(),
            port: opt.port,
            hostname,
            idle_timeout: Duration::from_secs(opt.timeout),
            shutdown_grace: Duration::from_secs(opt.shutdown_grace),
            handshake_timeout: Duration::from_secs(opt.handshake_timeout),
            max_line_length: MAX_LINE_LENGTH,
            max_message_size: opt.max_message_size,
            tls,
        })
    }

    pub fn with_listen(mut self, address: impl Into<String>, port: u16) -> Self {
        self.address = address.into();
        self.port = port;
        self
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}
