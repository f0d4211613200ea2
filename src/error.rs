use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while starting the server or driving a session.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {what} {path:?}: {source}")]
    Credential {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("TLS needs both a certificate and a private key")]
    MissingCredential,

    #[error("no certificate found in {0:?}")]
    NoCertificate(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("failed to build TLS config: {0}")]
    TlsConfig(#[from] rustls::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("line longer than {0} bytes")]
    LineTooLong(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
