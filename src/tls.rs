use std::fs::File;
use std::io::{self, BufReader as StdBufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::Item;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};

fn open(what: &'static str, path: &Path) -> Result<StdBufReader<File>> {
    let file = File::open(path).map_err(|source| Error::Credential {
        what,
        path: path.to_path_buf(),
        source,
    })?;
    Ok(StdBufReader::new(file))
}

/// Reads every certificate of a PEM chain, leaf first.
pub fn load_certificates(path: &Path) -> Result<Vec<Certificate>> {
    let mut reader = open("certificate", path)?;
    let certs = rustls_pemfile::certs(&mut reader).map_err(|source| Error::Credential {
        what: "certificate",
        path: path.to_path_buf(),
        source,
    })?;

    if certs.is_empty() {
        return Err(Error::NoCertificate(path.to_path_buf()));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

/// Reads the first private key of a PEM file: PKCS#8, PKCS#1 (RSA) or SEC1 (EC).
pub fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let mut reader = open("private key", path)?;

    loop {
        let item = rustls_pemfile::read_one(&mut reader).map_err(|source| Error::Credential {
            what: "private key",
            path: path.to_path_buf(),
            source,
        })?;

        match item {
            Some(Item::PKCS8Key(key)) | Some(Item::RSAKey(key)) | Some(Item::ECKey(key)) => {
                return Ok(PrivateKey(key));
            }
            Some(_) => continue,
            None => return Err(Error::NoPrivateKey(path.to_path_buf())),
        }
    }
}

/// Builds the acceptor shared read-only by every session.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_chain = load_certificates(cert_path)?;
    let private_key = load_private_key(key_path)?;

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Runs the server side of a TLS handshake over an already open stream.
///
/// The plaintext stream is consumed; on failure it is dropped with the error.
/// A client that has not finished within `limit` fails with `TimedOut`.
pub async fn handshake<S>(acceptor: &TlsAcceptor, stream: S, limit: Duration) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match time::timeout(limit, acceptor.accept(stream)).await {
        Ok(accepted) => accepted.map_err(Error::Handshake),
        Err(_) => Err(Error::Handshake(io::Error::from(io::ErrorKind::TimedOut))),
    }
}
