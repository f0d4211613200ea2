use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};
use crate::tls;

/// The byte stream a session currently talks through.
///
/// Reads are buffered line by line; writes go straight to the underlying
/// stream and are flushed after every reply.
pub enum Transport<S> {
    Plain(BufReader<S>),
    Tls(Box<BufReader<TlsStream<S>>>),
    /// Left behind while an upgrade is in flight or after it failed.
    Detached,
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport detached")
}

/// Reads up to and including `\n`, but never more than `limit` bytes.
async fn read_bounded<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let start = buf.len();
    let n = reader.take(limit as u64).read_until(b'\n', buf).await?;
    if n == limit && buf.last() != Some(&b'\n') {
        buf.truncate(start);
        return Err(Error::LineTooLong(limit));
    }
    Ok(n)
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Transport::Plain(BufReader::new(stream))
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Appends the next line, CRLF included, to `buf`. Returns 0 at EOF.
    ///
    /// A line that runs past `limit` bytes without a newline is an error;
    /// the bytes read so far are not appended.
    pub async fn read_line(&mut self, buf: &mut Vec<u8>, limit: usize) -> Result<usize> {
        match self {
            Transport::Plain(stream) => read_bounded(stream, buf, limit).await,
            Transport::Tls(stream) => read_bounded(&mut **stream, buf, limit).await,
            Transport::Detached => Err(detached().into()),
        }
    }

    pub async fn write_reply(&mut self, reply: &[u8]) -> io::Result<()> {
        match self {
            Transport::Plain(stream) => {
                stream.write_all(reply).await?;
                stream.flush().await
            }
            Transport::Tls(stream) => {
                stream.write_all(reply).await?;
                stream.flush().await
            }
            Transport::Detached => Err(detached()),
        }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(stream) => stream.shutdown().await,
            Transport::Tls(stream) => stream.shutdown().await,
            Transport::Detached => Ok(()),
        }
    }

    /// Swaps a plaintext transport for a TLS one negotiated over the same
    /// connection.
    ///
    /// Whatever sits unread in the plaintext buffer is dropped together with
    /// the old handle. Returns the upgraded transport and the number of
    /// discarded bytes. Only a plaintext transport can be upgraded.
    pub async fn upgrade(self, acceptor: &TlsAcceptor, limit: Duration) -> Result<(Self, usize)> {
        let reader = match self {
            Transport::Plain(reader) => reader,
            Transport::Tls(_) => {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "transport already secure").into())
            }
            Transport::Detached => return Err(detached().into()),
        };

        let discarded = reader.buffer().len();
        let stream = tls::handshake(acceptor, reader.into_inner(), limit).await?;
        Ok((Transport::Tls(Box::new(BufReader::new(stream))), discarded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 64;

    fn io_kind(err: Error) -> io::ErrorKind {
        match err {
            Error::Io(e) => e.kind(),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn reads_lines_and_writes_replies() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut transport = Transport::new(server);

        client.write_all(b"EHLO a\r\nQUIT\r\n").await.unwrap();

        let mut line = Vec::new();
        transport.read_line(&mut line, LIMIT).await.unwrap();
        assert_eq!(line, b"EHLO a\r\n");
        line.clear();
        transport.read_line(&mut line, LIMIT).await.unwrap();
        assert_eq!(line, b"QUIT\r\n");

        transport.write_reply(b"221 Bye\r\n").await.unwrap();
        let mut reply = [0u8; 9];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"221 Bye\r\n");
        assert!(!transport.is_secure());
    }

    #[tokio::test]
    async fn detached_transport_refuses_io() {
        let mut transport: Transport<tokio::io::DuplexStream> = Transport::Detached;
        let mut line = Vec::new();

        let err = transport.read_line(&mut line, LIMIT).await.unwrap_err();
        assert_eq!(io_kind(err), io::ErrorKind::NotConnected);
        let err = transport.write_reply(b"250 OK\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn line_at_the_limit_is_accepted() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut transport = Transport::new(server);
        let mut exact = vec![b'a'; 6];
        exact.extend_from_slice(b"\r\n");
        client.write_all(&exact).await.unwrap();

        let mut line = Vec::new();
        assert_eq!(transport.read_line(&mut line, 8).await.unwrap(), 8);
        assert_eq!(line, exact);
    }

    #[tokio::test]
    async fn overlong_line_is_rejected_without_buffering_it() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut transport = Transport::new(server);
        client.write_all(&[b'x'; 200]).await.unwrap();

        let mut line = b"kept".to_vec();
        match transport.read_line(&mut line, LIMIT).await {
            Err(Error::LineTooLong(limit)) => assert_eq!(limit, LIMIT),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(line, b"kept");
    }

    #[tokio::test]
    async fn only_plaintext_can_be_upgraded() {
        let transport: Transport<tokio::io::DuplexStream> = Transport::Detached;
        let acceptor = TlsAcceptor::from(std::sync::Arc::new(
            rustls::ServerConfig::builder()
                .with_safe_defaults()
                .with_no_client_auth()
                .with_cert_resolver(std::sync::Arc::new(rustls::server::ResolvesServerCertUsingSni::new())),
        ));

        let err = transport
            .upgrade(&acceptor, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert_eq!(io_kind(err), io::ErrorKind::NotConnected);
    }
}
