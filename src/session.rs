use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tokio_rustls::TlsAcceptor;

use crate::command::{parse_path, Command, Verb};
use crate::config::Config;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::transport::Transport;
use crate::utils::Logger;

const READY_TO_START_TLS: &str = "220 Ready to start TLS\r\n";
const TLS_NOT_AVAILABLE: &str = "454 TLS not available\r\n";
const TLS_ALREADY_ACTIVE: &str = "554 TLS already active\r\n";
const OK: &str = "250 OK\r\n";
const START_DATA: &str = "354 End data with <CR><LF>.<CR><LF>\r\n";
const BYE: &str = "221 Bye\r\n";
const NOT_RECOGNIZED: &str = "500 Command not recognized\r\n";
const LINE_TOO_LONG: &str = "500 Line too long\r\n";
const MESSAGE_TOO_BIG: &str = "552 Message size exceeds fixed maximum message size\r\n";
const HANDLER_FAILED: &str = "500 Error processing message";

const TERMINATOR: &[u8] = b".\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Greeting,
    AwaitCommand,
    InData,
    Closed,
}

/// What the read loop has to do after a command was answered.
enum Next {
    Continue,
    StartTls(TlsAcceptor),
}

/// One SMTP conversation over one connection.
///
/// The session owns the transport and swaps it for a TLS one on STARTTLS;
/// nothing else ever holds a handle to the connection.
pub struct Session<S> {
    state: State,
    secure: bool,
    transport: Transport<S>,
    envelope: Envelope,
    /// Set once the DATA body outgrows the size limit; the rest is skipped.
    oversized: bool,
    config: Arc<Config>,
    handler: Arc<dyn Handler>,
    peer: SocketAddr,
    logger: Logger,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        config: Arc<Config>,
        handler: Arc<dyn Handler>,
        logger: Logger,
    ) -> Self {
        Self {
            state: State::Greeting,
            secure: false,
            transport: Transport::new(stream),
            envelope: Envelope::new(),
            oversized: false,
            config,
            handler,
            peer,
            logger,
        }
    }

    /// Greets the client and serves commands until QUIT, EOF, idle timeout
    /// or a transport failure. The connection is closed on every path.
    pub async fn run(mut self) -> Result<()> {
        let result = self.serve().await;
        let _ = self.transport.shutdown().await;
        self.logger.log(&self.peer, "Connection closed").await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let banner = format!("220 {} Mail Server Ready\r\n", self.config.hostname);
        self.reply(&banner).await?;
        self.state = State::AwaitCommand;

        let mut line = Vec::new();
        while self.state != State::Closed {
            line.clear();

            let limit = self.config.max_line_length;
            let read = time::timeout(self.config.idle_timeout, self.transport.read_line(&mut line, limit)).await;
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(Error::LineTooLong(limit))) => {
                    // the rest of the line is still in flight, so the stream cannot be resynced
                    self.logger
                        .log(&self.peer, &format!("Line longer than {} bytes, closing", limit))
                        .await;
                    let _ = self.reply(LINE_TOO_LONG).await;
                    return Err(Error::LineTooLong(limit));
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    self.logger
                        .log(&self.peer, &format!("Idle for {:?}, closing", self.config.idle_timeout))
                        .await;
                    self.state = State::Closed;
                    continue;
                }
            };
            if n == 0 {
                self.state = State::Closed;
                continue;
            }

            if self.state == State::InData {
                self.data_line(&line).await?;
                continue;
            }

            if let Next::StartTls(acceptor) = self.dispatch(&line).await? {
                self.start_tls(acceptor).await?;
            }
        }
        Ok(())
    }

    async fn reply(&mut self, reply: &str) -> Result<()> {
        self.logger.log_verbose(&self.peer, "REPLY", reply).await;
        self.transport.write_reply(reply.as_bytes()).await?;
        Ok(())
    }

    async fn dispatch(&mut self, line: &[u8]) -> Result<Next> {
        let text = String::from_utf8_lossy(line);
        self.logger.log_verbose(&self.peer, "COMMAND", text.trim_end()).await;

        let Some(command) = Command::parse(&text) else {
            return Ok(Next::Continue);
        };

        match command.verb {
            Verb::Ehlo | Verb::Helo => {
                let mut response = format!("250-{}\r\n250-8BITMIME\r\n", self.config.hostname);
                if self.config.tls_enabled() && !self.secure {
                    response.push_str("250-STARTTLS\r\n");
                }
                response.push_str(OK);
                self.reply(&response).await?;
            }

            Verb::StartTls => match self.config.tls.clone() {
                None => self.reply(TLS_NOT_AVAILABLE).await?,
                Some(_) if self.secure => self.reply(TLS_ALREADY_ACTIVE).await?,
                Some(acceptor) => {
                    self.reply(READY_TO_START_TLS).await?;
                    return Ok(Next::StartTls(acceptor));
                }
            },

            Verb::Mail => {
                self.envelope.set_sender(parse_path(command.argument, "FROM:"));
                self.reply(OK).await?;
            }

            Verb::Rcpt => {
                self.envelope.add_recipient(parse_path(command.argument, "TO:"));
                self.reply(OK).await?;
            }

            Verb::Data => {
                self.reply(START_DATA).await?;
                self.state = State::InData;
            }

            Verb::Quit => {
                self.reply(BYE).await?;
                self.state = State::Closed;
            }

            Verb::Unknown(_) => {
                self.reply(NOT_RECOGNIZED).await?;
            }
        }

        Ok(Next::Continue)
    }

    async fn data_line(&mut self, line: &[u8]) -> Result<()> {
        if line != TERMINATOR {
            if self.oversized || self.envelope.body().len() + line.len() > self.config.max_message_size {
                self.oversized = true;
            } else {
                self.envelope.push_body_line(line);
            }
            return Ok(());
        }

        self.state = State::AwaitCommand;
        if std::mem::take(&mut self.oversized) {
            self.envelope.reset();
            self.logger
                .log(&self.peer, &format!("Message over {} bytes dropped", self.config.max_message_size))
                .await;
            return self.reply(MESSAGE_TOO_BIG).await;
        }

        let reply = self.deliver().await;
        self.reply(&format!("{}\r\n", reply)).await
    }

    /// Hands the finished envelope to the handler and resets it for the next
    /// message, whatever the handler does.
    async fn deliver(&mut self) -> String {
        let envelope = self.envelope.take();
        let handler = self.handler.clone();

        self.logger
            .log(
                &self.peer,
                &format!(
                    "Message from <{}> to {} recipient(s), {} bytes",
                    envelope.sender().unwrap_or(""),
                    envelope.recipients().len(),
                    envelope.body().len()
                ),
            )
            .await;

        let outcome = tokio::task::spawn_blocking(move || {
            handler.handle(envelope.sender(), envelope.recipients(), envelope.body())
        })
        .await;

        match outcome {
            Ok(Ok(reply)) => reply.trim_end_matches(['\r', '\n']).to_string(),
            Ok(Err(e)) => {
                self.logger.log(&self.peer, &format!("Handler error: {:#}", e)).await;
                HANDLER_FAILED.to_string()
            }
            Err(e) => {
                self.logger.log(&self.peer, &format!("Handler panicked: {}", e)).await;
                HANDLER_FAILED.to_string()
            }
        }
    }

    /// Replaces the plaintext transport with a TLS one. If the handshake
    /// fails the session is left without any transport.
    async fn start_tls(&mut self, acceptor: TlsAcceptor) -> Result<()> {
        self.logger.log(&self.peer, "Starting STARTTLS handshake").await;
        let plain = std::mem::replace(&mut self.transport, Transport::Detached);

        let (transport, discarded) = plain.upgrade(&acceptor, self.config.handshake_timeout).await?;
        self.transport = transport;
        self.secure = self.transport.is_secure();
        if discarded > 0 {
            self.logger
                .log(&self.peer, &format!("Discarded {} plaintext bytes sent before the handshake", discarded))
                .await;
        }
        self.logger.log(&self.peer, "TLS session established").await;
        Ok(())
    }
}
