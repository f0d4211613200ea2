use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::session::Session;
use crate::utils::Logger;

fn local() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

/// Pause before the next `accept` after it failed.
///
/// Errors tied to a single connection are retried at once. Anything else,
/// such as running out of file descriptors, would fail again immediately.
fn accept_backoff(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted => Duration::ZERO,
        _ => Duration::from_millis(100),
    }
}

pub struct MailServer {
    config: Arc<Config>,
    handler: Arc<dyn Handler>,
    logger: Logger,
}

impl MailServer {
    pub fn new(config: Config, handler: Arc<dyn Handler>, logger: Logger) -> Self {
        Self {
            config: Arc::new(config),
            handler,
            logger,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds the configured address. Failing here is fatal for the caller;
    /// nothing has been accepted yet.
    pub async fn bind(self) -> Result<Listener> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr: addr.clone(), source })?;

        let bound = listener.local_addr()?;
        self.logger.log(&local(), &format!("Listening on {}", bound)).await;

        Ok(Listener { listener, server: self })
    }
}

/// A bound socket ready to serve sessions.
pub struct Listener {
    listener: TcpListener,
    server: MailServer,
}

impl Listener {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves, one task per session.
    ///
    /// After shutdown the socket is closed at once; running sessions get the
    /// configured grace period and are aborted after that.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Listener { listener, server } = self;
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, client_addr)) => {
                        server.logger.log(&client_addr, "New connection").await;
                        let session = Session::new(
                            stream,
                            client_addr,
                            server.config.clone(),
                            server.handler.clone(),
                            server.logger.clone(),
                        );
                        let logger = server.logger.clone();
                        sessions.spawn(async move {
                            if let Err(e) = session.run().await {
                                logger.log(&client_addr, &format!("Error: {}", e)).await;
                            }
                        });
                    }
                    Err(e) => {
                        server.logger.log(&local(), &format!("Accept error: {}", e)).await;
                        time::sleep(accept_backoff(&e)).await;
                    }
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                _ = &mut shutdown => break,
            }
        }

        drop(listener);
        let grace = server.config.shutdown_grace;
        server
            .logger
            .log(&local(), &format!("Shutting down, {} session(s) still running", sessions.len()))
            .await;

        let drained = time::timeout(grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            server
                .logger
                .log(&local(), &format!("Aborting {} session(s) after {:?}", sessions.len(), grace))
                .await;
            sessions.shutdown().await;
        }

        Ok(())
    }
}
