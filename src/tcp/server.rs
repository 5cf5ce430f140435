use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::tcp::companion::Companion;
use crate::tcp::session::{Session, SessionEnd};
use crate::types::diagnostics::ACCEPT_TIME_EXPIRED;
use crate::types::{Identifier, RelayError, Response, SessionId};

/// TCP relay server pairing incoming peers into sessions.
pub struct RelayServer {
    config: ServerConfig,
    running: Option<Running>,
}

struct Running {
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl RelayServer {
    /// Create a stopped server for the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    /// Bind the listener and start the pairing worker.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr, RelayError> {
        if self.running.is_some() {
            return Err(RelayError::AlreadyRunning);
        }

        let listener = bind(&self.config).await?;
        let local_addr = listener.local_addr()?;
        info!("Relay server bound to {}", local_addr);

        let shutdown = CancellationToken::new();
        let pairing = Pairing {
            listener,
            accept_timeout: self.config.accept_timeout(),
            poll_timeout: self.config.poll_timeout(),
            shutdown: shutdown.clone(),
            pending: None,
            sessions: Vec::new(),
            next_session_id: 1,
        };
        let worker = tokio::spawn(pairing.run());

        self.running = Some(Running {
            shutdown,
            worker,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Stop pairing, wait for every session to finish, then close the
    /// listener.
    pub async fn stop(&mut self) -> Result<(), RelayError> {
        let running = self.running.take().ok_or(RelayError::AlreadyStopped)?;
        info!("Relay server on {} stopping...", running.local_addr);

        running.shutdown.cancel();
        if let Err(e) = running.worker.await {
            error!("Pairing worker failed: {}", e);
        }

        info!("Relay server stopped");
        Ok(())
    }

    /// Whether the pairing worker is running.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Get the local address this server is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}

async fn bind(config: &ServerConfig) -> Result<TcpListener, RelayError> {
    let addr = config.bind_addr();
    let bind_error = |source: std::io::Error| RelayError::Bind {
        addr: addr.clone(),
        source,
    };

    let socket_addr = lookup_host(addr.as_str())
        .await
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| {
            bind_error(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "address resolved to nothing",
            ))
        })?;

    let socket = if socket_addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;
    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(socket_addr).map_err(bind_error)?;
    socket.listen(config.max_pending).map_err(bind_error)
}

/// State owned by the pairing worker. The pending slot is touched by this
/// worker only.
struct Pairing {
    listener: TcpListener,
    accept_timeout: Duration,
    poll_timeout: Duration,
    shutdown: CancellationToken,
    pending: Option<Companion>,
    sessions: Vec<JoinHandle<SessionEnd>>,
    next_session_id: SessionId,
}

impl Pairing {
    async fn run(mut self) {
        info!("Pairing loop started");

        loop {
            self.sessions.retain(|handle| !handle.is_finished());

            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = tokio::time::timeout(self.accept_timeout, self.listener.accept()) => accepted,
            };

            match accepted {
                Ok(Ok((stream, addr))) => {
                    info!("New connection from {}", addr);
                    self.admit(Companion::new(stream, addr));
                }
                Ok(Err(e)) => {
                    error!("Failed to accept connection: {}", e);
                }
                Err(_) => self.expire_pending().await,
            }
        }

        if let Some(companion) = self.pending.take() {
            companion.close().await;
        }
        for handle in self.sessions.drain(..) {
            match handle.await {
                Ok(end) => debug!("Session worker joined ({:?})", end),
                Err(e) => error!("Session worker failed: {}", e),
            }
        }

        info!("Pairing loop stopped");
    }

    fn admit(&mut self, companion: Companion) {
        match self.pending.take() {
            None => {
                debug!("Companion {} waiting for a partner", companion.peer_addr());
                self.pending = Some(companion);
            }
            Some(first) => {
                let id = self.next_session_id;
                self.next_session_id += 1;
                info!(
                    "Pairing {} with {} as session {}",
                    first.peer_addr(),
                    companion.peer_addr(),
                    id
                );

                let session = Session::new(id, first, companion);
                let handle = tokio::spawn(session.run(self.poll_timeout, self.shutdown.clone()));
                self.sessions.push(handle);
            }
        }
    }

    async fn expire_pending(&mut self) {
        let Some(mut companion) = self.pending.take() else {
            return;
        };

        info!("Companion {} accept time expired", companion.peer_addr());
        let response = Response::fail(Identifier::Conn).with_payload(ACCEPT_TIME_EXPIRED);
        if let Err(e) = companion.send(&response).await {
            debug!("Expiry notice to {} dropped: {}", companion.peer_addr(), e);
        }
        companion.close().await;
    }
}
