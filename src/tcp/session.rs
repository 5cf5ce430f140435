//! Relay loop for one paired session.

use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crypto::{seal_key, CryptoChannel, SymmetricKey};
use crate::tcp::companion::{select_ready, Companion};
use crate::types::diagnostics::{
    CHAT_STARTED, CHAT_STOPPED, INVALID_PUBLIC_KEY, MALFORMED_MESSAGE, MESSAGE_TOO_LONG,
    SECURE_ALREADY_ENABLED, SECURE_NOT_NEGOTIATED, UNKNOWN_COMMAND,
};
use crate::types::{Command, Identifier, Response, SessionId, MAX_PAYLOAD};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// One companion's transport went away.
    Disconnected,
    /// A companion sent `DSCN`.
    Suspended,
    /// The server is shutting down.
    Shutdown,
}

/// Result of handling one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Continue,
    End(SessionEnd),
}

/// Two paired companions and the relay between them.
///
/// Companions are addressed by index; the peer of `i` is `1 - i`.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    companions: [Companion; 2],
}

impl Session {
    /// Pair two companions under a session id.
    pub fn new(id: SessionId, first: Companion, second: Companion) -> Self {
        Self {
            id,
            companions: [first, second],
        }
    }

    /// Get the session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Greet both companions, relay until a terminal transition, then close
    /// both transports.
    pub async fn run(mut self, poll_timeout: Duration, shutdown: CancellationToken) -> SessionEnd {
        info!(
            "Session {} started between {} and {}",
            self.id,
            self.companions[0].peer_addr(),
            self.companions[1].peer_addr()
        );

        let end = self.relay(poll_timeout, &shutdown).await;

        let Session { id, companions } = self;
        let [first, second] = companions;
        first.close().await;
        second.close().await;

        info!("Session {} closed ({:?})", id, end);
        end
    }

    async fn relay(&mut self, poll_timeout: Duration, shutdown: &CancellationToken) -> SessionEnd {
        for index in 0..2 {
            let greeting = Response::okay(Identifier::Conn).with_payload(CHAT_STARTED);
            if let Transition::End(end) = self.reply(index, greeting).await {
                return end;
            }
        }

        loop {
            if shutdown.is_cancelled() {
                self.notify_stopped(0).await;
                self.notify_stopped(1).await;
                return SessionEnd::Shutdown;
            }

            for index in select_ready(&self.companions, poll_timeout).await {
                if let Transition::End(end) = self.step(index, poll_timeout, shutdown).await {
                    return end;
                }
            }
        }
    }

    /// Receive and dispatch one command from companion `index`.
    ///
    /// A frame that does not complete within `poll_timeout` is answered as an
    /// unknown command; its partial bytes are discarded.
    async fn step(
        &mut self,
        index: usize,
        poll_timeout: Duration,
        shutdown: &CancellationToken,
    ) -> Transition {
        let received = tokio::select! {
            _ = shutdown.cancelled() => None,
            received = timeout(poll_timeout, self.companions[index].receive_command()) => Some(received),
        };

        let command = match received {
            None => {
                self.notify_stopped(0).await;
                self.notify_stopped(1).await;
                return Transition::End(SessionEnd::Shutdown);
            }
            Some(Ok(Ok(command))) => command,
            Some(Ok(Err(e))) => {
                info!(
                    "Session {}: companion {} lost: {}",
                    self.id,
                    self.companions[index].peer_addr(),
                    e
                );
                self.notify_stopped(1 - index).await;
                return Transition::End(SessionEnd::Disconnected);
            }
            Some(Err(_)) => {
                warn!(
                    "Session {}: incomplete frame from {}",
                    self.id,
                    self.companions[index].peer_addr()
                );
                Command::unknown()
            }
        };

        debug!("Session {}: dispatching {}", self.id, command.iden);
        self.dispatch(index, command).await
    }

    async fn dispatch(&mut self, index: usize, command: Command) -> Transition {
        match command.iden {
            Identifier::Conn => {
                let response = Response::okay(Identifier::Conn).with_payload(CHAT_STARTED);
                self.reply(index, response).await
            }
            Identifier::Dscn => {
                self.notify_stopped(index).await;
                self.notify_stopped(1 - index).await;
                Transition::End(SessionEnd::Suspended)
            }
            Identifier::Send => self.relay_message(index, command.payload).await,
            Identifier::Echo => {
                let response = Response::okay(Identifier::Echo).with_payload(command.payload);
                self.reply(index, response).await
            }
            Identifier::Tybe | Identifier::Tyen => {
                self.forward(index, Response::okay(command.iden)).await
            }
            Identifier::Aesk => self.exchange_keys(index, &command.payload).await,
            Identifier::Mesg | Identifier::Unkn => {
                let response = Response::fail(Identifier::Unkn).with_payload(UNKNOWN_COMMAND);
                self.reply(index, response).await
            }
        }
    }

    /// Re-key a chat payload from the sender's channel to the peer's and
    /// deliver it.
    async fn relay_message(&mut self, index: usize, payload: Vec<u8>) -> Transition {
        let sender = self.companions[index].channel();
        let receiver = self.companions[1 - index].channel();

        let outgoing = match (sender.key(), receiver.key()) {
            (Some(own), Some(theirs)) => match own.decrypt(&payload) {
                Ok(plain) => Ok(theirs.encrypt(&plain)),
                Err(e) => {
                    warn!("Session {}: undecryptable message: {}", self.id, e);
                    Err(MALFORMED_MESSAGE)
                }
            },
            (None, None) => Ok(payload),
            _ => Err(SECURE_NOT_NEGOTIATED),
        };
        let outgoing = outgoing.and_then(|outgoing| {
            if outgoing.len() > MAX_PAYLOAD {
                Err(MESSAGE_TOO_LONG)
            } else {
                Ok(outgoing)
            }
        });

        let outgoing = match outgoing {
            Ok(outgoing) => outgoing,
            Err(diagnostic) => {
                let response = Response::fail(Identifier::Send).with_payload(diagnostic);
                return self.reply(index, response).await;
            }
        };

        if let Transition::End(end) = self.reply(index, Response::okay(Identifier::Send)).await {
            return Transition::End(end);
        }
        let delivery = Response::okay(Identifier::Mesg).with_payload(outgoing);
        self.forward(index, delivery).await
    }

    /// Hand companion `index` a fresh symmetric key sealed to its public key.
    async fn exchange_keys(&mut self, index: usize, public_key: &[u8]) -> Transition {
        if !self.companions[index].channel().is_none() {
            let response = Response::fail(Identifier::Aesk).with_payload(SECURE_ALREADY_ENABLED);
            return self.reply(index, response).await;
        }

        let key = SymmetricKey::generate();
        let response = match seal_key(&key, public_key) {
            Ok(sealed) => {
                self.companions[index].set_channel(CryptoChannel::Established(key));
                info!(
                    "Session {}: secure channel established for {}",
                    self.id,
                    self.companions[index].peer_addr()
                );
                Response::okay(Identifier::Aesk).with_payload(sealed)
            }
            Err(e) => {
                warn!("Session {}: key exchange rejected: {}", self.id, e);
                Response::fail(Identifier::Aesk).with_payload(INVALID_PUBLIC_KEY)
            }
        };
        self.reply(index, response).await
    }

    /// Send to companion `index`. If it is gone, tell the peer and end.
    async fn reply(&mut self, index: usize, response: Response) -> Transition {
        match self.companions[index].send(&response).await {
            Ok(()) => Transition::Continue,
            Err(e) => {
                info!("Session {}: reply to companion failed: {}", self.id, e);
                self.notify_stopped(1 - index).await;
                Transition::End(SessionEnd::Disconnected)
            }
        }
    }

    /// Send to the peer of companion `index`. If the peer is gone, tell the
    /// sender and end.
    async fn forward(&mut self, index: usize, response: Response) -> Transition {
        let peer = 1 - index;
        match self.companions[peer].send(&response).await {
            Ok(()) => Transition::Continue,
            Err(e) => {
                info!("Session {}: forward to companion failed: {}", self.id, e);
                self.notify_stopped(index).await;
                Transition::End(SessionEnd::Disconnected)
            }
        }
    }

    /// Best-effort disconnect notice. Failures are swallowed.
    async fn notify_stopped(&mut self, index: usize) {
        let notice = Response::okay(Identifier::Dscn).with_payload(CHAT_STOPPED);
        if let Err(e) = self.companions[index].send(&notice).await {
            debug!(
                "Session {}: disconnect notice to {} dropped: {}",
                self.id,
                self.companions[index].peer_addr(),
                e
            );
        }
    }
}
