//! Relay-side endpoint for one connected peer.

use std::net::SocketAddr;
use std::time::Duration;

use futures::future::{select_all, FutureExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::unconstrained;
use tracing::{debug, warn};

use crate::crypto::CryptoChannel;
use crate::frame::{encode_response, parse_command_signature};
use crate::types::{Command, RelayError, Response, COMMAND_SIGN_SIZE};

/// One connected peer as seen by the relay.
///
/// Owns its stream and its crypto state. Companions never reference each
/// other; a [`Session`](super::Session) mediates between the two.
#[derive(Debug)]
pub struct Companion {
    stream: TcpStream,
    peer_addr: SocketAddr,
    channel: CryptoChannel,
}

impl Companion {
    /// Wrap an accepted stream with no crypto channel yet.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            channel: CryptoChannel::None,
        }
    }

    /// Get the remote address of this companion.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Current encryption state.
    pub fn channel(&self) -> &CryptoChannel {
        &self.channel
    }

    /// Replace the encryption state.
    pub fn set_channel(&mut self, channel: CryptoChannel) {
        self.channel = channel;
    }

    /// Receive one command.
    ///
    /// A malformed signature yields an `UNKN` command and no payload is read.
    /// End of stream or a reset yields [`RelayError::Disconnected`].
    pub async fn receive_command(&mut self) -> Result<Command, RelayError> {
        let mut sign = [0u8; COMMAND_SIGN_SIZE];
        self.stream.read_exact(&mut sign).await?;

        let mut command = match parse_command_signature(&sign) {
            Ok(command) => command,
            Err(e) => {
                warn!("Malformed command from {}: {}", self.peer_addr, e);
                return Ok(Command::unknown());
            }
        };

        if command.payload_len > 0 {
            let mut payload = vec![0u8; command.payload_len];
            self.stream.read_exact(&mut payload).await?;
            command.payload = payload;
        }

        debug!(
            "Received {} ({} bytes) from {}",
            command.iden, command.payload_len, self.peer_addr
        );
        Ok(command)
    }

    /// Send one response frame.
    pub async fn send(&mut self, response: &Response) -> Result<(), RelayError> {
        let encoded = encode_response(response);
        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut the stream down. Dropping the companion releases it as well.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.peer_addr, e);
        }
    }

    /// Whether a read would complete without waiting: data or EOF pending.
    ///
    /// Runs outside the task's coop budget so an exhausted budget is never
    /// mistaken for an idle stream.
    fn has_pending_input(&self) -> bool {
        let mut buf = [0u8; 1];
        unconstrained(self.stream.peek(&mut buf))
            .now_or_never()
            .is_some()
    }
}

/// Wait up to `wait` for any companion to become readable.
///
/// Returns the indices of every companion with input pending (data, EOF or
/// an error), or an empty list on timeout.
pub async fn select_ready(companions: &[Companion], wait: Duration) -> Vec<usize> {
    if companions.is_empty() {
        tokio::time::sleep(wait).await;
        return Vec::new();
    }

    let any_readable = select_all(
        companions
            .iter()
            .map(|companion| Box::pin(companion.stream.readable())),
    );
    if tokio::time::timeout(wait, any_readable).await.is_err() {
        return Vec::new();
    }

    companions
        .iter()
        .enumerate()
        .filter(|(_, companion)| companion.has_pending_input())
        .map(|(index, _)| index)
        .collect()
}
