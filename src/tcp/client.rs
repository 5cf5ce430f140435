use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::codec::ClientCodec;
use crate::crypto::{CryptoChannel, KeyPair};
use crate::types::{Command, Identifier, Outcome, RelayError, Response, MAX_PAYLOAD};

/// What the front-end sees for each response from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Paired with a companion.
    Connected(String),
    /// No companion arrived in time.
    ConnectRejected(String),
    /// The session is over.
    Disconnected(String),
    /// A chat message from the companion, already decrypted.
    Message(Vec<u8>),
    /// The relay accepted our last message.
    MessageAccepted,
    MessageRejected(String),
    Echo(Vec<u8>),
    TypingBegan,
    TypingEnded,
    SecureChannelEstablished,
    KeyExchangeRejected(String),
    /// Anything else, including malformed frames.
    Unknown(Response),
}

/// Client end of a relay connection.
pub struct RelayClient<T = TcpStream> {
    framed: Framed<T, ClientCodec>,
    channel: CryptoChannel,
}

impl RelayClient<TcpStream> {
    /// Connect to a relay server.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, RelayError> {
        let stream = TcpStream::connect(addr).await?;
        info!("Connected to relay at {}", stream.peer_addr()?);
        Ok(Self::new(stream))
    }
}

impl<T> RelayClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected transport.
    pub fn new(io: T) -> Self {
        Self {
            framed: Framed::new(io, ClientCodec::new()),
            channel: CryptoChannel::None,
        }
    }

    /// Current encryption state.
    pub fn channel(&self) -> &CryptoChannel {
        &self.channel
    }

    /// Whether a symmetric key has been negotiated.
    pub fn is_secure(&self) -> bool {
        self.channel.key().is_some()
    }

    /// Access the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.framed.get_mut()
    }

    /// Send a raw command.
    pub async fn send_command(&mut self, command: Command) -> Result<(), RelayError> {
        debug!("Sending {} ({} bytes)", command.iden, command.payload_len);
        self.framed.send(command).await
    }

    /// Start a key exchange. Completes when the `AESK` response arrives
    /// through [`next_event`](Self::next_event).
    pub async fn request_key_exchange(&mut self) -> Result<(), RelayError> {
        if !self.channel.is_none() {
            return Err(RelayError::ChannelState("key exchange already requested"));
        }

        let pair = KeyPair::generate();
        let command = Command::new(Identifier::Aesk).with_payload(pair.public_bytes().to_vec());
        self.send_command(command).await?;
        self.channel = CryptoChannel::Pending(pair);
        Ok(())
    }

    /// Send a chat message, encrypted when a channel is established.
    pub async fn send_message(&mut self, message: &[u8]) -> Result<(), RelayError> {
        let payload = match &self.channel {
            CryptoChannel::Established(key) => key.encrypt(message),
            CryptoChannel::Pending(_) => {
                return Err(RelayError::ChannelState("key exchange still pending"));
            }
            CryptoChannel::None => message.to_vec(),
        };
        if payload.len() > MAX_PAYLOAD {
            return Err(RelayError::PayloadTooLarge(payload.len()));
        }

        self.send_command(Command::new(Identifier::Send).with_payload(payload))
            .await
    }

    /// Ask the relay to echo `payload` back to us.
    pub async fn echo(&mut self, payload: &[u8]) -> Result<(), RelayError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(RelayError::PayloadTooLarge(payload.len()));
        }
        self.send_command(Command::new(Identifier::Echo).with_payload(payload))
            .await
    }

    /// Tell the companion we started typing.
    pub async fn begin_typing(&mut self) -> Result<(), RelayError> {
        self.send_command(Command::new(Identifier::Tybe)).await
    }

    /// Tell the companion we stopped typing.
    pub async fn end_typing(&mut self) -> Result<(), RelayError> {
        self.send_command(Command::new(Identifier::Tyen)).await
    }

    /// Ask the relay to end the session for both sides.
    pub async fn end_session(&mut self) -> Result<(), RelayError> {
        self.send_command(Command::new(Identifier::Dscn)).await
    }

    /// Receive the next raw response, or `None` once the relay closed the
    /// connection.
    pub async fn recv(&mut self) -> Result<Option<Response>, RelayError> {
        self.framed.try_next().await
    }

    /// Receive and interpret the next response.
    pub async fn next_event(&mut self) -> Result<Option<ClientEvent>, RelayError> {
        match self.recv().await? {
            Some(response) => self.interpret(response).map(Some),
            None => Ok(None),
        }
    }

    fn interpret(&mut self, response: Response) -> Result<ClientEvent, RelayError> {
        let event = match (response.iden, response.outcome) {
            (Identifier::Conn, Outcome::Okay) => ClientEvent::Connected(text(&response)),
            (Identifier::Conn, Outcome::Fail) => ClientEvent::ConnectRejected(text(&response)),
            (Identifier::Dscn, _) => ClientEvent::Disconnected(text(&response)),
            (Identifier::Send, Outcome::Okay) => ClientEvent::MessageAccepted,
            (Identifier::Send, Outcome::Fail) | (Identifier::Mesg, Outcome::Fail) => {
                ClientEvent::MessageRejected(text(&response))
            }
            (Identifier::Mesg, Outcome::Okay) => {
                let message = match self.channel.key() {
                    Some(key) => key.decrypt(&response.payload)?,
                    None => response.payload,
                };
                ClientEvent::Message(message)
            }
            (Identifier::Echo, _) => ClientEvent::Echo(response.payload),
            (Identifier::Tybe, _) => ClientEvent::TypingBegan,
            (Identifier::Tyen, _) => ClientEvent::TypingEnded,
            (Identifier::Aesk, Outcome::Okay) => {
                self.complete_key_exchange(&response.payload)?;
                ClientEvent::SecureChannelEstablished
            }
            (Identifier::Aesk, Outcome::Fail) => {
                if matches!(self.channel, CryptoChannel::Pending(_)) {
                    self.channel = CryptoChannel::None;
                }
                ClientEvent::KeyExchangeRejected(text(&response))
            }
            (Identifier::Unkn, _) => ClientEvent::Unknown(response),
        };
        Ok(event)
    }

    fn complete_key_exchange(&mut self, sealed: &[u8]) -> Result<(), RelayError> {
        match std::mem::take(&mut self.channel) {
            CryptoChannel::Pending(pair) => {
                let key = pair.open(sealed)?;
                self.channel = CryptoChannel::Established(key);
                info!("Secure channel established");
                Ok(())
            }
            other => {
                self.channel = other;
                Err(RelayError::ChannelState("no key exchange pending"))
            }
        }
    }
}

fn text(response: &Response) -> String {
    String::from_utf8_lossy(&response.payload).into_owned()
}
