//! # Pairchat - encrypted two-peer chat relay
//!
//! A rendezvous server pairs the first two peers that connect and relays
//! text chat between them over a small length-prefixed protocol. Peers may
//! negotiate a symmetric key with the relay so chat payloads travel
//! encrypted on both legs.
//!
//! ## Quick Start
//!
//! ```rust
//! use pairchat::{Command, Identifier};
//!
//! let command = Command::new(Identifier::Echo).with_payload(b"ping".to_vec());
//!
//! // Encode to bytes
//! let encoded = pairchat::frame::encode_command(&command);
//! assert_eq!(&encoded[..], b"004ECHOping");
//!
//! // Decode from bytes
//! let mut buf = encoded;
//! let decoded = pairchat::frame::try_decode_command(&mut buf)?.unwrap();
//!
//! assert_eq!(command, decoded);
//! # Ok::<(), pairchat::RelayError>(())
//! ```
//!
//! ## Protocol Overview
//!
//! Commands (peer to relay):
//!
//! - HEAD (3B): payload length, upper-case hex, `000`-`FFF`
//! - IDEN (4B): command identifier
//! - PAYLOAD: exactly HEAD bytes
//!
//! Responses (relay to peer) insert a RESL field (4B, `OKAY` or `FAIL`)
//! between IDEN and PAYLOAD.
//!
//! ## Commands
//!
//! | Iden | Direction     | Description                                  |
//! |------|---------------|----------------------------------------------|
//! | CONN | Relay → Peer  | Pairing result                               |
//! | DSCN | Both          | End the session / session ended              |
//! | SEND | Peer → Relay  | Chat message for the companion               |
//! | MESG | Relay → Peer  | Chat message from the companion              |
//! | ECHO | Both          | Echo payload back to the sender              |
//! | TYBE | Both          | Companion started typing                     |
//! | TYEN | Both          | Companion stopped typing                     |
//! | AESK | Both          | Public key in, sealed session key out        |
//! | UNKN | Relay → Peer  | Unknown or malformed command                 |

pub mod codec;
pub mod config;
pub mod crypto;
pub mod frame;
pub mod logging;
pub mod tcp;
pub mod types;

// Re-export main types for convenience
pub use types::{
    Command, Identifier, Outcome, RelayError, Response, SessionId, DEFAULT_PORT, MAX_PAYLOAD,
};

pub use codec::ClientCodec;
pub use self::config::{load_config, RelayConfig};
pub use frame::{encode_command, encode_response, try_decode_command, try_decode_response};
pub use tcp::{ClientEvent, RelayClient, RelayServer};
