//! Tokio codec for the client side of a pairchat connection.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::frame::{parse_response_signature, put_command, try_decode_response};
use crate::types::{Command, RelayError, Response, MAX_PAYLOAD, RESPONSE_SIGN_SIZE};

/// Decodes [`Response`] frames and encodes [`Command`] frames.
///
/// A malformed response signature never fails the stream: the signature bytes
/// are dropped and an `UNKN`/`FAIL` response is yielded in their place.
#[derive(Debug, Default, Clone)]
pub struct ClientCodec;

impl ClientCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ClientCodec {
    type Item = Response;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < RESPONSE_SIGN_SIZE {
            return Ok(None);
        }

        match parse_response_signature(&src[..RESPONSE_SIGN_SIZE]) {
            Ok(response) => {
                let needed = RESPONSE_SIGN_SIZE + response.payload_len;
                if src.len() < needed {
                    src.reserve(needed - src.len());
                    return Ok(None);
                }
                try_decode_response(src)
            }
            Err(e) => {
                warn!("Dropping malformed response signature: {}", e);
                src.advance(RESPONSE_SIGN_SIZE);
                Ok(Some(Response::unknown()))
            }
        }
    }
}

impl Encoder<Command> for ClientCodec {
    type Error = RelayError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > MAX_PAYLOAD {
            return Err(RelayError::PayloadTooLarge(item.payload.len()));
        }
        put_command(&item, dst);
        Ok(())
    }
}
