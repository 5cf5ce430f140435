//! Frame encoding and decoding.
//!
//! ```text
//! HEAD(3 hex) IDEN(4 letters) [RESL(OKAY|FAIL)] PAYLOAD(HEAD bytes)
//! ```
//!
//! Commands omit `RESL`, responses always carry it.

use bytes::{Buf, BufMut, BytesMut};

use crate::types::{
    Command, Identifier, Outcome, RelayError, Response, COMMAND_SIGN_SIZE, HEAD_SIZE, IDEN_SIZE,
    RESPONSE_SIGN_SIZE,
};

/// Parse the length head. Accepts either case of hex digit.
fn parse_head(raw: &[u8]) -> Result<usize, RelayError> {
    if !raw.iter().all(u8::is_ascii_hexdigit) {
        return Err(RelayError::InvalidSignature("head is not hexadecimal"));
    }
    let text = std::str::from_utf8(raw)
        .map_err(|_| RelayError::InvalidSignature("head is not hexadecimal"))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| RelayError::InvalidSignature("head is not hexadecimal"))
}

fn parse_iden(raw: &[u8]) -> Result<Identifier, RelayError> {
    Identifier::from_bytes(raw).ok_or(RelayError::InvalidSignature("unrecognized identifier"))
}

fn put_head(dst: &mut BytesMut, len: usize) {
    dst.put_slice(format!("{:0width$X}", len, width = HEAD_SIZE).as_bytes());
}

/// Parse a command signature. The returned command has an empty payload and
/// `payload_len` set to the declared length.
pub fn parse_command_signature(sign: &[u8]) -> Result<Command, RelayError> {
    if sign.len() != COMMAND_SIGN_SIZE {
        return Err(RelayError::InvalidSignature("invalid command signature length"));
    }
    let payload_len = parse_head(&sign[..HEAD_SIZE])?;
    let iden = parse_iden(&sign[HEAD_SIZE..])?;

    Ok(Command {
        iden,
        payload: Vec::new(),
        payload_len,
    })
}

/// Parse a response signature. The returned response has an empty payload and
/// `payload_len` set to the declared length.
pub fn parse_response_signature(sign: &[u8]) -> Result<Response, RelayError> {
    if sign.len() != RESPONSE_SIGN_SIZE {
        return Err(RelayError::InvalidSignature("invalid response signature length"));
    }
    let payload_len = parse_head(&sign[..HEAD_SIZE])?;
    let iden = parse_iden(&sign[HEAD_SIZE..HEAD_SIZE + IDEN_SIZE])?;
    let outcome = Outcome::from_bytes(&sign[HEAD_SIZE + IDEN_SIZE..])
        .ok_or(RelayError::InvalidSignature("unrecognized result"))?;

    Ok(Response {
        iden,
        outcome,
        payload: Vec::new(),
        payload_len,
    })
}

/// Encode a command into a new buffer.
pub fn encode_command(command: &Command) -> BytesMut {
    let mut dst = BytesMut::with_capacity(COMMAND_SIGN_SIZE + command.payload.len());
    put_command(command, &mut dst);
    dst
}

/// Append an encoded command to `dst`.
pub fn put_command(command: &Command, dst: &mut BytesMut) {
    put_head(dst, command.payload_len);
    dst.put_slice(command.iden.as_bytes());
    dst.put_slice(&command.payload);
}

/// Encode a response into a new buffer.
pub fn encode_response(response: &Response) -> BytesMut {
    let mut dst = BytesMut::with_capacity(RESPONSE_SIGN_SIZE + response.payload.len());
    put_response(response, &mut dst);
    dst
}

/// Append an encoded response to `dst`.
pub fn put_response(response: &Response, dst: &mut BytesMut) {
    put_head(dst, response.payload_len);
    dst.put_slice(response.iden.as_bytes());
    dst.put_slice(response.outcome.as_bytes());
    dst.put_slice(&response.payload);
}

/// Try to decode one complete command from `src`.
///
/// Returns `Ok(None)` when more bytes are needed. On success the frame is
/// consumed from `src`.
pub fn try_decode_command(src: &mut BytesMut) -> Result<Option<Command>, RelayError> {
    if src.len() < COMMAND_SIGN_SIZE {
        return Ok(None);
    }
    let mut command = parse_command_signature(&src[..COMMAND_SIGN_SIZE])?;
    let total = COMMAND_SIGN_SIZE + command.payload_len;
    if src.len() < total {
        return Ok(None);
    }
    src.advance(COMMAND_SIGN_SIZE);
    command.payload = src.split_to(command.payload_len).to_vec();
    Ok(Some(command))
}

/// Try to decode one complete response from `src`.
///
/// Returns `Ok(None)` when more bytes are needed. On success the frame is
/// consumed from `src`.
pub fn try_decode_response(src: &mut BytesMut) -> Result<Option<Response>, RelayError> {
    if src.len() < RESPONSE_SIGN_SIZE {
        return Ok(None);
    }
    let mut response = parse_response_signature(&src[..RESPONSE_SIGN_SIZE])?;
    let total = RESPONSE_SIGN_SIZE + response.payload_len;
    if src.len() < total {
        return Ok(None);
    }
    src.advance(RESPONSE_SIGN_SIZE);
    response.payload = src.split_to(response.payload_len).to_vec();
    Ok(Some(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_PAYLOAD;

    #[test]
    fn test_command_signature_rejects_bad_input() {
        assert!(parse_command_signature(b"").is_err());
        assert!(parse_command_signature(b"0000SEND").is_err());
        assert!(parse_command_signature(b"GGGSEND").is_err());
        assert!(parse_command_signature(b"000####").is_err());
        assert!(parse_command_signature(b"000SENDSEND").is_err());
        assert!(parse_command_signature(b"000ABCD").is_err());
    }

    #[test]
    fn test_command_signature_accepts_valid_input() {
        let command = parse_command_signature(b"000SEND").unwrap();
        assert_eq!(command.iden, Identifier::Send);
        assert_eq!(command.payload_len, 0);

        let command = parse_command_signature(b"FFFSEND").unwrap();
        assert_eq!(command.iden, Identifier::Send);
        assert_eq!(command.payload_len, 0xFFF);

        let command = parse_command_signature(b"0a1ECHO").unwrap();
        assert_eq!(command.payload_len, 0xA1);
    }

    #[test]
    fn test_response_signature_rejects_bad_input() {
        assert!(parse_response_signature(b"").is_err());
        assert!(parse_response_signature(b"0000SENDOKAY").is_err());
        assert!(parse_response_signature(b"GGGSENDOKAY").is_err());
        assert!(parse_response_signature(b"000####OKAY").is_err());
        assert!(parse_response_signature(b"000SEND####").is_err());
        assert!(parse_response_signature(b"000SENDSENDOKAY").is_err());
    }

    #[test]
    fn test_response_signature_accepts_valid_input() {
        let response = parse_response_signature(b"000SENDOKAY").unwrap();
        assert_eq!(response.iden, Identifier::Send);
        assert_eq!(response.outcome, Outcome::Okay);
        assert!(response.payload.is_empty());
        assert_eq!(response.payload_len, 0);

        let response = parse_response_signature(b"FFFSENDFAIL").unwrap();
        assert_eq!(response.outcome, Outcome::Fail);
        assert_eq!(response.payload_len, 0xFFF);
    }

    #[test]
    fn test_encode_blank_command() {
        let command = Command::new(Identifier::Send);
        assert_eq!(&encode_command(&command)[..], b"000SEND");
    }

    #[test]
    fn test_encode_command_with_payload() {
        let command = Command::new(Identifier::Send).with_payload(b"DEBUG".to_vec());
        assert_eq!(&encode_command(&command)[..], b"005SENDDEBUG");
    }

    #[test]
    fn test_encode_truncates_long_payload() {
        let payload = vec![b'A'; MAX_PAYLOAD + 1];
        let command = Command::new(Identifier::Send).with_payload(payload.clone());
        let encoded = encode_command(&command);
        assert_eq!(&encoded[..7], b"FFFSEND");
        assert_eq!(&encoded[7..], &payload[..MAX_PAYLOAD]);

        let response = Response::okay(Identifier::Send).with_payload(payload.clone());
        let encoded = encode_response(&response);
        assert_eq!(&encoded[..11], b"FFFSENDOKAY");
        assert_eq!(encoded.len(), 11 + MAX_PAYLOAD);
    }

    #[test]
    fn test_encode_payload_at_cap_is_untouched() {
        let payload = vec![b'A'; MAX_PAYLOAD];
        let command = Command::new(Identifier::Echo).with_payload(payload.clone());
        assert_eq!(command.payload_len, MAX_PAYLOAD);

        let encoded = encode_command(&command);
        assert_eq!(&encoded[..7], b"FFFECHO");
        assert_eq!(&encoded[7..], &payload[..]);
    }

    #[test]
    fn test_encode_response() {
        let response = Response::okay(Identifier::Send);
        assert_eq!(&encode_response(&response)[..], b"000SENDOKAY");

        let response = Response::fail(Identifier::Unkn).with_payload(b"ERROR_UNKNOWN_COMMAND".to_vec());
        assert_eq!(&encode_response(&response)[..], b"015UNKNFAILERROR_UNKNOWN_COMMAND");
    }

    #[test]
    fn test_decode_reverses_encode() {
        for iden in Identifier::ALL {
            let command = Command::new(iden).with_payload(b"payload".to_vec());
            let mut buf = encode_command(&command);
            assert_eq!(try_decode_command(&mut buf).unwrap(), Some(command));
            assert!(buf.is_empty());

            let response = Response::fail(iden).with_payload(vec![0u8, 1, 2]);
            let mut buf = encode_response(&response);
            assert_eq!(try_decode_response(&mut buf).unwrap(), Some(response));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_decode_waits_for_payload() {
        let mut buf = BytesMut::from(&b"005ECHOhel"[..]);
        assert_eq!(try_decode_command(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 10);

        buf.extend_from_slice(b"lo");
        let command = try_decode_command(&mut buf).unwrap().unwrap();
        assert_eq!(command.payload, b"hello");
    }
}
