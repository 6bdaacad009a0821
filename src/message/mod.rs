//! C3: the message codec.
//!
//! One decode path and one encode path per tag. Decoding is parameterised
//! by the decoder context (C2): the shape of a server packet cannot be
//! known from its bytes alone.
//!
//! Every [`Message`] keeps the exact wire bytes it was built from (`raw`)
//! alongside a typed, tag-specific `body`. This is what makes
//! `encode(decode(x)) == x` hold trivially for every packet we "understand":
//! encoding a decoded message never re-serialises fields, it returns the
//! bytes it was decoded from. Constructing a *new* message to send (e.g. a
//! proxy-synthesised response) goes through the tag-specific constructors in
//! the submodules, which build `raw` from the fields at construction time.

mod auth;
mod command;
mod generic;
mod handshake;
mod resultset;

pub use auth::*;
pub use command::*;
pub use generic::*;
pub use handshake::*;
pub use resultset::*;

use crate::context::{DecoderContext, LastCommand};
use crate::constants::CommandCode;
use crate::error::DecodeError;
use mysql_common::constants::CapabilityFlags;

/// The closed set of message tags understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    HandshakeV10,
    Ok,
    Err,
    Eof,
    AuthSwitchRequest,
    AuthMoreData,
    AuthNextFactor,
    StmtPrepareOk,
    TextResultSet,
    BinaryProtocolResultSet,
    SslRequest,
    HandshakeResponse41,
    AuthSwitchResponse,
    RequestPublicKey,
    EncryptedPassword,
    PlainPassword,
    Command(CommandCode),
}

impl Tag {
    /// The string key used in the transcript format (§3 of the spec).
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::HandshakeV10 => "HandshakeV10",
            Tag::Ok => "OK",
            Tag::Err => "ERR",
            Tag::Eof => "EOF",
            Tag::AuthSwitchRequest => "AuthSwitchRequest",
            Tag::AuthMoreData => "AuthMoreData",
            Tag::AuthNextFactor => "AuthNextFactor",
            Tag::StmtPrepareOk => "StmtPrepareOk",
            Tag::TextResultSet => "TextResultSet",
            Tag::BinaryProtocolResultSet => "BinaryProtocolResultSet",
            Tag::SslRequest => "SSLRequest",
            Tag::HandshakeResponse41 => "HandshakeResponse41",
            Tag::AuthSwitchResponse => "AuthSwitchResponse",
            Tag::RequestPublicKey => "RequestPublicKey",
            Tag::EncryptedPassword => "EncryptedPassword",
            Tag::PlainPassword => "PlainPassword",
            Tag::Command(code) => code.name(),
        }
    }
}

/// A decoded (or about-to-be-sent) packet: its tag, its typed body, and its
/// exact wire bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub tag: Tag,
    pub raw: Vec<u8>,
    pub body: Body,
}

impl Message {
    /// Encoding a [`Message`] is always returning the bytes it carries;
    /// see the module-level note on why this satisfies the round-trip law.
    pub fn encode(&self) -> &[u8] {
        &self.raw
    }
}

/// The tag-specific structured body of a message.
#[derive(Debug, Clone)]
pub enum Body {
    Handshake(HandshakeV10Body),
    Ok(OkBody),
    Err(ErrBody),
    Eof(EofBody),
    AuthSwitchRequest(AuthSwitchRequestBody),
    AuthMoreData(AuthMoreDataBody),
    AuthNextFactor,
    StmtPrepareOk(StmtPrepareOkBody),
    TextResultSet(ResultSetBody),
    BinaryResultSet(ResultSetBody),
    SslRequest,
    HandshakeResponse(HandshakeResponseBody),
    AuthSwitchResponse(Vec<u8>),
    RequestPublicKey,
    EncryptedPassword(Vec<u8>),
    PlainPassword(Vec<u8>),
    Command(CommandBody),
}

/// Decodes one server-originated logical frame using the classification
/// rules of §4.3 steps 1-7.
pub fn decode_server(ctx: &DecoderContext, payload: &[u8]) -> Result<Message, DecodeError> {
    let &first = payload.first().ok_or(DecodeError::EmptyPayload)?;

    if first == 0xFF {
        return generic::decode_err(ctx, payload);
    }

    if matches!(ctx.last_command(), LastCommand::Handshake) {
        if first == 0x0A {
            return handshake::decode_handshake_v10(payload);
        }
        if first == 0xFE
            && payload.len() >= 2
            && ctx
                .capabilities()
                .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
        {
            return auth::decode_auth_switch_request(payload);
        }
        if first == 0x01 {
            return auth::decode_auth_more_data(payload);
        }
        if first == 0x02 {
            return Ok(Message {
                tag: Tag::AuthNextFactor,
                raw: payload.to_vec(),
                body: Body::AuthNextFactor,
            });
        }
    }

    if ctx.last_command() == LastCommand::Command(CommandCode::ComStmtPrepare) && first == 0x00 {
        return resultset::decode_stmt_prepare_ok(payload);
    }

    if ctx.last_command() == LastCommand::Command(CommandCode::ComQuery) && is_lenenc_column_count(first)
    {
        return resultset::decode_text_result_set_header(payload);
    }

    if ctx.last_command() == LastCommand::Command(CommandCode::ComStmtExecute)
        && is_lenenc_column_count(first)
    {
        return resultset::decode_binary_result_set_header(payload);
    }

    if first == 0x00 {
        return generic::decode_ok(ctx, payload);
    }

    if first == 0xFE && payload.len() <= 7 {
        return Ok(generic::decode_eof(payload));
    }

    Err(DecodeError::Unexpected {
        state: state_name(ctx),
        first_byte: first,
    })
}

/// Decodes one client-originated logical frame. During the handshake phase
/// the shape is positional (SSLRequest vs HandshakeResponse41 vs an
/// auth-continuation packet); afterwards the first byte is always a command
/// opcode.
pub fn decode_client(ctx: &DecoderContext, payload: &[u8]) -> Result<Message, DecodeError> {
    if matches!(ctx.last_command(), LastCommand::Handshake) {
        return handshake::decode_client_handshake_phase(payload);
    }
    command::decode_command(ctx, payload)
}

fn is_lenenc_column_count(first_byte: u8) -> bool {
    !matches!(first_byte, 0x00 | 0xFB | 0xFE | 0xFF)
}

fn state_name(ctx: &DecoderContext) -> &'static str {
    match ctx.last_command() {
        LastCommand::Handshake => "handshake",
        LastCommand::Reset => "reset",
        LastCommand::Command(code) => code.name(),
    }
}

/// Length-encoded integer decode; see §4.3.
pub fn read_lenenc_int(buf: &[u8]) -> Result<(Option<u64>, usize), DecodeError> {
    let &first = buf.first().ok_or_else(|| DecodeError::Malformed {
        tag: "lenenc-int",
        reason: "empty buffer".into(),
    })?;
    match first {
        0xFB => Ok((None, 1)),
        0xFC => {
            let bytes = buf.get(1..3).ok_or_else(too_short)?;
            Ok((Some(u16::from_le_bytes([bytes[0], bytes[1]]) as u64), 3))
        }
        0xFD => {
            let bytes = buf.get(1..4).ok_or_else(too_short)?;
            Ok((
                Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) as u64),
                4,
            ))
        }
        0xFE => {
            let bytes = buf.get(1..9).ok_or_else(too_short)?;
            Ok((Some(u64::from_le_bytes(bytes.try_into().unwrap())), 9))
        }
        v if v < 0xFB => Ok((Some(v as u64), 1)),
        _ => Err(DecodeError::Malformed {
            tag: "lenenc-int",
            reason: format!("reserved lead byte 0x{first:02x}"),
        }),
    }
}

fn too_short() -> DecodeError {
    DecodeError::Malformed {
        tag: "lenenc-int",
        reason: "truncated".into(),
    }
}

/// Length-encoded integer encode; chooses the shortest form whose range fits.
pub fn write_lenenc_int(buf: &mut Vec<u8>, value: u64) {
    if value < 0xFB {
        buf.push(value as u8);
    } else if value <= 0xFFFF {
        buf.push(0xFC);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0x00FF_FFFF {
        buf.push(0xFD);
        buf.extend_from_slice(&(value as u32).to_le_bytes()[0..3]);
    } else {
        buf.push(0xFE);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenenc_int_round_trips_all_forms() {
        for value in [0u64, 0xFA, 0xFB, 0x1234, 0xFFFF, 0x1_0000, 0x00FF_FFFF, 0x0100_0000, u64::MAX] {
            let mut buf = Vec::new();
            write_lenenc_int(&mut buf, value);
            let (decoded, consumed) = read_lenenc_int(&buf).unwrap();
            assert_eq!(decoded, Some(value));
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn lenenc_int_null_marker() {
        let (decoded, consumed) = read_lenenc_int(&[0xFB]).unwrap();
        assert_eq!(decoded, None);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn decode_server_rejects_unexpected_byte_in_command_loop() {
        let mut ctx = DecoderContext::new();
        ctx.note_command(CommandCode::ComPing);
        let err = decode_server(&ctx, &[0xFD, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, DecodeError::Unexpected { .. }));
    }
}
