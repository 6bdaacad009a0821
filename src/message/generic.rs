//! OK, ERR and EOF: the three "generic response" packets.

use super::{Body, Message, Tag};
use crate::context::DecoderContext;
use crate::error::DecodeError;
use mysql_common::constants::StatusFlags;
use mysql_common::io::ParseBuf;
use mysql_common::packets::{CommonOkPacket, ErrPacket, OkPacketDeserializer};

#[derive(Debug, Clone)]
pub struct OkBody {
    pub affected_rows: u64,
    pub last_insert_id: Option<u64>,
    pub status_flags: StatusFlags,
    pub warnings: u16,
}

#[derive(Debug, Clone)]
pub struct ErrBody {
    pub error_code: u16,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct EofBody {
    pub status_flags: StatusFlags,
    pub warnings: u16,
}

pub fn decode_ok(ctx: &DecoderContext, payload: &[u8]) -> Result<Message, DecodeError> {
    let mut buf = ParseBuf(payload);
    let ok: OkPacketDeserializer<CommonOkPacket> =
        buf.parse(ctx.capabilities()).map_err(|e| DecodeError::Malformed {
            tag: "OK",
            reason: e.to_string(),
        })?;
    let ok = ok.into_inner();
    Ok(Message {
        tag: Tag::Ok,
        raw: payload.to_vec(),
        body: Body::Ok(OkBody {
            affected_rows: ok.affected_rows(),
            last_insert_id: ok.last_insert_id(),
            status_flags: ok.status_flags(),
            warnings: ok.warnings(),
        }),
    })
}

pub fn decode_err(ctx: &DecoderContext, payload: &[u8]) -> Result<Message, DecodeError> {
    let mut buf = ParseBuf(payload);
    let err: ErrPacket = buf.parse(ctx.capabilities()).map_err(|e| DecodeError::Malformed {
        tag: "ERR",
        reason: e.to_string(),
    })?;
    let (error_code, message) = match &err {
        ErrPacket::Error(server_error) => (
            server_error.error_code(),
            server_error.message_str().into_owned(),
        ),
        ErrPacket::Progress(report) => (0, report.to_string()),
    };
    Ok(Message {
        tag: Tag::Err,
        raw: payload.to_vec(),
        body: Body::Err(ErrBody {
            error_code,
            message,
        }),
    })
}

/// EOF packets carry only two bytes of useful information and have no
/// dedicated `MyDeserialize` impl worth reusing for a <= 7 byte packet.
pub fn decode_eof(payload: &[u8]) -> Message {
    let warnings = payload
        .get(1..3)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .unwrap_or(0);
    let status_flags = payload
        .get(3..5)
        .map(|b| StatusFlags::from_bits_truncate(u16::from_le_bytes([b[0], b[1]])))
        .unwrap_or(StatusFlags::empty());
    Message {
        tag: Tag::Eof,
        raw: payload.to_vec(),
        body: Body::Eof(EofBody {
            status_flags,
            warnings,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_packet_bytes() -> Vec<u8> {
        // header, affected_rows=0, last_insert_id=0, status=0x0002, warnings=0
        vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]
    }

    #[test]
    fn decode_ok_reads_status_flags() {
        let mut ctx = DecoderContext::new();
        ctx.set_after_greeting(mysql_common::constants::CapabilityFlags::CLIENT_PROTOCOL_41, None);
        let msg = decode_ok(&ctx, &ok_packet_bytes()).unwrap();
        match &msg.body {
            Body::Ok(ok) => {
                assert_eq!(ok.affected_rows, 0);
                assert_eq!(ok.status_flags, StatusFlags::SERVER_STATUS_AUTOCOMMIT);
            }
            _ => panic!("expected OK body"),
        }
        assert_eq!(msg.encode(), &ok_packet_bytes()[..]);
    }

    #[test]
    fn decode_eof_reads_warnings_and_status() {
        let payload = [0xFE, 0x00, 0x00, 0x02, 0x00];
        let msg = decode_eof(&payload);
        match msg.body {
            Body::Eof(eof) => {
                assert_eq!(eof.warnings, 0);
                assert_eq!(eof.status_flags, StatusFlags::SERVER_STATUS_AUTOCOMMIT);
            }
            _ => panic!("expected EOF body"),
        }
    }
}
