//! HandshakeV10 (server greeting), HandshakeResponse41/320 and SSLRequest.

use super::{Body, Message, Tag};
use crate::error::DecodeError;
use mysql_common::constants::CapabilityFlags;
use mysql_common::io::ParseBuf;
use mysql_common::packets::{HandshakePacket, HandshakeResponse, SslRequest};

#[derive(Debug, Clone)]
pub struct HandshakeV10Body {
    pub connection_id: u32,
    pub capabilities: CapabilityFlags,
    pub auth_plugin_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HandshakeResponseBody {
    pub capabilities: CapabilityFlags,
    pub username: String,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

pub fn decode_handshake_v10(payload: &[u8]) -> Result<Message, DecodeError> {
    let mut buf = ParseBuf(payload);
    let pkt: HandshakePacket = buf.parse(()).map_err(|e| DecodeError::Malformed {
        tag: "HandshakeV10",
        reason: e.to_string(),
    })?;
    let capabilities = pkt.capabilities();
    let auth_plugin_name = pkt
        .auth_plugin_name_ref()
        .map(|b| String::from_utf8_lossy(b).into_owned());
    Ok(Message {
        tag: Tag::HandshakeV10,
        raw: payload.to_vec(),
        body: Body::Handshake(HandshakeV10Body {
            connection_id: pkt.connection_id(),
            capabilities,
            auth_plugin_name,
        }),
    })
}

/// During the handshake phase, the client sends exactly one of: an
/// `SSLRequest` (always 32 bytes, no trailing username), or a
/// `HandshakeResponse41`/320 (same fixed prefix, but with at least a
/// null-terminated username afterwards).
pub fn decode_client_handshake_phase(payload: &[u8]) -> Result<Message, DecodeError> {
    if payload.len() == 32 {
        let mut buf = ParseBuf(payload);
        let _req: SslRequest = buf.parse(()).map_err(|e| DecodeError::Malformed {
            tag: "SSLRequest",
            reason: e.to_string(),
        })?;
        return Ok(Message {
            tag: Tag::SslRequest,
            raw: payload.to_vec(),
            body: Body::SslRequest,
        });
    }

    let mut buf = ParseBuf(payload);
    let resp: HandshakeResponse = buf.parse(()).map_err(|e| DecodeError::Malformed {
        tag: "HandshakeResponse41",
        reason: e.to_string(),
    })?;
    Ok(Message {
        tag: Tag::HandshakeResponse41,
        raw: payload.to_vec(),
        body: Body::HandshakeResponse(HandshakeResponseBody {
            capabilities: resp.capabilities(),
            username: String::from_utf8_lossy(resp.user()).into_owned(),
            database: resp
                .db_name()
                .map(|b| String::from_utf8_lossy(b).into_owned()),
            auth_plugin_name: resp
                .auth_plugin()
                .map(|p| String::from_utf8_lossy(p.as_bytes()).into_owned()),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql_common::constants::CapabilityFlags;

    fn sample_handshake() -> Vec<u8> {
        let pkt = HandshakePacket::new(
            10,
            &b"8.0.34"[..],
            42,
            *b"aaaaaaaa",
            Some(&b"bbbbbbbbbbbbb"[..]),
            CapabilityFlags::CLIENT_PROTOCOL_41
                | CapabilityFlags::CLIENT_PLUGIN_AUTH
                | CapabilityFlags::CLIENT_SECURE_CONNECTION,
            0x21,
            mysql_common::constants::StatusFlags::SERVER_STATUS_AUTOCOMMIT,
            Some(&b"mysql_native_password"[..]),
        );
        let mut buf = Vec::new();
        mysql_common::proto::MySerialize::serialize(&pkt, &mut buf);
        buf
    }

    #[test]
    fn decode_handshake_v10_round_trip() {
        let bytes = sample_handshake();
        let msg = decode_handshake_v10(&bytes).unwrap();
        match &msg.body {
            Body::Handshake(h) => {
                assert_eq!(h.connection_id, 42);
                assert_eq!(h.auth_plugin_name.as_deref(), Some("mysql_native_password"));
                assert!(h.capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41));
            }
            _ => panic!("expected handshake body"),
        }
        assert_eq!(msg.encode(), &bytes[..]);
    }

    #[test]
    fn ssl_request_is_exactly_32_bytes() {
        let req = SslRequest::new(CapabilityFlags::CLIENT_SSL, 16 * 1024 * 1024, 0x21);
        let mut buf = Vec::new();
        mysql_common::proto::MySerialize::serialize(&req, &mut buf);
        assert_eq!(buf.len(), 32);
        let msg = decode_client_handshake_phase(&buf).unwrap();
        assert!(matches!(msg.body, Body::SslRequest));
    }
}
