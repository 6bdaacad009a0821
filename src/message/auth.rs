//! AuthSwitchRequest, AuthMoreData and the one-byte/opaque-blob client
//! auth-continuation messages.

use super::{Body, Message, Tag};
use crate::error::DecodeError;
use mysql_common::io::ParseBuf;
use mysql_common::packets::AuthSwitchRequest as WireAuthSwitchRequest;
use mysql_common::packets::AuthMoreData as WireAuthMoreData;

/// Canonical string forms for `caching_sha2_password`'s single-byte
/// `AuthMoreData` payloads; these, not the raw byte, are what the transcript
/// stores (§8 scenario 2/3).
pub const CACHING_SHA2_FAST_AUTH_SUCCESS: &str = "cachingSha2PasswordFastAuthSuccess";
pub const CACHING_SHA2_PERFORM_FULL_AUTH: &str = "cachingSha2PasswordPerformFullAuthentication";

#[derive(Debug, Clone)]
pub struct AuthSwitchRequestBody {
    pub plugin_name: String,
    pub plugin_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMoreDataKind {
    FastAuthSuccess,
    PerformFullAuthentication,
    Other(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct AuthMoreDataBody {
    pub kind: AuthMoreDataKind,
}

pub fn decode_auth_switch_request(payload: &[u8]) -> Result<Message, DecodeError> {
    let mut buf = ParseBuf(payload);
    let req: WireAuthSwitchRequest = buf.parse(()).map_err(|e| DecodeError::Malformed {
        tag: "AuthSwitchRequest",
        reason: e.to_string(),
    })?;
    Ok(Message {
        tag: Tag::AuthSwitchRequest,
        raw: payload.to_vec(),
        body: Body::AuthSwitchRequest(AuthSwitchRequestBody {
            plugin_name: String::from_utf8_lossy(req.auth_plugin().as_bytes()).into_owned(),
            plugin_data: req.plugin_data().to_vec(),
        }),
    })
}

pub fn decode_auth_more_data(payload: &[u8]) -> Result<Message, DecodeError> {
    let mut buf = ParseBuf(payload);
    let data: WireAuthMoreData = buf.parse(()).map_err(|e| DecodeError::Malformed {
        tag: "AuthMoreData",
        reason: e.to_string(),
    })?;
    let kind = match data.data() {
        [0x03] => AuthMoreDataKind::FastAuthSuccess,
        [0x04] => AuthMoreDataKind::PerformFullAuthentication,
        other => AuthMoreDataKind::Other(other.to_vec()),
    };
    Ok(Message {
        tag: Tag::AuthMoreData,
        raw: payload.to_vec(),
        body: Body::AuthMoreData(AuthMoreDataBody { kind }),
    })
}

impl AuthMoreDataKind {
    /// The canonical transcript string for this payload, where one is
    /// defined (§8 scenarios 2-3); falls back to a hex dump otherwise.
    pub fn canonical_str(&self) -> String {
        match self {
            AuthMoreDataKind::FastAuthSuccess => CACHING_SHA2_FAST_AUTH_SUCCESS.to_string(),
            AuthMoreDataKind::PerformFullAuthentication => {
                CACHING_SHA2_PERFORM_FULL_AUTH.to_string()
            }
            AuthMoreDataKind::Other(bytes) => hex::encode(bytes),
        }
    }
}

/// Decodes a client `AuthSwitchResponse`: an opaque auth-plugin-specific
/// blob, stored verbatim.
pub fn decode_auth_switch_response(payload: &[u8]) -> Message {
    Message {
        tag: Tag::AuthSwitchResponse,
        raw: payload.to_vec(),
        body: Body::AuthSwitchResponse(payload.to_vec()),
    }
}

/// The one-byte `0x02` marker by which a client requests the server's RSA
/// public key during `caching_sha2_password` full authentication.
pub fn decode_request_public_key(payload: &[u8]) -> Result<Message, DecodeError> {
    if payload != [0x02] {
        return Err(DecodeError::Malformed {
            tag: "RequestPublicKey",
            reason: format!("expected single byte 0x02, got {payload:?}"),
        });
    }
    Ok(Message {
        tag: Tag::RequestPublicKey,
        raw: payload.to_vec(),
        body: Body::RequestPublicKey,
    })
}

pub fn decode_encrypted_password(payload: &[u8]) -> Message {
    Message {
        tag: Tag::EncryptedPassword,
        raw: payload.to_vec(),
        body: Body::EncryptedPassword(payload.to_vec()),
    }
}

pub fn decode_plain_password(payload: &[u8]) -> Message {
    Message {
        tag: Tag::PlainPassword,
        raw: payload.to_vec(),
        body: Body::PlainPassword(payload.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_more_data_classifies_caching_sha2_markers() {
        let fast = decode_auth_more_data(&[0x01, 0x03]).unwrap();
        match fast.body {
            Body::AuthMoreData(b) => {
                assert_eq!(b.kind, AuthMoreDataKind::FastAuthSuccess);
                assert_eq!(b.kind.canonical_str(), CACHING_SHA2_FAST_AUTH_SUCCESS);
            }
            _ => panic!(),
        }

        let full = decode_auth_more_data(&[0x01, 0x04]).unwrap();
        match full.body {
            Body::AuthMoreData(b) => assert_eq!(b.kind, AuthMoreDataKind::PerformFullAuthentication),
            _ => panic!(),
        }
    }

    #[test]
    fn request_public_key_requires_exact_marker() {
        assert!(decode_request_public_key(&[0x02]).is_ok());
        assert!(decode_request_public_key(&[0x02, 0x00]).is_err());
    }
}
