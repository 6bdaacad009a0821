//! C5: the transcript engine.
//!
//! Capture mode assembles the traffic of one connection into an ordered
//! sequence of [`Bundle`]s and hands each to a [`TranscriptSink`] as it
//! completes. Replay mode consumes a previously captured ordered sequence
//! and serves a client connection from it with no real server behind it.

mod capture;
mod replay;

pub use capture::capture;
pub use replay::replay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::EngineError;

/// Any byte stream usable as a connection endpoint. Blanket-implemented so
/// both plain TCP halves and a post-TLS-upgrade stream satisfy it uniformly.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// A caller-supplied TLS upgrade. The engine never implements TLS itself
/// (§1 Non-goals); it only knows how to swap the stream it is driving for
/// whatever this trait hands back.
#[async_trait]
pub trait TlsUpgrade: Send + Sync {
    async fn upgrade(
        &self,
        stream: Box<dyn DuplexStream>,
    ) -> Result<Box<dyn DuplexStream>, EngineError>;
}

/// Receives completed bundles during capture. An external collaborator
/// implements this to persist the transcript in whatever on-disk form it
/// chooses; this crate only produces the in-memory value.
#[async_trait]
pub trait TranscriptSink: Send {
    async fn emit(&mut self, bundle: Bundle) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Config,
    Mocks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "requestOperation")]
    pub request_operation: String,
    #[serde(rename = "responseOperation")]
    pub response_operation: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PacketHeader {
    #[serde(rename = "sequenceId")]
    pub sequence_id: u8,
    #[serde(rename = "payloadLength")]
    pub payload_length: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacketMeta {
    #[serde(rename = "auth operation", skip_serializing_if = "Option::is_none")]
    pub auth_operation: Option<String>,
}

/// One wire frame, tagged with the classification C3 gave it. `message`
/// carries the exact payload bytes; see the module note in `mod.rs` on why
/// the richly-typed `Body` is not stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    #[serde(rename = "type")]
    pub tag: String,
    pub message: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PacketMeta>,
}

impl Packet {
    pub fn new(sequence_id: u8, tag: &str, payload: Vec<u8>) -> Self {
        Self {
            header: PacketHeader {
                sequence_id,
                payload_length: payload.len() as u32,
            },
            tag: tag.to_string(),
            message: payload,
            meta: None,
        }
    }
}

/// One unit of transcript: the whole handshake (`Config`) or one
/// client-command exchange (`Mocks`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub version: u32,
    pub kind: BundleKind,
    pub name: String,
    pub metadata: BundleMetadata,
    #[serde(rename = "mysqlRequests")]
    pub mysql_requests: Vec<Packet>,
    #[serde(rename = "mysqlResponses")]
    pub mysql_responses: Vec<Packet>,
    #[serde(rename = "reqTimestampMock")]
    pub req_timestamp: i64,
    #[serde(rename = "resTimestampMock")]
    pub res_timestamp: i64,
    #[serde(rename = "connectionId")]
    pub connection_id: u64,
}

pub(crate) const TRANSCRIPT_VERSION: u32 = 1;
