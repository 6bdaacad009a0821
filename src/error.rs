//! Error taxonomy for the capture/replay engine.

use thiserror::Error;

/// Errors raised by the packet framer (C1).
#[derive(Debug, Error)]
pub enum WireError {
    #[error("short read: stream closed with {got} of {expected} expected bytes")]
    Short { expected: usize, got: usize },
    #[error("oversized frame: payload length {0} exceeds the 16MiB-1 MySQL limit")]
    OversizedFrame(usize),
    #[error("sequence gap while reassembling a split packet: expected {expected}, got {got}")]
    FrameSequenceGap { expected: u8, got: u8 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the message codec (C3).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {tag} payload: {reason}")]
    Malformed { tag: &'static str, reason: String },
    #[error("packet illegal for state {state}: first byte 0x{first_byte:02x}")]
    Unexpected { state: &'static str, first_byte: u8 },
    #[error("unknown command opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("empty payload, no opcode byte")]
    EmptyPayload,
}

/// Errors raised by the phase state machine (C4).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("sequence gap in command-response cycle: expected {expected}, got {got}")]
    SequenceGap { expected: u8, got: u8 },
    #[error("packet illegal in phase {phase}")]
    IllegalInPhase { phase: &'static str },
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Errors raised while matching and replaying a transcript (C5).
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no bundle matched the client request (opcode 0x{opcode:02x})")]
    NoMatch { opcode: u8 },
    #[error("capability mismatch during replay handshake: {0}")]
    CapabilityMismatch(String),
    #[error("transcript exhausted before the connection closed")]
    TranscriptExhausted,
}

/// Features this engine deliberately does not implement.
#[derive(Debug, Error)]
pub enum Unsupported {
    #[error("TLS requested but no upgrade helper is configured")]
    TlsDisabled,
    #[error("unsupported authentication plugin: {0}")]
    AuthPlugin(String),
    #[error("compression is not supported")]
    Compression,
    #[error("multi-factor authentication beyond the first acknowledgement is not supported")]
    MultiFactorAuth,
    #[error("LOAD DATA LOCAL INFILE is not supported")]
    LoadDataLocalInfile,
}

/// Top-level error surfaced to callers of `capture`/`replay`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Unsupported(#[from] Unsupported),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
