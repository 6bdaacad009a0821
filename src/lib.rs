//! A MySQL wire-protocol interception engine.
//!
//! Two modes, one codec. Capture mode sits between an unmodified client and
//! an unmodified server, decodes every packet, and emits a self-contained,
//! replayable transcript. Replay mode accepts a client connection with no
//! real server behind it and serves it from a previously captured
//! transcript.
//!
//! - [`wire`] (C1) frames the byte stream.
//! - [`context`] (C2) tracks the per-connection state the codec needs to
//!   disambiguate otherwise-identical bytes.
//! - [`message`] (C3) decodes/encodes one logical frame at a time.
//! - [`phase`] (C4) tracks where a connection is in the handshake/auth/
//!   command-loop progression.
//! - [`transcript`] (C5) drives capture and replay end to end.

pub mod constants;
pub mod context;
pub mod error;
pub mod message;
pub mod phase;
pub mod transcript;
pub mod wire;

pub use error::{EngineError, Result};
pub use transcript::{capture, replay, Bundle, BundleKind, DuplexStream, TlsUpgrade, TranscriptSink};
