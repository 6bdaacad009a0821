//! C1: the packet framer.
//!
//! A pure codec over MySQL's length-prefixed frame envelope. Does not
//! inspect payload contents; sequence semantics beyond split-packet
//! reassembly belong to the phase state machine.

use crate::error::WireError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The largest payload a single frame may carry (MySQL's 16MiB - 1).
pub const MAX_PAYLOAD_LEN: usize = 0x00_FF_FF_FF;
pub const FRAME_HEADER_LEN: usize = 4;

/// One length-prefixed frame: a 4-byte header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence_id: u8,
    pub payload: Vec<u8>,
}

/// Reads exactly one frame from `stream`.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Frame, WireError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    read_exact_or_short(stream, &mut header).await?;
    let payload_length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    if payload_length > MAX_PAYLOAD_LEN {
        return Err(WireError::OversizedFrame(payload_length));
    }
    let sequence_id = header[3];
    let mut payload = vec![0u8; payload_length];
    read_exact_or_short(stream, &mut payload).await?;
    Ok(Frame {
        sequence_id,
        payload,
    })
}

/// Writes a single frame: the inverse of [`read_frame`].
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    sequence_id: u8,
    payload: &[u8],
) -> Result<(), WireError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(WireError::OversizedFrame(payload.len()));
    }
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0..3].copy_from_slice(&(payload.len() as u32).to_le_bytes()[0..3]);
    header[3] = sequence_id;
    stream.write_all(&header).await?;
    stream.write_all(payload).await?;
    Ok(())
}

/// Reads one *logical* frame, transparently reassembling MySQL's split-packet
/// convention: a run of frames whose payload length is exactly
/// [`MAX_PAYLOAD_LEN`] is one logical message, terminated by a frame shorter
/// than that (possibly empty). Returns the sequence id of the final physical
/// frame and the concatenated payload.
pub async fn read_logical_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<(u8, Vec<u8>), WireError> {
    let first = read_frame(stream).await?;
    if first.payload.len() < MAX_PAYLOAD_LEN {
        return Ok((first.sequence_id, first.payload));
    }

    let mut sequence_id = first.sequence_id;
    let mut payload = first.payload;
    loop {
        let next = read_frame(stream).await?;
        let expected = sequence_id.wrapping_add(1);
        if next.sequence_id != expected {
            return Err(WireError::FrameSequenceGap {
                expected,
                got: next.sequence_id,
            });
        }
        sequence_id = next.sequence_id;
        let finished = next.payload.len() < MAX_PAYLOAD_LEN;
        payload.extend_from_slice(&next.payload);
        if finished {
            break;
        }
    }
    Ok((sequence_id, payload))
}

/// Writes `payload` as one or more physical frames, splitting at
/// [`MAX_PAYLOAD_LEN`] exactly the way `read_logical_frame` expects to
/// reassemble it. Returns the sequence id of the last frame written.
pub async fn write_logical_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    mut sequence_id: u8,
    payload: &[u8],
) -> Result<u8, WireError> {
    let mut remaining = payload;
    loop {
        let (chunk, rest) = if remaining.len() >= MAX_PAYLOAD_LEN {
            remaining.split_at(MAX_PAYLOAD_LEN)
        } else {
            (remaining, &remaining[remaining.len()..])
        };
        write_frame(stream, sequence_id, chunk).await?;
        if chunk.len() < MAX_PAYLOAD_LEN {
            return Ok(sequence_id);
        }
        sequence_id = sequence_id.wrapping_add(1);
        remaining = rest;
        if remaining.is_empty() {
            // an exact multiple of MAX_PAYLOAD_LEN: MySQL terminates with an
            // explicit empty frame so the reader knows the split has ended.
            write_frame(stream, sequence_id, &[]).await?;
            return Ok(sequence_id);
        }
    }
}

async fn read_exact_or_short<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut [u8],
) -> Result<(), WireError> {
    let mut got = 0;
    while got < buf.len() {
        let n = stream.read(&mut buf[got..]).await?;
        if n == 0 {
            return Err(WireError::Short {
                expected: buf.len(),
                got,
            });
        }
        got += n;
    }
    Ok(())
}
