//! Replay mode: serve a client from a previously captured transcript with no
//! real server behind it.

use tracing::{debug, info, warn};

use super::{Bundle, BundleKind, DuplexStream, Packet};
use crate::context::{DecoderContext, PreparedStatement};
use crate::error::{EngineError, MatchError};
use crate::message::{self, Body};
use crate::phase::PhaseMachine;
use crate::wire::write_logical_frame;

/// Replays `bundles` (in capture order) against `client`. The first `Config`
/// bundle drives the handshake; each subsequent `Mocks` bundle is consumed
/// at most once, matched against incoming client requests by the scoring
/// algorithm of §4.5.
pub async fn replay<C>(
    client: C,
    bundles: Vec<Bundle>,
    mut cancel: tokio::sync::watch::Receiver<()>,
) -> Result<(), EngineError>
where
    C: DuplexStream + 'static,
{
    let mut client: Box<dyn DuplexStream> = Box::new(client);
    let mut ctx = DecoderContext::new();

    let mut bundles = bundles.into_iter();
    let config = bundles
        .next()
        .filter(|b| b.kind == BundleKind::Config)
        .ok_or(MatchError::TranscriptExhausted)?;
    replay_handshake(&mut client, &mut ctx, &config).await?;
    ctx.note_reset();
    let mut phase = PhaseMachine::in_command_loop();

    let mut pending: Vec<Option<Bundle>> = bundles.map(Some).collect();

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                debug!("replay cancelled");
                return Ok(());
            }
            frame = crate::wire::read_logical_frame(&mut client) => {
                let (seq, payload) = frame?;
                phase.begin_cycle()?;
                phase.note_frame_sequence(seq)?;
                let cmd_msg = message::decode_client(&ctx, &payload)?;

                let best = find_best_match(&pending, seq, cmd_msg.tag.as_str(), &payload);
                let Some(index) = best else {
                    warn!("replay: no bundle matched the client request");
                    return Err(MatchError::NoMatch {
                        opcode: payload.first().copied().unwrap_or(0),
                    }
                    .into());
                };

                let bundle = pending[index].take().expect("matched index must be Some");
                replay_response(&mut client, &mut phase, &mut ctx, &bundle).await?;

                if let Body::Command(crate::message::CommandBody::Quit) = cmd_msg.body {
                    return Ok(());
                }
            }
        }
    }
}

async fn replay_handshake(
    client: &mut Box<dyn DuplexStream>,
    ctx: &mut DecoderContext,
    config: &Bundle,
) -> Result<(), EngineError> {
    let mut responses = config.mysql_responses.iter();
    let requests = config.mysql_requests.iter();

    let greeting = responses.next().ok_or(MatchError::TranscriptExhausted)?;
    write_logical_frame(client, greeting.header.sequence_id, &greeting.message).await?;
    let greeting_msg = message::decode_handshake_v10(&greeting.message)?;
    if let Body::Handshake(h) = &greeting_msg.body {
        ctx.set_after_greeting(h.capabilities, h.auth_plugin_name.clone());
    }

    for expected_req in requests {
        let (seq, payload) = crate::wire::read_logical_frame(client).await?;
        if expected_req.tag == "HandshakeResponse41" {
            compare_handshake_response(&payload, &expected_req.message)?;
        }
        let _ = seq;

        match responses.next() {
            Some(resp) => {
                write_logical_frame(client, resp.header.sequence_id, &resp.message).await?;
                if resp.tag == "OK" || resp.tag == "ERR" {
                    break;
                }
            }
            None => break,
        }
    }

    info!("handshake replayed");
    Ok(())
}

/// Compares only the structural fields named in §4.5 (username, chosen
/// plugin, capability bits affecting wire format); password bytes are never
/// compared.
fn compare_handshake_response(observed: &[u8], stored: &[u8]) -> Result<(), EngineError> {
    let ctx = DecoderContext::new();
    let observed_msg = message::decode_client(&ctx, observed)?;
    let stored_msg = message::decode_client(&ctx, stored)?;
    let (Body::HandshakeResponse(o), Body::HandshakeResponse(s)) =
        (&observed_msg.body, &stored_msg.body)
    else {
        return Ok(());
    };
    if o.username != s.username || o.auth_plugin_name != s.auth_plugin_name {
        return Err(MatchError::CapabilityMismatch(format!(
            "handshake response mismatch: user {:?} vs {:?}, plugin {:?} vs {:?}",
            o.username, s.username, o.auth_plugin_name, s.auth_plugin_name
        ))
        .into());
    }
    Ok(())
}

/// §4.5 matching score: `COM_QUERY` scores 5 for an exact query-string
/// match plus 1 each for matching payload length/sequence id/tag; other
/// commands score 1 per matching header field plus 1 for matching tag.
fn score_bundle(seq: u8, tag: &str, payload: &[u8], candidate: &Packet) -> u32 {
    if candidate.tag != tag {
        return 0;
    }
    let mut score = 0;
    if tag == "COM_QUERY" && payload.get(1..) == candidate.message.get(1..) {
        score += 5;
    }
    if candidate.header.payload_length as usize == payload.len() {
        score += 1;
    }
    if candidate.header.sequence_id == seq {
        score += 1;
    }
    score += 1; // tag already confirmed equal above
    score
}

fn find_best_match(
    pending: &[Option<Bundle>],
    seq: u8,
    tag: &str,
    payload: &[u8],
) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, slot) in pending.iter().enumerate() {
        let Some(bundle) = slot else { continue };
        let Some(request) = bundle.mysql_requests.first() else {
            continue;
        };
        let score = score_bundle(seq, tag, payload, request);
        if score == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

async fn replay_response(
    client: &mut Box<dyn DuplexStream>,
    phase: &mut PhaseMachine,
    ctx: &mut DecoderContext,
    bundle: &Bundle,
) -> Result<(), EngineError> {
    for packet in &bundle.mysql_responses {
        phase.note_frame_sequence(packet.header.sequence_id)?;
        write_logical_frame(client, packet.header.sequence_id, &packet.message).await?;
    }
    apply_stateful_effects(ctx, bundle)?;
    Ok(())
}

/// Replaying a successful `StmtPrepareOk` must still populate the
/// replay-side decoder context so a later `COM_STMT_EXECUTE` can be matched
/// and its binary result set decoded correctly.
fn apply_stateful_effects(ctx: &mut DecoderContext, bundle: &Bundle) -> Result<(), EngineError> {
    let Some(header) = bundle.mysql_responses.first() else {
        return Ok(());
    };
    if header.tag != "StmtPrepareOk" {
        return Ok(());
    }
    let msg = message::decode_stmt_prepare_ok(&header.message)?;
    let Body::StmtPrepareOk(prep) = msg.body else {
        return Ok(());
    };
    let mut rest = bundle.mysql_responses.iter().skip(1);
    let params: Vec<_> = rest
        .by_ref()
        .take(prep.num_params as usize)
        .filter(|p| p.tag == "ColumnDefinition")
        .map(|p| message::decode_column_def(&p.message))
        .collect::<Result<_, _>>()?;
    let columns: Vec<_> = rest
        .take(prep.num_columns as usize)
        .filter(|p| p.tag == "ColumnDefinition")
        .map(|p| message::decode_column_def(&p.message))
        .collect::<Result<_, _>>()?;
    ctx.insert_prepared(PreparedStatement {
        statement_id: prep.statement_id,
        num_params: prep.num_params,
        num_columns: prep.num_columns,
        params,
        columns,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::PacketHeader;

    fn query_packet(seq: u8, sql: &str) -> Packet {
        let mut payload = vec![0x03];
        payload.extend_from_slice(sql.as_bytes());
        Packet {
            header: PacketHeader {
                sequence_id: seq,
                payload_length: payload.len() as u32,
            },
            tag: "COM_QUERY".to_string(),
            message: payload,
            meta: None,
        }
    }

    #[test]
    fn exact_query_match_scores_highest() {
        let p1 = query_packet(0, "SELECT 1");
        let p2 = query_packet(0, "SELECT 2");
        let mut payload = vec![0x03];
        payload.extend_from_slice(b"SELECT 1");
        assert!(score_bundle(0, "COM_QUERY", &payload, &p1) > score_bundle(0, "COM_QUERY", &payload, &p2));
    }

    #[test]
    fn mismatched_tag_scores_zero() {
        let p1 = query_packet(0, "SELECT 1");
        let payload = vec![0x0E];
        assert_eq!(score_bundle(0, "COM_PING", &payload, &p1), 0);
    }
}
