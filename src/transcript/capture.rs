//! Capture mode: observe a live client/server exchange, decode it, and
//! assemble it into bundles for a [`TranscriptSink`].

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, instrument};

use super::{Bundle, BundleKind, BundleMetadata, DuplexStream, Packet, TlsUpgrade, TranscriptSink, TRANSCRIPT_VERSION};
use crate::context::{DecoderContext, PreparedStatement};
use crate::error::EngineError;
use crate::message::{self, AuthMoreDataKind, Body, CommandBody};
use crate::phase::{AuthMoreDataOutcome, Phase, PhaseMachine};
use crate::wire::{read_logical_frame, write_logical_frame};

const EOF_MAX_LEN: usize = 7;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct BundleBuilder {
    kind: BundleKind,
    name: String,
    request_operation: String,
    response_operation: String,
    requests: Vec<Packet>,
    responses: Vec<Packet>,
    req_timestamp: i64,
    res_timestamp: i64,
}

impl BundleBuilder {
    fn new(kind: BundleKind, name: impl Into<String>, request_operation: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            request_operation: request_operation.into(),
            response_operation: String::new(),
            requests: Vec::new(),
            responses: Vec::new(),
            req_timestamp: now_millis(),
            res_timestamp: 0,
        }
    }

    fn finish(mut self, connection_id: u64) -> Bundle {
        if self.res_timestamp == 0 {
            self.res_timestamp = now_millis();
        }
        Bundle {
            version: TRANSCRIPT_VERSION,
            kind: self.kind,
            name: self.name,
            metadata: BundleMetadata {
                kind: match self.kind {
                    BundleKind::Config => "config".to_string(),
                    BundleKind::Mocks => "mocks".to_string(),
                },
                request_operation: self.request_operation,
                response_operation: self.response_operation,
            },
            mysql_requests: self.requests,
            mysql_responses: self.responses,
            req_timestamp: self.req_timestamp,
            res_timestamp: self.res_timestamp,
            connection_id,
        }
    }
}

/// Captures one connection: `client` and `server` are the two already
/// connected byte-stream endpoints; completed bundles are handed to `sink`
/// as they close. `tls` is consulted only if the client requests SSL.
#[instrument(skip_all, fields(connection_id))]
pub async fn capture<C, S, K>(
    client: C,
    server: S,
    mut sink: K,
    mut cancel: tokio::sync::watch::Receiver<()>,
    connection_id: u64,
    tls: Option<Arc<dyn TlsUpgrade>>,
) -> Result<(), EngineError>
where
    C: DuplexStream + 'static,
    S: DuplexStream + 'static,
    K: TranscriptSink,
{
    let mut client: Box<dyn DuplexStream> = Box::new(client);
    let mut server: Box<dyn DuplexStream> = Box::new(server);

    let mut ctx = DecoderContext::new();
    let mut phase = PhaseMachine::new();

    let mut config = BundleBuilder::new(BundleKind::Config, "handshake", "Handshake");

    // --- greeting ---
    let (seq, greeting_payload) = read_logical_frame(&mut server).await?;
    let greeting = message::decode_handshake_v10(&greeting_payload)?;
    phase.on_server_greeting()?;
    if let Body::Handshake(ref h) = greeting.body {
        ctx.set_after_greeting(h.capabilities, h.auth_plugin_name.clone());
    }
    config.responses.push(Packet::new(seq, greeting.tag.as_str(), greeting_payload.clone()));
    write_logical_frame(&mut client, seq, &greeting_payload).await?;

    // --- client's SSLRequest or HandshakeResponse41 ---
    let (seq, client_first) = read_logical_frame(&mut client).await?;
    let client_msg = message::decode_client(&ctx, &client_first)?;
    config.requests.push(Packet::new(seq, client_msg.tag.as_str(), client_first.clone()));
    write_logical_frame(&mut server, seq, &client_first).await?;

    if matches!(client_msg.body, Body::SslRequest) {
        phase.on_ssl_request()?;
        let upgrader = tls.ok_or(crate::error::Unsupported::TlsDisabled)?;
        client = upgrader.upgrade(client).await?;
        phase.on_tls_established()?;

        let (seq, handshake_resp) = read_logical_frame(&mut client).await?;
        let resp_msg = message::decode_client(&ctx, &handshake_resp)?;
        config.requests.push(Packet::new(seq, resp_msg.tag.as_str(), handshake_resp.clone()));
        write_logical_frame(&mut server, seq, &handshake_resp).await?;
        apply_handshake_response(&mut ctx, &mut phase, &resp_msg)?;
    } else {
        apply_handshake_response(&mut ctx, &mut phase, &client_msg)?;
    }

    // --- authentication exchange, arbitrary number of round trips ---
    loop {
        let (seq, payload) = read_logical_frame(&mut server).await?;
        let msg = message::decode_server(&ctx, &payload)?;
        config.responses.push(Packet::new(seq, msg.tag.as_str(), payload.clone()));
        write_logical_frame(&mut client, seq, &payload).await?;

        match &msg.body {
            Body::Ok(_) => {
                phase.on_auth_outcome(true)?;
                config.response_operation = "OK".to_string();
            }
            Body::Err(_) => {
                phase.on_auth_outcome(false)?;
                config.response_operation = "ERR".to_string();
                sink.emit(config.finish(connection_id)).await?;
                return Ok(());
            }
            Body::AuthSwitchRequest(_) => {
                phase.on_auth_switch_request()?;
            }
            Body::AuthMoreData(b) => {
                let outcome = match b.kind {
                    AuthMoreDataKind::FastAuthSuccess => AuthMoreDataOutcome::FastAuthSuccess,
                    _ => AuthMoreDataOutcome::PerformFullAuthentication,
                };
                phase.on_auth_more_data(outcome)?;
            }
            _ => {}
        }

        if matches!(phase.phase(), Phase::CommandLoop | Phase::Terminated) {
            break;
        }

        // client's continuation: AuthSwitchResponse / RequestPublicKey /
        // EncryptedPassword / PlainPassword, forwarded opaquely.
        let (seq, payload) = read_logical_frame(&mut client).await?;
        config.requests.push(Packet::new(seq, "auth-continuation", payload.clone()));
        write_logical_frame(&mut server, seq, &payload).await?;
    }

    sink.emit(config.finish(connection_id)).await?;
    ctx.note_reset();
    info!("handshake captured, entering command loop");

    // --- command loop ---
    let mut cycle = 0u64;
    loop {
        tokio::select! {
            _ = cancel.changed() => {
                debug!("capture cancelled");
                return Ok(());
            }
            frame = read_logical_frame(&mut client) => {
                let (seq, payload) = frame?;
                phase.begin_cycle()?;
                phase.note_frame_sequence(seq)?;
                let cmd_msg = message::decode_client(&ctx, &payload)?;
                write_logical_frame(&mut server, seq, &payload).await?;

                let opcode_name = cmd_msg.tag.as_str().to_string();
                let mut bundle = BundleBuilder::new(
                    BundleKind::Mocks,
                    format!("cycle-{cycle}"),
                    opcode_name.clone(),
                );
                bundle.requests.push(Packet::new(seq, &opcode_name, payload.clone()));
                cycle += 1;

                if let Body::Command(CommandBody::Quit) = &cmd_msg.body {
                    phase.on_quit();
                    sink.emit(bundle.finish(connection_id)).await?;
                    return Ok(());
                }

                if let Body::Command(cmd) = &cmd_msg.body {
                    note_command_in_context(&mut ctx, cmd);
                }

                // COM_STMT_CLOSE and COM_STMT_SEND_LONG_DATA have no server
                // response in the wire protocol; waiting for one would stall
                // the command loop until the next client frame arrives.
                let expects_response = !matches!(
                    &cmd_msg.body,
                    Body::Command(CommandBody::StmtClose(_))
                        | Body::Command(CommandBody::StmtSendLongData { .. })
                );
                if expects_response {
                    capture_response(&mut ctx, &mut phase, &mut server, &mut client, &mut bundle).await?;
                    bundle.response_operation = bundle
                        .responses
                        .last()
                        .map(|p| p.tag.clone())
                        .unwrap_or_default();
                }
                sink.emit(bundle.finish(connection_id)).await?;
            }
        }
    }
}

fn apply_handshake_response(
    ctx: &mut DecoderContext,
    phase: &mut PhaseMachine,
    msg: &crate::message::Message,
) -> Result<(), EngineError> {
    phase.on_handshake_response()?;
    if let Body::HandshakeResponse(h) = &msg.body {
        if h.auth_plugin_name.as_deref() == Some("sha256_password") {
            return Err(crate::error::Unsupported::AuthPlugin("sha256_password".to_string()).into());
        }
        ctx.set_after_greeting(h.capabilities, h.auth_plugin_name.clone());
    }
    Ok(())
}

fn note_command_in_context(ctx: &mut DecoderContext, cmd: &CommandBody) {
    use crate::constants::CommandCode;
    match cmd {
        CommandBody::Quit => ctx.note_command(CommandCode::ComQuit),
        CommandBody::InitDb(_) => ctx.note_command(CommandCode::ComInitDb),
        CommandBody::Query(_) => ctx.note_command(CommandCode::ComQuery),
        CommandBody::Ping => ctx.note_command(CommandCode::ComPing),
        CommandBody::StmtPrepare(_) => ctx.note_command(CommandCode::ComStmtPrepare),
        CommandBody::StmtExecute { .. } => ctx.note_command(CommandCode::ComStmtExecute),
        CommandBody::StmtSendLongData { .. } => ctx.note_command(CommandCode::ComStmtSendLongData),
        CommandBody::StmtClose(id) => {
            ctx.remove_prepared(*id);
            ctx.note_command(CommandCode::ComStmtClose);
        }
        CommandBody::StmtReset(_) => ctx.note_command(CommandCode::ComStmtReset),
        CommandBody::StmtFetch { .. } => ctx.note_command(CommandCode::ComStmtFetch),
        CommandBody::ChangeUser(_) => ctx.note_command(CommandCode::ComChangeUser),
        CommandBody::ResetConnection => ctx.note_reset(),
        CommandBody::Statistics => ctx.note_command(CommandCode::ComStatistics),
        CommandBody::Debug => ctx.note_command(CommandCode::ComDebug),
        CommandBody::Other(_) => {}
    }
}

/// Reads and forwards one complete server response for the command just
/// sent, handling the multi-frame shapes (`StmtPrepareOk` column streams,
/// `TextResultSet`/`BinaryProtocolResultSet`) per §4.3's assembly algorithm.
async fn capture_response<R, W>(
    ctx: &mut DecoderContext,
    phase: &mut PhaseMachine,
    server: &mut R,
    client: &mut W,
    bundle: &mut BundleBuilder,
) -> Result<(), EngineError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let (seq, payload) = read_logical_frame(server).await?;
    phase.note_frame_sequence(seq)?;
    let header_msg = message::decode_server(ctx, &payload)?;
    bundle.responses.push(Packet::new(seq, header_msg.tag.as_str(), payload.clone()));
    write_logical_frame(client, seq, &payload).await?;

    let deprecate_eof = ctx
        .capabilities()
        .contains(mysql_common::constants::CapabilityFlags::CLIENT_DEPRECATE_EOF);

    match header_msg.body {
        Body::StmtPrepareOk(ref prep) => {
            let params =
                read_column_defs(phase, server, client, bundle, prep.num_params as usize, deprecate_eof).await?;
            let columns =
                read_column_defs(phase, server, client, bundle, prep.num_columns as usize, deprecate_eof).await?;
            ctx.insert_prepared(PreparedStatement {
                statement_id: prep.statement_id,
                num_params: prep.num_params,
                num_columns: prep.num_columns,
                params,
                columns,
            });
        }
        Body::TextResultSet(ref rs) | Body::BinaryResultSet(ref rs) => {
            let binary = matches!(header_msg.body, Body::BinaryResultSet(_));
            let columns =
                read_column_defs(phase, server, client, bundle, rs.column_count as usize, deprecate_eof).await?;
            let columns: Arc<[mysql_common::packets::Column]> = Arc::from(columns);
            read_rows_until_terminal(ctx, phase, server, client, bundle, columns, binary).await?;
        }
        _ => {}
    }
    Ok(())
}

/// Reads `count` column-definition frames, plus the intermediate EOF that
/// follows them when `CLIENT_DEPRECATE_EOF` was not negotiated (§4.3).
async fn read_column_defs<R, W>(
    phase: &mut PhaseMachine,
    server: &mut R,
    client: &mut W,
    bundle: &mut BundleBuilder,
    count: usize,
    deprecate_eof: bool,
) -> Result<Vec<mysql_common::packets::Column>, EngineError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        let (seq, payload) = read_logical_frame(server).await?;
        phase.note_frame_sequence(seq)?;
        let column = message::decode_column_def(&payload)?;
        bundle.responses.push(Packet::new(seq, "ColumnDefinition", payload.clone()));
        write_logical_frame(client, seq, &payload).await?;
        columns.push(column);
    }
    if count > 0 && !deprecate_eof {
        let (seq, payload) = read_logical_frame(server).await?;
        phase.note_frame_sequence(seq)?;
        write_logical_frame(client, seq, &payload).await?;
        bundle.responses.push(Packet::new(seq, "EOF", payload));
    }
    Ok(columns)
}

fn is_eof_marker(payload: &[u8]) -> bool {
    matches!(payload.first(), Some(0xFE)) && payload.len() <= EOF_MAX_LEN + 1
}

async fn read_rows_until_terminal<R, W>(
    ctx: &DecoderContext,
    phase: &mut PhaseMachine,
    server: &mut R,
    client: &mut W,
    bundle: &mut BundleBuilder,
    columns: Arc<[mysql_common::packets::Column]>,
    binary: bool,
) -> Result<(), EngineError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let (seq, payload) = read_logical_frame(server).await?;
        phase.note_frame_sequence(seq)?;
        write_logical_frame(client, seq, &payload).await?;

        let &first = payload.first().ok_or(crate::error::DecodeError::EmptyPayload)?;
        if first == 0xFF {
            let msg = message::decode_err(ctx, &payload)?;
            bundle.responses.push(Packet::new(seq, msg.tag.as_str(), payload));
            return Ok(());
        }
        if is_eof_marker(&payload) {
            bundle.responses.push(Packet::new(seq, "EOF", payload));
            return Ok(());
        }

        if binary {
            message::decode_binary_row(columns.clone(), &payload)?;
        } else {
            message::decode_text_row(columns.clone(), &payload)?;
        }
        bundle.responses.push(Packet::new(
            seq,
            if binary { "BinaryProtocolResultSet" } else { "TextResultSet" },
            payload,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Unsupported;
    use mysql_common::constants::CapabilityFlags;
    use mysql_common::packets::{AuthPlugin, HandshakeResponse};
    use mysql_common::proto::MySerialize;

    fn handshake_response_msg(plugin: &str) -> crate::message::Message {
        let caps = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_SECURE_CONNECTION;
        let resp = HandshakeResponse::new(
            Some(&b"sig"[..]),
            (8, 0, 34),
            Some(b"root".as_slice()),
            None::<&[u8]>,
            Some(AuthPlugin::Other(plugin.as_bytes().into())),
            caps,
            None,
            16 * 1024 * 1024,
        );
        let mut buf = Vec::new();
        resp.serialize(&mut buf);
        let ctx = DecoderContext::new();
        message::decode_client(&ctx, &buf).unwrap()
    }

    #[test]
    fn sha256_password_is_rejected() {
        let mut ctx = DecoderContext::new();
        let mut phase = PhaseMachine::new();
        phase.on_server_greeting().unwrap();
        let msg = handshake_response_msg("sha256_password");
        let err = apply_handshake_response(&mut ctx, &mut phase, &msg).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Unsupported(Unsupported::AuthPlugin(ref p)) if p == "sha256_password"
        ));
    }

    #[test]
    fn mysql_native_password_is_accepted() {
        let mut ctx = DecoderContext::new();
        let mut phase = PhaseMachine::new();
        phase.on_server_greeting().unwrap();
        let msg = handshake_response_msg("mysql_native_password");
        apply_handshake_response(&mut ctx, &mut phase, &msg).unwrap();
        assert_eq!(ctx.plugin(), Some("mysql_native_password"));
    }
}
