//! Client command packets: the first payload byte is the opcode.

use super::resultset::decode_stmt_execute_params;
use super::{Body, Message, Tag};
use crate::constants::CommandCode;
use crate::context::DecoderContext;
use crate::error::DecodeError;
use mysql_common::value::Value;
use num_traits::FromPrimitive;

#[derive(Debug, Clone)]
pub enum CommandBody {
    Quit,
    InitDb(String),
    Query(String),
    Ping,
    StmtPrepare(String),
    StmtExecute { statement_id: u32, params: Vec<Value> },
    StmtSendLongData { statement_id: u32, param_id: u16, data: Vec<u8> },
    StmtClose(u32),
    StmtReset(u32),
    StmtFetch { statement_id: u32, num_rows: u32 },
    ChangeUser(Vec<u8>),
    ResetConnection,
    Statistics,
    Debug,
    /// `COM_FIELD_LIST` and other legacy/rare opcodes enumerated by the
    /// closed tag set but not given a dedicated shape by the spec; decoded
    /// defensively as an opaque payload (see Open Questions).
    Other(Vec<u8>),
}

pub fn decode_command(ctx: &DecoderContext, payload: &[u8]) -> Result<Message, DecodeError> {
    let &opcode = payload.first().ok_or(DecodeError::EmptyPayload)?;
    let code = CommandCode::from_u8(opcode).ok_or(DecodeError::UnknownOpcode(opcode))?;
    let rest = &payload[1..];

    let body = match code {
        CommandCode::ComQuit => CommandBody::Quit,
        CommandCode::ComInitDb => CommandBody::InitDb(String::from_utf8_lossy(rest).into_owned()),
        CommandCode::ComQuery => CommandBody::Query(String::from_utf8_lossy(rest).into_owned()),
        CommandCode::ComPing => CommandBody::Ping,
        CommandCode::ComStmtPrepare => {
            CommandBody::StmtPrepare(String::from_utf8_lossy(rest).into_owned())
        }
        CommandCode::ComStmtExecute => {
            let statement_id = read_u32(rest, "COM_STMT_EXECUTE")?;
            // flags (1 byte) + iteration_count (4 bytes) precede the
            // optional parameter block, which is only present when the
            // statement actually takes parameters (§4.3).
            let param_block = rest.get(9..).unwrap_or_default();
            let prepared = ctx.lookup_prepared(statement_id).ok_or_else(|| DecodeError::Malformed {
                tag: "COM_STMT_EXECUTE",
                reason: format!("no prepared statement registered for id {statement_id}"),
            })?;
            let params = decode_stmt_execute_params(&prepared.params, param_block)?;
            CommandBody::StmtExecute {
                statement_id,
                params,
            }
        }
        CommandCode::ComStmtSendLongData => {
            let statement_id = read_u32(rest, "COM_STMT_SEND_LONG_DATA")?;
            let param_id = rest
                .get(4..6)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .ok_or_else(|| malformed("COM_STMT_SEND_LONG_DATA"))?;
            CommandBody::StmtSendLongData {
                statement_id,
                param_id,
                data: rest.get(6..).unwrap_or_default().to_vec(),
            }
        }
        CommandCode::ComStmtClose => CommandBody::StmtClose(read_u32(rest, "COM_STMT_CLOSE")?),
        CommandCode::ComStmtReset => CommandBody::StmtReset(read_u32(rest, "COM_STMT_RESET")?),
        CommandCode::ComStmtFetch => {
            let statement_id = read_u32(rest, "COM_STMT_FETCH")?;
            let num_rows = rest
                .get(4..8)
                .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
                .ok_or_else(|| malformed("COM_STMT_FETCH"))?;
            CommandBody::StmtFetch {
                statement_id,
                num_rows,
            }
        }
        CommandCode::ComChangeUser => CommandBody::ChangeUser(rest.to_vec()),
        CommandCode::ComResetConnection => CommandBody::ResetConnection,
        CommandCode::ComStatistics => CommandBody::Statistics,
        CommandCode::ComDebug => CommandBody::Debug,
        _ => CommandBody::Other(rest.to_vec()),
    };

    Ok(Message {
        tag: Tag::Command(code),
        raw: payload.to_vec(),
        body: Body::Command(body),
    })
}

fn read_u32(rest: &[u8], tag: &'static str) -> Result<u32, DecodeError> {
    rest.get(0..4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| malformed(tag))
}

fn malformed(tag: &'static str) -> DecodeError {
    DecodeError::Malformed {
        tag,
        reason: "truncated payload".into(),
    }
}
