//! Prepared-statement lifecycle and result-set assembly.
//!
//! A result set spans many frames: the column-count frame classified here,
//! then `column_count` column-definition frames, an optional intermediate
//! EOF, a run of row frames, and a terminating OK/EOF. Rows cannot be
//! decoded without the column list accumulated earlier in the same result
//! set, so [`decode_text_row`]/[`decode_binary_row`] borrow the column slice
//! rather than owning it — the assembly loop itself lives in the transcript
//! engine (C5), which is the only component that knows when the frame
//! stream for one result set ends.

use super::{read_lenenc_int, Body, Message, Tag};
use crate::error::DecodeError;
use mysql_common::constants::{ColumnFlags, ColumnType};
use mysql_common::io::ParseBuf;
use mysql_common::packets::{Column, NullBitmap, StmtPacket};
use mysql_common::proto::{Binary, Text};
use mysql_common::row::{Row, RowDeserializer};
use mysql_common::value::{ClientSide, ServerSide, Value};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct StmtPrepareOkBody {
    pub statement_id: u32,
    pub num_params: u16,
    pub num_columns: u16,
    pub warning_count: u16,
}

/// A result set as accumulated so far; see the module note on why rows are
/// not stored until their columns are known.
#[derive(Debug, Clone, Default)]
pub struct ResultSetBody {
    pub column_count: u64,
    pub columns: Vec<Column>,
}

pub fn decode_stmt_prepare_ok(payload: &[u8]) -> Result<Message, DecodeError> {
    let mut buf = ParseBuf(payload);
    let pkt: StmtPacket = buf.parse(()).map_err(|e| DecodeError::Malformed {
        tag: "StmtPrepareOk",
        reason: e.to_string(),
    })?;
    Ok(Message {
        tag: Tag::StmtPrepareOk,
        raw: payload.to_vec(),
        body: Body::StmtPrepareOk(StmtPrepareOkBody {
            statement_id: pkt.statement_id(),
            num_params: pkt.num_params(),
            num_columns: pkt.num_columns(),
            warning_count: pkt.warning_count(),
        }),
    })
}

pub fn decode_text_result_set_header(payload: &[u8]) -> Result<Message, DecodeError> {
    let (column_count, consumed) = read_lenenc_int(payload)?;
    let column_count = column_count.ok_or_else(|| DecodeError::Malformed {
        tag: "TextResultSet",
        reason: "NULL column count".into(),
    })?;
    debug_assert_eq!(consumed, payload.len());
    Ok(Message {
        tag: Tag::TextResultSet,
        raw: payload.to_vec(),
        body: Body::TextResultSet(ResultSetBody {
            column_count,
            columns: Vec::new(),
        }),
    })
}

pub fn decode_binary_result_set_header(payload: &[u8]) -> Result<Message, DecodeError> {
    let (column_count, consumed) = read_lenenc_int(payload)?;
    let column_count = column_count.ok_or_else(|| DecodeError::Malformed {
        tag: "BinaryProtocolResultSet",
        reason: "NULL column count".into(),
    })?;
    debug_assert_eq!(consumed, payload.len());
    Ok(Message {
        tag: Tag::BinaryProtocolResultSet,
        raw: payload.to_vec(),
        body: Body::BinaryResultSet(ResultSetBody {
            column_count,
            columns: Vec::new(),
        }),
    })
}

/// Decodes one column-definition frame (the 4.1, 13-field shape).
pub fn decode_column_def(payload: &[u8]) -> Result<Column, DecodeError> {
    let mut buf = ParseBuf(payload);
    buf.parse(()).map_err(|e| DecodeError::Malformed {
        tag: "ColumnDefinition",
        reason: e.to_string(),
    })
}

/// Decodes one text-protocol row: a sequence of length-encoded strings,
/// parameterised by the columns already accumulated for this result set.
pub fn decode_text_row(columns: Arc<[Column]>, payload: &[u8]) -> Result<Row, DecodeError> {
    let mut buf = ParseBuf(payload);
    let row: RowDeserializer<ServerSide, Text> =
        buf.parse(columns).map_err(|e| DecodeError::Malformed {
            tag: "TextResultSet row",
            reason: e.to_string(),
        })?;
    Ok(row.into_inner())
}

/// Decodes one binary-protocol row using the column-type-keyed table of
/// §4.3, via the NULL bitmap plus typed binary fields.
pub fn decode_binary_row(columns: Arc<[Column]>, payload: &[u8]) -> Result<Row, DecodeError> {
    let mut buf = ParseBuf(payload);
    let row: RowDeserializer<ServerSide, Binary> =
        buf.parse(columns).map_err(|e| DecodeError::Malformed {
            tag: "BinaryProtocolResultSet row",
            reason: e.to_string(),
        })?;
    Ok(row.into_inner())
}

const PARAM_BLOCK_TAG: &str = "COM_STMT_EXECUTE params";

/// Decodes the bound-parameter block of a `COM_STMT_EXECUTE` packet — the
/// bytes following the statement id, flags, and iteration count — against
/// the parameter definitions `COM_STMT_PREPARE` stored for that statement:
/// a NULL bitmap, an optional run of `(type, unsigned flag)` pairs when the
/// client rebinds types, then the packed values for every non-null
/// parameter. Unlike a binary result-set row (`decode_binary_row`), there is
/// no leading status byte and the NULL bitmap sits at bit offset 0
/// (`ClientSide`) rather than 2 (`ServerSide`) — the two encodings are not
/// interchangeable.
///
/// Returns an error if the block does not consume exactly its expected
/// length, per the "prepared-statement parity" property.
pub fn decode_stmt_execute_params(params: &[Column], payload: &[u8]) -> Result<Vec<Value>, DecodeError> {
    if params.is_empty() {
        return if payload.is_empty() {
            Ok(Vec::new())
        } else {
            Err(DecodeError::Malformed {
                tag: PARAM_BLOCK_TAG,
                reason: "statement takes no parameters but a parameter block was sent".into(),
            })
        };
    }

    let mut buf = ParseBuf(payload);
    let bitmap_bytes = buf
        .checked_eat(NullBitmap::<ClientSide>::bitmap_len(params.len()))
        .ok_or_else(truncated)?;
    let bitmap = NullBitmap::<ClientSide, _>::from_bytes(bitmap_bytes);

    let new_params_bound = buf.checked_eat_u8().ok_or_else(truncated)?;

    let mut types: Vec<(ColumnType, ColumnFlags)> = Vec::with_capacity(params.len());
    if new_params_bound == 1 {
        for param in params {
            let raw_type = buf.checked_eat_u8().ok_or_else(truncated)?;
            let unsigned_flag = buf.checked_eat_u8().ok_or_else(truncated)?;
            let column_type = ColumnType::try_from(raw_type).map_err(|_| DecodeError::Malformed {
                tag: PARAM_BLOCK_TAG,
                reason: format!("unknown column type 0x{raw_type:02x}"),
            })?;
            let mut flags = param.flags();
            flags.set(ColumnFlags::UNSIGNED_FLAG, unsigned_flag != 0);
            types.push((column_type, flags));
        }
    } else {
        for param in params {
            types.push((param.column_type(), param.flags()));
        }
    }

    let mut values = Vec::with_capacity(params.len());
    for (i, (column_type, flags)) in types.into_iter().enumerate() {
        if bitmap.is_null(i) {
            values.push(Value::NULL);
        } else {
            values.push(deserialize_bin_value(column_type, flags, &mut buf)?);
        }
    }

    if !buf.is_empty() {
        return Err(DecodeError::Malformed {
            tag: PARAM_BLOCK_TAG,
            reason: format!("{} trailing byte(s) after the last bound parameter", buf.len()),
        });
    }

    Ok(values)
}

fn truncated() -> DecodeError {
    DecodeError::Malformed {
        tag: PARAM_BLOCK_TAG,
        reason: "truncated parameter block".into(),
    }
}

/// Hand-rolled equivalent of `mysql_common`'s own (private) binary value
/// decoder: that function is `pub(crate)`, so a parameter-block decoder
/// outside the crate has to replicate its column-type dispatch.
fn deserialize_bin_value(
    column_type: ColumnType,
    flags: ColumnFlags,
    buf: &mut ParseBuf<'_>,
) -> Result<Value, DecodeError> {
    use ColumnType::*;
    match column_type {
        MYSQL_TYPE_STRING | MYSQL_TYPE_VAR_STRING | MYSQL_TYPE_BLOB | MYSQL_TYPE_TINY_BLOB
        | MYSQL_TYPE_MEDIUM_BLOB | MYSQL_TYPE_LONG_BLOB | MYSQL_TYPE_SET | MYSQL_TYPE_ENUM
        | MYSQL_TYPE_DECIMAL | MYSQL_TYPE_VARCHAR | MYSQL_TYPE_BIT | MYSQL_TYPE_NEWDECIMAL
        | MYSQL_TYPE_GEOMETRY | MYSQL_TYPE_JSON => Ok(Value::Bytes(
            buf.checked_eat_lenenc_str().ok_or_else(truncated)?.to_vec(),
        )),
        MYSQL_TYPE_TINY => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                buf.checked_eat_u8().map(|v| Value::Int(v as i64)).ok_or_else(truncated)
            } else {
                buf.checked_eat_i8().map(|v| Value::Int(v as i64)).ok_or_else(truncated)
            }
        }
        MYSQL_TYPE_SHORT | MYSQL_TYPE_YEAR => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                buf.checked_eat_u16_le().map(|v| Value::Int(v as i64)).ok_or_else(truncated)
            } else {
                buf.checked_eat_i16_le().map(|v| Value::Int(v as i64)).ok_or_else(truncated)
            }
        }
        MYSQL_TYPE_LONG | MYSQL_TYPE_INT24 => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                buf.checked_eat_u32_le().map(|v| Value::Int(v as i64)).ok_or_else(truncated)
            } else {
                buf.checked_eat_i32_le().map(|v| Value::Int(v as i64)).ok_or_else(truncated)
            }
        }
        MYSQL_TYPE_LONGLONG => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                let v = buf.checked_eat_u64_le().ok_or_else(truncated)?;
                Ok(i64::try_from(v).map(Value::Int).unwrap_or(Value::UInt(v)))
            } else {
                buf.checked_eat_i64_le().map(Value::Int).ok_or_else(truncated)
            }
        }
        MYSQL_TYPE_FLOAT => buf.checked_eat_f32_le().map(Value::Float).ok_or_else(truncated),
        MYSQL_TYPE_DOUBLE => buf.checked_eat_f64_le().map(Value::Double).ok_or_else(truncated),
        MYSQL_TYPE_TIMESTAMP | MYSQL_TYPE_DATE | MYSQL_TYPE_DATETIME => deserialize_bin_date(buf),
        MYSQL_TYPE_TIME => deserialize_bin_time(buf),
        MYSQL_TYPE_NULL => Ok(Value::NULL),
        other => Err(DecodeError::Malformed {
            tag: PARAM_BLOCK_TAG,
            reason: format!("unsupported bound-parameter column type {other:?}"),
        }),
    }
}

/// Variable-length `MYSQL_TYPE_DATE`/`DATETIME`/`TIMESTAMP` binary encoding:
/// a 1-byte length followed by 0, 4, 7, or 11 bytes of fields.
fn deserialize_bin_date(buf: &mut ParseBuf<'_>) -> Result<Value, DecodeError> {
    let len = buf.checked_eat_u8().ok_or_else(truncated)?;
    let mut field_buf = buf.checked_eat_buf(len as usize).ok_or_else(truncated)?;

    let mut year = 0u16;
    let mut month = 0u8;
    let mut day = 0u8;
    let mut hour = 0u8;
    let mut minute = 0u8;
    let mut second = 0u8;
    let mut micro_second = 0u32;

    if len >= 4 {
        year = field_buf.eat_u16_le();
        month = field_buf.eat_u8();
        day = field_buf.eat_u8();
    }
    if len >= 7 {
        hour = field_buf.eat_u8();
        minute = field_buf.eat_u8();
        second = field_buf.eat_u8();
    }
    if len == 11 {
        micro_second = field_buf.eat_u32_le();
    }

    Ok(Value::Date(year, month, day, hour, minute, second, micro_second))
}

/// Variable-length `MYSQL_TYPE_TIME` binary encoding: a 1-byte length
/// followed by 0, 8, or 12 bytes of fields.
fn deserialize_bin_time(buf: &mut ParseBuf<'_>) -> Result<Value, DecodeError> {
    let len = buf.checked_eat_u8().ok_or_else(truncated)?;
    let mut field_buf = buf.checked_eat_buf(len as usize).ok_or_else(truncated)?;

    let mut is_negative = false;
    let mut days = 0u32;
    let mut hours = 0u8;
    let mut minutes = 0u8;
    let mut seconds = 0u8;
    let mut micro_seconds = 0u32;

    if len >= 8 {
        is_negative = field_buf.eat_u8() == 1;
        days = field_buf.eat_u32_le();
        hours = field_buf.eat_u8();
        minutes = field_buf.eat_u8();
        seconds = field_buf.eat_u8();
    }
    if len == 12 {
        micro_seconds = field_buf.eat_u32_le();
    }

    Ok(Value::Time(is_negative, days, hours, minutes, seconds, micro_seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql_common::constants::ColumnType;

    #[test]
    fn decode_text_result_set_header_reads_column_count() {
        let msg = decode_text_result_set_header(&[0x02]).unwrap();
        match msg.body {
            Body::TextResultSet(rs) => assert_eq!(rs.column_count, 2),
            _ => panic!("expected TextResultSet body"),
        }
    }

    #[test]
    fn decode_text_row_needs_matching_column_count() {
        let columns: Arc<[Column]> = Arc::from(vec![
            Column::new(ColumnType::MYSQL_TYPE_LONG).with_name(b"id"),
            Column::new(ColumnType::MYSQL_TYPE_VARCHAR).with_name(b"name"),
        ]);
        // lenenc "1" then lenenc-string "alice"
        let payload = [0x01, 0x31, 0x05, b'a', b'l', b'i', b'c', b'e'];
        let row = decode_text_row(columns, &payload).unwrap();
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn stmt_prepare_ok_round_trips() {
        // status, statement_id, num_columns, num_params, filler, warning_count
        let mut buf = vec![0x00];
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.push(0x00);
        buf.extend_from_slice(&0u16.to_le_bytes());
        let msg = decode_stmt_prepare_ok(&buf).unwrap();
        match msg.body {
            Body::StmtPrepareOk(b) => {
                assert_eq!(b.statement_id, 1);
                assert_eq!(b.num_columns, 3);
                assert_eq!(b.num_params, 1);
            }
            _ => panic!("expected StmtPrepareOk body"),
        }
    }
}
