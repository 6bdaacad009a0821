//! MySQL wire-protocol constants: command opcodes and generic-response headers.

use num_derive::{FromPrimitive, ToPrimitive};

pub const SCRAMBLE_SIZE: usize = 20;
pub const AUTH_PLUGIN_DATA_PART_1_LENGTH: usize = 8;

/// First byte of a generic server response packet.
#[derive(Debug, PartialEq, Eq, ToPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HeaderInfo {
    OkHeader = 0x00,
    ErrHeader = 0xFF,
    EofHeader = 0xFE,
    LocalInFileHeader = 0xFB,
}

/// Client command opcodes: the first payload byte of every command packet.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    ComSleep = 0,
    ComQuit = 1,
    ComInitDb = 2,
    ComQuery = 3,
    ComFieldList = 4,
    ComCreateDb = 5,
    ComDropDb = 6,
    ComRefresh = 7,
    ComShutdown = 8,
    ComStatistics = 9,
    ComProcessInfo = 10,
    ComConnect = 11,
    ComProcessKill = 12,
    ComDebug = 13,
    ComPing = 14,
    ComTime = 15,
    ComDelayedInsert = 16,
    ComChangeUser = 17,
    ComBinlogDump = 18,
    ComTableDump = 19,
    ComConnectOut = 20,
    ComRegisterSlave = 21,
    ComStmtPrepare = 22,
    ComStmtExecute = 23,
    ComStmtSendLongData = 24,
    ComStmtClose = 25,
    ComStmtReset = 26,
    ComSetOption = 27,
    ComStmtFetch = 28,
    ComDaemon = 29,
    ComBinlogDumpGtid = 30,
    ComResetConnection = 31,
    ComEnd = 32,
}

impl CommandCode {
    /// Name used in logging and transcript diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            CommandCode::ComSleep => "COM_SLEEP",
            CommandCode::ComQuit => "COM_QUIT",
            CommandCode::ComInitDb => "COM_INIT_DB",
            CommandCode::ComQuery => "COM_QUERY",
            CommandCode::ComFieldList => "COM_FIELD_LIST",
            CommandCode::ComCreateDb => "COM_CREATE_DB",
            CommandCode::ComDropDb => "COM_DROP_DB",
            CommandCode::ComRefresh => "COM_REFRESH",
            CommandCode::ComShutdown => "COM_SHUTDOWN",
            CommandCode::ComStatistics => "COM_STATISTICS",
            CommandCode::ComProcessInfo => "COM_PROCESS_INFO",
            CommandCode::ComConnect => "COM_CONNECT",
            CommandCode::ComProcessKill => "COM_PROCESS_KILL",
            CommandCode::ComDebug => "COM_DEBUG",
            CommandCode::ComPing => "COM_PING",
            CommandCode::ComTime => "COM_TIME",
            CommandCode::ComDelayedInsert => "COM_DELAYED_INSERT",
            CommandCode::ComChangeUser => "COM_CHANGE_USER",
            CommandCode::ComBinlogDump => "COM_BINLOG_DUMP",
            CommandCode::ComTableDump => "COM_TABLE_DUMP",
            CommandCode::ComConnectOut => "COM_CONNECT_OUT",
            CommandCode::ComRegisterSlave => "COM_REGISTER_SLAVE",
            CommandCode::ComStmtPrepare => "COM_STMT_PREPARE",
            CommandCode::ComStmtExecute => "COM_STMT_EXECUTE",
            CommandCode::ComStmtSendLongData => "COM_STMT_SEND_LONG_DATA",
            CommandCode::ComStmtClose => "COM_STMT_CLOSE",
            CommandCode::ComStmtReset => "COM_STMT_RESET",
            CommandCode::ComSetOption => "COM_SET_OPTION",
            CommandCode::ComStmtFetch => "COM_STMT_FETCH",
            CommandCode::ComDaemon => "COM_DAEMON",
            CommandCode::ComBinlogDumpGtid => "COM_BINLOG_DUMP_GTID",
            CommandCode::ComResetConnection => "COM_RESET_CONNECTION",
            CommandCode::ComEnd => "COM_END",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn opcode_round_trips_through_repr() {
        let code = CommandCode::ComStmtExecute as u8;
        assert_eq!(code, 0x17);
        assert_eq!(CommandCode::from_u8(code), Some(CommandCode::ComStmtExecute));
    }

    #[test]
    fn column_flags_come_from_mysql_common() {
        assert_eq!(mysql_common::constants::ColumnFlags::NOT_NULL_FLAG.bits(), 1);
    }
}
