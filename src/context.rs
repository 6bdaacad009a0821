//! C2: per-connection decoder context.
//!
//! Owned by the single task that drives one connection's decode loop; never
//! shared across connections. Centralises the state needed to disambiguate
//! otherwise-ambiguous server packets: the last client command, the
//! negotiated capabilities and plugin, and the live prepared-statement
//! table.

use hashbrown::HashMap;
use mysql_common::constants::CapabilityFlags;

use crate::constants::CommandCode;

/// What the client most recently sent, as far as the decoder needs to know
/// to classify the *next* server packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastCommand {
    /// No command yet issued; the connection is still in the handshake phase.
    Handshake,
    /// `note_reset()` was called: the next server packet stands alone (no
    /// particular shape is implied by what came before).
    Reset,
    Command(CommandCode),
}

/// A connection's negotiated greeting: capabilities and the plugin the
/// server selected (or the client is expected to use).
#[derive(Debug, Clone, Default)]
pub struct Greeting {
    pub capabilities: CapabilityFlags,
    pub plugin: Option<String>,
}

/// One live prepared statement: the shape recorded by a successful
/// `COM_STMT_PREPARE` response, consulted to decode subsequent
/// `COM_STMT_EXECUTE` packets and their binary result sets.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub statement_id: u32,
    pub num_params: u16,
    pub num_columns: u16,
    pub params: Vec<mysql_common::packets::Column>,
    pub columns: Vec<mysql_common::packets::Column>,
}

/// Per-connection decoder state. Single-threaded: exactly one decode task
/// mutates a given instance.
#[derive(Debug, Default)]
pub struct DecoderContext {
    last_command: Option<LastCommand>,
    greeting: Greeting,
    tls_upgrade_in_progress: bool,
    prepared: HashMap<u32, PreparedStatement>,
}

impl DecoderContext {
    pub fn new() -> Self {
        Self {
            last_command: Some(LastCommand::Handshake),
            ..Default::default()
        }
    }

    pub fn set_after_greeting(&mut self, capabilities: CapabilityFlags, plugin: Option<String>) {
        self.greeting = Greeting {
            capabilities,
            plugin,
        };
    }

    pub fn note_command(&mut self, opcode: CommandCode) {
        self.last_command = Some(LastCommand::Command(opcode));
    }

    pub fn note_reset(&mut self) {
        self.last_command = Some(LastCommand::Reset);
    }

    pub fn last_command(&self) -> LastCommand {
        self.last_command.unwrap_or(LastCommand::Handshake)
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.greeting.capabilities
    }

    pub fn plugin(&self) -> Option<&str> {
        self.greeting.plugin.as_deref()
    }

    pub fn set_tls_upgrade_in_progress(&mut self, in_progress: bool) {
        self.tls_upgrade_in_progress = in_progress;
    }

    pub fn tls_upgrade_in_progress(&self) -> bool {
        self.tls_upgrade_in_progress
    }

    pub fn insert_prepared(&mut self, stmt: PreparedStatement) {
        self.prepared.insert(stmt.statement_id, stmt);
    }

    pub fn lookup_prepared(&self, statement_id: u32) -> Option<&PreparedStatement> {
        self.prepared.get(&statement_id)
    }

    pub fn remove_prepared(&mut self, statement_id: u32) -> Option<PreparedStatement> {
        self.prepared.remove(&statement_id)
    }

    pub fn prepared_statement_count(&self) -> usize {
        self.prepared.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_starts_in_handshake() {
        let ctx = DecoderContext::new();
        assert_eq!(ctx.last_command(), LastCommand::Handshake);
    }

    #[test]
    fn note_command_and_reset_update_last_command() {
        let mut ctx = DecoderContext::new();
        ctx.note_command(CommandCode::ComQuery);
        assert_eq!(ctx.last_command(), LastCommand::Command(CommandCode::ComQuery));
        ctx.note_reset();
        assert_eq!(ctx.last_command(), LastCommand::Reset);
    }

    #[test]
    fn prepared_statement_lifecycle_respects_connection_scope() {
        let mut ctx = DecoderContext::new();
        ctx.insert_prepared(PreparedStatement {
            statement_id: 1,
            num_params: 1,
            num_columns: 3,
            params: vec![],
            columns: vec![],
        });
        assert!(ctx.lookup_prepared(1).is_some());
        assert_eq!(ctx.prepared_statement_count(), 1);
        ctx.remove_prepared(1);
        assert!(ctx.lookup_prepared(1).is_none());
        assert_eq!(ctx.prepared_statement_count(), 0);
    }
}
