//! C4: the connection phase state machine.
//!
//! Tracks where a connection is in the handshake/auth/command-loop
//! progression (§4.4) and the sequence-id discipline within one
//! command-response cycle. This module does no I/O; C5 drives it by calling
//! the `on_*` methods as messages are observed in either direction.

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    AwaitingSslOrHandshakeResp,
    TlsUpgrading,
    AwaitingHandshakeResp,
    AwaitingAuthDecision,
    AwaitingAuthSwitchResp,
    AwaitingAuthMoreData,
    AwaitingPublicKey,
    CommandLoop,
    Terminated,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Start => "Start",
            Phase::AwaitingSslOrHandshakeResp => "AwaitingSSLOrHandshakeResp",
            Phase::TlsUpgrading => "TlsUpgrading",
            Phase::AwaitingHandshakeResp => "AwaitingHandshakeResp",
            Phase::AwaitingAuthDecision => "AwaitingAuthDecision",
            Phase::AwaitingAuthSwitchResp => "AwaitingAuthSwitchResp",
            Phase::AwaitingAuthMoreData => "AwaitingAuthMoreData",
            Phase::AwaitingPublicKey => "AwaitingPublicKey",
            Phase::CommandLoop => "CommandLoop",
            Phase::Terminated => "Terminated",
        }
    }
}

/// Outcome of an `AuthMoreData` packet under `caching_sha2_password`, as
/// classified by [`crate::message::AuthMoreDataKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMoreDataOutcome {
    FastAuthSuccess,
    PerformFullAuthentication,
}

/// Drives one connection through the states of §4.4.
#[derive(Debug)]
pub struct PhaseMachine {
    phase: Phase,
    /// Sequence id expected on the *next* frame of the current
    /// command-response cycle; reset to 0 at the start of each cycle.
    expected_sequence_id: u8,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Start,
            expected_sequence_id: 0,
        }
    }

    /// Constructs a machine already in `CommandLoop`. Replay mode never
    /// observes a live handshake/auth exchange to derive the sub-states
    /// from, but still owes the command loop the same sequence-id
    /// discipline as capture mode.
    pub fn in_command_loop() -> Self {
        Self {
            phase: Phase::CommandLoop,
            expected_sequence_id: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The server wrote `HandshakeV10`. Per §4.4 `Start -> SentGreeting ->
    /// AwaitingSSLOrHandshakeResp` collapses to one step since `SentGreeting`
    /// has no other legal exit.
    pub fn on_server_greeting(&mut self) -> Result<(), ProtocolError> {
        self.expect(Phase::Start)?;
        self.phase = Phase::AwaitingSslOrHandshakeResp;
        Ok(())
    }

    pub fn on_ssl_request(&mut self) -> Result<(), ProtocolError> {
        self.expect(Phase::AwaitingSslOrHandshakeResp)?;
        self.phase = Phase::TlsUpgrading;
        Ok(())
    }

    /// The TLS handshake completed on the wrapped stream.
    pub fn on_tls_established(&mut self) -> Result<(), ProtocolError> {
        self.expect(Phase::TlsUpgrading)?;
        self.phase = Phase::AwaitingHandshakeResp;
        Ok(())
    }

    pub fn on_handshake_response(&mut self) -> Result<(), ProtocolError> {
        self.expect_one_of(&[
            Phase::AwaitingSslOrHandshakeResp,
            Phase::AwaitingHandshakeResp,
        ])?;
        self.phase = Phase::AwaitingAuthDecision;
        Ok(())
    }

    pub fn on_auth_switch_request(&mut self) -> Result<(), ProtocolError> {
        self.expect(Phase::AwaitingAuthDecision)?;
        self.phase = Phase::AwaitingAuthSwitchResp;
        Ok(())
    }

    pub fn on_auth_switch_response(&mut self) -> Result<(), ProtocolError> {
        self.expect(Phase::AwaitingAuthSwitchResp)?;
        // the server's OK/ERR resolves this state via on_auth_outcome.
        Ok(())
    }

    pub fn on_auth_more_data(
        &mut self,
        outcome: AuthMoreDataOutcome,
    ) -> Result<(), ProtocolError> {
        self.expect_one_of(&[Phase::AwaitingAuthDecision, Phase::AwaitingPublicKey])?;
        self.phase = match outcome {
            AuthMoreDataOutcome::FastAuthSuccess => Phase::AwaitingAuthDecision,
            AuthMoreDataOutcome::PerformFullAuthentication => Phase::AwaitingPublicKey,
        };
        Ok(())
    }

    pub fn on_request_public_key(&mut self) -> Result<(), ProtocolError> {
        self.expect(Phase::AwaitingPublicKey)
    }

    pub fn on_encrypted_password(&mut self) -> Result<(), ProtocolError> {
        self.expect(Phase::AwaitingPublicKey)
    }

    /// The server sent the terminal OK or ERR that resolves authentication.
    pub fn on_auth_outcome(&mut self, success: bool) -> Result<(), ProtocolError> {
        self.expect_one_of(&[
            Phase::AwaitingAuthDecision,
            Phase::AwaitingAuthSwitchResp,
            Phase::AwaitingPublicKey,
        ])?;
        self.phase = if success {
            Phase::CommandLoop
        } else {
            Phase::Terminated
        };
        self.expected_sequence_id = 0;
        Ok(())
    }

    /// A new command-response cycle starts: the client's next frame must
    /// carry sequence id 0.
    pub fn begin_cycle(&mut self) -> Result<(), ProtocolError> {
        self.expect(Phase::CommandLoop)?;
        self.expected_sequence_id = 0;
        Ok(())
    }

    /// Validates and advances the expected sequence id for one more frame
    /// observed in the current cycle (either direction).
    pub fn note_frame_sequence(&mut self, sequence_id: u8) -> Result<(), ProtocolError> {
        if sequence_id != self.expected_sequence_id {
            return Err(ProtocolError::SequenceGap {
                expected: self.expected_sequence_id,
                got: sequence_id,
            });
        }
        self.expected_sequence_id = self.expected_sequence_id.wrapping_add(1);
        Ok(())
    }

    pub fn on_quit(&mut self) {
        self.phase = Phase::Terminated;
    }

    pub fn on_connection_closed(&mut self) {
        self.phase = Phase::Terminated;
    }

    fn expect(&self, want: Phase) -> Result<(), ProtocolError> {
        if self.phase == want {
            Ok(())
        } else {
            Err(ProtocolError::IllegalInPhase {
                phase: self.phase.name(),
            })
        }
    }

    fn expect_one_of(&self, allowed: &[Phase]) -> Result<(), ProtocolError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(ProtocolError::IllegalInPhase {
                phase: self.phase.name(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_to_command_loop() {
        let mut m = PhaseMachine::new();
        m.on_server_greeting().unwrap();
        m.on_handshake_response().unwrap();
        m.on_auth_outcome(true).unwrap();
        assert_eq!(m.phase(), Phase::CommandLoop);
    }

    #[test]
    fn failed_auth_terminates() {
        let mut m = PhaseMachine::new();
        m.on_server_greeting().unwrap();
        m.on_handshake_response().unwrap();
        m.on_auth_outcome(false).unwrap();
        assert_eq!(m.phase(), Phase::Terminated);
    }

    #[test]
    fn caching_sha2_full_auth_flow_reaches_command_loop() {
        let mut m = PhaseMachine::new();
        m.on_server_greeting().unwrap();
        m.on_handshake_response().unwrap();
        m.on_auth_more_data(AuthMoreDataOutcome::PerformFullAuthentication)
            .unwrap();
        m.on_request_public_key().unwrap();
        m.on_encrypted_password().unwrap();
        m.on_auth_outcome(true).unwrap();
        assert_eq!(m.phase(), Phase::CommandLoop);
    }

    #[test]
    fn sequence_gap_is_rejected() {
        let mut m = PhaseMachine::new();
        m.on_server_greeting().unwrap();
        m.on_handshake_response().unwrap();
        m.on_auth_outcome(true).unwrap();
        m.begin_cycle().unwrap();
        m.note_frame_sequence(0).unwrap();
        let err = m.note_frame_sequence(2).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::SequenceGap {
                expected: 1,
                got: 2
            }
        ));
    }

    #[test]
    fn out_of_phase_transition_is_rejected() {
        let mut m = PhaseMachine::new();
        let err = m.on_handshake_response().unwrap_err();
        assert!(matches!(err, ProtocolError::IllegalInPhase { .. }));
    }

    #[test]
    fn quit_terminates_from_command_loop() {
        let mut m = PhaseMachine::new();
        m.on_server_greeting().unwrap();
        m.on_handshake_response().unwrap();
        m.on_auth_outcome(true).unwrap();
        m.on_quit();
        assert_eq!(m.phase(), Phase::Terminated);
    }
}
