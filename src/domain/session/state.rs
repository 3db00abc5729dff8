//! Session State Machine
//!
//! Forward-only lifecycle shared by every session kind and direction

use super::error::SessionErrorKind;
use crate::domain::shared::DomainError;
use std::time::Instant;

/// Session State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent yet
    Idle,
    /// INVITE sent, waiting for the final response
    InviteSent,
    /// 407 received, authenticated INVITE being sent
    AuthRetry,
    /// Terminating side: 180 sent, waiting for the local user
    Ringing,
    /// Dialog confirmed, media open
    Established,
    /// Local teardown in progress
    Terminating,
    /// Ended normally
    Terminated,
    /// Ended with an error
    Error(SessionErrorKind),
    /// Ended by a local abort
    Aborted,
}

impl SessionState {
    /// Terminal states absorb every further event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Terminated | SessionState::Error(_) | SessionState::Aborted
        )
    }

    /// Still negotiating
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::InviteSent | SessionState::AuthRetry | SessionState::Ringing
        )
    }

    pub fn is_established(&self) -> bool {
        matches!(self, SessionState::Established)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::InviteSent => "InviteSent",
            SessionState::AuthRetry => "AuthRetry",
            SessionState::Ringing => "Ringing",
            SessionState::Established => "Established",
            SessionState::Terminating => "Terminating",
            SessionState::Terminated => "Terminated",
            SessionState::Error(_) => "Error",
            SessionState::Aborted => "Aborted",
        }
    }
}

/// Session State Machine Event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// INVITE (or authenticated INVITE) sent
    InviteSent,
    /// 407 challenge received
    AuthChallenge,
    /// 180 Ringing sent (terminating side)
    Ringing,
    /// 200 OK received, or ACK received for our 200 OK
    Answer,
    /// Local BYE/CANCEL about to be sent
    Terminate,
    /// Dialog over
    Terminated,
    /// Failure of the given kind
    Fail(SessionErrorKind),
    /// Local abort
    Abort,
}

/// Session timings
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub created_at: Instant,
    pub established_at: Option<Instant>,
    pub ended_at: Option<Instant>,
    /// INVITEs sent, authenticated retries included
    pub invite_count: u32,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            established_at: None,
            ended_at: None,
            invite_count: 0,
        }
    }

    /// Time from creation to establishment
    pub fn setup_duration(&self) -> Option<std::time::Duration> {
        self.established_at.map(|t| t.duration_since(self.created_at))
    }

    /// Time spent established
    pub fn session_duration(&self) -> Option<std::time::Duration> {
        match (self.established_at, self.ended_at) {
            (Some(established), Some(ended)) => Some(ended.duration_since(established)),
            _ => None,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// State Machine
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    stats: SessionStats,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            stats: SessionStats::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Process an event and transition state
    pub fn process_event(&mut self, event: SessionEvent) -> Result<SessionState, DomainError> {
        let new_state = match (self.state, event) {
            (state, _) if state.is_terminal() => {
                return Err(DomainError::InvalidStateTransition(format!(
                    "{} is terminal, {:?} ignored",
                    state.name(),
                    event
                )))
            }

            (SessionState::Idle, SessionEvent::InviteSent) => SessionState::InviteSent,
            (SessionState::Idle, SessionEvent::Ringing) => SessionState::Ringing,

            (SessionState::InviteSent, SessionEvent::AuthChallenge) => SessionState::AuthRetry,
            (SessionState::InviteSent, SessionEvent::Ringing) => SessionState::Ringing,
            (SessionState::InviteSent, SessionEvent::Answer) => SessionState::Established,

            // Authenticated INVITE goes out while still in AuthRetry
            (SessionState::AuthRetry, SessionEvent::InviteSent) => SessionState::AuthRetry,
            (SessionState::AuthRetry, SessionEvent::Ringing) => SessionState::Ringing,
            (SessionState::AuthRetry, SessionEvent::Answer) => SessionState::Established,

            (SessionState::Ringing, SessionEvent::Answer) => SessionState::Established,

            (SessionState::Established, SessionEvent::Terminate) => SessionState::Terminating,
            (SessionState::Established, SessionEvent::Terminated) => SessionState::Terminated,
            (SessionState::Terminating, SessionEvent::Terminated) => SessionState::Terminated,

            // Pending dialogs cancelled locally or by the remote
            (state, SessionEvent::Terminate) if state.is_pending() => SessionState::Terminating,
            (state, SessionEvent::Terminated) if state.is_pending() => SessionState::Terminated,

            (_, SessionEvent::Fail(kind)) => SessionState::Error(kind),
            (_, SessionEvent::Abort) => SessionState::Aborted,

            _ => {
                return Err(DomainError::InvalidStateTransition(format!(
                    "{} + {:?}",
                    self.state.name(),
                    event
                )))
            }
        };

        match event {
            SessionEvent::InviteSent => self.stats.invite_count += 1,
            SessionEvent::Answer => self.stats.established_at = Some(Instant::now()),
            _ => {}
        }
        if new_state.is_terminal() {
            self.stats.ended_at = Some(Instant::now());
        }

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_originating_transitions() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(sm.state(), SessionState::Idle);

        sm.process_event(SessionEvent::InviteSent).unwrap();
        assert_eq!(sm.state(), SessionState::InviteSent);

        sm.process_event(SessionEvent::Answer).unwrap();
        assert_eq!(sm.state(), SessionState::Established);
        assert!(sm.stats().setup_duration().is_some());

        sm.process_event(SessionEvent::Terminate).unwrap();
        assert_eq!(sm.state(), SessionState::Terminating);

        sm.process_event(SessionEvent::Terminated).unwrap();
        assert_eq!(sm.state(), SessionState::Terminated);
        assert!(sm.stats().session_duration().is_some());
    }

    #[test]
    fn test_auth_retry() {
        let mut sm = SessionStateMachine::new();
        sm.process_event(SessionEvent::InviteSent).unwrap();
        sm.process_event(SessionEvent::AuthChallenge).unwrap();
        assert_eq!(sm.state(), SessionState::AuthRetry);

        sm.process_event(SessionEvent::InviteSent).unwrap();
        sm.process_event(SessionEvent::Answer).unwrap();
        assert_eq!(sm.state(), SessionState::Established);
        assert_eq!(sm.stats().invite_count, 2);
    }

    #[test]
    fn test_second_challenge_is_invalid() {
        let mut sm = SessionStateMachine::new();
        sm.process_event(SessionEvent::InviteSent).unwrap();
        sm.process_event(SessionEvent::AuthChallenge).unwrap();
        assert!(sm.process_event(SessionEvent::AuthChallenge).is_err());
    }

    #[test]
    fn test_terminal_states_absorb() {
        let mut sm = SessionStateMachine::new();
        sm.process_event(SessionEvent::InviteSent).unwrap();
        sm.process_event(SessionEvent::Fail(SessionErrorKind::SessionInitiationDeclined))
            .unwrap();
        assert_eq!(
            sm.state(),
            SessionState::Error(SessionErrorKind::SessionInitiationDeclined)
        );

        assert!(sm.process_event(SessionEvent::Abort).is_err());
        assert!(sm.process_event(SessionEvent::Answer).is_err());
        assert!(sm.stats().ended_at.is_some());
    }

    #[test]
    fn test_terminating_side() {
        let mut sm = SessionStateMachine::new();
        sm.process_event(SessionEvent::Ringing).unwrap();
        assert!(sm.state().is_pending());

        sm.process_event(SessionEvent::Answer).unwrap();
        assert!(sm.state().is_established());
    }

    #[test]
    fn test_abort_from_any_pending_state() {
        let mut sm = SessionStateMachine::new();
        sm.process_event(SessionEvent::Abort).unwrap();
        assert_eq!(sm.state(), SessionState::Aborted);
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = SessionStateMachine::new();
        assert!(sm.process_event(SessionEvent::Answer).is_err());
        assert_eq!(sm.state(), SessionState::Idle);
    }
}
