use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::GameSessionEntity;

/// Lifecycle status of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Waiting for the partner to accept or decline.
    Invited,
    /// Both players answer questions about themselves.
    Round1,
    /// Both players guess each other's answers.
    Round2,
    /// Scores computed, session closed.
    Completed,
    /// Partner refused the invitation.
    Declined,
    /// Nobody finished the session before its deadline.
    Expired,
}

impl SessionStatus {
    /// Statuses that still count as the couple's running session.
    pub const ACTIVE: [SessionStatus; 3] = [
        SessionStatus::Invited,
        SessionStatus::Round1,
        SessionStatus::Round2,
    ];

    /// Statuses reached only once the invitation has been accepted.
    pub const ACCEPTED: [SessionStatus; 4] = [
        SessionStatus::Round1,
        SessionStatus::Round2,
        SessionStatus::Completed,
        SessionStatus::Expired,
    ];

    /// No further transition is possible.
    pub fn is_terminal(self) -> bool {
        match self {
            SessionStatus::Invited | SessionStatus::Round1 | SessionStatus::Round2 => false,
            SessionStatus::Completed | SessionStatus::Declined | SessionStatus::Expired => true,
        }
    }

    /// Whether the session is still playable (inverse of [`Self::is_terminal`]).
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the invitation was accepted at some point.
    pub fn was_accepted(self) -> bool {
        Self::ACCEPTED.contains(&self)
    }

    /// Upper-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Invited => "INVITED",
            SessionStatus::Round1 => "ROUND1",
            SessionStatus::Round2 => "ROUND2",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Declined => "DECLINED",
            SessionStatus::Expired => "EXPIRED",
        }
    }
}

/// Events that can be applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Partner accepts the invitation; questions are drawn.
    Accept,
    /// Partner declines the invitation.
    Decline,
    /// Both players responded to the current question and another one follows.
    NextQuestion,
    /// Both players answered the last Round 1 question.
    FinishRound1,
    /// Both players guessed the last Round 2 question.
    FinishRound2,
    /// The deadline passed while the session was still running.
    Expire,
}

/// Error returned when an event does not apply to the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Status the session was in when the event was received.
    pub from: SessionStatus,
    /// Rejected event.
    pub event: SessionEvent,
}

/// Errors raised when applying a plan to a session that moved on since planning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The plan was computed for another session.
    #[error("plan targets session {expected}, got {actual}")]
    SessionMismatch {
        /// Session the plan was computed for.
        expected: Uuid,
        /// Session handed to `apply`.
        actual: Uuid,
    },
    /// Status changed since the plan was created.
    #[error("status changed (expected {expected:?}, got {actual:?})")]
    PhaseMismatch {
        /// Status when the plan was created.
        expected: SessionStatus,
        /// Current status.
        actual: SessionStatus,
    },
    /// Version changed since the plan was created.
    #[error("version changed (expected {expected}, got {actual})")]
    VersionMismatch {
        /// Version the plan expects to produce.
        expected: u64,
        /// Version the session would reach.
        actual: u64,
    },
}

/// A validated transition that has not been committed to storage yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Session the plan applies to.
    pub session_id: Uuid,
    /// Status the session is currently in.
    pub from: SessionStatus,
    /// Status the session will move to.
    pub to: SessionStatus,
    /// Event that triggered this transition.
    pub event: SessionEvent,
    /// Version of the session after the transition.
    pub version_next: u64,
}

impl Plan {
    /// Version the store must still hold for the plan to commit.
    pub fn expected_version(&self) -> u64 {
        self.version_next - 1
    }

    /// Move `session` to the planned status, bumping its version.
    pub fn apply(&self, session: &mut GameSessionEntity) -> Result<(), ApplyError> {
        if session.id != self.session_id {
            return Err(ApplyError::SessionMismatch {
                expected: self.session_id,
                actual: session.id,
            });
        }

        if session.status != self.from {
            return Err(ApplyError::PhaseMismatch {
                expected: self.from,
                actual: session.status,
            });
        }

        if session.version + 1 != self.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: self.version_next,
                actual: session.version + 1,
            });
        }

        session.status = self.to;
        session.version = self.version_next;
        Ok(())
    }
}

/// Plan a transition by validating that `event` applies to the session's current status.
pub fn plan(session: &GameSessionEntity, event: SessionEvent) -> Result<Plan, InvalidTransition> {
    let to = compute_transition(session.status, event)?;
    Ok(Plan {
        session_id: session.id,
        from: session.status,
        to,
        event,
        version_next: session.version + 1,
    })
}

/// Compute the status reached from `from` when `event` is applied.
pub fn compute_transition(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<SessionStatus, InvalidTransition> {
    let next = match (from, event) {
        (SessionStatus::Invited, SessionEvent::Accept) => SessionStatus::Round1,
        (SessionStatus::Invited, SessionEvent::Decline) => SessionStatus::Declined,
        (SessionStatus::Round1, SessionEvent::NextQuestion) => SessionStatus::Round1,
        (SessionStatus::Round1, SessionEvent::FinishRound1) => SessionStatus::Round2,
        (SessionStatus::Round2, SessionEvent::NextQuestion) => SessionStatus::Round2,
        (SessionStatus::Round2, SessionEvent::FinishRound2) => SessionStatus::Completed,
        (
            SessionStatus::Invited | SessionStatus::Round1 | SessionStatus::Round2,
            SessionEvent::Expire,
        ) => SessionStatus::Expired,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}
