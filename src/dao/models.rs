use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::state_machine::SessionStatus;

/// Number of questions drawn for every game.
pub const QUESTIONS_PER_GAME: usize = 8;

/// One of the four labelled options of a question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Choice {
    /// First option.
    A,
    /// Second option.
    B,
    /// Third option.
    C,
    /// Fourth option.
    D,
}

impl Choice {
    /// Parse a single upper-case option letter.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "A" => Some(Choice::A),
            "B" => Some(Choice::B),
            "C" => Some(Choice::C),
            "D" => Some(Choice::D),
            _ => None,
        }
    }

    /// Letter used on the wire and in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Choice::A => "A",
            Choice::B => "B",
            Choice::C => "C",
            Choice::D => "D",
        }
    }
}

/// Persisted game session shared by the two members of a couple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSessionEntity {
    /// Stable identifier for the session.
    pub id: Uuid,
    /// Couple owning the session.
    pub couple_id: Uuid,
    /// First member of the couple (scores are reported in this order).
    pub player1_id: Uuid,
    /// Second member of the couple.
    pub player2_id: Uuid,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Category the questions are drawn from.
    pub category_id: i64,
    /// Question ids chosen at acceptance, empty while invited.
    pub question_order: Vec<i64>,
    /// Cursor into `question_order`.
    pub current_question_index: usize,
    /// Correct guesses of player 1, set on completion.
    pub player1_score: Option<u32>,
    /// Correct guesses of player 2, set on completion.
    pub player2_score: Option<u32>,
    /// Invitation time.
    pub created_at: SystemTime,
    /// Acceptance time.
    pub started_at: Option<SystemTime>,
    /// Decline, completion or expiry time.
    pub completed_at: Option<SystemTime>,
    /// Deadline after which an unfinished session expires.
    pub expires_at: SystemTime,
    /// Last mutating operation.
    pub last_activity_at: SystemTime,
    /// Optimistic concurrency counter, bumped on every write.
    pub version: u64,
}

impl GameSessionEntity {
    /// Whether `user_id` is one of the two participants.
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.player1_id == user_id || self.player2_id == user_id
    }

    /// The other participant, if `user_id` takes part in the session.
    pub fn partner_of(&self, user_id: Uuid) -> Option<Uuid> {
        if self.player1_id == user_id {
            Some(self.player2_id)
        } else if self.player2_id == user_id {
            Some(self.player1_id)
        } else {
            None
        }
    }

    /// Position of a question inside the drawn order.
    pub fn position_of(&self, question_id: i64) -> Option<usize> {
        self.question_order.iter().position(|id| *id == question_id)
    }

    /// Current index clamped into the bounds of the question order.
    pub fn safe_question_index(&self) -> usize {
        match self.question_order.len() {
            0 => 0,
            len => self.current_question_index.min(len - 1),
        }
    }

    /// Score of `user_id` and of their partner, zero when unset.
    pub fn scores_for(&self, user_id: Uuid) -> (u32, u32) {
        let p1 = self.player1_score.unwrap_or(0);
        let p2 = self.player2_score.unwrap_or(0);
        if self.player1_id == user_id {
            (p1, p2)
        } else {
            (p2, p1)
        }
    }

    /// Completion time, falling back to start then creation time.
    pub fn reference_time(&self) -> SystemTime {
        self.completed_at
            .or(self.started_at)
            .unwrap_or(self.created_at)
    }
}

/// One participant's response to one question of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntity {
    /// Owning session.
    pub session_id: Uuid,
    /// Answered question.
    pub question_id: i64,
    /// Responding participant.
    pub user_id: Uuid,
    /// Answer about themselves.
    pub round1_answer: Choice,
    /// Guess of the partner's answer.
    pub round2_guess: Option<Choice>,
}

/// Registered player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Display name shown to the partner.
    pub name: String,
    /// Bearer credential accepted on connection.
    #[serde(default)]
    pub token: Option<String>,
    /// Expo push tokens registered by the user's devices.
    #[serde(default)]
    pub push_tokens: Vec<String>,
}

/// Permanent pairing of two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoupleEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// First member.
    pub user1_id: Uuid,
    /// Second member.
    pub user2_id: Uuid,
}

impl CoupleEntity {
    /// Whether `user_id` belongs to the couple.
    pub fn contains(&self, user_id: Uuid) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The other member of the couple.
    pub fn partner_of(&self, user_id: Uuid) -> Uuid {
        if self.user1_id == user_id {
            self.user2_id
        } else {
            self.user1_id
        }
    }
}

/// Question category metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntity {
    /// Stable identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Whether the category holds intimate questions.
    #[serde(default)]
    pub sensitive: bool,
}

/// Read-only question with four labelled options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionEntity {
    /// Stable identifier.
    pub id: i64,
    /// Owning category.
    pub category_id: i64,
    /// Question text.
    pub text: String,
    /// Option `A`.
    pub option_a: String,
    /// Option `B`.
    pub option_b: String,
    /// Option `C`.
    pub option_c: String,
    /// Option `D`.
    pub option_d: String,
}
