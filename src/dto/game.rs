//! Payloads pushed to players over their private queues and session topics.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::{CategoryEntity, Choice, QUESTIONS_PER_GAME, QuestionEntity, UserEntity};

use super::now_millis;

/// Round a question belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Round {
    /// Players answer about themselves.
    Round1,
    /// Players guess their partner's answers.
    Round2,
}

/// Status codes carried by [`StatusPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    InvitationSent,
    InvitationAccepted,
    InvitationDeclined,
    AnswerRecorded,
    Round1Complete,
    PartnerLeft,
    PartnerReturned,
}

/// Invitation shown to the invitee.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationPayload {
    pub session_id: Uuid,
    pub category_id: i64,
    pub category_name: String,
    pub category_description: String,
    pub is_sensitive: bool,
    pub inviter_id: Uuid,
    pub inviter_name: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl InvitationPayload {
    /// Describe the invitation of `session_id` sent by `inviter` for `category`.
    pub fn new(session_id: Uuid, category: &CategoryEntity, inviter: &UserEntity) -> Self {
        Self {
            session_id,
            category_id: category.id,
            category_name: category.name.clone(),
            category_description: category.description.clone(),
            is_sensitive: category.sensitive,
            inviter_id: inviter.id,
            inviter_name: inviter.name.clone(),
            timestamp: now_millis(),
        }
    }
}

/// Short informational update about a session.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub session_id: Uuid,
    pub status: StatusKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl StatusPayload {
    /// Status update without a timestamp.
    pub fn new(session_id: Uuid, status: StatusKind, message: impl Into<String>) -> Self {
        Self {
            session_id,
            status,
            message: message.into(),
            timestamp: None,
        }
    }

    /// Stamp the update with the current time.
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(now_millis());
        self
    }
}

/// A question to answer (Round 1) or to guess (Round 2).
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    pub session_id: Uuid,
    pub question_id: i64,
    /// 1-based position inside the game.
    pub question_number: usize,
    pub total_questions: usize,
    pub question_text: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub round: Round,
}

impl QuestionPayload {
    /// Project `question`, found at `index` of the session's order, for the given round.
    pub fn new(
        session_id: Uuid,
        question: QuestionEntity,
        index: usize,
        total_questions: usize,
        round: Round,
    ) -> Self {
        Self {
            session_id,
            question_id: question.id,
            question_number: index + 1,
            total_questions,
            question_text: question.text,
            option_a: question.option_a,
            option_b: question.option_b,
            option_c: question.option_c,
            option_d: question.option_d,
            round,
        }
    }
}

/// Outcome of one Round 2 guess, sent to the guesser only.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuessResultPayload {
    pub session_id: Uuid,
    pub question_id: i64,
    pub question_number: usize,
    pub question_text: String,
    #[schema(value_type = String)]
    pub your_guess: Choice,
    #[schema(value_type = String)]
    pub partner_answer: Choice,
    pub correct: bool,
    /// Correct guesses of the guesser so far in this session.
    pub correct_count: u32,
}

/// Final scores published once both rounds are done.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameResultsPayload {
    pub session_id: Uuid,
    pub player1_name: String,
    pub player1_score: u32,
    pub player2_name: String,
    pub player2_score: u32,
    pub total_questions: usize,
    pub message: String,
}

impl GameResultsPayload {
    /// Results of `session_id` with the tier message derived from the combined score.
    pub fn new(
        session_id: Uuid,
        (player1_name, player1_score): (String, u32),
        (player2_name, player2_score): (String, u32),
    ) -> Self {
        Self {
            session_id,
            player1_name,
            player1_score,
            player2_name,
            player2_score,
            total_questions: QUESTIONS_PER_GAME,
            message: result_message(player1_score + player2_score).to_owned(),
        }
    }
}

/// Encouragement matching the couple's combined score.
pub fn result_message(combined_score: u32) -> &'static str {
    match combined_score {
        14.. => "Soulmates! You know each other perfectly!",
        10.. => "Great connection! You really know each other.",
        6.. => "Good start! Keep playing to learn more.",
        _ => "Lots to discover about each other!",
    }
}

/// Failure report sent to the originating user.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ErrorPayload {
    pub message: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ErrorPayload {
    /// Stamp `message` with the current time.
    pub fn new(message: String) -> Self {
        Self {
            message,
            timestamp: now_millis(),
        }
    }
}
