use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::dto::{
    game::{
        ErrorPayload, GameResultsPayload, GuessResultPayload, InvitationPayload, QuestionPayload,
        StatusPayload,
    },
    validation::validate_choice,
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    /// First frame of every connection.
    Identification { token: String },
    /// Invite the partner to a game in a category.
    Invite(InviteRequest),
    /// Accept a pending invitation.
    Accept(SessionRequest),
    /// Decline a pending invitation.
    Decline(SessionRequest),
    /// Round 1 answer about oneself.
    Answer(AnswerRequest),
    /// Round 2 guess of the partner's answer.
    Guess(GuessRequest),
    /// Start receiving the session topic.
    Subscribe(SessionRequest),
    /// Stop receiving the session topic.
    Unsubscribe(SessionRequest),
    #[serde(other)]
    Unknown,
}

/// Errors raised while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
}

impl InboundMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, InboundError> {
        let message: Self = serde_json::from_str(text)?;
        match &message {
            Self::Answer(request) => request.validate()?,
            Self::Guess(request) => request.validate()?,
            _ => {}
        }
        Ok(message)
    }

    /// Token carried by an identification frame.
    pub fn identification_token(&self) -> Option<&str> {
        match self {
            Self::Identification { token } => Some(token.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    pub category_id: i64,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub session_id: Uuid,
    pub question_id: i64,
    #[validate(custom(function = "validate_choice"))]
    pub answer: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GuessRequest {
    pub session_id: Uuid,
    pub question_id: i64,
    #[validate(custom(function = "validate_choice"))]
    pub guess: String,
}

/// Logical destination of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Invitations, acknowledgements, guess results and presence updates.
    GameEvents,
    /// Per-answer acknowledgements.
    GameStatus,
    /// Failures of the user's own actions.
    Errors,
    /// Broadcast to both players of a session.
    Topic(Uuid),
}

impl Destination {
    /// Path-like address understood by clients.
    pub fn address(&self) -> String {
        match self {
            Destination::GameEvents => "/user/queue/game-events".to_owned(),
            Destination::GameStatus => "/user/queue/game-status".to_owned(),
            Destination::Errors => "/user/queue/errors".to_owned(),
            Destination::Topic(session_id) => format!("/topic/game/{session_id}"),
        }
    }
}

impl Serialize for Destination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.address())
    }
}

/// Typed payload of an outbound frame, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
    Invitation(InvitationPayload),
    Status(StatusPayload),
    Question(QuestionPayload),
    GuessResult(GuessResultPayload),
    GameResults(GameResultsPayload),
    Error(ErrorPayload),
}

/// Frame written to player sockets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundFrame {
    pub destination: Destination,
    pub payload: OutboundEvent,
}

impl OutboundFrame {
    /// Address `payload` to `destination`.
    pub fn new(destination: Destination, payload: OutboundEvent) -> Self {
        Self {
            destination,
            payload,
        }
    }
}
