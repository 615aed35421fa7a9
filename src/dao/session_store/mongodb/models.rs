use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::{
    dao::models::{AnswerEntity, Choice, GameSessionEntity},
    state::state_machine::SessionStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    couple_id: String,
    /// Mirrors `couple_id` while the session is running; a sparse unique index on it
    /// enforces one running session per couple.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_couple_id: Option<String>,
    player1_id: String,
    player2_id: String,
    status: SessionStatus,
    category_id: i64,
    question_order: Vec<i64>,
    current_question_index: i64,
    player1_score: Option<i32>,
    player2_score: Option<i32>,
    created_at: DateTime,
    started_at: Option<DateTime>,
    completed_at: Option<DateTime>,
    expires_at: DateTime,
    last_activity_at: DateTime,
    version: i64,
}

impl From<GameSessionEntity> for MongoSessionDocument {
    fn from(value: GameSessionEntity) -> Self {
        let active_couple_id = value
            .status
            .is_active()
            .then(|| value.couple_id.to_string());
        Self {
            id: value.id.to_string(),
            couple_id: value.couple_id.to_string(),
            active_couple_id,
            player1_id: value.player1_id.to_string(),
            player2_id: value.player2_id.to_string(),
            status: value.status,
            category_id: value.category_id,
            question_order: value.question_order,
            current_question_index: value.current_question_index as i64,
            player1_score: value.player1_score.map(|score| score as i32),
            player2_score: value.player2_score.map(|score| score as i32),
            created_at: DateTime::from_system_time(value.created_at),
            started_at: value.started_at.map(DateTime::from_system_time),
            completed_at: value.completed_at.map(DateTime::from_system_time),
            expires_at: DateTime::from_system_time(value.expires_at),
            last_activity_at: DateTime::from_system_time(value.last_activity_at),
            version: value.version as i64,
        }
    }
}

impl TryFrom<MongoSessionDocument> for GameSessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let id = parse_uuid(&value.id, &value.id)?;
        Ok(Self {
            id,
            couple_id: parse_uuid(&value.id, &value.couple_id)?,
            player1_id: parse_uuid(&value.id, &value.player1_id)?,
            player2_id: parse_uuid(&value.id, &value.player2_id)?,
            status: value.status,
            category_id: value.category_id,
            question_order: value.question_order,
            current_question_index: value.current_question_index.max(0) as usize,
            player1_score: value.player1_score.map(|score| score.max(0) as u32),
            player2_score: value.player2_score.map(|score| score.max(0) as u32),
            created_at: value.created_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            completed_at: value.completed_at.map(DateTime::to_system_time),
            expires_at: value.expires_at.to_system_time(),
            last_activity_at: value.last_activity_at.to_system_time(),
            version: value.version.max(0) as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    session_id: String,
    question_id: i64,
    user_id: String,
    round1_answer: Choice,
    round2_guess: Option<Choice>,
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            session_id: value.session_id.to_string(),
            question_id: value.question_id,
            user_id: value.user_id.to_string(),
            round1_answer: value.round1_answer,
            round2_guess: value.round2_guess,
        }
    }
}

impl TryFrom<MongoAnswerDocument> for AnswerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAnswerDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            session_id: parse_uuid(&value.session_id, &value.session_id)?,
            question_id: value.question_id,
            user_id: parse_uuid(&value.session_id, &value.user_id)?,
            round1_answer: value.round1_answer,
            round2_guess: value.round2_guess,
        })
    }
}

fn parse_uuid(document_id: &str, raw: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(raw).map_err(|err| MongoDaoError::CorruptDocument {
        id: document_id.to_owned(),
        reason: err.to_string(),
    })
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

pub fn answer_key(session_id: Uuid, question_id: i64, user_id: Uuid) -> Document {
    doc! {
        "session_id": session_id.to_string(),
        "question_id": question_id,
        "user_id": user_id.to_string(),
    }
}

pub fn status_names(statuses: &[SessionStatus]) -> Vec<&'static str> {
    statuses.iter().map(|status| status.as_str()).collect()
}
