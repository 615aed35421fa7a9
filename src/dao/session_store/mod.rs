pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{AnswerEntity, Choice, GameSessionEntity},
    storage::StorageResult,
};

pub use memory::MemorySessionStore;

/// Outcome of inserting a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The session row was created.
    Inserted,
    /// The couple already owns a running session; nothing was written.
    CoupleBusy,
}

/// Abstraction over the persistence layer for game sessions and their answer records.
///
/// Writes are guarded by uniqueness constraints (one running session per couple, one
/// answer per session/question/user) and by a per-session version used for
/// compare-and-swap updates.
pub trait SessionStore: Send + Sync {
    /// Insert a fresh session unless its couple already owns a running one.
    fn insert_session(
        &self,
        session: GameSessionEntity,
    ) -> BoxFuture<'static, StorageResult<InsertOutcome>>;
    /// Point lookup by id.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>>;
    /// Replace the stored session if its version still equals `expected_version`.
    ///
    /// The stored row receives `expected_version + 1`. Returns `false` when another writer won.
    fn replace_session(
        &self,
        session: GameSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Sessions of the couple whose status is still running.
    fn find_active_sessions(
        &self,
        couple_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>>;
    /// Every session of the couple, whatever its status.
    fn find_couple_sessions(
        &self,
        couple_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>>;
    /// Running sessions whose deadline is at or before `now`.
    fn find_expirable(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>>;
    /// Insert a Round 1 answer; `false` if the (session, question, user) key already exists.
    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<bool>>;
    /// Point lookup of an answer record.
    fn find_answer(
        &self,
        session_id: Uuid,
        question_id: i64,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>>;
    /// Set the Round 2 guess on an existing record that has none yet.
    ///
    /// Returns `false` when the record is missing or already carries a guess.
    fn record_guess(
        &self,
        session_id: Uuid,
        question_id: i64,
        user_id: Uuid,
        guess: Choice,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Number of answer records for a question of a session.
    fn count_answers(&self, session_id: Uuid, question_id: i64)
    -> BoxFuture<'static, StorageResult<u64>>;
    /// Number of answer records carrying a guess for a question of a session.
    fn count_guesses(&self, session_id: Uuid, question_id: i64)
    -> BoxFuture<'static, StorageResult<u64>>;
    /// Every answer record of a session.
    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    /// Cheap connectivity probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
