use std::{collections::HashMap, sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{InsertOutcome, SessionStore};
use crate::dao::{
    models::{AnswerEntity, Choice, GameSessionEntity},
    storage::StorageResult,
};

type AnswerKey = (Uuid, i64, Uuid);

/// Process-local session store.
///
/// Sessions and the couple index live behind a single lock so the
/// one-running-session-per-couple check and the insert happen atomically.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: Mutex<SessionTable>,
    answers: DashMap<AnswerKey, AnswerEntity>,
}

#[derive(Default)]
struct SessionTable {
    rows: HashMap<Uuid, GameSessionEntity>,
    active_by_couple: HashMap<Uuid, Uuid>,
}

impl SessionTable {
    fn insert(&mut self, session: GameSessionEntity) -> InsertOutcome {
        if session.status.is_active() {
            if self.active_by_couple.contains_key(&session.couple_id) {
                return InsertOutcome::CoupleBusy;
            }
            self.active_by_couple.insert(session.couple_id, session.id);
        }
        self.rows.insert(session.id, session);
        InsertOutcome::Inserted
    }

    fn replace(&mut self, mut session: GameSessionEntity, expected_version: u64) -> bool {
        let Some(current) = self.rows.get_mut(&session.id) else {
            return false;
        };
        if current.version != expected_version {
            return false;
        }

        session.version = expected_version + 1;
        if session.status.is_terminal()
            && self.active_by_couple.get(&session.couple_id) == Some(&session.id)
        {
            self.active_by_couple.remove(&session.couple_id);
        }
        *current = session;
        true
    }

    fn filtered<F>(&self, predicate: F) -> Vec<GameSessionEntity>
    where
        F: Fn(&GameSessionEntity) -> bool,
    {
        self.rows
            .values()
            .filter(|session| predicate(session))
            .cloned()
            .collect()
    }
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn count_where<F>(&self, session_id: Uuid, question_id: i64, predicate: F) -> u64
    where
        F: Fn(&AnswerEntity) -> bool,
    {
        self.inner
            .answers
            .iter()
            .filter(|entry| {
                let answer = entry.value();
                answer.session_id == session_id
                    && answer.question_id == question_id
                    && predicate(answer)
            })
            .count() as u64
    }
}

impl SessionStore for MemorySessionStore {
    fn insert_session(
        &self,
        session: GameSessionEntity,
    ) -> BoxFuture<'static, StorageResult<InsertOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            let mut table = store.inner.sessions.lock().await;
            Ok(table.insert(session))
        })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let table = store.inner.sessions.lock().await;
            Ok(table.rows.get(&id).cloned())
        })
    }

    fn replace_session(
        &self,
        session: GameSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let mut table = store.inner.sessions.lock().await;
            Ok(table.replace(session, expected_version))
        })
    }

    fn find_active_sessions(
        &self,
        couple_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let table = store.inner.sessions.lock().await;
            Ok(table.filtered(|s| s.couple_id == couple_id && s.status.is_active()))
        })
    }

    fn find_couple_sessions(
        &self,
        couple_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let table = store.inner.sessions.lock().await;
            Ok(table.filtered(|s| s.couple_id == couple_id))
        })
    }

    fn find_expirable(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let table = store.inner.sessions.lock().await;
            Ok(table.filtered(|s| s.status.is_active() && s.expires_at <= now))
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let key = (answer.session_id, answer.question_id, answer.user_id);
            match store.inner.answers.entry(key) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(answer);
                    Ok(true)
                }
            }
        })
    }

    fn find_answer(
        &self,
        session_id: Uuid,
        question_id: i64,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .answers
                .get(&(session_id, question_id, user_id))
                .map(|entry| entry.value().clone()))
        })
    }

    fn record_guess(
        &self,
        session_id: Uuid,
        question_id: i64,
        user_id: Uuid,
        guess: Choice,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let Some(mut answer) = store
                .inner
                .answers
                .get_mut(&(session_id, question_id, user_id))
            else {
                return Ok(false);
            };
            if answer.round2_guess.is_some() {
                return Ok(false);
            }
            answer.round2_guess = Some(guess);
            Ok(true)
        })
    }

    fn count_answers(
        &self,
        session_id: Uuid,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.count_where(session_id, question_id, |_| true)) })
    }

    fn count_guesses(
        &self,
        session_id: Uuid,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.count_where(session_id, question_id, |answer| {
                answer.round2_guess.is_some()
            }))
        })
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut answers: Vec<AnswerEntity> = store
                .inner
                .answers
                .iter()
                .filter(|entry| entry.value().session_id == session_id)
                .map(|entry| entry.value().clone())
                .collect();
            answers.sort_by_key(|answer| answer.question_id);
            Ok(answers)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::state_machine::SessionStatus;

    fn session(couple_id: Uuid, status: SessionStatus) -> GameSessionEntity {
        let now = SystemTime::now();
        GameSessionEntity {
            id: Uuid::new_v4(),
            couple_id,
            player1_id: Uuid::new_v4(),
            player2_id: Uuid::new_v4(),
            status,
            category_id: 1,
            question_order: Vec::new(),
            current_question_index: 0,
            player1_score: None,
            player2_score: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: now + Duration::from_secs(3600),
            last_activity_at: now,
            version: 0,
        }
    }

    #[tokio::test]
    async fn second_running_session_for_couple_is_rejected() {
        let store = MemorySessionStore::new();
        let couple = Uuid::new_v4();

        let first = session(couple, SessionStatus::Invited);
        assert_eq!(
            store.insert_session(first.clone()).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store
                .insert_session(session(couple, SessionStatus::Invited))
                .await
                .unwrap(),
            InsertOutcome::CoupleBusy
        );

        let mut declined = first.clone();
        declined.status = SessionStatus::Declined;
        assert!(store.replace_session(declined, 0).await.unwrap());

        assert_eq!(
            store
                .insert_session(session(couple, SessionStatus::Invited))
                .await
                .unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn replace_is_compare_and_swap_on_version() {
        let store = MemorySessionStore::new();
        let original = session(Uuid::new_v4(), SessionStatus::Round1);
        store.insert_session(original.clone()).await.unwrap();

        let mut advanced = original.clone();
        advanced.current_question_index = 1;
        assert!(store.replace_session(advanced.clone(), 0).await.unwrap());
        assert!(!store.replace_session(advanced, 0).await.unwrap());

        let stored = store.find_session(original.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.current_question_index, 1);
    }

    #[tokio::test]
    async fn answers_are_unique_and_guess_is_set_once() {
        let store = MemorySessionStore::new();
        let session_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        let answer = AnswerEntity {
            session_id,
            question_id: 7,
            user_id: user,
            round1_answer: Choice::B,
            round2_guess: None,
        };

        assert!(store.insert_answer(answer.clone()).await.unwrap());
        assert!(!store.insert_answer(answer).await.unwrap());
        assert_eq!(store.count_answers(session_id, 7).await.unwrap(), 1);

        assert!(!store.record_guess(session_id, 8, user, Choice::A).await.unwrap());
        assert!(store.record_guess(session_id, 7, user, Choice::A).await.unwrap());
        assert!(!store.record_guess(session_id, 7, user, Choice::C).await.unwrap());

        let stored = store.find_answer(session_id, 7, user).await.unwrap().unwrap();
        assert_eq!(stored.round2_guess, Some(Choice::A));
        assert_eq!(store.count_guesses(session_id, 7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expirable_only_lists_running_sessions_past_deadline() {
        let store = MemorySessionStore::new();
        let now = SystemTime::now();

        let mut stale = session(Uuid::new_v4(), SessionStatus::Round1);
        stale.expires_at = now - Duration::from_secs(1);
        let mut finished = session(Uuid::new_v4(), SessionStatus::Completed);
        finished.expires_at = now - Duration::from_secs(1);
        let fresh = session(Uuid::new_v4(), SessionStatus::Invited);

        for s in [stale.clone(), finished, fresh] {
            store.insert_session(s).await.unwrap();
        }

        let expirable = store.find_expirable(now).await.unwrap();
        assert_eq!(expirable.len(), 1);
        assert_eq!(expirable[0].id, stale.id);
    }
}
