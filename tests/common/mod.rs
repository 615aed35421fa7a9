#![allow(dead_code)]

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use axum::extract::ws::Message;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use couple_quiz_back::{
    config::AppConfig,
    dao::{
        catalog::{StaticCatalog, demo},
        models::{AnswerEntity, Choice, GameSessionEntity},
        session_store::{InsertOutcome, MemorySessionStore, SessionStore},
        storage::{StorageError, StorageResult},
    },
    services::{game_service, notification::LogNotifier},
    state::{AppState, SharedState, state_machine::SessionStatus},
};

/// State over the demo catalog with an in-memory store installed.
pub async fn test_state() -> SharedState {
    test_state_with(AppConfig::default()).await
}

pub async fn test_state_with(config: AppConfig) -> SharedState {
    let catalog = Arc::new(StaticCatalog::load(None));
    let state = AppState::new(config, catalog.clone(), catalog, Arc::new(LogNotifier));
    state
        .install_session_store(Arc::new(MemorySessionStore::new()))
        .await;
    state
}

/// In-memory store whose next session write can be made to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: MemorySessionStore,
    fail_next_replace: AtomicBool,
}

impl FailingStore {
    /// Make the next `replace_session` call fail with a storage error.
    pub fn fail_next_replace(&self) {
        self.fail_next_replace.store(true, Ordering::SeqCst);
    }
}

impl SessionStore for FailingStore {
    fn insert_session(
        &self,
        session: GameSessionEntity,
    ) -> BoxFuture<'static, StorageResult<InsertOutcome>> {
        self.inner.insert_session(session)
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>> {
        self.inner.find_session(id)
    }

    fn replace_session(
        &self,
        session: GameSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        if self.fail_next_replace.swap(false, Ordering::SeqCst) {
            return Box::pin(async {
                Err(StorageError::unavailable(
                    "write rejected".into(),
                    io::Error::other("connection reset"),
                ))
            });
        }
        self.inner.replace_session(session, expected_version)
    }

    fn find_active_sessions(
        &self,
        couple_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>> {
        self.inner.find_active_sessions(couple_id)
    }

    fn find_couple_sessions(
        &self,
        couple_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>> {
        self.inner.find_couple_sessions(couple_id)
    }

    fn find_expirable(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>> {
        self.inner.find_expirable(now)
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<bool>> {
        self.inner.insert_answer(answer)
    }

    fn find_answer(
        &self,
        session_id: Uuid,
        question_id: i64,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>> {
        self.inner.find_answer(session_id, question_id, user_id)
    }

    fn record_guess(
        &self,
        session_id: Uuid,
        question_id: i64,
        user_id: Uuid,
        guess: Choice,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.inner.record_guess(session_id, question_id, user_id, guess)
    }

    fn count_answers(&self, session_id: Uuid, question_id: i64) -> BoxFuture<'static, StorageResult<u64>> {
        self.inner.count_answers(session_id, question_id)
    }

    fn count_guesses(&self, session_id: Uuid, question_id: i64) -> BoxFuture<'static, StorageResult<u64>> {
        self.inner.count_guesses(session_id, question_id)
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        self.inner.list_answers(session_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

/// State like [`test_state`] but backed by a [`FailingStore`].
pub async fn failing_state() -> (SharedState, Arc<FailingStore>) {
    let state = test_state().await;
    let store = Arc::new(FailingStore::default());
    state.install_session_store(store.clone()).await;
    (state, store)
}

pub async fn store(state: &SharedState) -> Arc<dyn SessionStore> {
    state.require_session_store().await.unwrap()
}

pub async fn session(state: &SharedState, session_id: Uuid) -> GameSessionEntity {
    store(state).await.find_session(session_id).await.unwrap().unwrap()
}

/// Alex invites, Sam accepts; returns the session id and the drawn question order.
pub async fn start_game(state: &SharedState) -> (Uuid, Vec<i64>) {
    let invitation = game_service::create_invitation(state, demo::ALEX, demo::CATEGORY)
        .await
        .unwrap();
    let started = game_service::accept_invitation(state, invitation.payload.session_id, demo::SAM)
        .await
        .unwrap();
    (started.session.id, started.session.question_order)
}

/// Both players answer every question of Round 1.
pub async fn play_round1(state: &SharedState, session_id: Uuid, order: &[i64], alex: &[&str], sam: &[&str]) {
    for (index, question_id) in order.iter().enumerate() {
        game_service::submit_answer(state, session_id, demo::ALEX, *question_id, alex[index])
            .await
            .unwrap();
        game_service::submit_answer(state, session_id, demo::SAM, *question_id, sam[index])
            .await
            .unwrap();
    }
}

/// Both players guess every question of Round 2, advancing as the router does.
pub async fn play_round2(state: &SharedState, session_id: Uuid, order: &[i64], alex: &[&str], sam: &[&str]) {
    for (index, question_id) in order.iter().enumerate() {
        game_service::submit_guess(state, session_id, demo::ALEX, *question_id, alex[index])
            .await
            .unwrap();
        game_service::submit_guess(state, session_id, demo::SAM, *question_id, sam[index])
            .await
            .unwrap();
        assert!(
            game_service::are_both_players_guessed(state, session_id, *question_id)
                .await
                .unwrap()
        );
        game_service::get_next_round2_question(state, session_id, *question_id)
            .await
            .unwrap();
    }
}

/// Completed session of the demo couple with fixed scores (Alex first).
pub fn completed_session(scores: (u32, u32), completed_at: SystemTime) -> GameSessionEntity {
    GameSessionEntity {
        id: Uuid::new_v4(),
        couple_id: demo::COUPLE,
        player1_id: demo::ALEX,
        player2_id: demo::SAM,
        status: SessionStatus::Completed,
        category_id: demo::CATEGORY,
        question_order: (101..109).collect(),
        current_question_index: 7,
        player1_score: Some(scores.0),
        player2_score: Some(scores.1),
        created_at: completed_at - Duration::from_secs(900),
        started_at: Some(completed_at - Duration::from_secs(840)),
        completed_at: Some(completed_at),
        expires_at: completed_at + Duration::from_secs(3600),
        last_activity_at: completed_at,
        version: 20,
    }
}

/// Register a fake connection for `user_id` and return its receiving end.
pub fn connect(state: &SharedState, user_id: Uuid) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.channels().register(user_id, Uuid::new_v4(), tx);
    rx
}

/// Every text frame queued on a fake connection, parsed as JSON.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            frames.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    frames
}
