use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, doc},
    options::IndexOptions,
};
use tokio::{sync::RwLock, time::sleep};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{MongoAnswerDocument, MongoSessionDocument, answer_key, doc_id, status_names},
};
use crate::{
    dao::{
        models::{AnswerEntity, Choice, GameSessionEntity},
        session_store::{InsertOutcome, SessionStore},
        storage::StorageResult,
    },
    state::state_machine::SessionStatus,
};

const SESSION_COLLECTION_NAME: &str = "game_sessions";
const ANSWER_COLLECTION_NAME: &str = "game_answers";

/// MongoDB-backed [`SessionStore`].
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

/// Build a client and wait, backing off per [`MongoConfig::retry`], until the server answers a ping.
async fn open_database(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut delays = config.retry.delays();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let Err(source) = database.run_command(doc! { "ping": 1 }).await else {
            return Ok((client, database));
        };
        let Some(delay) = delays.next() else {
            return Err(MongoDaoError::InitialPing { attempts, source });
        };
        debug!(attempts, error = %source, ?delay, "MongoDB ping failed; retrying");
        sleep(delay).await;
    }
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = open_database(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = open_database(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        info!("MongoDB session store ready");
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let sessions = self.sessions().await;
        let indexes = [
            (
                IndexModel::builder()
                    .keys(doc! {"active_couple_id": 1})
                    .options(
                        IndexOptions::builder()
                            .name(Some("active_couple_unique".to_owned()))
                            .unique(Some(true))
                            .sparse(Some(true))
                            .build(),
                    )
                    .build(),
                "active_couple_id",
            ),
            (
                IndexModel::builder()
                    .keys(doc! {"couple_id": 1, "status": 1})
                    .options(
                        IndexOptions::builder()
                            .name(Some("couple_status_idx".to_owned()))
                            .build(),
                    )
                    .build(),
                "couple_id,status",
            ),
            (
                IndexModel::builder()
                    .keys(doc! {"status": 1, "expires_at": 1})
                    .options(
                        IndexOptions::builder()
                            .name(Some("status_expiry_idx".to_owned()))
                            .build(),
                    )
                    .build(),
                "status,expires_at",
            ),
        ];

        for (model, index) in indexes {
            sessions
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: SESSION_COLLECTION_NAME,
                    index,
                    source,
                })?;
        }

        let answers = self.answers().await;
        let answer_index = IndexModel::builder()
            .keys(doc! {"session_id": 1, "question_id": 1, "user_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("answer_key_unique".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        answers
            .create_index(answer_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ANSWER_COLLECTION_NAME,
                index: "session_id,question_id,user_id",
                source,
            })?;

        Ok(())
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn answers(&self) -> Collection<MongoAnswerDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoAnswerDocument>(ANSWER_COLLECTION_NAME)
    }

    async fn insert_session(&self, session: GameSessionEntity) -> MongoResult<InsertOutcome> {
        let id = session.id;
        let document: MongoSessionDocument = session.into();
        match self.sessions().await.insert_one(&document).await {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_duplicate_key(&err) => Ok(InsertOutcome::CoupleBusy),
            Err(source) => Err(MongoDaoError::SaveSession { id, source }),
        }
    }

    async fn find_session(&self, id: Uuid) -> MongoResult<Option<GameSessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadSession { id, source })?;

        document.map(TryInto::try_into).transpose()
    }

    async fn replace_session(
        &self,
        mut session: GameSessionEntity,
        expected_version: u64,
    ) -> MongoResult<bool> {
        let id = session.id;
        session.version = expected_version + 1;
        let document: MongoSessionDocument = session.into();

        let result = self
            .sessions()
            .await
            .replace_one(
                doc! {"_id": id.to_string(), "version": expected_version as i64},
                &document,
            )
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;

        Ok(result.matched_count == 1)
    }

    async fn query_sessions(
        &self,
        filter: mongodb::bson::Document,
    ) -> MongoResult<Vec<GameSessionEntity>> {
        let documents: Vec<MongoSessionDocument> = self
            .sessions()
            .await
            .find(filter)
            .await
            .map_err(|source| MongoDaoError::QuerySessions { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QuerySessions { source })?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_answer(&self, answer: AnswerEntity) -> MongoResult<bool> {
        let session_id = answer.session_id;
        let document: MongoAnswerDocument = answer.into();
        match self.answers().await.insert_one(&document).await {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::SaveAnswer { session_id, source }),
        }
    }

    async fn find_answer(
        &self,
        session_id: Uuid,
        question_id: i64,
        user_id: Uuid,
    ) -> MongoResult<Option<AnswerEntity>> {
        let document = self
            .answers()
            .await
            .find_one(answer_key(session_id, question_id, user_id))
            .await
            .map_err(|source| MongoDaoError::QueryAnswers { session_id, source })?;

        document.map(TryInto::try_into).transpose()
    }

    async fn record_guess(
        &self,
        session_id: Uuid,
        question_id: i64,
        user_id: Uuid,
        guess: Choice,
    ) -> MongoResult<bool> {
        let mut filter = answer_key(session_id, question_id, user_id);
        filter.insert("round2_guess", mongodb::bson::Bson::Null);

        let result = self
            .answers()
            .await
            .update_one(filter, doc! {"$set": {"round2_guess": guess.as_str()}})
            .await
            .map_err(|source| MongoDaoError::SaveAnswer { session_id, source })?;

        Ok(result.modified_count == 1)
    }

    async fn count_answers(
        &self,
        session_id: Uuid,
        question_id: i64,
        guessed_only: bool,
    ) -> MongoResult<u64> {
        let mut filter = doc! {"session_id": session_id.to_string(), "question_id": question_id};
        if guessed_only {
            filter.insert("round2_guess", doc! {"$ne": mongodb::bson::Bson::Null});
        }

        self.answers()
            .await
            .count_documents(filter)
            .await
            .map_err(|source| MongoDaoError::QueryAnswers { session_id, source })
    }

    async fn list_answers(&self, session_id: Uuid) -> MongoResult<Vec<AnswerEntity>> {
        let documents: Vec<MongoAnswerDocument> = self
            .answers()
            .await
            .find(doc! {"session_id": session_id.to_string()})
            .sort(doc! {"question_id": 1})
            .await
            .map_err(|source| MongoDaoError::QueryAnswers { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QueryAnswers { session_id, source })?;

        documents.into_iter().map(TryInto::try_into).collect()
    }
}

impl SessionStore for MongoSessionStore {
    fn insert_session(
        &self,
        session: GameSessionEntity,
    ) -> BoxFuture<'static, StorageResult<InsertOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn replace_session(
        &self,
        session: GameSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .replace_session(session, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn find_active_sessions(
        &self,
        couple_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .query_sessions(doc! {
                    "couple_id": couple_id.to_string(),
                    "status": {"$in": status_names(&SessionStatus::ACTIVE)},
                })
                .await
                .map_err(Into::into)
        })
    }

    fn find_couple_sessions(
        &self,
        couple_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .query_sessions(doc! {"couple_id": couple_id.to_string()})
                .await
                .map_err(Into::into)
        })
    }

    fn find_expirable(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .query_sessions(doc! {
                    "status": {"$in": status_names(&SessionStatus::ACTIVE)},
                    "expires_at": {"$lte": DateTime::from_system_time(now)},
                })
                .await
                .map_err(Into::into)
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_answer(answer).await.map_err(Into::into) })
    }

    fn find_answer(
        &self,
        session_id: Uuid,
        question_id: i64,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_answer(session_id, question_id, user_id)
                .await
                .map_err(Into::into)
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
            store
                .record_guess(session_id, question_id, user_id, guess)
                .await
                .map_err(Into::into)
        })
    }

    fn count_answers(
        &self,
        session_id: Uuid,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .count_answers(session_id, question_id, false)
                .await
                .map_err(Into::into)
        })
    }

    fn count_guesses(
        &self,
        session_id: Uuid,
        question_id: i64,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .count_answers(session_id, question_id, true)
                .await
                .map_err(Into::into)
        })
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_answers(session_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
