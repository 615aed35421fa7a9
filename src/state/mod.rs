mod channels;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{
        catalog::{Directory, QuestionBank},
        session_store::SessionStore,
    },
    error::ServiceError,
    services::notification::Notifier,
};

pub use self::channels::ChannelHub;

pub type SharedState = Arc<AppState>;

/// Central application state: storage handle, collaborators and live connections.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    directory: Arc<dyn Directory>,
    question_bank: Arc<dyn QuestionBank>,
    notifier: Arc<dyn Notifier>,
    config: Arc<AppConfig>,
    channels: ChannelHub,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a session store is installed.
    pub fn new(
        config: AppConfig,
        directory: Arc<dyn Directory>,
        question_bank: Arc<dyn QuestionBank>,
        notifier: Arc<dyn Notifier>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            directory,
            question_bank,
            notifier,
            config: Arc::new(config),
            channels: ChannelHub::default(),
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Session store or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Identity and couple lookups.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Category and question content.
    pub fn question_bank(&self) -> &Arc<dyn QuestionBank> {
        &self.question_bank
    }

    /// Push notification delivery.
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Loaded application configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Private queues and session topics of connected players.
    pub fn channels(&self) -> &ChannelHub {
        &self.channels
    }
}
