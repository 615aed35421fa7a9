//! Best-effort push notifications. Delivery failures are logged and never reach the caller.

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{dao::storage::StorageError, state::SharedState};

/// Content of one push notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PushMessage {
    /// Notification without a data payload.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: None,
        }
    }

    /// Attach a data payload for the client app.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Failures of a push delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The recipient profile could not be loaded.
    #[error("failed to look up push recipient")]
    Directory(#[from] StorageError),
    /// The push endpoint could not be reached.
    #[cfg(feature = "expo-push")]
    #[error("failed to send push request")]
    Request(#[source] reqwest::Error),
    /// The push endpoint answered with a non-success status.
    #[error("push endpoint responded with status {0}")]
    Rejected(u16),
}

/// Delivery of push notifications to a user's devices.
pub trait Notifier: Send + Sync {
    /// Deliver `message` to every device of `user_id`.
    fn notify(&self, user_id: Uuid, message: PushMessage) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Spawn a delivery so the caller never waits on the push collaborator.
pub fn notify_in_background(state: &SharedState, user_id: Uuid, message: PushMessage) {
    let notifier = state.notifier().clone();
    tokio::spawn(async move {
        if let Err(err) = notifier.notify(user_id, message).await {
            warn!(%user_id, error = %err, "push notification failed");
        }
    });
}

/// Notifier that only records deliveries in the logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user_id: Uuid, message: PushMessage) -> BoxFuture<'static, Result<(), NotifyError>> {
        Box::pin(async move {
            info!(%user_id, title = %message.title, body = %message.body, "push notification (log only)");
            Ok(())
        })
    }
}

#[cfg(feature = "expo-push")]
pub use expo::ExpoPushNotifier;

#[cfg(feature = "expo-push")]
mod expo {
    use std::sync::Arc;

    use reqwest::Client;

    use super::*;
    use crate::dao::catalog::Directory;

    #[derive(Serialize)]
    struct ExpoPushRequest<'a> {
        to: &'a str,
        title: &'a str,
        body: &'a str,
        sound: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<&'a Value>,
    }

    /// Notifier posting to the Expo push service for every registered device token.
    #[derive(Clone)]
    pub struct ExpoPushNotifier {
        client: Client,
        endpoint: Arc<str>,
        directory: Arc<dyn Directory>,
    }

    impl ExpoPushNotifier {
        /// Build a notifier posting to `endpoint`, resolving device tokens through `directory`.
        pub fn new(endpoint: impl Into<Arc<str>>, directory: Arc<dyn Directory>) -> Self {
            Self {
                client: Client::new(),
                endpoint: endpoint.into(),
                directory,
            }
        }

        async fn send(&self, user_id: Uuid, message: PushMessage) -> Result<(), NotifyError> {
            let Some(user) = self.directory.find_user(user_id).await? else {
                warn!(%user_id, "cannot send push: user not found");
                return Ok(());
            };

            if user.push_tokens.is_empty() {
                info!(%user_id, "no push tokens registered");
                return Ok(());
            }

            for token in &user.push_tokens {
                let request = ExpoPushRequest {
                    to: token,
                    title: &message.title,
                    body: &message.body,
                    sound: "default",
                    data: message.data.as_ref(),
                };
                let response = self
                    .client
                    .post(self.endpoint.as_ref())
                    .json(&request)
                    .send()
                    .await
                    .map_err(NotifyError::Request)?;

                if !response.status().is_success() {
                    return Err(NotifyError::Rejected(response.status().as_u16()));
                }
            }

            info!(%user_id, devices = user.push_tokens.len(), "push notification sent");
            Ok(())
        }
    }

    impl Notifier for ExpoPushNotifier {
        fn notify(
            &self,
            user_id: Uuid,
            message: PushMessage,
        ) -> BoxFuture<'static, Result<(), NotifyError>> {
            let notifier = self.clone();
            Box::pin(async move { notifier.send(user_id, message).await })
        }
    }
}
