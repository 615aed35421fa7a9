use std::{collections::HashMap, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{InboundMessage, OutboundFrame},
    services::{
        game_service,
        message_router::{self, Presence},
    },
    state::SharedState,
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reasons an opening handshake is rejected.
#[derive(Debug, Error)]
enum IdentificationError {
    #[error("first message was not a text frame")]
    NotText,
    #[error("identification frame could not be parsed: {0}")]
    Malformed(String),
    #[error("first message was not identification")]
    NotIdentification,
    #[error("unknown credential")]
    UnknownToken,
    #[error("directory lookup failed: {0}")]
    Directory(String),
}

/// Topic forwarders owned by one connection.
#[derive(Default)]
struct Subscriptions {
    forwarders: HashMap<Uuid, JoinHandle<()>>,
}

impl Subscriptions {
    fn insert(&mut self, session_id: Uuid, task: JoinHandle<()>) {
        if let Some(previous) = self.forwarders.insert(session_id, task) {
            previous.abort();
        }
    }

    fn remove(&mut self, session_id: Uuid) -> bool {
        match self.forwarders.remove(&session_id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        for (_, task) in self.forwarders.drain() {
            task.abort();
        }
    }
}

/// Handle the full lifecycle of a player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Ok(text),
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => Err(IdentificationError::NotText),
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let user_id = match initial_message {
        Ok(text) => identify(&state, text.as_str()).await,
        Err(err) => Err(err),
    };
    let user_id = match user_id {
        Ok(user_id) => user_id,
        Err(err) => {
            warn!(error = %err, "rejecting websocket connection");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    let first_connection = state
        .channels()
        .register(user_id, connection_id, outbound_tx.clone());
    info!(%user_id, %connection_id, "player connected");
    if first_connection {
        message_router::announce_presence(&state, user_id, Presence::Returned).await;
    }

    let mut subscriptions = Subscriptions::default();

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(%user_id, payload = %text, "received player message");

                match InboundMessage::from_json_str(&text) {
                    Ok(InboundMessage::Subscribe(request)) => {
                        subscribe(
                            &state,
                            user_id,
                            request.session_id,
                            &outbound_tx,
                            &mut subscriptions,
                        )
                        .await;
                    }
                    Ok(InboundMessage::Unsubscribe(request)) => {
                        if subscriptions.remove(request.session_id) {
                            info!(%user_id, session_id = %request.session_id, "unsubscribed from session topic");
                        }
                    }
                    Ok(InboundMessage::Identification { .. }) => {
                        warn!(%user_id, "ignoring duplicate identification message");
                    }
                    Ok(InboundMessage::Unknown) => {
                        warn!(%user_id, "unknown message type");
                        message_router::send_error(&state, user_id, "Unknown message type");
                    }
                    Ok(action) => message_router::route(&state, user_id, action).await,
                    Err(err) => {
                        warn!(%user_id, error = %err, "failed to parse or validate player message");
                        message_router::send_error(
                            &state,
                            user_id,
                            format!("Invalid message: {err}"),
                        );
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(%user_id, "player closed connection");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%user_id, error = %err, "websocket error");
                break;
            }
        }
    }

    subscriptions.clear();
    let last_connection = state.channels().unregister(user_id, connection_id);
    info!(%user_id, %connection_id, "player disconnected");
    if last_connection {
        message_router::announce_presence(&state, user_id, Presence::Left).await;
    }

    finalize(writer_task, outbound_tx).await;
}

/// Resolve the user behind the identification frame.
async fn identify(state: &SharedState, text: &str) -> Result<Uuid, IdentificationError> {
    let message = InboundMessage::from_json_str(text)
        .map_err(|err| IdentificationError::Malformed(err.to_string()))?;
    let token = message
        .identification_token()
        .ok_or(IdentificationError::NotIdentification)?;

    state
        .directory()
        .resolve_token(token.to_owned())
        .await
        .map_err(|err| IdentificationError::Directory(err.to_string()))?
        .ok_or(IdentificationError::UnknownToken)
}

/// Attach this connection to the topic of a session the player takes part in.
async fn subscribe(
    state: &SharedState,
    user_id: Uuid,
    session_id: Uuid,
    outbound_tx: &mpsc::UnboundedSender<Message>,
    subscriptions: &mut Subscriptions,
) {
    if let Err(err) = game_service::get_game_session(state, session_id, user_id).await {
        warn!(%user_id, %session_id, error = %err, "subscription refused");
        message_router::send_error(
            state,
            user_id,
            format!("Failed to subscribe: {}", err.client_message()),
        );
        return;
    }

    let stream = BroadcastStream::new(state.channels().subscribe(session_id));
    let tx = outbound_tx.clone();
    let task = tokio::spawn(forward_topic(stream, tx, session_id));
    subscriptions.insert(session_id, task);
    info!(%user_id, %session_id, "subscribed to session topic");
}

async fn forward_topic(
    mut stream: BroadcastStream<OutboundFrame>,
    tx: mpsc::UnboundedSender<Message>,
    session_id: Uuid,
) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(frame) => {
                if send_message_to_websocket(&tx, &frame).is_err() {
                    break;
                }
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(%session_id, skipped, "topic subscriber lagged; frames dropped");
            }
        }
    }
    debug!(%session_id, "topic forwarder finished");
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; a closed writer is reported to the caller.
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), mpsc::error::SendError<Message>>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
