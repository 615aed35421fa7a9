use std::collections::HashMap;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dto::ws::OutboundFrame;

/// Delivery fabric for connected players: private per-user queues and per-session topics.
///
/// A user may hold several connections at once; private frames reach all of them.
pub struct ChannelHub {
    connections: DashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<Message>>>,
    topics: DashMap<Uuid, broadcast::Sender<OutboundFrame>>,
    topic_capacity: usize,
}

impl ChannelHub {
    /// Build an empty hub whose topics buffer up to `topic_capacity` frames per subscriber.
    pub fn new(topic_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            topics: DashMap::new(),
            topic_capacity,
        }
    }

    /// Attach a connection to `user_id`; returns `true` when it is the user's first one.
    pub fn register(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
        tx: mpsc::UnboundedSender<Message>,
    ) -> bool {
        let mut connections = self.connections.entry(user_id).or_default();
        let first = connections.is_empty();
        connections.insert(connection_id, tx);
        first
    }

    /// Detach a connection; returns `true` when the user has no connection left.
    pub fn unregister(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        let last = match self.connections.get_mut(&user_id) {
            Some(mut connections) => {
                if connections.remove(&connection_id).is_none() {
                    return false;
                }
                connections.is_empty()
            }
            None => return false,
        };

        if last {
            self.connections
                .remove_if(&user_id, |_, connections| connections.is_empty());
        }
        last
    }

    /// Whether at least one connection is registered for `user_id`.
    pub fn is_connected(&self, user_id: Uuid) -> bool {
        self.connections
            .get(&user_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    /// Serialize `frame` once and push it to every connection of `user_id`.
    ///
    /// Returns the number of connections the frame was queued on.
    pub fn send_private(&self, user_id: Uuid, frame: &OutboundFrame) -> usize {
        let senders: Vec<_> = match self.connections.get(&user_id) {
            Some(connections) => connections.values().cloned().collect(),
            None => {
                debug!(%user_id, "no connection for private frame");
                return 0;
            }
        };

        let payload = match serde_json::to_string(frame) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize outbound frame");
                return 0;
            }
        };

        senders
            .iter()
            .filter(|tx| tx.send(Message::Text(payload.clone().into())).is_ok())
            .count()
    }

    /// Subscribe to the topic of a session, creating it on first use.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<OutboundFrame> {
        self.topics
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.topic_capacity).0)
            .subscribe()
    }

    /// Publish to every subscriber of the session topic; returns the number of receivers.
    pub fn publish(&self, session_id: Uuid, frame: OutboundFrame) -> usize {
        match self.topics.get(&session_id) {
            Some(sender) => sender.send(frame).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the topic so that subscriber streams terminate.
    pub fn close_topic(&self, session_id: Uuid) {
        self.topics.remove(&session_id);
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::ws::{Destination, OutboundEvent};
    use crate::dto::game::ErrorPayload;

    fn frame(message: &str) -> OutboundFrame {
        OutboundFrame::new(
            Destination::Errors,
            OutboundEvent::Error(ErrorPayload::new(message.to_owned())),
        )
    }

    #[test]
    fn first_and_last_connection_are_reported() {
        let hub = ChannelHub::default();
        let user = Uuid::new_v4();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(hub.register(user, a, tx_a));
        assert!(!hub.register(user, b, tx_b));
        assert!(!hub.unregister(user, a));
        assert!(hub.is_connected(user));
        assert!(hub.unregister(user, b));
        assert!(!hub.is_connected(user));
        // unknown connection
        assert!(!hub.unregister(user, b));
    }

    #[test]
    fn private_frames_reach_every_connection() {
        let hub = ChannelHub::default();
        let user = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.register(user, Uuid::new_v4(), tx_a);
        hub.register(user, Uuid::new_v4(), tx_b);

        assert_eq!(hub.send_private(user, &frame("boom")), 2);
        for rx in [&mut rx_a, &mut rx_b] {
            let Ok(Message::Text(text)) = rx.try_recv() else {
                panic!("expected a text frame");
            };
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value["destination"], "/user/queue/errors");
            assert_eq!(value["payload"]["type"], "ERROR");
            assert_eq!(value["payload"]["message"], "boom");
        }
        assert_eq!(hub.send_private(Uuid::new_v4(), &frame("nobody")), 0);
    }

    #[tokio::test]
    async fn closing_a_topic_ends_subscriptions() {
        let hub = ChannelHub::default();
        let session = Uuid::new_v4();
        assert_eq!(hub.publish(session, frame("lost")), 0);

        let mut rx = hub.subscribe(session);
        assert_eq!(hub.publish(session, frame("hello")), 1);
        assert!(rx.recv().await.is_ok());

        hub.close_topic(session);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
