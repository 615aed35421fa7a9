/// OpenAPI documentation generation.
pub mod documentation;
/// Periodic expiry of abandoned sessions.
pub mod expiry_sweeper;
/// Session engine: invitations, rounds, scoring and expiry.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Fan-out of player actions to private queues, session topics and push notifications.
pub mod message_router;
/// Push notification delivery.
pub mod notification;
/// History, statistics and badges.
pub mod query_service;
/// Session store connection supervisor.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
