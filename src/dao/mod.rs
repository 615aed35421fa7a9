/// Users, couples and question content consumed by the engine.
pub mod catalog;
/// Database model definitions.
pub mod models;
/// Session and answer persistence.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
