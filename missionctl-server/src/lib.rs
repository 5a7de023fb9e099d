//! Mission control server library.
//!
//! Exposes the record stores, the service facade and the WebSocket server for
//! use in tests and embedding. The server keeps every record in memory,
//! answers RPC calls and pushes live task-query snapshots to subscribers.

pub mod activity;
pub mod agents;
pub mod comments;
pub mod config;
pub mod messages;
pub mod repository;
pub mod server;
pub mod service;
pub mod store;
