//! Shared records and wire protocol for mission control.

pub mod activity;
pub mod agent;
pub mod comment;
pub mod message;
pub mod rpc;
pub mod task;
pub mod validate;
