//! Mission control board client library.

pub mod board;
pub mod config;
pub mod gateway;
pub mod output;
