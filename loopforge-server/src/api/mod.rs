//! HTTP/WebSocket API
//!
//! Thin edge over the core subsystems: handlers validate, call into the
//! queue/engines/db, and map errors one-to-one onto HTTP statuses.

pub mod assets;
pub mod jobs;
pub mod moments;
pub mod sessions;
pub mod slices;
pub mod system;
pub mod ws;
