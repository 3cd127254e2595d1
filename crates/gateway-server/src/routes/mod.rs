//! HTTP route handlers.

pub mod chat;
pub mod health;
pub mod models;
pub mod queue;
