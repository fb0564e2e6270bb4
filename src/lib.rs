//! Bulk job orchestration
//!
//! Runs long lists of per-item operations (member registration, member and
//! contact deletion, webhook delivery) against a rate-limited downstream API.
//! Jobs are either driven by an in-process worker task or advanced one item
//! per tick against a Redis-backed store.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
