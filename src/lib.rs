//! Live CI/CD dashboard client.
//!
//! Fetches workflow snapshots from the dashboard backend, keeps a push
//! channel open for change notifications, and derives the summary views
//! render from the latest snapshot.

pub mod api;
pub mod auth;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod summary;
