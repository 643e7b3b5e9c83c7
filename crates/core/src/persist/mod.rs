//! SQLite-backed durable store for session templates.
//!
//! This module provides the persistent half of the cache using SQLite with
//! async access via tokio-rusqlite. It supports:
//!
//! - One row per session id holding template, headers, and config
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//!
//! [`SessionDb`] implements the [`PersistentStore`](crate::revalidate::PersistentStore)
//! seam, so the revalidation coordinator can treat it like any other
//! collaborator.

pub mod connection;
pub mod migrations;
pub mod sessions;

pub use crate::Error;

pub use connection::SessionDb;
