//! Core types and shared functionality for pagelift.
//!
//! This crate provides:
//! - In-memory cache model: per-session entries, diffing, session store
//! - Revalidation orchestration and collaborator seams
//! - SQLite-backed durable session store
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod persist;
pub mod revalidate;

pub use cache::{CacheEntry, CacheStore, EntrySnapshot, FieldChange, UpdatePayload};
pub use error::Error;
pub use persist::SessionDb;
pub use revalidate::{RevalidationCoordinator, RevalidationOutcome, RevalidationReport};
