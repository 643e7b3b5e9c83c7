//! In-memory cache model: entries, diffing, and the session store.
//!
//! One [`CacheEntry`] exists per session id, owned by a [`CacheStore`].
//! Entries hold a page's template, dynamic data, and the diff produced by
//! the last refresh; [`diff::diff`] reconciles old and new dynamic data so
//! a renderer can apply only the changed fields.

pub mod diff;
pub mod entry;
pub mod store;

pub use crate::Error;

pub use diff::{DiffData, DynamicData, FieldChange};
pub use entry::{CacheEntry, CommitReceipt, ConfigMap, EntrySnapshot, HeaderMap, UpdatePayload};
pub use store::{CacheStore, EntryHandle};
