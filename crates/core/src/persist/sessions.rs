//! Session row CRUD and the `PersistentStore` implementation.
//!
//! One row per session id. Headers and config maps are stored as JSON text
//! columns; `saved_at` is an RFC 3339 timestamp used by external cleanup
//! tooling.

use super::connection::SessionDb;
use crate::Error;
use crate::cache::{ConfigMap, HeaderMap};
use crate::revalidate::{PersistedSession, PersistentStore};
use async_trait::async_trait;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

impl SessionDb {
    /// Insert or update a session's durable copy.
    ///
    /// Uses UPSERT semantics: inserts if the session doesn't exist,
    /// replaces all fields if it does.
    pub async fn upsert_session(
        &self, session_id: &str, template: &str, headers: &HeaderMap, config: &ConfigMap,
    ) -> Result<(), Error> {
        let session_id = session_id.to_string();
        let template = template.to_string();
        let headers_json = serde_json::to_string(headers).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let config_json = serde_json::to_string(config).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let saved_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO sessions (session_id, template, headers_json, config_json, saved_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(session_id) DO UPDATE SET
                        template = excluded.template,
                        headers_json = excluded.headers_json,
                        config_json = excluded.config_json,
                        saved_at = excluded.saved_at",
                    params![session_id, template, headers_json, config_json, saved_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get a session's durable copy.
    ///
    /// Returns None if no row exists for the session id.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<PersistedSession>, Error> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<PersistedSession>, Error> {
                let result = conn.query_row(
                    "SELECT template, headers_json, config_json FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                );

                match result {
                    Ok((template, headers_json, config_json)) => {
                        let headers: HeaderMap =
                            serde_json::from_str(&headers_json).map_err(|e| Error::InvalidInput(e.to_string()))?;
                        let config: ConfigMap =
                            serde_json::from_str(&config_json).map_err(|e| Error::InvalidInput(e.to_string()))?;
                        Ok(Some(PersistedSession { template, headers, config }))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a session's durable copy. Deleting an absent id is a no-op.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), Error> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Number of persisted sessions.
    pub async fn session_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl PersistentStore for SessionDb {
    async fn persist(
        &self, session_id: &str, template: &str, headers: &HeaderMap, config: &ConfigMap,
    ) -> Result<(), Error> {
        self.upsert_session(session_id, template, headers, config).await
    }

    async fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, Error> {
        self.get_session(session_id).await
    }

    async fn remove(&self, session_id: &str) -> Result<(), Error> {
        self.delete_session(session_id).await
    }
}
