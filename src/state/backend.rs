//! Durable record storage
//!
//! The store keeps the authoritative copy of every network in memory and
//! hands changed records to a [`RecordBackend`] before a write transaction
//! completes.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::state::records::{Network, Networks};

/// Durable storage for network records
pub trait RecordBackend: Send {
    /// Load every stored network
    fn load(&mut self) -> Result<Networks>;

    /// Atomically store `upserts` and drop `removals`
    ///
    /// Must not return before the change is on stable storage. On error
    /// nothing may have been applied.
    fn persist(&mut self, upserts: &[&Network], removals: &[&str]) -> Result<()>;
}

/// SQLite-backed record storage, one row per network
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Create or open the network database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Every commit is fsync'd before returning
        conn.pragma_update(None, "synchronous", "FULL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS networks (
                id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        Ok(Self { conn })
    }
}

impl RecordBackend for SqliteBackend {
    fn load(&mut self) -> Result<Networks> {
        let mut stmt = self.conn.prepare("SELECT id, record FROM networks")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut networks = Networks::new();
        for row in rows {
            let (id, record) = row?;
            let network: Network = serde_json::from_str(&record)?;
            networks.insert(id, network);
        }
        Ok(networks)
    }

    fn persist(&mut self, upserts: &[&Network], removals: &[&str]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for network in upserts {
            let record = serde_json::to_string(network)?;
            tx.execute(
                r#"
                INSERT INTO networks (id, record) VALUES (?1, ?2)
                ON CONFLICT(id) DO UPDATE SET record = ?2, updated_at = CURRENT_TIMESTAMP
                "#,
                params![network.id, record],
            )?;
        }
        for id in removals {
            tx.execute("DELETE FROM networks WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }
}
