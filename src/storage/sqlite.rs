//! SQLite-backed [`Store`].
//!
//! Addresses are stored case-preserving (checksummed) and compared case-insensitively through
//! `COLLATE NOCASE`. A single connection guarded by a mutex serialises writes; blocking calls run on
//! the tokio blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use alloy_primitives::Address;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Transaction as SqlTransaction, params};
use tracing::{debug, info};

use crate::models::definitions::{DefinitionId, DefinitionKind, DefinitionRecord};
use crate::models::errors::StoreError;
use crate::storage::{Protocol, ProtocolId, Store, unique_addresses};
use crate::utils::format_address;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS protocols (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS protocol_indexers (
        id INTEGER PRIMARY KEY,
        protocol_id INTEGER REFERENCES protocols(id),
        kind TEXT NOT NULL CHECK (kind IN ('tx', 'event')),
        last_block_indexed INTEGER NOT NULL DEFAULT 0,
        spec TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS users (
        address TEXT PRIMARY KEY COLLATE NOCASE
    );

    CREATE TABLE IF NOT EXISTS protocol_indexers_users (
        protocol_indexer_id INTEGER NOT NULL REFERENCES protocol_indexers(id),
        user_id TEXT NOT NULL COLLATE NOCASE REFERENCES users(address),
        UNIQUE (protocol_indexer_id, user_id)
    );

    CREATE INDEX IF NOT EXISTS protocol_indexers_users_user_id
        ON protocol_indexers_users (user_id);
";

/// Configure a connection with standard PRAGMAs for WAL mode.
fn configure_connection(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;",
    )
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        configure_connection(&conn)?;
        let store = Self::from_connection(conn)?;
        info!("Opened SQLite store at {}", path.as_ref().display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }

    pub async fn insert_protocol(&self, name: &str) -> Result<ProtocolId, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute("INSERT INTO protocols (name) VALUES (?1)", params![name])?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn insert_definition(
        &self,
        protocol_id: Option<ProtocolId>,
        kind: DefinitionKind,
        checkpoint: u64,
        spec: &str,
    ) -> Result<DefinitionId, StoreError> {
        let spec = spec.to_string();
        let checkpoint = to_sql_height(checkpoint)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO protocol_indexers (protocol_id, kind, last_block_indexed, spec)
                 VALUES (?1, ?2, ?3, ?4)",
                params![protocol_id, kind.as_str(), checkpoint, spec],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn checkpoint(&self, definition_id: DefinitionId) -> Result<u64, StoreError> {
        self.with_conn(move |conn| {
            let checkpoint: Option<i64> = conn
                .query_row(
                    "SELECT last_block_indexed FROM protocol_indexers WHERE id = ?1",
                    params![definition_id],
                    |row| row.get(0),
                )
                .optional()?;
            let checkpoint = checkpoint.ok_or(StoreError::NotFound(definition_id))?;
            from_sql_height(checkpoint)
        })
        .await
    }

    /// Addresses recorded for one definition, in insertion order.
    pub async fn users(&self, definition_id: DefinitionId) -> Result<Vec<String>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM protocol_indexers_users
                 WHERE protocol_indexer_id = ?1 ORDER BY rowid",
            )?;
            let users = stmt
                .query_map(params![definition_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(users)
        })
        .await
    }
}

fn to_sql_height(height: u64) -> Result<i64, StoreError> {
    i64::try_from(height).map_err(|_| StoreError::Malformed(format!("block height {height} out of range")))
}

fn from_sql_height(height: i64) -> Result<u64, StoreError> {
    u64::try_from(height).map_err(|_| StoreError::Malformed(format!("negative block height {height}")))
}

fn insert_users(
    tx: &SqlTransaction<'_>,
    definition_id: DefinitionId,
    addresses: &[String],
) -> Result<(), StoreError> {
    let mut insert_user =
        tx.prepare_cached("INSERT INTO users (address) VALUES (?1) ON CONFLICT (address) DO NOTHING")?;
    let mut insert_link = tx.prepare_cached(
        "INSERT INTO protocol_indexers_users (protocol_indexer_id, user_id) VALUES (?1, ?2)
         ON CONFLICT (protocol_indexer_id, user_id) DO NOTHING",
    )?;

    for address in addresses {
        insert_user.execute(params![address])?;
        insert_link.execute(params![definition_id, address])?;
    }

    Ok(())
}

fn update_checkpoint(
    tx: &SqlTransaction<'_>,
    definition_id: DefinitionId,
    checkpoint: i64,
) -> Result<(), StoreError> {
    let updated = tx.execute(
        "UPDATE protocol_indexers SET last_block_indexed = ?2 WHERE id = ?1",
        params![definition_id, checkpoint],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound(definition_id));
    }
    Ok(())
}

fn canonical(addresses: &[Address]) -> Vec<String> {
    unique_addresses(addresses).iter().map(format_address).collect()
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_definitions(
        &self,
        kind: DefinitionKind,
    ) -> Result<Vec<DefinitionRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, last_block_indexed, spec FROM protocol_indexers
                 WHERE kind = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![kind.as_str()], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, checkpoint, spec)| {
                    Ok(DefinitionRecord {
                        id,
                        kind,
                        checkpoint: from_sql_height(checkpoint)?,
                        spec,
                    })
                })
                .collect()
        })
        .await
    }

    async fn put_users(
        &self,
        definition_id: DefinitionId,
        addresses: &[Address],
    ) -> Result<(), StoreError> {
        if addresses.is_empty() {
            return Ok(());
        }
        let addresses = canonical(addresses);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            insert_users(&tx, definition_id, &addresses)?;
            tx.commit()?;
            debug!(definition_id, users = addresses.len(), "Stored users");
            Ok(())
        })
        .await
    }

    async fn advance_checkpoint(
        &self,
        definition_id: DefinitionId,
        checkpoint: u64,
    ) -> Result<(), StoreError> {
        let checkpoint = to_sql_height(checkpoint)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            update_checkpoint(&tx, definition_id, checkpoint)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn commit_window(
        &self,
        definition_id: DefinitionId,
        addresses: &[Address],
        checkpoint: u64,
    ) -> Result<(), StoreError> {
        let addresses = canonical(addresses);
        let checkpoint = to_sql_height(checkpoint)?;
        self.with_conn(move |conn| {
            // Dropping the transaction on error rolls both writes back
            let tx = conn.transaction()?;
            insert_users(&tx, definition_id, &addresses)?;
            update_checkpoint(&tx, definition_id, checkpoint)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_protocols(&self) -> Result<Vec<Protocol>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM protocols ORDER BY id")?;
            let protocols = stmt
                .query_map([], |row| {
                    Ok(Protocol {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(protocols)
        })
        .await
    }

    async fn protocols_by_address(&self, address: &str) -> Result<Vec<Protocol>, StoreError> {
        let address = address.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT p.id, p.name FROM protocols AS p
                 JOIN protocol_indexers AS pi ON p.id = pi.protocol_id
                 JOIN protocol_indexers_users AS piu ON pi.id = piu.protocol_indexer_id
                 WHERE piu.user_id = ?1
                 ORDER BY p.id",
            )?;
            let protocols = stmt
                .query_map(params![address], |row| {
                    Ok(Protocol {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(protocols)
        })
        .await
    }
}
