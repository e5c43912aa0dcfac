//! Key-value tables backing the OAuth client's session and state stores.
//!
//! Values are opaque strings (serialized JSON in practice); the cache never
//! looks inside them.

use rusqlite::{OptionalExtension, params};

use super::CacheStore;
use crate::Result;

/// One of the two OAuth key-value tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvTable {
    /// `auth_session`: sessions keyed by account DID.
    Session,
    /// `auth_state`: in-flight authorization state keyed by request id.
    State,
}

impl KvTable {
    fn table(&self) -> &'static str {
        match self {
            Self::Session => "auth_session",
            Self::State => "auth_state",
        }
    }

    fn value_column(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::State => "state",
        }
    }
}

impl CacheStore {
    pub fn kv_get(&self, table: KvTable, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE key = ?1",
                    table.value_column(),
                    table.table()
                ),
                [key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or replace the value stored under `key`.
    pub fn kv_put(&self, table: KvTable, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        let column = table.value_column();
        conn.execute(
            &format!(
                "INSERT INTO {table} (key, {column}) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET {column} = excluded.{column}",
                table = table.table(),
            ),
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove `key`. Returns whether it existed.
    pub fn kv_delete(&self, table: KvTable, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", table.table()),
            [key],
        )?;
        Ok(changed > 0)
    }
}
