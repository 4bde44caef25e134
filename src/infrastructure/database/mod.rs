//! Shared storage engine
//!
//! One `rusqlite` connection behind a single mutex; every statement runs
//! under that guard, serializing all storage operations across plugins and
//! the host. Per-plugin schemas attach to a dedicated engine under private
//! names and are detached before their instance is discarded.

use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::application::errors::StorageError;
use crate::domain::entities::{Quote, User};

/// Registry row for one plugin identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRow {
    pub identifier: String,
    pub display_name: String,
    pub enabled: bool,
}

#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_tables()?;
        Ok(storage)
    }

    /// Engine hosting per-plugin attached schemas.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS plugins (
                identifier TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS quotes (
                quote TEXT NOT NULL,
                insert_time INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                discord_id INTEGER,
                twitch_name TEXT,
                display_name TEXT,
                editor INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        Ok(())
    }

    // Plugin registry

    pub fn plugin_row(&self, identifier: &str) -> Result<Option<PluginRow>, StorageError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT identifier, display_name, enabled FROM plugins WHERE identifier = ?1",
                [identifier],
                |row| {
                    Ok(PluginRow {
                        identifier: row.get(0)?,
                        display_name: row.get(1)?,
                        enabled: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Create the registry row for a first-time identifier, disabled.
    pub fn insert_plugin_row(&self, identifier: &str, display_name: &str) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO plugins (identifier, display_name, enabled) VALUES (?1, ?2, 0)",
            rusqlite::params![identifier, display_name],
        )?;
        Ok(())
    }

    pub fn set_plugin_state(&self, identifier: &str, enabled: bool) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE plugins SET enabled = ?1 WHERE identifier = ?2",
            rusqlite::params![enabled as i64, identifier],
        )?;
        Ok(())
    }

    // Quotes

    pub fn quotes(&self) -> Result<Vec<Quote>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT quote, insert_time FROM quotes ORDER BY insert_time")?;
        let rows = stmt.query_map([], |row| Ok(Quote::new(row.get::<_, String>(0)?, row.get(1)?)))?;

        let mut quotes = Vec::new();
        for quote in rows {
            quotes.push(quote?);
        }
        Ok(quotes)
    }

    pub fn add_quote(&self, text: &str, inserted_at: i64) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO quotes (quote, insert_time) VALUES (?1, ?2)",
            rusqlite::params![text, inserted_at],
        )?;
        Ok(())
    }

    /// Delete the `index`-th quote in insertion order. Returns the deleted
    /// quote, or `None` when the index is out of range.
    pub fn delete_quote(&self, index: usize) -> Result<Option<Quote>, StorageError> {
        let quotes = self.quotes()?;
        let Some(quote) = quotes.get(index).cloned() else {
            return Ok(None);
        };

        let conn = self.lock();
        conn.execute(
            "DELETE FROM quotes WHERE insert_time = ?1 AND quote = ?2",
            rusqlite::params![quote.inserted_at, quote.text],
        )?;
        Ok(Some(quote))
    }

    // Users

    fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            discord_id: row.get(1)?,
            twitch_name: row.get(2)?,
            display_name: row.get(3)?,
            editor: row.get::<_, i64>(4)? != 0,
        })
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<User>, StorageError> {
        let conn = self.lock();
        let user = conn
            .query_row(
                "SELECT id, discord_id, twitch_name, display_name, editor FROM users WHERE id = ?1",
                [id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_by_discord_id(&self, discord_id: i64) -> Result<Option<User>, StorageError> {
        let conn = self.lock();
        let user = conn
            .query_row(
                "SELECT id, discord_id, twitch_name, display_name, editor FROM users WHERE discord_id = ?1",
                [discord_id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_by_display_name(&self, display_name: &str) -> Result<Option<User>, StorageError> {
        let conn = self.lock();
        let user = conn
            .query_row(
                "SELECT id, discord_id, twitch_name, display_name, editor FROM users WHERE display_name = ?1",
                [display_name],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_by_twitch_name(&self, twitch_name: &str) -> Result<Option<User>, StorageError> {
        let conn = self.lock();
        let user = conn
            .query_row(
                "SELECT id, discord_id, twitch_name, display_name, editor FROM users WHERE twitch_name = ?1",
                [twitch_name],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn insert_user(&self, user: &User) -> Result<i64, StorageError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (discord_id, twitch_name, display_name, editor) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                user.discord_id,
                user.twitch_name,
                user.display_name,
                user.editor as i64
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // Plugin schema isolation

    /// Attach a plugin's database file under a private schema name.
    pub fn attach(&self, name: &str, file: impl AsRef<Path>) -> Result<(), StorageError> {
        let conn = self.lock();
        let file = file.as_ref().to_string_lossy().to_string();
        conn.execute("ATTACH DATABASE ?1 AS ?2", rusqlite::params![file, name])?;
        Ok(())
    }

    pub fn detach(&self, name: &str) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute("DETACH DATABASE ?1", [name])?;
        Ok(())
    }

    /// Run a plugin's schema-creation script.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute_batch(sql)?;
        Ok(())
    }
}
