//! Database module
//!
//! Persists the visitor profile so the relationship counter and suggestion
//! history survive restarts.

mod schema;

pub use schema::*;

use crate::visitor::VisitorProfile;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Profile encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Visitor not found: {0}")]
    VisitorNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Visitor Operations ====================

    /// Id of the visitor owning this installation, if one was saved
    pub fn current_visitor_id(&self) -> DbResult<Option<String>> {
        let conn = self.lock();
        let id = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![CURRENT_VISITOR_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_profile(&self, visitor_id: &str) -> DbResult<VisitorProfile> {
        let conn = self.lock();
        let json: String = conn
            .query_row(
                "SELECT profile FROM visitor_profiles WHERE visitor_id = ?1",
                params![visitor_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DbError::VisitorNotFound(visitor_id.to_string())
                }
                other => other.into(),
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Profile of the current visitor
    pub fn load_current_profile(&self) -> DbResult<Option<VisitorProfile>> {
        let Some(id) = self.current_visitor_id()? else {
            return Ok(None);
        };
        match self.get_profile(&id) {
            Ok(profile) => Ok(Some(profile)),
            Err(DbError::VisitorNotFound(_)) => {
                tracing::warn!(visitor_id = %id, "Current visitor has no stored profile");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Upsert `profile` and make it the current visitor
    pub fn save_profile(&self, profile: &VisitorProfile) -> DbResult<()> {
        let json = serde_json::to_string(profile)?;
        let now = Utc::now().to_rfc3339();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO visitor_profiles (visitor_id, profile, total_conversations, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(visitor_id) DO UPDATE SET
                profile = excluded.profile,
                total_conversations = excluded.total_conversations,
                updated_at = excluded.updated_at",
            params![profile.visitor_id, json, profile.total_conversations, now],
        )?;
        tx.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![CURRENT_VISITOR_KEY, profile.visitor_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}
