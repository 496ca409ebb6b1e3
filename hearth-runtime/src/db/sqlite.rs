//! SQLite database - schema definitions and connection management
//!
//! This file contains the Database struct, connection management, and schema
//! creation. Record operations live in the tables/ subdirectory.

use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Mutex;

/// Main database wrapper with connection pooling via Mutex
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Create a new database connection and initialize schema
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Initialize all database tables
    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        // One row per tenant; module settings and enabled list stored as JSON
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tenant_configs (
                tenant_id TEXT PRIMARY KEY,
                enabled_modules TEXT NOT NULL DEFAULT '[]',
                settings TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // User-created recurring task records
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cron_jobs (
                job_id TEXT PRIMARY KEY,
                module TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                owner_ref TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                schedule TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cron_jobs_tenant ON cron_jobs (tenant_id)",
            [],
        )?;

        Ok(())
    }
}
