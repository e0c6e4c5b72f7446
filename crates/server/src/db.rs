//! SQLite persistence layer: scan history, kept for audit/troubleshooting.
//! The router's live state (processes, groups, aliases) is in-memory only
//! (§9 "Global mutable state → explicit holders") — this store never gates
//! a request.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        info!(path = %path.display(), "database ready");
        Ok(db)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let version: i32 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS scan_history (
                    id           INTEGER PRIMARY KEY AUTOINCREMENT,
                    directory    TEXT NOT NULL,
                    model_count  INTEGER NOT NULL,
                    incomplete   INTEGER NOT NULL DEFAULT 0,
                    scanned_at   TEXT DEFAULT (datetime('now'))
                );
                CREATE TABLE IF NOT EXISTS generation_runs (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    models_written INTEGER NOT NULL,
                    errors         INTEGER NOT NULL DEFAULT 0,
                    generated_at   TEXT DEFAULT (datetime('now'))
                );
                PRAGMA user_version = 1;",
            )?;
        }
        Ok(())
    }

    pub fn record_scan(&self, directory: &str, model_count: usize, incomplete: usize) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scan_history (directory, model_count, incomplete) VALUES (?1, ?2, ?3)",
            rusqlite::params![directory, model_count as i64, incomplete as i64],
        )?;
        Ok(())
    }

    pub fn record_generation(&self, models_written: usize, errors: usize) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO generation_runs (models_written, errors) VALUES (?1, ?2)",
            rusqlite::params![models_written as i64, errors as i64],
        )?;
        Ok(())
    }
}
