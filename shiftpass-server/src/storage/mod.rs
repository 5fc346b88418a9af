//! SQLite storage backend for a domain.

pub mod admin;
pub mod events;
pub mod models;

use crate::error::ServerError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe domain storage.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, anyhow::Error> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self, anyhow::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> Result<(), anyhow::Error> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        // local_devices uses AUTOINCREMENT so a deleted id is never handed out
        // again; attendance_events.local_device_id has no foreign key and may
        // dangle after a delete.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS employees (
                employee_id TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS employee_keys (
                key_id INTEGER PRIMARY KEY AUTOINCREMENT,
                employee_id TEXT NOT NULL,
                public_key BLOB NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                superseded_at INTEGER,
                valid_until INTEGER,
                revoked_at INTEGER,
                FOREIGN KEY (employee_id) REFERENCES employees(employee_id)
            );

            CREATE TABLE IF NOT EXISTS registration_tokens (
                token_id TEXT PRIMARY KEY,
                employee_id TEXT,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                consumed_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS retails (
                retail_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS registers (
                register_id INTEGER PRIMARY KEY AUTOINCREMENT,
                retail_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                FOREIGN KEY (retail_id) REFERENCES retails(retail_id)
            );

            CREATE TABLE IF NOT EXISTS employee_registers (
                employee_id TEXT NOT NULL,
                register_id INTEGER NOT NULL,
                PRIMARY KEY (employee_id, register_id),
                FOREIGN KEY (employee_id) REFERENCES employees(employee_id),
                FOREIGN KEY (register_id) REFERENCES registers(register_id)
            );

            CREATE TABLE IF NOT EXISTS local_devices (
                local_device_id INTEGER PRIMARY KEY AUTOINCREMENT,
                register_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_seen_at INTEGER,
                FOREIGN KEY (register_id) REFERENCES registers(register_id)
            );

            CREATE TABLE IF NOT EXISTS attendance_events (
                event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                employee_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                register_id INTEGER NOT NULL,
                retail_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                accuracy REAL,
                local_device_id INTEGER,
                reason TEXT,
                FOREIGN KEY (employee_id) REFERENCES employees(employee_id)
            );

            CREATE INDEX IF NOT EXISTS idx_employee_keys_employee
                ON employee_keys(employee_id);
            CREATE INDEX IF NOT EXISTS idx_local_devices_register
                ON local_devices(register_id);
            CREATE INDEX IF NOT EXISTS idx_events_employee_time
                ON attendance_events(employee_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_tokens_expires
                ON registration_tokens(expires_at);",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ServerError> {
        self.conn
            .lock()
            .map_err(|e| ServerError::Internal(format!("Lock error: {}", e)))
    }
}
