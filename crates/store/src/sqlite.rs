// SQLite-backed cell store

use std::path::Path;

use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{CellStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cells (
    spreadsheet TEXT NOT NULL,
    cell_id TEXT NOT NULL,
    expr TEXT NOT NULL,
    PRIMARY KEY (spreadsheet, cell_id)
);
"#;

/// One SQLite connection shared behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file. Parent directories are created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!("opened cell store at {}", path.display());
        Self::with_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl CellStore for SqliteStore {
    fn get(&self, spreadsheet: &str, cell: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let expr = conn
            .query_row(
                "SELECT expr FROM cells WHERE spreadsheet = ?1 AND cell_id = ?2",
                params![spreadsheet, cell],
                |row| row.get(0),
            )
            .optional()?;
        Ok(expr)
    }

    fn put(&self, spreadsheet: &str, cell: &str, expr: &str) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO cells (spreadsheet, cell_id, expr) VALUES (?1, ?2, ?3)
             ON CONFLICT (spreadsheet, cell_id) DO UPDATE SET expr = excluded.expr",
            params![spreadsheet, cell, expr],
        )?;
        Ok(())
    }

    fn delete(&self, spreadsheet: &str, cell: &str) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "DELETE FROM cells WHERE spreadsheet = ?1 AND cell_id = ?2",
            params![spreadsheet, cell],
        )?;
        Ok(())
    }

    fn list_all(&self, spreadsheet: &str) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT cell_id, expr FROM cells WHERE spreadsheet = ?1 ORDER BY cell_id")?;
        let rows = stmt.query_map(params![spreadsheet], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut cells: Vec<(String, String)> = Vec::new();
        for row in rows {
            cells.push(row?);
        }
        Ok(cells)
    }

    fn drop_all(&self, spreadsheet: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM cells WHERE spreadsheet = ?1", params![spreadsheet])?;
        Ok(())
    }

    fn spreadsheets(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT spreadsheet FROM cells ORDER BY spreadsheet")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let names = rows.collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn replace_all(&self, spreadsheet: &str, entries: &[(String, String)]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cells WHERE spreadsheet = ?1", params![spreadsheet])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cells (spreadsheet, cell_id, expr) VALUES (?1, ?2, ?3)
                 ON CONFLICT (spreadsheet, cell_id) DO UPDATE SET expr = excluded.expr",
            )?;
            for (cell, expr) in entries {
                stmt.execute(params![spreadsheet, cell, expr])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_store_contract() {
        crate::contract::exercise(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_contents_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cells.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("budget", "A1", "=5").unwrap();
            store.put("budget", "B1", "=A1*2").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.list_all("budget").unwrap(),
            vec![("A1".to_string(), "=5".to_string()), ("B1".to_string(), "=A1*2".to_string())]
        );
        assert_eq!(store.spreadsheets().unwrap(), vec!["budget".to_string()]);
    }

    #[test]
    fn test_names_are_stored_verbatim() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("it's \"quoted\"", "A1", "='x'").unwrap();
        assert_eq!(store.get("it's \"quoted\"", "A1").unwrap().as_deref(), Some("='x'"));
    }
}
