//! Persistence of raw cell expressions.
//!
//! A store maps `(spreadsheet, cell id) → expr`. It never sees values or
//! dependency information; those are rebuilt by replaying the expressions.
//! Cell ids are passed in their canonical text form (`A1`, `AB12`).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

/// Failure inside a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The backend refused the operation (used by test doubles and closed stores).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed store of cell expressions, one namespace per spreadsheet.
///
/// Implementations must be usable from several connection threads at once.
pub trait CellStore: Send + Sync {
    fn get(&self, spreadsheet: &str, cell: &str) -> Result<Option<String>, StoreError>;

    /// Insert or overwrite one cell's expression.
    fn put(&self, spreadsheet: &str, cell: &str, expr: &str) -> Result<(), StoreError>;

    /// Delete one cell. Deleting an absent cell is not an error.
    fn delete(&self, spreadsheet: &str, cell: &str) -> Result<(), StoreError>;

    /// Every `(cell, expr)` of a spreadsheet, sorted by cell id text.
    fn list_all(&self, spreadsheet: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Delete every cell of a spreadsheet.
    fn drop_all(&self, spreadsheet: &str) -> Result<(), StoreError>;

    /// Names of spreadsheets that have at least one stored cell, sorted.
    fn spreadsheets(&self) -> Result<Vec<String>, StoreError>;

    /// Replace a spreadsheet's contents with `entries`.
    ///
    /// The default is `drop_all` followed by one `put` per entry; backends that
    /// support transactions override it to make the swap atomic.
    fn replace_all(&self, spreadsheet: &str, entries: &[(String, String)]) -> Result<(), StoreError> {
        self.drop_all(spreadsheet)?;
        for (cell, expr) in entries {
            self.put(spreadsheet, cell, expr)?;
        }
        Ok(())
    }
}

macro_rules! forward_cell_store {
    ($($wrapper:ident)::+) => {
        impl<T: CellStore + ?Sized> CellStore for $($wrapper)::+<T> {
            fn get(&self, spreadsheet: &str, cell: &str) -> Result<Option<String>, StoreError> {
                (**self).get(spreadsheet, cell)
            }
            fn put(&self, spreadsheet: &str, cell: &str, expr: &str) -> Result<(), StoreError> {
                (**self).put(spreadsheet, cell, expr)
            }
            fn delete(&self, spreadsheet: &str, cell: &str) -> Result<(), StoreError> {
                (**self).delete(spreadsheet, cell)
            }
            fn list_all(&self, spreadsheet: &str) -> Result<Vec<(String, String)>, StoreError> {
                (**self).list_all(spreadsheet)
            }
            fn drop_all(&self, spreadsheet: &str) -> Result<(), StoreError> {
                (**self).drop_all(spreadsheet)
            }
            fn spreadsheets(&self) -> Result<Vec<String>, StoreError> {
                (**self).spreadsheets()
            }
            fn replace_all(&self, spreadsheet: &str, entries: &[(String, String)]) -> Result<(), StoreError> {
                (**self).replace_all(spreadsheet, entries)
            }
        }
    };
}

forward_cell_store!(Box);
forward_cell_store!(std::sync::Arc);
