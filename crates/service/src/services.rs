use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use cellgraph_engine::{CellId, Spreadsheet, Updates};
use cellgraph_store::{CellStore, StoreError};

use crate::error::ServiceError;

type Handle = Arc<RwLock<Spreadsheet>>;

/// Named spreadsheets backed by a store.
pub struct SpreadsheetServices<S: CellStore> {
    store: S,
    sheets: RwLock<FxHashMap<String, Handle>>,
}

impl<S: CellStore> SpreadsheetServices<S> {
    pub fn new(store: S) -> Self {
        Self { store, sheets: RwLock::new(FxHashMap::default()) }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Set a cell's formula. A blank `expr` removes the cell.
    pub fn evaluate(&self, spreadsheet: &str, cell: &str, expr: &str) -> Result<Updates, ServiceError> {
        let cell = parse_cell(cell)?;
        let handle = self.sheet(spreadsheet)?;
        let mut sheet = handle.write();

        let previous = sheet.query(cell).to_string();
        let updates = sheet.eval(cell, expr)?;
        self.write_through(spreadsheet, &mut sheet, cell, &previous)?;

        debug!("evaluate {}!{} -> {} updates", spreadsheet, cell, updates.len());
        Ok(updates)
    }

    /// Copy `src`'s formula to `dst`, re-targeting relative references.
    pub fn copy(&self, spreadsheet: &str, dst: &str, src: &str) -> Result<Updates, ServiceError> {
        let dst = parse_cell(dst)?;
        let src = parse_cell(src)?;
        let handle = self.sheet(spreadsheet)?;
        let mut sheet = handle.write();

        let previous = sheet.query(dst).to_string();
        let updates = sheet.copy(dst, src)?;
        self.write_through(spreadsheet, &mut sheet, dst, &previous)?;

        debug!("copy {}!{} -> {} ({} updates)", spreadsheet, src, dst, updates.len());
        Ok(updates)
    }

    pub fn query(&self, spreadsheet: &str, cell: &str) -> Result<String, ServiceError> {
        let cell = parse_cell(cell)?;
        let handle = self.sheet(spreadsheet)?;
        let sheet = handle.read();
        Ok(sheet.query(cell).to_string())
    }

    pub fn value(&self, spreadsheet: &str, cell: &str) -> Result<f64, ServiceError> {
        let cell = parse_cell(cell)?;
        let handle = self.sheet(spreadsheet)?;
        let sheet = handle.read();
        Ok(sheet.value(cell))
    }

    pub fn remove(&self, spreadsheet: &str, cell: &str) -> Result<Updates, ServiceError> {
        let cell = parse_cell(cell)?;
        let handle = self.sheet(spreadsheet)?;
        let mut sheet = handle.write();

        let previous = sheet.query(cell).to_string();
        let updates = sheet.remove(cell)?;
        self.write_through(spreadsheet, &mut sheet, cell, &previous)?;

        debug!("remove {}!{} -> {} updates", spreadsheet, cell, updates.len());
        Ok(updates)
    }

    /// Delete every cell. Storage is cleared before memory.
    pub fn clear(&self, spreadsheet: &str) -> Result<(), ServiceError> {
        let handle = self.sheet(spreadsheet)?;
        let mut sheet = handle.write();

        self.store.drop_all(spreadsheet)?;
        sheet.clear();

        debug!("clear {}", spreadsheet);
        Ok(())
    }

    /// Every non-empty cell as `(id, expr)`, sorted by row then column.
    pub fn dump(&self, spreadsheet: &str) -> Result<Vec<(String, String)>, ServiceError> {
        let handle = self.sheet(spreadsheet)?;
        let sheet = handle.read();
        Ok(dump_rows(&sheet))
    }

    /// Replace a spreadsheet's contents. Nothing changes unless the whole
    /// set loads and is stored.
    pub fn load(&self, spreadsheet: &str, entries: Vec<(String, String)>) -> Result<Updates, ServiceError> {
        let entries = entries
            .into_iter()
            .map(|(id, expr)| Ok((parse_cell(&id)?, expr)))
            .collect::<Result<Vec<(CellId, String)>, ServiceError>>()?;

        let handle = self.sheet(spreadsheet)?;
        let mut sheet = handle.write();

        let previous = sheet.clone();
        let updates = sheet.load(entries)?;

        if let Err(e) = self.store.replace_all(spreadsheet, &dump_rows(&sheet)) {
            warn!("load {}: store write failed, restoring previous contents: {}", spreadsheet, e);
            *sheet = previous;
            if let Err(restore) = self.store.replace_all(spreadsheet, &dump_rows(&sheet)) {
                error!("load {}: could not restore stored contents: {}", spreadsheet, restore);
            }
            return Err(e.into());
        }

        debug!("load {} -> {} cells", spreadsheet, updates.len());
        Ok(updates)
    }

    /// Names of all spreadsheets that are open or have stored cells.
    pub fn spreadsheet_names(&self) -> Result<Vec<String>, ServiceError> {
        let mut names: BTreeSet<String> = self.store.spreadsheets()?.into_iter().collect();
        names.extend(self.sheets.read().keys().cloned());
        Ok(names.into_iter().collect())
    }

    /// Find or create the handle for `name`, loading stored cells on first access.
    fn sheet(&self, name: &str) -> Result<Handle, ServiceError> {
        validate_name(name)?;

        if let Some(handle) = self.sheets.read().get(name) {
            return Ok(Arc::clone(handle));
        }

        // Restore outside the map lock so other spreadsheets stay available.
        let restored = self.restore(name)?;

        let mut sheets = self.sheets.write();
        let handle = sheets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(restored)));
        Ok(Arc::clone(handle))
    }

    fn restore(&self, name: &str) -> Result<Spreadsheet, ServiceError> {
        let rows = self.store.list_all(name)?;
        let mut sheet = Spreadsheet::new();
        if rows.is_empty() {
            return Ok(sheet);
        }

        let count = rows.len();
        let entries = rows
            .into_iter()
            .map(|(id, expr)| Ok((CellId::parse(&id)?, expr)))
            .collect::<Result<Vec<_>, cellgraph_engine::EngineError>>()
            .map_err(|source| ServiceError::Restore { name: name.to_string(), source })?;
        sheet
            .load(entries)
            .map_err(|source| ServiceError::Restore { name: name.to_string(), source })?;

        info!("restored spreadsheet '{}' with {} cells from storage", name, count);
        Ok(sheet)
    }

    /// Persist `cell`'s current expr. On failure put the old expr back in memory.
    fn write_through(
        &self,
        spreadsheet: &str,
        sheet: &mut Spreadsheet,
        cell: CellId,
        previous: &str,
    ) -> Result<(), ServiceError> {
        let key = cell.to_string();
        let current = sheet.query(cell);
        let result: Result<(), StoreError> = if current.is_empty() {
            self.store.delete(spreadsheet, &key)
        } else {
            self.store.put(spreadsheet, &key, current)
        };

        if let Err(e) = result {
            warn!("{}!{}: store write failed, rolling back: {}", spreadsheet, cell, e);
            // The previous expr was live a moment ago, so it still evaluates
            // and cannot close a cycle.
            if let Err(revert) = sheet.eval(cell, previous) {
                error!("{}!{}: rollback failed: {}", spreadsheet, cell, revert);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn parse_cell(text: &str) -> Result<CellId, ServiceError> {
    CellId::parse(text).map_err(ServiceError::from)
}

fn validate_name(name: &str) -> Result<(), ServiceError> {
    if name.is_empty() || name.chars().any(char::is_control) {
        return Err(ServiceError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn dump_rows(sheet: &Spreadsheet) -> Vec<(String, String)> {
    sheet
        .dump()
        .into_iter()
        .map(|(id, expr)| (id.to_string(), expr))
        .collect()
}
