use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::{CellStore, StoreError};

/// Process-local store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CellStore for MemoryStore {
    fn get(&self, spreadsheet: &str, cell: &str) -> Result<Option<String>, StoreError> {
        Ok(self.sheets.lock().get(spreadsheet).and_then(|cells| cells.get(cell).cloned()))
    }

    fn put(&self, spreadsheet: &str, cell: &str, expr: &str) -> Result<(), StoreError> {
        self.sheets
            .lock()
            .entry(spreadsheet.to_string())
            .or_default()
            .insert(cell.to_string(), expr.to_string());
        Ok(())
    }

    fn delete(&self, spreadsheet: &str, cell: &str) -> Result<(), StoreError> {
        let mut sheets = self.sheets.lock();
        if let Some(cells) = sheets.get_mut(spreadsheet) {
            cells.remove(cell);
            if cells.is_empty() {
                sheets.remove(spreadsheet);
            }
        }
        Ok(())
    }

    fn list_all(&self, spreadsheet: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .sheets
            .lock()
            .get(spreadsheet)
            .map(|cells| cells.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn drop_all(&self, spreadsheet: &str) -> Result<(), StoreError> {
        self.sheets.lock().remove(spreadsheet);
        Ok(())
    }

    fn spreadsheets(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.sheets.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn replace_all(&self, spreadsheet: &str, entries: &[(String, String)]) -> Result<(), StoreError> {
        let cells: BTreeMap<String, String> = entries.iter().cloned().collect();
        let mut sheets = self.sheets.lock();
        if cells.is_empty() {
            sheets.remove(spreadsheet);
        } else {
            sheets.insert(spreadsheet.to_string(), cells);
        }
        Ok(())
    }
}
