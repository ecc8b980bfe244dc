pub mod cell_id;
pub mod dep_graph;
pub mod error;
pub mod formula;
pub mod recalc;
pub mod spreadsheet;

pub use cell_id::{CellId, CellIdError};
pub use error::{EngineError, ErrorKind};
pub use recalc::CycleReport;
pub use spreadsheet::{Spreadsheet, Updates};
