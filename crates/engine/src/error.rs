//! Error kinds shared by every layer, and the engine's own error type.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cell_id::{CellId, CellIdError};
use crate::formula::{EvalError, ParseError, ShiftError};
use crate::recalc::CycleReport;

/// Machine-readable error category.
///
/// Serialized as the wire code (`"CIRCULAR_REF"`, `"BAD_REQ"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Formula text could not be parsed.
    Syntax,
    /// The edit would introduce a dependency cycle.
    CircularRef,
    /// A formula parsed but could not be evaluated.
    Eval,
    NotFound,
    Exists,
    /// Malformed request input: cell ids, spreadsheet names, JSON.
    BadReq,
    /// The persistence layer failed.
    Db,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SYNTAX",
            ErrorKind::CircularRef => "CIRCULAR_REF",
            ErrorKind::Eval => "EVAL",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Exists => "EXISTS",
            ErrorKind::BadReq => "BAD_REQ",
            ErrorKind::Db => "DB",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure of a spreadsheet edit. The spreadsheet is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("syntax error in formula for {cell}: {source}")]
    Syntax { cell: CellId, source: ParseError },

    #[error("{0}")]
    CircularRef(CycleReport),

    #[error("cannot evaluate {cell}: {source}")]
    Eval { cell: CellId, source: EvalError },

    #[error("cannot copy {src} to {dst}: {source}")]
    Copy { src: CellId, dst: CellId, source: ShiftError },

    /// The two cells are too far apart for references to be shifted between them.
    #[error("cannot copy {src} to {dst}: cells are too far apart")]
    CopyDistance { src: CellId, dst: CellId },

    #[error(transparent)]
    InvalidCell(#[from] CellIdError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Syntax { .. } => ErrorKind::Syntax,
            EngineError::CircularRef(_) => ErrorKind::CircularRef,
            EngineError::Eval { .. } => ErrorKind::Eval,
            EngineError::Copy { .. } | EngineError::CopyDistance { .. } | EngineError::InvalidCell(_) => {
                ErrorKind::BadReq
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_as_wire_code() {
        assert_eq!(serde_json::to_string(&ErrorKind::CircularRef).unwrap(), "\"CIRCULAR_REF\"");
        assert_eq!(serde_json::to_string(&ErrorKind::BadReq).unwrap(), "\"BAD_REQ\"");
        let kind: ErrorKind = serde_json::from_str("\"DB\"").unwrap();
        assert_eq!(kind, ErrorKind::Db);
    }

    #[test]
    fn test_code_matches_serde() {
        for kind in [
            ErrorKind::Syntax,
            ErrorKind::CircularRef,
            ErrorKind::Eval,
            ErrorKind::NotFound,
            ErrorKind::Exists,
            ErrorKind::BadReq,
            ErrorKind::Db,
            ErrorKind::Internal,
        ] {
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{}\"", kind.code()));
        }
    }

    #[test]
    fn test_engine_error_kinds() {
        let cycle = EngineError::CircularRef(CycleReport::self_reference(CellId::new(0, 0)));
        assert_eq!(cycle.kind(), ErrorKind::CircularRef);
        assert_eq!(cycle.to_string(), "Cell A1 references itself");

        let bad = EngineError::from(CellIdError("1A".into()));
        assert_eq!(bad.kind(), ErrorKind::BadReq);
    }
}
