use thiserror::Error;

use cellgraph_engine::{CellIdError, EngineError, ErrorKind};
use cellgraph_store::StoreError;

/// Failure of a service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid spreadsheet name {0:?}")]
    InvalidName(String),

    #[error(transparent)]
    InvalidCell(#[from] CellIdError),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    /// Stored expressions for a spreadsheet no longer load (cyclic, unparsable).
    #[error("spreadsheet '{name}' could not be restored from storage: {source}")]
    Restore { name: String, source: EngineError },
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Engine(e) => e.kind(),
            ServiceError::InvalidName(_) | ServiceError::InvalidCell(_) => ErrorKind::BadReq,
            ServiceError::Store(_) | ServiceError::Restore { .. } => ErrorKind::Db,
        }
    }
}
