// Formula parsing and evaluation

pub mod eval;
pub mod functions;
pub mod parser;
pub mod refs;

pub use eval::{evaluate, CellLookup};
pub use functions::EvalError;
pub use parser::{format_expr, parse, CellRef, Expr, ParseError};
pub use refs::{extract_refs, shift_refs, ShiftError};
