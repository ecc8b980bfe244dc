// Formula evaluator - walks the expression tree against a value source

use crate::cell_id::CellId;

use super::functions::{self, EvalError};
use super::parser::Expr;

/// Source of cell values for evaluation. Absent cells read as 0.
pub trait CellLookup {
    fn get_value(&self, cell: CellId) -> f64;
}

/// Evaluate an expression to a number.
///
/// Arguments are evaluated left to right; the first failure wins.
pub fn evaluate<L: CellLookup + ?Sized>(expr: &Expr, lookup: &L) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Ref(cell_ref) => Ok(lookup.get_value(cell_ref.cell_id())),
        Expr::App { func, args } => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, lookup))
                .collect::<Result<Vec<f64>, _>>()?;
            functions::apply(func, &values)
        }
    }
}
