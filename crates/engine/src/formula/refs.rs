//! Reference extraction and re-targeting on the formula AST.
//!
//! `extract_refs` feeds the dependency graph; `shift_refs` implements the
//! relative-reference adjustment used when a formula is copied to another cell.

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::cell_id::CellId;

use super::parser::{format_cell_ref, CellRef, Expr};

/// Extract all cell references from an expression.
///
/// Returns a deduplicated list sorted row-major, so callers get the same
/// order for the same formula.
pub fn extract_refs(expr: &Expr) -> Vec<CellId> {
    let mut refs = FxHashSet::default();
    collect_refs(expr, &mut refs);
    let mut refs: Vec<CellId> = refs.into_iter().collect();
    refs.sort();
    refs
}

fn collect_refs(expr: &Expr, refs: &mut FxHashSet<CellId>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Ref(cell_ref) => {
            refs.insert(cell_ref.cell_id());
        }
        Expr::App { args, .. } => {
            for arg in args {
                collect_refs(arg, refs);
            }
        }
    }
}

/// A shifted reference would land before row 1 or column A.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reference {reference} moves off the sheet")]
pub struct ShiftError {
    /// The reference as written in the source formula.
    pub reference: String,
}

/// Move every relative reference component by `(d_row, d_col)`.
///
/// Absolute components (`$A`, `$1`) are left untouched.
pub fn shift_refs(expr: &Expr, d_row: isize, d_col: isize) -> Result<Expr, ShiftError> {
    match expr {
        Expr::Number(n) => Ok(Expr::Number(*n)),
        Expr::Ref(cell_ref) => shift_ref(cell_ref, d_row, d_col).map(Expr::Ref),
        Expr::App { func, args } => {
            let args = args
                .iter()
                .map(|arg| shift_refs(arg, d_row, d_col))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::App { func: func.clone(), args })
        }
    }
}

fn shift_ref(cell_ref: &CellRef, d_row: isize, d_col: isize) -> Result<CellRef, ShiftError> {
    let off_sheet = || ShiftError { reference: format_cell_ref(cell_ref) };

    let row = if cell_ref.row_abs {
        cell_ref.row
    } else {
        cell_ref.row.checked_add_signed(d_row).ok_or_else(off_sheet)?
    };
    let col = if cell_ref.col_abs {
        cell_ref.col
    } else {
        cell_ref.col.checked_add_signed(d_col).ok_or_else(off_sheet)?
    };

    Ok(CellRef { row, col, ..*cell_ref })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::{format_expr, parse};

    fn ids(list: &[&str]) -> Vec<CellId> {
        list.iter().map(|s| CellId::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_extract_nested_and_deduplicated() {
        let expr = parse("=max(a1, b2 * -(a1 + c3), min(b2))").unwrap();
        assert_eq!(extract_refs(&expr), ids(&["A1", "B2", "C3"]));
    }

    #[test]
    fn test_extract_literals_have_no_refs() {
        assert!(extract_refs(&parse("=1+2*max(3,4)").unwrap()).is_empty());
    }

    #[test]
    fn test_extract_absolute_refs_point_at_same_cell() {
        let expr = parse("=$a$1+a1+$a1").unwrap();
        assert_eq!(extract_refs(&expr), ids(&["A1"]));
    }

    #[test]
    fn test_shift_relative_and_absolute() {
        let expr = parse("=a1+$a1+a$1+$a$1").unwrap();
        let shifted = shift_refs(&expr, 2, 1).unwrap();
        assert_eq!(format_expr(&shifted), "B3+$A3+B$1+$A$1");
    }

    #[test]
    fn test_shift_off_sheet_fails() {
        let expr = parse("=b2+a1").unwrap();
        let err = shift_refs(&expr, 0, -1).unwrap_err();
        assert_eq!(err.reference, "A1");

        // Absolute components never move
        let expr = parse("=$a$1").unwrap();
        assert!(shift_refs(&expr, -5, -5).is_ok());
    }
}
