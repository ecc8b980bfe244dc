//! One named spreadsheet: the edit protocol over a [`DepGraph`].
//!
//! Every mutating operation either applies completely and returns the set of
//! cells whose value it changed, or fails and leaves the spreadsheet as it was.

use std::collections::BTreeMap;

use log::debug;

use crate::cell_id::CellId;
use crate::dep_graph::DepGraph;
use crate::error::EngineError;
use crate::formula::{evaluate, extract_refs, format_expr, parse, shift_refs, Expr};
use crate::recalc::{compute_wave, CycleReport, Wave};

/// Changed cells of one operation and their new values, in `(row, col)` order.
pub type Updates = BTreeMap<CellId, f64>;

#[derive(Debug, Clone, Default)]
pub struct Spreadsheet {
    graph: DepGraph,
}

impl Spreadsheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the underlying graph.
    pub fn graph(&self) -> &DepGraph {
        &self.graph
    }

    /// Set `cell`'s formula and recompute everything downstream.
    ///
    /// A blank `expr` removes the cell. The returned updates always contain
    /// `cell` itself, plus every other cell whose value changed.
    pub fn eval(&mut self, cell: CellId, expr: &str) -> Result<Updates, EngineError> {
        if expr.trim().is_empty() {
            return self.remove(cell);
        }

        let ast = parse(expr).map_err(|source| EngineError::Syntax { cell, source })?;
        let refs = extract_refs(&ast);

        if let Some(report) = self.graph.would_create_cycle(cell, &refs) {
            return Err(EngineError::CircularRef(report));
        }

        let wave = compute_wave(&self.graph, cell, Some(&ast))?;
        self.graph.upsert_expr(cell, expr.to_string(), Some(ast), &refs);
        Ok(self.commit(cell, wave))
    }

    /// Copy `src`'s formula into `dst`, re-targeting relative references by
    /// the distance between the two cells.
    ///
    /// Copying an empty cell removes `dst`.
    pub fn copy(&mut self, dst: CellId, src: CellId) -> Result<Updates, EngineError> {
        let Some((expr, ast)) = self
            .graph
            .get(src)
            .and_then(|c| c.ast.as_ref().map(|ast| (c.expr.as_str(), ast)))
        else {
            return self.remove(dst);
        };

        let (Some(d_row), Some(d_col)) = (signed_distance(src.row, dst.row), signed_distance(src.col, dst.col)) else {
            return Err(EngineError::CopyDistance { src, dst });
        };
        let shifted = shift_refs(ast, d_row, d_col).map_err(|source| EngineError::Copy { src, dst, source })?;

        let prefix = if expr.trim_start().starts_with('=') { "=" } else { "" };
        let text = format!("{}{}", prefix, format_expr(&shifted));
        self.eval(dst, &text)
    }

    /// Formula text of `cell`, or "" if it has none.
    pub fn query(&self, cell: CellId) -> &str {
        self.graph.expr(cell)
    }

    /// Current value of `cell`; cells without a formula read as 0.
    pub fn value(&self, cell: CellId) -> f64 {
        self.graph.value(cell)
    }

    /// Clear `cell`'s formula. Its value becomes 0 and dependents recompute.
    ///
    /// Fails only if a dependent can no longer be evaluated (e.g. `=1/A1`).
    pub fn remove(&mut self, cell: CellId) -> Result<Updates, EngineError> {
        let wave = compute_wave(&self.graph, cell, None)?;
        self.graph.remove(cell);
        Ok(self.commit(cell, wave))
    }

    pub fn clear(&mut self) {
        self.graph.clear();
    }

    /// Every cell with a formula, sorted by row then column.
    pub fn dump(&self) -> Vec<(CellId, String)> {
        let mut cells: Vec<(CellId, String)> = self
            .graph
            .iter()
            .filter(|(_, c)| !c.expr.is_empty())
            .map(|(id, c)| (id, c.expr.clone()))
            .collect();
        cells.sort_by_key(|(id, _)| *id);
        cells
    }

    /// Replace the whole contents with `entries`.
    ///
    /// All entries are parsed and the set is ordered by dependencies before
    /// anything is evaluated. Later duplicates win; blank exprs are skipped.
    /// Returns the value of every loaded cell. On failure the current
    /// contents are kept.
    pub fn load<I>(&mut self, entries: I) -> Result<Updates, EngineError>
    where
        I: IntoIterator<Item = (CellId, String)>,
    {
        let entries: BTreeMap<CellId, String> = entries.into_iter().collect();

        let mut staged = DepGraph::new();
        for (cell, expr) in entries {
            if expr.trim().is_empty() {
                continue;
            }
            let ast = parse(&expr).map_err(|source| EngineError::Syntax { cell, source })?;
            let refs = extract_refs(&ast);
            if refs.contains(&cell) {
                return Err(EngineError::CircularRef(CycleReport::self_reference(cell)));
            }
            staged.upsert_expr(cell, expr, Some(ast), &refs);
        }

        let order = staged.topo_order().map_err(EngineError::CircularRef)?;

        let mut updates = Updates::new();
        for cell in order {
            let Some(ast) = staged.get(cell).and_then(|c| c.ast.clone()) else {
                // Placeholder for an unloaded reference
                continue;
            };
            let value = evaluate_in(&staged, cell, &ast)?;
            staged.set_value(cell, value);
            updates.insert(cell, value);
        }

        debug!("loaded {} cells ({} in arena)", updates.len(), staged.len());
        self.graph = staged;
        Ok(updates)
    }

    /// Write a wave's values and pick out the cells that changed.
    fn commit(&mut self, edited: CellId, wave: Wave) -> Updates {
        let mut updates = Updates::new();
        for cell in &wave.order {
            let Some(&value) = wave.values.get(cell) else {
                continue;
            };
            let old = self.graph.value(*cell);
            self.graph.set_value(*cell, value);
            if *cell == edited || old.to_bits() != value.to_bits() {
                updates.insert(*cell, value);
            }
        }
        debug!("{} {}", edited, wave.report.log_line());
        updates
    }

    /// Test-only invariant check, forwarded to the graph.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        self.graph.assert_consistent();
    }
}

/// `to - from`, if it fits in an `isize`.
fn signed_distance(from: usize, to: usize) -> Option<isize> {
    let from = isize::try_from(from).ok()?;
    let to = isize::try_from(to).ok()?;
    to.checked_sub(from)
}

fn evaluate_in(graph: &DepGraph, cell: CellId, ast: &Expr) -> Result<f64, EngineError> {
    evaluate(ast, graph).map_err(|source| EngineError::Eval { cell, source })
}
