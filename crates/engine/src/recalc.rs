//! Recalculation waves and cycle reporting.
//!
//! A wave recomputes one edited cell and everything downstream of it. Values
//! are written to a scratch overlay first, so a wave that fails part way
//! leaves the graph untouched.

use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::cell_id::CellId;
use crate::dep_graph::DepGraph;
use crate::error::EngineError;
use crate::formula::{evaluate, CellLookup, Expr};

/// Values computed during a wave, layered over the committed graph.
struct Overlay<'a> {
    graph: &'a DepGraph,
    values: FxHashMap<CellId, f64>,
}

impl CellLookup for Overlay<'_> {
    fn get_value(&self, cell: CellId) -> f64 {
        match self.values.get(&cell) {
            Some(v) => *v,
            None => self.graph.value(cell),
        }
    }
}

/// Result of a successful wave, ready to be committed.
#[derive(Debug, Clone)]
pub struct Wave {
    /// Cells in evaluation order, the edited cell first.
    pub order: Vec<CellId>,
    /// New value of every cell in `order`.
    pub values: FxHashMap<CellId, f64>,
    pub report: RecalcReport,
}

/// Compute the values an edit of `cell` would produce, without changing the graph.
///
/// `ast` is the cell's new formula (`None` for a removal, which evaluates to 0).
/// The affected order comes from the pre-edit graph: changing a cell's formula
/// changes its precedents, never its dependents.
pub fn compute_wave(graph: &DepGraph, cell: CellId, ast: Option<&Expr>) -> Result<Wave, EngineError> {
    let start = Instant::now();
    let order = graph.affected_order(cell).map_err(EngineError::CircularRef)?;

    let mut overlay = Overlay { graph, values: FxHashMap::default() };
    for &current in &order {
        let formula = if current == cell {
            ast
        } else {
            graph.get(current).and_then(|c| c.ast.as_ref())
        };
        let value = match formula {
            Some(expr) => evaluate(expr, &overlay).map_err(|source| EngineError::Eval { cell: current, source })?,
            None => 0.0,
        };
        overlay.values.insert(current, value);
    }

    let changed = order
        .iter()
        .filter(|&&c| overlay.values.get(&c).copied() != Some(graph.value(c)))
        .count();
    let report = RecalcReport {
        duration_us: start.elapsed().as_micros() as u64,
        cells_recomputed: order.len(),
        cells_changed: changed,
    };

    Ok(Wave { order, values: overlay.values, report })
}

/// Summary of one recalculation wave, for logging.
#[derive(Debug, Clone, Default)]
pub struct RecalcReport {
    pub duration_us: u64,
    /// Number of cells evaluated (the edited cell included).
    pub cells_recomputed: usize,
    /// Number of evaluated cells whose value differs from before.
    pub cells_changed: usize,
}

impl RecalcReport {
    /// Format as a one-line log entry.
    ///
    /// Format: `[recalc] 12us  4 cells  changed=3`
    pub fn log_line(&self) -> String {
        format!(
            "[recalc] {}us  {} cells  changed={}",
            self.duration_us, self.cells_recomputed, self.cells_changed
        )
    }
}

/// Report when cycle detection finds a circular reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Cells participating in the cycle, in reference order.
    pub cells: Vec<CellId>,

    /// Human-readable description of the cycle.
    pub message: String,
}

impl CycleReport {
    /// Create a cycle report for a self-referencing cell.
    pub fn self_reference(cell: CellId) -> Self {
        Self {
            cells: vec![cell],
            message: format!("Cell {} references itself", cell),
        }
    }

    /// Create a cycle report for a multi-cell cycle.
    pub fn cycle(cells: Vec<CellId>) -> Self {
        let cell_list: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        let message = match cell_list.as_slice() {
            [] => "Circular reference".to_string(),
            [first, .., last] if cells.len() > 5 => format!(
                "Circular reference involving {} cells: {} → ... → {}",
                cells.len(),
                first,
                last
            ),
            _ => format!("Circular reference: {}", cell_list.join(" → ")),
        };
        Self { cells, message }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CycleReport {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{extract_refs, parse, EvalError};

    fn cell(name: &str) -> CellId {
        CellId::parse(name).unwrap()
    }

    fn commit(graph: &mut DepGraph, at: &str, formula: &str) {
        let ast = parse(formula).unwrap();
        let wave = compute_wave(graph, cell(at), Some(&ast)).unwrap();
        let refs = extract_refs(&ast);
        graph.upsert_expr(cell(at), formula.to_string(), Some(ast), &refs);
        for (id, v) in wave.values {
            graph.set_value(id, v);
        }
    }

    #[test]
    fn test_wave_propagates_through_chain() {
        let mut graph = DepGraph::new();
        commit(&mut graph, "A1", "=5");
        commit(&mut graph, "B1", "=A1+1");
        commit(&mut graph, "C1", "=B1*2");

        let ast = parse("=7").unwrap();
        let wave = compute_wave(&graph, cell("A1"), Some(&ast)).unwrap();
        assert_eq!(wave.order, vec![cell("A1"), cell("B1"), cell("C1")]);
        assert_eq!(wave.values[&cell("B1")], 8.0);
        assert_eq!(wave.values[&cell("C1")], 16.0);
        assert_eq!(wave.report.cells_changed, 3);

        // Nothing committed yet
        assert_eq!(graph.value(cell("C1")), 12.0);
    }

    #[test]
    fn test_wave_diamond_evaluates_each_cell_once() {
        let mut graph = DepGraph::new();
        commit(&mut graph, "A1", "=1");
        commit(&mut graph, "B1", "=A1*2");
        commit(&mut graph, "C1", "=A1*3");
        commit(&mut graph, "D1", "=B1+C1");

        let ast = parse("=2").unwrap();
        let wave = compute_wave(&graph, cell("A1"), Some(&ast)).unwrap();
        assert_eq!(wave.report.cells_recomputed, 4);
        assert_eq!(wave.values[&cell("D1")], 10.0);
    }

    #[test]
    fn test_wave_removal_reads_zero() {
        let mut graph = DepGraph::new();
        commit(&mut graph, "A1", "=5");
        commit(&mut graph, "B1", "=A1+1");

        let wave = compute_wave(&graph, cell("A1"), None).unwrap();
        assert_eq!(wave.values[&cell("A1")], 0.0);
        assert_eq!(wave.values[&cell("B1")], 1.0);
    }

    #[test]
    fn test_wave_eval_error_names_failing_cell() {
        let mut graph = DepGraph::new();
        commit(&mut graph, "A1", "=5");
        commit(&mut graph, "B1", "=1/A1");

        let ast = parse("=0").unwrap();
        let err = compute_wave(&graph, cell("A1"), Some(&ast)).unwrap_err();
        assert_eq!(err, EngineError::Eval { cell: cell("B1"), source: EvalError::DivisionByZero });
    }

    #[test]
    fn test_cycle_report_self_reference() {
        let report = CycleReport::self_reference(cell("A1"));
        assert_eq!(report.cells.len(), 1);
        assert!(report.message.contains("A1"));
        assert!(report.message.contains("itself"));
    }

    #[test]
    fn test_cycle_report_two_cells() {
        let report = CycleReport::cycle(vec![cell("A1"), cell("B1")]);
        assert_eq!(report.message, "Circular reference: A1 → B1");
    }

    #[test]
    fn test_cycle_report_many_cells() {
        let cells: Vec<CellId> = (0..10).map(|row| CellId::new(row, 0)).collect();
        let report = CycleReport::cycle(cells);
        assert!(report.message.contains("10 cells"));
        assert!(report.message.contains("A1"));
        assert!(report.message.contains("A10"));
    }
}
