//! Dependency graph for spreadsheet cells.
//!
//! The graph is an arena of [`Cell`] records keyed by [`CellId`]. Each record
//! carries its formula, its last computed value and both edge directions.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! This makes "what breaks if I change X?" trivial: follow `dependents`.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_id::CellId;
use crate::formula::{CellLookup, Expr};
use crate::recalc::CycleReport;

/// One arena record.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    /// Formula text as last set. Empty for placeholder cells.
    pub expr: String,
    /// Parsed form of `expr`; `None` iff `expr` is empty.
    pub ast: Option<Expr>,
    /// Last computed value.
    pub value: f64,
    /// Cells whose formulas reference this cell.
    pub dependents: FxHashSet<CellId>,
    /// Cells this cell's formula references.
    pub precedents: FxHashSet<CellId>,
}

impl Cell {
    fn is_placeholder(&self) -> bool {
        self.expr.is_empty()
    }
}

/// Arena-backed dependency graph.
///
/// # Invariants
///
/// 1. **Bidirectional consistency:** X ∈ Y.precedents iff Y ∈ X.dependents.
/// 2. **Acyclic:** callers check `would_create_cycle` before `upsert_expr`.
/// 3. **Tidy arena:** a cell with an empty expr exists only while it has
///    dependents. Placeholders are created when first referenced and pruned
///    when their last dependent drops the reference.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    cells: FxHashMap<CellId, Cell>,
}

impl DepGraph {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cell: CellId) -> Option<&Cell> {
        self.cells.get(&cell)
    }

    /// Current value of a cell; absent cells read as 0.
    pub fn value(&self, cell: CellId) -> f64 {
        self.cells.get(&cell).map_or(0.0, |c| c.value)
    }

    /// Formula text of a cell; absent cells read as "".
    pub fn expr(&self, cell: CellId) -> &str {
        self.cells.get(&cell).map_or("", |c| c.expr.as_str())
    }

    /// Store a computed value. Returns false if the cell is not in the arena.
    pub fn set_value(&mut self, cell: CellId, value: f64) -> bool {
        match self.cells.get_mut(&cell) {
            Some(c) => {
                c.value = value;
                true
            }
            None => false,
        }
    }

    /// Returns the cells this cell's formula references (precedents).
    pub fn precedents(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.cells
            .get(&cell)
            .into_iter()
            .flat_map(|c| c.precedents.iter().copied())
    }

    /// Returns the cells that reference this cell (dependents).
    pub fn dependents(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.cells
            .get(&cell)
            .into_iter()
            .flat_map(|c| c.dependents.iter().copied())
    }

    /// Number of cells in the arena, placeholders included.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, &Cell)> + '_ {
        self.cells.iter().map(|(id, c)| (*id, c))
    }

    /// Replace a cell's formula and rewire its precedent edges.
    ///
    /// This is the only mutator that touches edges. It:
    /// 1. Removes the cell from each old precedent that is not in `refs`
    /// 2. Adds the cell to each new precedent, materializing placeholders
    /// 3. Stores expr, ast and the new precedent set
    /// 4. Prunes whatever became an orphan placeholder, the cell included
    ///
    /// Pass an empty expr with `None` and no refs to clear the cell.
    /// The value is left untouched; the caller writes the recomputed value.
    pub fn upsert_expr(&mut self, cell: CellId, expr: String, ast: Option<Expr>, refs: &[CellId]) {
        let new_preds: FxHashSet<CellId> = refs.iter().copied().collect();

        let old_preds = self
            .cells
            .get_mut(&cell)
            .map(|c| std::mem::take(&mut c.precedents))
            .unwrap_or_default();

        // Step 1: Drop edges that are going away
        for pred in old_preds.difference(&new_preds) {
            if let Some(p) = self.cells.get_mut(pred) {
                p.dependents.remove(&cell);
            }
            self.prune(*pred);
        }

        // Step 2: Add new edges
        for pred in &new_preds {
            self.cells.entry(*pred).or_default().dependents.insert(cell);
        }

        // Step 3: Store the formula
        let record = self.cells.entry(cell).or_default();
        record.expr = expr;
        record.ast = ast;
        record.precedents = new_preds;

        // Step 4: An emptied cell nobody references leaves the arena
        self.prune(cell);
    }

    /// Clear a cell's formula and edges, resetting its value to 0.
    ///
    /// The record survives as a placeholder while other cells reference it.
    pub fn remove(&mut self, cell: CellId) {
        self.upsert_expr(cell, String::new(), None, &[]);
        self.set_value(cell, 0.0);
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    fn prune(&mut self, cell: CellId) {
        if self
            .cells
            .get(&cell)
            .is_some_and(|c| c.is_placeholder() && c.dependents.is_empty())
        {
            self.cells.remove(&cell);
        }
    }

    // =========================================================================
    // Cycle Detection
    // =========================================================================

    /// Check if giving `cell` the precedents `refs` would create a cycle.
    ///
    /// Does not modify the graph. Returns `Some(CycleReport)` if a cycle would
    /// be introduced, `None` otherwise.
    ///
    /// # Algorithm
    ///
    /// A cycle is created if any of `refs` can be reached from `cell` by
    /// following dependent edges. Iterative DFS over the pre-edit graph, so
    /// the walk visits each cell at most once.
    pub fn would_create_cycle(&self, cell: CellId, refs: &[CellId]) -> Option<CycleReport> {
        if refs.contains(&cell) {
            return Some(CycleReport::self_reference(cell));
        }

        let targets: FxHashSet<CellId> = refs.iter().copied().collect();
        let mut parent: FxHashMap<CellId, CellId> = FxHashMap::default();
        let mut visited = FxHashSet::default();
        let mut stack = vec![cell];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }

            for dep in self.dependents(current) {
                if visited.contains(&dep) {
                    continue;
                }
                parent.entry(dep).or_insert(current);
                if targets.contains(&dep) {
                    return Some(CycleReport::cycle(reference_chain(cell, dep, &parent)));
                }
                stack.push(dep);
            }
        }

        None
    }

    // =========================================================================
    // Topological Ordering
    // =========================================================================

    /// `cell` followed by all of its transitive dependents, precedents first.
    ///
    /// Ties between cells that become ready together are broken by
    /// `(row, col)` for deterministic evaluation order.
    pub fn affected_order(&self, cell: CellId) -> Result<Vec<CellId>, CycleReport> {
        let mut affected = FxHashSet::default();
        let mut stack = vec![cell];
        while let Some(current) = stack.pop() {
            if affected.insert(current) {
                stack.extend(self.dependents(current));
            }
        }
        self.topo_order_within(&affected)
    }

    /// Topological order of every cell in the arena.
    ///
    /// - `Ok(order)` - precedents before dependents
    /// - `Err(CycleReport)` - the cells Kahn's algorithm could not release,
    ///   in `(row, col)` order
    pub fn topo_order(&self) -> Result<Vec<CellId>, CycleReport> {
        let all: FxHashSet<CellId> = self.cells.keys().copied().collect();
        self.topo_order_within(&all)
    }

    /// Kahn's algorithm restricted to `nodes`. Edges leaving the set are ignored.
    fn topo_order_within(&self, nodes: &FxHashSet<CellId>) -> Result<Vec<CellId>, CycleReport> {
        let mut in_degree: FxHashMap<CellId, usize> = FxHashMap::default();
        for &cell in nodes {
            let count = self.precedents(cell).filter(|p| nodes.contains(p)).count();
            in_degree.insert(cell, count);
        }

        // BTreeSet pops the smallest (row, col) first
        let mut ready: BTreeSet<CellId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&cell, _)| cell)
            .collect();

        let mut result = Vec::with_capacity(nodes.len());

        while let Some(cell) = ready.pop_first() {
            result.push(cell);

            for dep in self.dependents(cell) {
                if let Some(deg) = in_degree.get_mut(&dep) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.insert(dep);
                    }
                }
            }
        }

        if result.len() < nodes.len() {
            let released: FxHashSet<CellId> = result.into_iter().collect();
            let mut blocked: Vec<CellId> = nodes.iter().filter(|c| !released.contains(c)).copied().collect();
            blocked.sort();
            return Err(CycleReport::cycle(blocked));
        }

        Ok(result)
    }

    /// Check all invariants. Panics if any are violated.
    ///
    /// Only available in test builds.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        use crate::formula::extract_refs;

        for (id, cell) in &self.cells {
            // Invariant 1: Bidirectional consistency (precedents → dependents)
            for pred in &cell.precedents {
                assert!(
                    self.cells.get(pred).is_some_and(|p| p.dependents.contains(id)),
                    "Missing dependent edge: {} should have {} in dependents",
                    pred,
                    id
                );
            }

            // Invariant 1: Bidirectional consistency (dependents → precedents)
            for dep in &cell.dependents {
                assert!(
                    self.cells.get(dep).is_some_and(|d| d.precedents.contains(id)),
                    "Missing precedent edge: {} should have {} in precedents",
                    dep,
                    id
                );
            }

            // Invariant 3: Tidy arena
            assert!(
                !cell.is_placeholder() || !cell.dependents.is_empty(),
                "Orphan placeholder stored for {}",
                id
            );

            // Record shape: ast present iff expr present, precedents match the ast
            assert_eq!(cell.ast.is_some(), !cell.expr.is_empty(), "expr/ast mismatch for {}", id);
            let expected: FxHashSet<CellId> =
                cell.ast.as_ref().map(extract_refs).unwrap_or_default().into_iter().collect();
            assert_eq!(cell.precedents, expected, "precedents out of date for {}", id);
        }

        // Invariant 2: Acyclic
        assert!(self.topo_order().is_ok(), "graph contains a cycle");
    }
}

impl CellLookup for DepGraph {
    fn get_value(&self, cell: CellId) -> f64 {
        self.value(cell)
    }
}

/// Walk `parent` links back from `hit` to `start`, then return the chain in
/// reference order: `start` references `hit`, which references ... back to `start`.
fn reference_chain(start: CellId, hit: CellId, parent: &FxHashMap<CellId, CellId>) -> Vec<CellId> {
    let mut chain = vec![start];
    let mut current = hit;
    while current != start {
        chain.push(current);
        match parent.get(&current) {
            Some(&p) => current = p,
            None => break,
        }
    }
    chain
}
