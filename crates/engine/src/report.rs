//! Presentation layer: serializable snapshots of the learned state and
//! plain-text rendering of the execution tree and timing tables.
//!
//! Everything here is derived from the queryable engine state and has
//! no effect on tuning correctness.

use crate::problem::ProblemSize;
use crate::runtime::RuntimeInner;
use crate::state::SelectionState;
use crate::tree::{ExecutionTree, NodeData, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// Learned state for one problem size of one registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeSnapshot {
    pub size: ProblemSize,
    /// Median elapsed seconds per alternative; `null` when an
    /// alternative has no accepted samples.
    pub medians: Vec<Option<f64>>,
    pub samples: Vec<usize>,
    pub best: Option<usize>,
    pub speedup: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub name: String,
    pub alternatives: Vec<String>,
    pub sizes: Vec<SizeSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub registries: Vec<RegistrySnapshot>,
}

impl RuntimeSnapshot {
    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let blob = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&blob)?)
    }
}

pub(crate) fn snapshot(inner: &RuntimeInner) -> RuntimeSnapshot {
    let registries = inner
        .registries
        .iter()
        .map(|state| {
            let state = state.borrow();
            let sizes = state
                .problem_sizes()
                .into_iter()
                .map(|size| SizeSnapshot {
                    medians: state.medians(&size),
                    samples: state.sample_counts(&size),
                    best: state.best(&size),
                    speedup: state.speedup(&size),
                    size,
                })
                .collect();
            RegistrySnapshot {
                name: state.name.clone(),
                alternatives: state.alternative_names.clone(),
                sizes,
            }
        })
        .collect();
    RuntimeSnapshot { registries }
}

/// Percentage distribution over alternatives of the best choices for
/// the problem sizes this node has seen.
fn node_summary(node: &NodeData, state: &SelectionState) -> String {
    let best: Vec<usize> = node
        .problem_sizes
        .keys()
        .filter_map(|size| state.best(size))
        .collect();
    let total = best.len();
    let mut counts = vec![0usize; state.alternative_names.len()];
    for index in &best {
        counts[*index] += 1;
    }
    let parts: Vec<String> = state
        .alternative_names
        .iter()
        .zip(&counts)
        .map(|(name, count)| {
            if total == 0 {
                format!("{name}: ---")
            } else {
                format!("{name}: {:.0}%", (count * 100) as f64 / total as f64)
            }
        })
        .collect();
    format!("{} of {total} sizes", parts.join(" "))
}

/// Mean of the converged per-size speedups seen through this node,
/// weighted by how often the node saw each size.
fn node_max_speedup(node: &NodeData, state: &SelectionState) -> Option<f64> {
    let mut total = 0u64;
    let mut weighted = 0.0;
    for (size, count) in &node.problem_sizes {
        if let Some(speedup) = state.speedup(size) {
            weighted += speedup * *count as f64;
            total += count;
        }
    }
    if total == 0 {
        None
    } else {
        Some(weighted / total as f64)
    }
}

pub(crate) fn render_tree(inner: &RuntimeInner) -> String {
    let mut out = String::from("Execution graph\n");
    walk_tree(inner, &inner.tree, ExecutionTree::ROOT, 1, &mut out);
    out
}

fn walk_tree(
    inner: &RuntimeInner,
    tree: &ExecutionTree,
    id: NodeId,
    depth: usize,
    out: &mut String,
) {
    for &child in &tree.node(id).children {
        let node = tree.node(child);
        let _ = write!(out, "{}{}", "  ".repeat(depth), node.name);
        if let Some(registry) = node.registry {
            let state = inner.registries[registry].borrow();
            let _ = write!(out, " [{}]", node_summary(node, &state));
            if let Some(speedup) = node_max_speedup(node, &state) {
                let _ = write!(out, " max speedup: {speedup:.1}");
            }
        }
        out.push('\n');
        walk_tree(inner, tree, child, depth + 1, out);
    }
}

/// Timing table for one registry: one row per problem size with the
/// median per alternative, the winner marked with `*`, and the speedup.
/// When `node` is given, rows are filtered to the sizes that node has
/// seen and a call-count column is prepended.
pub(crate) fn render_registry_table(state: &SelectionState, node: Option<&NodeData>) -> String {
    let mut header = vec!["size".to_string()];
    if node.is_some() {
        header.push("count".to_string());
    }
    header.extend(state.alternative_names.iter().cloned());
    header.push("speedup".to_string());

    let mut rows = vec![header];
    for size in state.problem_sizes() {
        let counts = match node {
            Some(node) => match node.problem_sizes.get(&size) {
                Some(count) => Some(*count),
                None => continue,
            },
            None => None,
        };
        let mut row = vec![size.to_string()];
        if let Some(count) = counts {
            row.push(count.to_string());
        }
        let best = state.best(&size);
        for (index, median) in state.medians(&size).iter().enumerate() {
            let cell = match median {
                Some(m) => format!("{m:.4}"),
                None => "---".to_string(),
            };
            row.push(if best == Some(index) {
                format!("*{cell}")
            } else {
                cell
            });
        }
        row.push(match state.speedup(&size) {
            Some(speedup) => format!("{speedup:.1}"),
            None => String::new(),
        });
        rows.push(row);
    }

    let caption = match node {
        Some(node) => node.name.clone(),
        None => state.name.clone(),
    };
    format!("{}{caption}\n", align_columns(&rows))
}

pub(crate) fn render_tables(inner: &RuntimeInner) -> String {
    let mut out = String::new();
    walk_tables(inner, &inner.tree, ExecutionTree::ROOT, &mut out);
    out
}

fn walk_tables(inner: &RuntimeInner, tree: &ExecutionTree, id: NodeId, out: &mut String) {
    for &child in &tree.node(id).children {
        let node = tree.node(child);
        if let Some(registry) = node.registry {
            let state = inner.registries[registry].borrow();
            out.push_str(&render_registry_table(&state, Some(node)));
            out.push('\n');
        }
        walk_tables(inner, tree, child, out);
    }
}

fn align_columns(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            widths[index] = widths[index].max(cell.len());
        }
    }
    let mut out = String::new();
    for row in rows {
        let mut line = String::new();
        for (index, cell) in row.iter().enumerate() {
            if index == 0 {
                let _ = write!(line, "{cell:<width$}", width = widths[0]);
            } else {
                let _ = write!(line, "  {cell:>width$}", width = widths[index]);
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
