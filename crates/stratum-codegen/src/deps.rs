//! Statement dependency computation.
//!
//! Rebuilds the `deps` edges of a block's statement list from its buffer and
//! scalar accesses: read-after-write, write-after-write, write-after-read,
//! and scalar def/use chains, transitively reduced so every edge is a direct
//! predecessor.

use std::collections::{BTreeSet, HashMap, HashSet};

use stratum_ir::{Block, Tags};

use crate::alias::run_on_blocks;
use crate::error::CodegenError;

/// Removes edges already implied by a chain of other edges.
///
/// `deps[i]` must only contain indices less than `i`.
pub(crate) fn transitive_reduce(deps: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let mut reach: Vec<HashSet<usize>> = Vec::with_capacity(deps.len());
    for set in deps {
        let mut r: HashSet<usize> = HashSet::new();
        for &d in set {
            r.insert(d);
            r.extend(reach[d].iter().copied());
        }
        reach.push(r);
    }
    deps.iter()
        .map(|set| {
            set.iter()
                .copied()
                .filter(|&d| !set.iter().any(|&other| other != d && reach[other].contains(&d)))
                .collect()
        })
        .collect()
}

/// Recomputes every statement's deps within `block` from its accesses.
pub fn compute_deps(block: &mut Block) {
    let n = block.stmts.len();
    let mut raw: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];

    // Last writer and readers-since-last-write per buffer name.
    let mut buf_writer: HashMap<String, usize> = HashMap::new();
    let mut buf_readers: HashMap<String, Vec<usize>> = HashMap::new();
    // Defining statement per scalar name.
    let mut scalar_def: HashMap<String, usize> = HashMap::new();

    for (i, stmt) in block.stmts.iter().enumerate() {
        for name in stmt.buffer_reads() {
            if let Some(&w) = buf_writer.get(name) {
                raw[i].insert(w);
            }
            buf_readers.entry(name.to_string()).or_default().push(i);
        }
        for name in stmt.scalar_uses() {
            if let Some(&d) = scalar_def.get(name) {
                raw[i].insert(d);
            }
        }
        for name in stmt.buffer_writes() {
            if let Some(&w) = buf_writer.get(name) {
                raw[i].insert(w);
            }
            for &r in buf_readers.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                if r != i {
                    raw[i].insert(r);
                }
            }
            buf_readers.insert(name.to_string(), Vec::new());
            buf_writer.insert(name.to_string(), i);
        }
        for name in stmt.scalar_defs() {
            scalar_def.insert(name.to_string(), i);
        }
    }

    let reduced = transitive_reduce(&raw);
    for (stmt, deps) in block.stmts.iter_mut().zip(reduced) {
        *stmt.deps_mut() = deps;
    }
}

/// Recomputes statement deps for every block matching `reqs`.
pub fn compute_deps_pass(root: &mut Block, reqs: &Tags) -> Result<(), CodegenError> {
    run_on_blocks(root, reqs, |_map, block| {
        compute_deps(block);
        Ok(())
    })
}
