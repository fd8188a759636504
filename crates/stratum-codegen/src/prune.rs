//! Pruning passes: drop refinements and indices nothing references.

use std::collections::HashSet;

use stratum_ir::{Block, Tags};

use crate::alias::run_on_blocks;
use crate::error::CodegenError;

fn prune_refs_in(block: &mut Block) {
    let mut used: HashSet<String> = HashSet::new();
    for stmt in &block.stmts {
        for name in stmt.buffer_reads() {
            used.insert(name.to_string());
        }
        for name in stmt.buffer_writes() {
            used.insert(name.to_string());
        }
    }
    block.refs.retain(|r| used.contains(&r.into));
}

/// Drops refinements of matching blocks that no direct child statement
/// mentions.
pub fn prune_refs_pass(root: &mut Block, reqs: &Tags) -> Result<(), CodegenError> {
    run_on_blocks(root, reqs, |_map, block| {
        prune_refs_in(block);
        Ok(())
    })
}

/// Returns `true` if any access, constraint, or child affine mentions `name`.
fn idx_is_referenced(block: &Block, name: &str) -> bool {
    let in_affine = |affine: &stratum_ir::Affine| affine.get(name) != 0;
    block
        .refs
        .iter()
        .any(|r| r.access.iter().any(in_affine))
        || block.constraints.iter().any(in_affine)
        || block.stmts.iter().any(|stmt| {
            stmt.as_block()
                .is_some_and(|inner| inner.idxs.iter().any(|idx| in_affine(&idx.affine)))
        })
}

fn prune_idxs_in(block: &mut Block) {
    let removable: HashSet<String> = block
        .idxs
        .iter()
        .filter(|idx| idx.range <= 1 && idx.affine.is_zero())
        .filter(|idx| !idx_is_referenced(block, &idx.name))
        .map(|idx| idx.name.clone())
        .collect();
    block.idxs.retain(|idx| !removable.contains(&idx.name));
}

/// Drops indices of matching blocks whose iteration space is a single point
/// and that nothing references.
pub fn prune_idxs_pass(root: &mut Block, reqs: &Tags) -> Result<(), CodegenError> {
    run_on_blocks(root, reqs, |_map, block| {
        prune_idxs_in(block);
        Ok(())
    })
}
