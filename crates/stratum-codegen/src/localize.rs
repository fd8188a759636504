//! Buffer localization.
//!
//! `fixup_refs` re-binds inner views after a refinement changes its storage
//! (new location, offset, or strides). The localize pass sinks allocations
//! used by a single nested block down into that block.

use stratum_ir::{Affine, Block, RefDir, Tags};

use crate::alias::run_on_blocks;
use crate::error::CodegenError;

/// Propagates `name`'s location, offset, banking, and strides into every
/// nested view that borrows it, recursing through renamed inner views.
pub fn fixup_refs(block: &mut Block, name: &str) -> Result<(), CodegenError> {
    let Ok(outer) = block.ref_by_into(name) else {
        return Ok(());
    };
    let location = outer.location.clone();
    let offset = outer.offset;
    let bank_dim = outer.bank_dim;
    let strides: Vec<i64> = outer.interior_shape.dims.iter().map(|d| d.stride).collect();

    for stmt in &mut block.stmts {
        let Some(inner) = stmt.as_block_mut() else {
            continue;
        };
        let mut renamed = Vec::new();
        for r in &mut inner.refs {
            if r.from != name {
                continue;
            }
            r.location = location.clone();
            r.offset = offset;
            r.bank_dim = bank_dim;
            for (dim, &stride) in r.interior_shape.dims.iter_mut().zip(&strides) {
                dim.stride = stride;
            }
            renamed.push(r.into.clone());
        }
        for inner_name in renamed {
            fixup_refs(inner, &inner_name)?;
        }
    }
    Ok(())
}

/// Sinks a local allocation into the one nested block that uses it.
///
/// The inner view becomes the allocation; the outer refinement disappears.
fn localize_ref(block: &mut Block, name: &str) -> Result<(), CodegenError> {
    let Some(pos) = block.refs.iter().position(|r| r.into == name) else {
        return Ok(());
    };
    let outer = block.refs[pos].clone();
    for stmt in &mut block.stmts {
        let Some(inner) = stmt.as_block_mut() else {
            continue;
        };
        let mut sunk = Vec::new();
        for r in &mut inner.refs {
            if r.from != name {
                continue;
            }
            r.dir = RefDir::None;
            r.from = String::new();
            r.location = outer.location.clone();
            r.access = vec![Affine::zero(); r.access.len()];
            sunk.push(r.into.clone());
        }
        for inner_name in sunk {
            fixup_refs(inner, &inner_name)?;
        }
    }
    block.refs.remove(pos);
    Ok(())
}

/// For each matching block, moves allocations consumed by exactly one nested
/// block down into that block.
pub fn localize_pass(root: &mut Block, reqs: &Tags) -> Result<(), CodegenError> {
    run_on_blocks(root, reqs, |map, block| {
        let counts = map.ref_use_counts(block);
        let candidates: Vec<String> = block
            .refs
            .iter()
            .filter(|r| r.dir == RefDir::None)
            .filter(|r| counts.get(&r.into).copied().unwrap_or(0) == 1)
            .filter(|r| {
                block.stmts.iter().any(|stmt| {
                    stmt.as_block().is_some()
                        && (stmt.buffer_reads().contains(&r.into.as_str())
                            || stmt.buffer_writes().contains(&r.into.as_str()))
                })
            })
            .map(|r| r.into.clone())
            .collect();
        for name in candidates {
            localize_ref(block, &name)?;
        }
        Ok(())
    })
}
