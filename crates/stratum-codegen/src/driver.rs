//! The pass driver: runs a configured pipeline over a block tree.

use std::fs;
use std::path::PathBuf;

use stratum_ir::{proto as ir_proto, Block, Location, RefDir, Tags};

use crate::cache::{cache_pass, CacheOptions};
use crate::deps::compute_deps_pass;
use crate::error::CodegenError;
use crate::locate::{
    locate_block_pass, locate_inner_block_pass, locate_memory_pass, LocateOptions,
};
use crate::localize::localize_pass;
use crate::proto;
use crate::prune::{prune_idxs_pass, prune_refs_pass};
use crate::schedule::{schedule_pass, ScheduleOptions};

/// Driver knobs that are not part of the pass pipeline itself.
#[derive(Clone, Debug, Default)]
pub struct OptimizeOptions {
    /// Write the textual IR to `dbg_dir` after every pass.
    pub dump_passes: bool,
    pub dbg_dir: PathBuf,
}

fn dump_program(
    block: &Block,
    options: &OptimizeOptions,
    name: &str,
    counter: usize,
) -> Result<(), CodegenError> {
    if options.dump_passes {
        fs::create_dir_all(&options.dbg_dir)?;
        let path = options.dbg_dir.join(format!("{counter:02}_{name}.txt"));
        fs::write(path, block.to_string())?;
    }
    Ok(())
}

fn reqs_from(reqs: &[String]) -> Tags {
    reqs.iter().cloned().collect()
}

fn location_from(
    loc: Option<&proto::Location>,
    pass: &str,
    field: &str,
) -> Result<Location, CodegenError> {
    if loc.is_none() {
        return Err(CodegenError::InvalidOptions {
            name: pass.to_string(),
            reason: format!("missing {field}"),
        });
    }
    Ok(ir_proto::location_from_proto(loc))
}

fn dir_from(value: i32, pass: &str) -> Result<RefDir, CodegenError> {
    Ok(match value {
        ir_proto::ref_dir::NONE => RefDir::None,
        ir_proto::ref_dir::IN => RefDir::In,
        ir_proto::ref_dir::OUT => RefDir::Out,
        ir_proto::ref_dir::INOUT => RefDir::InOut,
        other => {
            return Err(CodegenError::InvalidOptions {
                name: pass.to_string(),
                reason: format!("invalid dir value {other}"),
            })
        }
    })
}

fn run_pass(block: &mut Block, pass: &proto::Pass) -> Result<(), CodegenError> {
    let kind = pass.kind.as_ref().ok_or_else(|| CodegenError::UnknownPass {
        name: pass.name.clone(),
    })?;
    match kind {
        proto::pass::Kind::Cache(opts) => {
            let dirs = opts
                .dirs
                .iter()
                .map(|&d| dir_from(d, &pass.name))
                .collect::<Result<Vec<_>, _>>()?;
            cache_pass(
                block,
                &CacheOptions {
                    reqs: reqs_from(&opts.reqs),
                    dirs,
                    mem_loc: location_from(opts.mem_loc.as_ref(), &pass.name, "mem_loc")?,
                    xfer_loc: location_from(opts.xfer_loc.as_ref(), &pass.name, "xfer_loc")?,
                },
            )
        }
        proto::pass::Kind::Schedule(opts) => schedule_pass(
            block,
            &ScheduleOptions {
                reqs: reqs_from(&opts.reqs),
                mem_loc: location_from(opts.mem_loc.as_ref(), &pass.name, "mem_loc")?,
                mem_kib: opts.mem_kib,
                alignment: opts.alignment,
                xfer_loc: location_from(opts.xfer_loc.as_ref(), &pass.name, "xfer_loc")?,
            },
        ),
        proto::pass::Kind::ComputeDeps(opts) => {
            compute_deps_pass(block, &reqs_from(&opts.reqs))
        }
        proto::pass::Kind::Localize(opts) => localize_pass(block, &reqs_from(&opts.reqs)),
        proto::pass::Kind::LocateBlock(opts) => locate_block_pass(
            block,
            &LocateOptions {
                reqs: reqs_from(&opts.reqs),
                loc: location_from(opts.loc.as_ref(), &pass.name, "loc")?,
            },
        ),
        proto::pass::Kind::LocateInnerBlock(opts) => locate_inner_block_pass(
            block,
            &LocateOptions {
                reqs: reqs_from(&opts.reqs),
                loc: location_from(opts.loc.as_ref(), &pass.name, "loc")?,
            },
        ),
        proto::pass::Kind::LocateMemory(opts) => locate_memory_pass(
            block,
            &LocateOptions {
                reqs: reqs_from(&opts.reqs),
                loc: location_from(opts.loc.as_ref(), &pass.name, "loc")?,
            },
        ),
        proto::pass::Kind::PruneIdxs(opts) => prune_idxs_pass(block, &reqs_from(&opts.reqs)),
        proto::pass::Kind::PruneRefs(opts) => prune_refs_pass(block, &reqs_from(&opts.reqs)),
    }
}

/// Runs the configured pipeline over `block`, mutating it in place.
///
/// Each pass observes the IR as left by its predecessors; the first error
/// stops the pipeline.
pub fn optimize(
    block: &mut Block,
    config: &proto::Config,
    options: &OptimizeOptions,
) -> Result<(), CodegenError> {
    let mut counter = 0usize;
    dump_program(block, options, "initial", counter)?;
    counter += 1;
    for pass in &config.passes {
        log::info!("optimization pass {}", pass.name);
        run_pass(block, pass)?;
        dump_program(block, options, &pass.name, counter)?;
        counter += 1;
    }
    Ok(())
}
