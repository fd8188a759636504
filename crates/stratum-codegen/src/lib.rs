//! Optimization passes over the Stratum block IR.
//!
//! Provides the alias analysis ([`AliasMap`]), the pass driver
//! ([`optimize`]), and the built-in passes: scratchpad cache insertion,
//! scheduling, dependency computation, localization, location assignment,
//! and pruning.

pub mod alias;
pub mod cache;
pub mod deps;
mod driver;
mod error;
pub mod locate;
pub mod localize;
pub mod proto;
pub mod prune;
pub mod schedule;

pub use alias::{check_overlap, run_on_blocks, AliasInfo, AliasMap, AliasType, Extent};
pub use cache::{apply_cache, cache_block, cache_pass, CacheOptions};
pub use deps::compute_deps_pass;
pub use driver::{optimize, OptimizeOptions};
pub use error::CodegenError;
pub use locate::{locate_block_pass, locate_inner_block_pass, locate_memory_pass, LocateOptions};
pub use localize::{fixup_refs, localize_pass};
pub use prune::{prune_idxs_pass, prune_refs_pass};
pub use schedule::{schedule_pass, ScheduleOptions};
