//! Scratchpad cache insertion.
//!
//! Rewrites a block so that one of its refinements is materialized in a local
//! scratchpad: the original view is renamed to `<name>_raw`, a dense
//! allocation takes over the original name, and elementwise transfer
//! sub-blocks move data between the two.

use stratum_ir::{
    tags, Affine, Block, Index, Load, Location, RefDir, Refinement, Statement, Store, Tags,
    TensorShape,
};

use crate::alias::run_on_blocks;
use crate::error::CodegenError;
use crate::localize::fixup_refs;

/// Options for the cache pass.
#[derive(Clone, Debug)]
pub struct CacheOptions {
    pub reqs: Tags,
    pub dirs: Vec<RefDir>,
    pub mem_loc: Location,
    pub xfer_loc: Location,
}

/// Materializes `var_name` into a scratchpad at `mem_loc`, with transfer
/// sub-blocks at `xfer_loc`.
pub fn apply_cache(
    block: &mut Block,
    var_name: &str,
    mem_loc: &Location,
    xfer_loc: &Location,
) -> Result<(), CodegenError> {
    let raw_name = block.unique_ref_name(&format!("{var_name}_raw"));
    let raw = block.ref_by_into_mut(var_name)?;
    let raw_shape = raw.interior_shape.clone();
    let raw_dir = raw.dir;
    let sizes = raw_shape.sizes();
    let cached_shape = TensorShape::simple(raw_shape.ty, &sizes);

    // The original refinement keeps everything but its name.
    raw.into = raw_name.clone();
    let raw = block.ref_by_into(&raw_name)?.clone();

    // Transfer template: one index per non-unit dimension, both sides
    // initially viewing the cached buffer one element at a time. The caller
    // below redirects one side to the raw view per transfer direction.
    let mut xfer = Block::new("");
    xfer.location = xfer_loc.clone();
    let mut access = Vec::with_capacity(sizes.len());
    for (i, &size) in sizes.iter().enumerate() {
        if size > 1 {
            let iname = format!("i{i}");
            xfer.idxs.push(Index::new(iname.clone(), size));
            access.push(Affine::from(iname.as_str()));
        } else {
            access.push(Affine::zero());
        }
    }
    let raw_xfer_shape = raw_shape.with_unit_sizes();
    let cached_xfer_shape = cached_shape.with_unit_sizes();
    for (dir, into) in [(RefDir::In, "src"), (RefDir::Out, "dst")] {
        xfer.refs.push(Refinement {
            dir,
            from: var_name.to_string(),
            into: into.to_string(),
            access: access.clone(),
            interior_shape: cached_xfer_shape.clone(),
            location: raw.location.clone(),
            ..Refinement::default()
        });
    }
    xfer.stmts.push(Statement::Load(Load::new("src", "$X")));
    xfer.stmts.push(Statement::Store(Store::new("$X", "dst")));

    // The raw side carries the external view's addressing; the cached side
    // addresses the fresh dense allocation.
    let redirect_to_raw = |r: &mut Refinement| {
        r.from = raw_name.clone();
        r.interior_shape = raw_xfer_shape.clone();
        r.is_const = raw.is_const;
        r.offset = raw.offset;
        r.bank_dim = raw.bank_dim;
    };

    // An input is loaded into the cache before everything else.
    if raw_dir.is_read() {
        let mut load = xfer.clone();
        load.name = format!("load_{var_name}");
        load.tags = tags(["cache", "cache_load"]);
        redirect_to_raw(&mut load.refs[0]);
        load.refs[1].location = mem_loc.clone();
        block.stmts.insert(0, Statement::from(load));
    }
    // An output is flushed from the cache after everything else.
    if raw_dir.is_write() {
        let mut store = xfer;
        store.name = format!("store_{var_name}");
        store.tags = tags(["cache", "cache_store"]);
        redirect_to_raw(&mut store.refs[1]);
        store.refs[0].location = mem_loc.clone();
        block.stmts.push(Statement::from(store));
    }

    // The cached allocation takes over the original name.
    block.refs.push(Refinement {
        dir: RefDir::None,
        into: var_name.to_string(),
        access: vec![Affine::zero(); cached_shape.dims.len()],
        interior_shape: cached_shape,
        location: mem_loc.clone(),
        ..Refinement::default()
    });

    fixup_refs(block, var_name)?;
    Ok(())
}

/// Caches every refinement of `block` whose direction is in `dirs`.
pub fn cache_block(
    block: &mut Block,
    dirs: &[RefDir],
    mem_loc: &Location,
    xfer_loc: &Location,
) -> Result<(), CodegenError> {
    // apply_cache mutates block.refs, so iterate a snapshot of the names.
    let names: Vec<(String, RefDir)> = block
        .refs
        .iter()
        .map(|r| (r.into.clone(), r.dir))
        .collect();
    for (name, dir) in names {
        if dirs.contains(&dir) {
            apply_cache(block, &name, mem_loc, xfer_loc)?;
        }
    }
    Ok(())
}

/// Runs cache insertion on every block matching `options.reqs`.
pub fn cache_pass(root: &mut Block, options: &CacheOptions) -> Result<(), CodegenError> {
    run_on_blocks(root, &options.reqs, |_map, block| {
        cache_block(block, &options.dirs, &options.mem_loc, &options.xfer_loc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_ir::DataType;

    /// A kernel block viewing `v` (16 f32, read) plus an inner consumer.
    fn kernel_with_ref(dir: RefDir) -> Block {
        let mut inner = Block::new("compute");
        inner.refs.push(Refinement {
            dir,
            from: "v".into(),
            into: "v".into(),
            access: vec![Affine::zero()],
            interior_shape: TensorShape::simple(DataType::F32, &[16]),
            location: Location::new("RAM"),
            ..Refinement::default()
        });

        let mut block = Block::new("kernel");
        block.refs.push(Refinement {
            dir,
            from: "v".into(),
            into: "v".into(),
            access: vec![Affine::zero()],
            interior_shape: TensorShape::simple(DataType::F32, &[16]),
            location: Location::new("RAM"),
            ..Refinement::default()
        });
        block.stmts.push(Statement::from(inner));
        block
    }

    #[test]
    fn cache_in_ref_prepends_load() {
        let mut block = kernel_with_ref(RefDir::In);
        apply_cache(
            &mut block,
            "v",
            &Location::new("CACHE"),
            &Location::new("DMA"),
        )
        .unwrap();

        // The original view was renamed and a cached allocation took its name.
        let raw = block.ref_by_into("v_raw").unwrap();
        assert_eq!(raw.dir, RefDir::In);
        assert_eq!(raw.location.name, "RAM");
        let cached = block.ref_by_into("v").unwrap();
        assert_eq!(cached.dir, RefDir::None);
        assert_eq!(cached.location.name, "CACHE");
        assert_eq!(cached.interior_shape.sizes(), vec![16]);

        // A load block was prepended; no store block was appended.
        let load = block.sub_block(0).unwrap();
        assert_eq!(load.name, "load_v");
        assert!(load.has_tag("cache_load"));
        assert_eq!(load.location.name, "DMA");
        assert_eq!(load.idxs.len(), 1);
        assert_eq!(load.idxs[0].range, 16);
        assert_eq!(load.refs[0].from, "v_raw");
        assert_eq!(load.refs[0].interior_shape.sizes(), vec![1]);
        assert_eq!(load.refs[1].from, "v");
        assert_eq!(load.refs[1].location.name, "CACHE");
        assert_eq!(block.stmts.len(), 2);
        assert!(!block
            .stmts
            .iter()
            .any(|s| s.as_block().is_some_and(|b| b.has_tag("cache_store"))));

        // The inner consumer now binds to the cached allocation.
        let compute = block.sub_block(1).unwrap();
        assert_eq!(compute.refs[0].location.name, "CACHE");
    }

    #[test]
    fn cache_out_ref_appends_store() {
        let mut block = kernel_with_ref(RefDir::Out);
        apply_cache(
            &mut block,
            "v",
            &Location::new("CACHE"),
            &Location::new("DMA"),
        )
        .unwrap();

        let store = block.sub_block(block.stmts.len() - 1).unwrap();
        assert_eq!(store.name, "store_v");
        assert!(store.has_tag("cache_store"));
        assert_eq!(store.refs[0].from, "v");
        assert_eq!(store.refs[0].location.name, "CACHE");
        assert_eq!(store.refs[1].from, "v_raw");
        assert_eq!(store.refs[1].location.name, "RAM");
    }

    #[test]
    fn cache_inout_ref_adds_both() {
        let mut block = kernel_with_ref(RefDir::InOut);
        apply_cache(
            &mut block,
            "v",
            &Location::new("CACHE"),
            &Location::new("DMA"),
        )
        .unwrap();
        assert_eq!(block.sub_block(0).unwrap().name, "load_v");
        let last = block.sub_block(block.stmts.len() - 1).unwrap();
        assert_eq!(last.name, "store_v");
    }

    #[test]
    fn recache_picks_fresh_raw_name() {
        let mut block = kernel_with_ref(RefDir::In);
        apply_cache(
            &mut block,
            "v",
            &Location::new("CACHE"),
            &Location::new("DMA"),
        )
        .unwrap();
        apply_cache(
            &mut block,
            "v",
            &Location::new("CACHE2"),
            &Location::new("DMA"),
        )
        .unwrap();
        assert!(block.ref_by_into("v_raw").is_ok());
        assert!(block.ref_by_into("v_raw_2").is_ok());
        assert_eq!(block.ref_by_into("v").unwrap().location.name, "CACHE2");
    }

    #[test]
    fn cached_side_drops_external_addressing() {
        let mut block = kernel_with_ref(RefDir::InOut);
        {
            let v = block.ref_by_into_mut("v").unwrap();
            v.offset = 128;
            v.is_const = true;
            v.bank_dim = Some(stratum_ir::BankDimension { dim_pos: 0 });
        }
        apply_cache(
            &mut block,
            "v",
            &Location::new("CACHE"),
            &Location::new("DMA"),
        )
        .unwrap();

        // The raw side keeps the external view's addressing.
        let load = block.sub_block(0).unwrap();
        assert_eq!(load.refs[0].offset, 128);
        assert!(load.refs[0].is_const);
        assert!(load.refs[0].bank_dim.is_some());
        // The cached side addresses the fresh dense allocation.
        assert_eq!(load.refs[1].offset, 0);
        assert!(!load.refs[1].is_const);
        assert!(load.refs[1].bank_dim.is_none());

        let store = block.sub_block(block.stmts.len() - 1).unwrap();
        assert_eq!(store.refs[1].offset, 128);
        assert!(store.refs[1].bank_dim.is_some());
        assert_eq!(store.refs[0].offset, 0);
        assert!(!store.refs[0].is_const);
        assert!(store.refs[0].bank_dim.is_none());
    }

    #[test]
    fn unknown_ref_is_an_error() {
        let mut block = Block::new("kernel");
        let err = apply_cache(
            &mut block,
            "missing",
            &Location::new("CACHE"),
            &Location::new("DMA"),
        )
        .unwrap_err();
        assert!(matches!(err, CodegenError::Ir(_)));
    }

    #[test]
    fn unit_dims_get_no_index() {
        let mut block = kernel_with_ref(RefDir::In);
        block.ref_by_into_mut("v").unwrap().interior_shape =
            TensorShape::simple(DataType::F32, &[1, 16]);
        block.sub_block_mut(0).unwrap().refs[0].interior_shape =
            TensorShape::simple(DataType::F32, &[1, 16]);
        block.ref_by_into_mut("v").unwrap().access = vec![Affine::zero(), Affine::zero()];
        block.sub_block_mut(0).unwrap().refs[0].access = vec![Affine::zero(), Affine::zero()];
        apply_cache(
            &mut block,
            "v",
            &Location::new("CACHE"),
            &Location::new("DMA"),
        )
        .unwrap();
        let load = block.sub_block(0).unwrap();
        assert_eq!(load.idxs.len(), 1);
        assert_eq!(load.idxs[0].name, "i1");
        assert!(load.refs[0].access[0].is_zero());
        assert_eq!(load.refs[0].access[1], Affine::from("i1"));
    }

    #[test]
    fn cache_block_filters_by_dir() {
        let mut block = kernel_with_ref(RefDir::In);
        cache_block(
            &mut block,
            &[RefDir::Out],
            &Location::new("CACHE"),
            &Location::new("DMA"),
        )
        .unwrap();
        // Nothing matched; the block is untouched.
        assert!(block.ref_by_into("v_raw").is_err());

        cache_block(
            &mut block,
            &[RefDir::In],
            &Location::new("CACHE"),
            &Location::new("DMA"),
        )
        .unwrap();
        assert!(block.ref_by_into("v_raw").is_ok());
    }
}
