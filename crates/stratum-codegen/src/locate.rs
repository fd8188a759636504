//! Location assignment passes.
//!
//! Pin matching blocks, their immediate sub-blocks, or their local
//! allocations to a concrete memory or processor location.

use stratum_ir::{Block, Location, Tags};

use crate::alias::run_on_blocks;
use crate::error::CodegenError;
use crate::localize::fixup_refs;

/// Options for the `locate_*` passes.
#[derive(Clone, Debug)]
pub struct LocateOptions {
    pub reqs: Tags,
    pub loc: Location,
}

/// Sets the location of every block matching `reqs`.
pub fn locate_block_pass(root: &mut Block, options: &LocateOptions) -> Result<(), CodegenError> {
    run_on_blocks(root, &options.reqs, |_map, block| {
        block.location = options.loc.clone();
        Ok(())
    })
}

/// Sets the location of the immediate sub-blocks of blocks matching `reqs`.
pub fn locate_inner_block_pass(
    root: &mut Block,
    options: &LocateOptions,
) -> Result<(), CodegenError> {
    run_on_blocks(root, &options.reqs, |_map, block| {
        for stmt in &mut block.stmts {
            if let Some(inner) = stmt.as_block_mut() {
                inner.location = options.loc.clone();
            }
        }
        Ok(())
    })
}

/// Sets the location of local allocations of blocks matching `reqs`, and
/// re-binds the views that borrow them.
pub fn locate_memory_pass(root: &mut Block, options: &LocateOptions) -> Result<(), CodegenError> {
    run_on_blocks(root, &options.reqs, |_map, block| {
        let mut moved = Vec::new();
        for r in &mut block.refs {
            if r.dir == stratum_ir::RefDir::None {
                r.location = options.loc.clone();
                moved.push(r.into.clone());
            }
        }
        for name in moved {
            fixup_refs(block, &name)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_ir::{tags, Affine, DataType, RefDir, Refinement, Statement, TensorShape};

    fn program() -> Block {
        let mut inner = Block::new("kernel");
        inner.tags = tags(["kernel"]);
        inner.refs.push(Refinement {
            dir: RefDir::In,
            from: "t".into(),
            into: "t".into(),
            access: vec![Affine::zero()],
            interior_shape: TensorShape::simple(DataType::F32, &[8]),
            location: Location::new("RAM"),
            ..Refinement::default()
        });

        let mut main = Block::new("main");
        main.tags = tags(["main"]);
        main.refs.push(Refinement {
            into: "t".into(),
            access: vec![Affine::zero()],
            interior_shape: TensorShape::simple(DataType::F32, &[8]),
            location: Location::new("RAM"),
            ..Refinement::default()
        });
        main.stmts.push(Statement::from(inner));

        let mut root = Block::new("program");
        root.tags = tags(["program"]);
        root.stmts.push(Statement::from(main));
        root
    }

    #[test]
    fn locate_block_sets_location() {
        let mut root = program();
        let options = LocateOptions { reqs: tags(["main"]), loc: Location::new("DRAM") };
        locate_block_pass(&mut root, &options).unwrap();
        assert_eq!(root.sub_block(0).unwrap().location.name, "DRAM");
        assert_eq!(root.location.name, "");
    }

    #[test]
    fn locate_inner_block_sets_children() {
        let mut root = program();
        let options = LocateOptions { reqs: tags(["main"]), loc: Location::new("PROC") };
        locate_inner_block_pass(&mut root, &options).unwrap();
        let main = root.sub_block(0).unwrap();
        assert_eq!(main.location.name, "");
        assert_eq!(main.sub_block(0).unwrap().location.name, "PROC");
    }

    #[test]
    fn locate_memory_moves_allocs_and_views() {
        let mut root = program();
        let options = LocateOptions { reqs: tags(["main"]), loc: Location::new("SRAM") };
        locate_memory_pass(&mut root, &options).unwrap();
        let main = root.sub_block(0).unwrap();
        assert_eq!(main.ref_by_into("t").unwrap().location.name, "SRAM");
        // The borrowing view follows its allocation.
        let kernel = main.sub_block(0).unwrap();
        assert_eq!(kernel.refs[0].location.name, "SRAM");
    }
}
