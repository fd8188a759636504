//! Stratum intermediate representation.
//!
//! A hierarchical block IR for tensor programs: each block carries an affine
//! index space, refinements (tensor views into enclosing allocations), and an
//! ordered statement list with explicit dependency edges. Optimization passes
//! in `stratum-codegen` rewrite this IR in place.

mod affine;
mod display;
mod error;
mod ir;
pub mod proto;
mod shape;

pub use affine::Affine;
pub use display::dump_block;
pub use error::IrError;
pub use ir::{
    intrinsic, special, tags, BankDimension, Block, ConstValue, Constant, Index, Intrinsic, Load,
    Location, RefDir, Refinement, Special, Statement, Store, Tags,
};
pub use shape::{DataType, TensorDimension, TensorShape};
