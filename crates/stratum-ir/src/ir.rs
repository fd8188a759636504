//! The hierarchical block IR: blocks, refinements, indices, statements.

use std::collections::BTreeSet;

use crate::affine::Affine;
use crate::error::IrError;
use crate::shape::TensorShape;

/// An unordered set of string tags attached to blocks and statements.
///
/// Passes match their `reqs` tag sets against these to select the blocks they
/// rewrite.
pub type Tags = BTreeSet<String>;

/// Builds a [`Tags`] set from string literals.
pub fn tags<const N: usize>(names: [&str; N]) -> Tags {
    names.iter().map(|s| s.to_string()).collect()
}

/// Direction of a refinement relative to its enclosing scope.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum RefDir {
    /// A new allocation local to the block.
    #[default]
    None,
    /// Borrowed from the enclosing block for reading.
    In,
    /// Borrowed from the enclosing block for writing.
    Out,
    /// Borrowed for both reading and writing.
    InOut,
}

impl RefDir {
    /// Returns `true` if data flows into the block through this refinement.
    pub fn is_read(self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    /// Returns `true` if data flows out of the block through this refinement.
    pub fn is_write(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }

    /// The least direction covering both operands.
    pub fn union(self, other: Self) -> Self {
        match (self.is_read() || other.is_read(), self.is_write() || other.is_write()) {
            (false, false) => Self::None,
            (true, false) => Self::In,
            (false, true) => Self::Out,
            (true, true) => Self::InOut,
        }
    }
}

/// A symbolic memory space, optionally parameterized by an affine unit
/// (e.g. a bank or processor coordinate).
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Location {
    pub name: String,
    pub unit: Affine,
}

impl Location {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), unit: Affine::zero() }
    }
}

/// Marks one dimension of a refinement as banked.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BankDimension {
    pub dim_pos: usize,
}

/// A tensor view: either a block-local allocation (`dir == None`) or a window
/// into a refinement of the immediately enclosing block (`from`).
///
/// `access` gives, per dimension, the origin of the window in the parent
/// coordinate system as a function of this block's indices;
/// `interior_shape` is the sub-tile touched per index point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Refinement {
    pub dir: RefDir,
    pub from: String,
    pub into: String,
    pub access: Vec<Affine>,
    pub interior_shape: TensorShape,
    pub location: Location,
    pub is_const: bool,
    /// Byte offset within the location's arena.
    pub offset: u64,
    /// Which dimension is banked, if any.
    pub bank_dim: Option<BankDimension>,
    /// Which cache unit serves this refinement, if pinned.
    pub cache_unit: Option<Affine>,
    pub tags: Tags,
}

impl Refinement {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// A loop index of a block.
///
/// If `affine` is a pure constant the index is pinned to that value;
/// otherwise it iterates over `0..range`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Index {
    pub name: String,
    pub range: u64,
    pub affine: Affine,
    pub tags: Tags,
}

impl Index {
    pub fn new(name: impl Into<String>, range: u64) -> Self {
        Self { name: name.into(), range, affine: Affine::zero(), tags: Tags::new() }
    }
}

/// Reads one element of a buffer into a scalar.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Load {
    pub from: String,
    pub into: String,
    pub deps: Vec<usize>,
    pub tags: Tags,
}

impl Load {
    pub fn new(from: impl Into<String>, into: impl Into<String>) -> Self {
        Self { from: from.into(), into: into.into(), deps: Vec::new(), tags: Tags::new() }
    }
}

/// Writes a scalar into one element of a buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Store {
    pub from: String,
    pub into: String,
    pub deps: Vec<usize>,
    pub tags: Tags,
}

impl Store {
    pub fn new(from: impl Into<String>, into: impl Into<String>) -> Self {
        Self { from: from.into(), into: into.into(), deps: Vec::new(), tags: Tags::new() }
    }
}

/// The payload of a [`Constant`] statement.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
}

/// Defines a named scalar constant.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub name: String,
    pub value: ConstValue,
    pub deps: Vec<usize>,
    pub tags: Tags,
}

/// A named scalar operation: reads scalar inputs, defines scalar outputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Intrinsic {
    pub name: String,
    pub ty: crate::shape::DataType,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub deps: Vec<usize>,
    pub tags: Tags,
}

/// Well-known intrinsic names.
pub mod intrinsic {
    pub const ASSIGN: &str = "assign";
    pub const ADD: &str = "add";
    pub const MUL: &str = "mul";
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
    pub const CMP_EQ: &str = "cmp_eq";
    pub const COND: &str = "cond";
}

/// An opaque named operation over whole buffers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Special {
    pub name: String,
    pub params: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub deps: Vec<usize>,
    pub tags: Tags,
}

/// Well-known special names.
pub mod special {
    pub const ZERO: &str = "zero";
    pub const COPY: &str = "copy";
}

/// A statement of a block.
///
/// `deps` on each variant lists indices of earlier statements in the same
/// block that must complete first.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Load(Load),
    Store(Store),
    Constant(Constant),
    Intrinsic(Intrinsic),
    Special(Special),
    Block(Box<Block>),
}

impl Statement {
    /// Names of buffers this statement reads, in the enclosing block's scope.
    pub fn buffer_reads(&self) -> Vec<&str> {
        match self {
            Self::Load(op) => vec![op.from.as_str()],
            Self::Special(op) => op.inputs.iter().map(String::as_str).collect(),
            Self::Block(block) => block
                .refs
                .iter()
                .filter(|r| r.dir.is_read())
                .map(|r| r.from.as_str())
                .collect(),
            Self::Store(_) | Self::Constant(_) | Self::Intrinsic(_) => Vec::new(),
        }
    }

    /// Names of buffers this statement writes, in the enclosing block's scope.
    pub fn buffer_writes(&self) -> Vec<&str> {
        match self {
            Self::Store(op) => vec![op.into.as_str()],
            Self::Special(op) => op.outputs.iter().map(String::as_str).collect(),
            Self::Block(block) => block
                .refs
                .iter()
                .filter(|r| r.dir.is_write())
                .map(|r| r.from.as_str())
                .collect(),
            Self::Load(_) | Self::Constant(_) | Self::Intrinsic(_) => Vec::new(),
        }
    }

    /// Names of scalars this statement uses.
    pub fn scalar_uses(&self) -> Vec<&str> {
        match self {
            Self::Store(op) => vec![op.from.as_str()],
            Self::Intrinsic(op) => op.inputs.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Names of scalars this statement defines.
    pub fn scalar_defs(&self) -> Vec<&str> {
        match self {
            Self::Load(op) => vec![op.into.as_str()],
            Self::Constant(op) => vec![op.name.as_str()],
            Self::Intrinsic(op) => op.outputs.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn deps(&self) -> &[usize] {
        match self {
            Self::Load(op) => &op.deps,
            Self::Store(op) => &op.deps,
            Self::Constant(op) => &op.deps,
            Self::Intrinsic(op) => &op.deps,
            Self::Special(op) => &op.deps,
            Self::Block(block) => &block.deps,
        }
    }

    pub fn deps_mut(&mut self) -> &mut Vec<usize> {
        match self {
            Self::Load(op) => &mut op.deps,
            Self::Store(op) => &mut op.deps,
            Self::Constant(op) => &mut op.deps,
            Self::Intrinsic(op) => &mut op.deps,
            Self::Special(op) => &mut op.deps,
            Self::Block(block) => &mut block.deps,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            Self::Load(op) => &op.tags,
            Self::Store(op) => &op.tags,
            Self::Constant(op) => &op.tags,
            Self::Intrinsic(op) => &op.tags,
            Self::Special(op) => &op.tags,
            Self::Block(block) => &block.tags,
        }
    }

    pub fn tags_mut(&mut self) -> &mut Tags {
        match self {
            Self::Load(op) => &mut op.tags,
            Self::Store(op) => &mut op.tags,
            Self::Constant(op) => &mut op.tags,
            Self::Intrinsic(op) => &mut op.tags,
            Self::Special(op) => &mut op.tags,
            Self::Block(block) => &mut block.tags,
        }
    }

    /// The nested block, if this statement is one.
    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Self::Block(block) => Some(block),
            _ => None,
        }
    }

    /// The nested block, mutably, if this statement is one.
    pub fn as_block_mut(&mut self) -> Option<&mut Block> {
        match self {
            Self::Block(block) => Some(block),
            _ => None,
        }
    }
}

impl From<Block> for Statement {
    fn from(block: Block) -> Self {
        Self::Block(Box::new(block))
    }
}

/// A nested scope: indices, constraints, refinements, and statements.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub name: String,
    pub comments: String,
    pub idxs: Vec<Index>,
    /// Affine expressions required to be non-negative over the index space.
    pub constraints: Vec<Affine>,
    pub refs: Vec<Refinement>,
    pub stmts: Vec<Statement>,
    pub location: Location,
    pub deps: Vec<usize>,
    pub tags: Tags,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn has_tags(&self, reqs: &Tags) -> bool {
        reqs.iter().all(|tag| self.tags.contains(tag))
    }

    pub fn set_tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }

    /// Finds the refinement named `name`.
    pub fn ref_by_into(&self, name: &str) -> Result<&Refinement, IrError> {
        self.refs.iter().find(|r| r.into == name).ok_or_else(|| {
            IrError::MissingRefinement { block: self.name.clone(), name: name.to_string() }
        })
    }

    /// Finds the refinement named `name`, mutably.
    pub fn ref_by_into_mut(&mut self, name: &str) -> Result<&mut Refinement, IrError> {
        let block = self.name.clone();
        self.refs.iter_mut().find(|r| r.into == name).ok_or_else(|| {
            IrError::MissingRefinement { block, name: name.to_string() }
        })
    }

    /// Finds the refinement borrowing `name` from the enclosing block.
    pub fn ref_by_from(&self, name: &str) -> Result<&Refinement, IrError> {
        self.refs.iter().find(|r| r.from == name).ok_or_else(|| {
            IrError::MissingRefinementFrom { block: self.name.clone(), name: name.to_string() }
        })
    }

    /// The refinements read by this block.
    pub fn ref_ins(&self) -> Vec<&Refinement> {
        self.refs.iter().filter(|r| r.dir.is_read()).collect()
    }

    /// The refinements written by this block.
    pub fn ref_outs(&self) -> Vec<&Refinement> {
        self.refs.iter().filter(|r| r.dir.is_write()).collect()
    }

    pub fn idx_by_name(&self, name: &str) -> Option<&Index> {
        self.idxs.iter().find(|idx| idx.name == name)
    }

    /// First name of the form `into`, `into_2`, `into_3`, … absent from `refs`.
    pub fn unique_ref_name(&self, into: &str) -> String {
        if self.ref_by_into(into).is_err() {
            return into.to_string();
        }
        let mut i = 2usize;
        loop {
            let name = format!("{into}_{i}");
            if self.ref_by_into(&name).is_err() {
                return name;
            }
            i += 1;
        }
    }

    /// First name of the form `name`, `name_2`, … absent from `idxs`.
    pub fn unique_idx_name(&self, name: &str) -> String {
        if self.idx_by_name(name).is_none() {
            return name.to_string();
        }
        let mut i = 2usize;
        loop {
            let candidate = format!("{name}_{i}");
            if self.idx_by_name(&candidate).is_none() {
                return candidate;
            }
            i += 1;
        }
    }

    /// The nested block at statement position `pos`, if that statement is one.
    pub fn sub_block(&self, pos: usize) -> Option<&Block> {
        self.stmts.get(pos).and_then(Statement::as_block)
    }

    /// The nested block at statement position `pos`, mutably.
    pub fn sub_block_mut(&mut self, pos: usize) -> Option<&mut Block> {
        self.stmts.get_mut(pos).and_then(Statement::as_block_mut)
    }

    /// A block is a leaf if it contains no nested block statement.
    pub fn is_leaf(&self) -> bool {
        !self.stmts.iter().any(|s| matches!(s, Statement::Block(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{DataType, TensorShape};

    fn block_with_refs(names: &[&str]) -> Block {
        let mut block = Block::new("test");
        for name in names {
            block.refs.push(Refinement {
                into: name.to_string(),
                interior_shape: TensorShape::simple(DataType::F32, &[4]),
                access: vec![Affine::zero()],
                ..Refinement::default()
            });
        }
        block
    }

    #[test]
    fn ref_lookup() {
        let block = block_with_refs(&["a", "b"]);
        assert_eq!(block.ref_by_into("b").unwrap().into, "b");
        assert!(matches!(
            block.ref_by_into("c"),
            Err(IrError::MissingRefinement { .. })
        ));
    }

    #[test]
    fn unique_ref_names() {
        let block = block_with_refs(&["x", "x_2"]);
        assert_eq!(block.unique_ref_name("y"), "y");
        assert_eq!(block.unique_ref_name("x"), "x_3");
    }

    #[test]
    fn unique_idx_names() {
        let mut block = Block::new("test");
        block.idxs.push(Index::new("i", 4));
        assert_eq!(block.unique_idx_name("j"), "j");
        assert_eq!(block.unique_idx_name("i"), "i_2");
    }

    #[test]
    fn dir_predicates() {
        assert!(RefDir::In.is_read());
        assert!(!RefDir::In.is_write());
        assert!(RefDir::InOut.is_read() && RefDir::InOut.is_write());
        assert_eq!(RefDir::In.union(RefDir::Out), RefDir::InOut);
        assert_eq!(RefDir::None.union(RefDir::In), RefDir::In);
    }

    #[test]
    fn block_use_def_sets() {
        let mut inner = Block::new("inner");
        inner.refs.push(Refinement {
            dir: RefDir::In,
            from: "src".into(),
            into: "s".into(),
            ..Refinement::default()
        });
        inner.refs.push(Refinement {
            dir: RefDir::Out,
            from: "dst".into(),
            into: "d".into(),
            ..Refinement::default()
        });
        let stmt = Statement::from(inner);
        assert_eq!(stmt.buffer_reads(), vec!["src"]);
        assert_eq!(stmt.buffer_writes(), vec!["dst"]);
    }

    #[test]
    fn load_store_use_def_sets() {
        let load = Statement::Load(Load::new("buf", "$x"));
        assert_eq!(load.buffer_reads(), vec!["buf"]);
        assert_eq!(load.scalar_defs(), vec!["$x"]);
        let store = Statement::Store(Store::new("$x", "buf"));
        assert_eq!(store.buffer_writes(), vec!["buf"]);
        assert_eq!(store.scalar_uses(), vec!["$x"]);
    }

    #[test]
    fn leaf_detection() {
        let mut block = Block::new("b");
        block.stmts.push(Statement::Load(Load::new("a", "$x")));
        assert!(block.is_leaf());
        block.stmts.push(Statement::from(Block::new("inner")));
        assert!(!block.is_leaf());
        assert_eq!(block.sub_block(1).unwrap().name, "inner");
        assert!(block.sub_block(0).is_none());
    }
}
