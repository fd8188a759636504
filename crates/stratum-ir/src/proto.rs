//! Protobuf serialization of the IR via prost derive.
//!
//! Hand-defined message types with explicit field tags; `to_proto` /
//! `from_proto` convert to and from the in-memory IR and round-trip exactly
//! on well-formed programs.

use std::collections::BTreeMap;

use prost::Message;

use crate::affine::Affine as IrAffine;
use crate::error::IrError;
use crate::ir;
use crate::shape::{DataType, TensorDimension, TensorShape};

/// Refinement direction constants from `Refinement.dir`.
pub mod ref_dir {
    pub const NONE: i32 = 0;
    pub const IN: i32 = 1;
    pub const OUT: i32 = 2;
    pub const INOUT: i32 = 3;
}

/// Element type constants from `TensorShape.type`.
pub mod data_type {
    pub const BOOLEAN: i32 = 1;
    pub const I8: i32 = 2;
    pub const I16: i32 = 3;
    pub const I32: i32 = 4;
    pub const I64: i32 = 5;
    pub const U8: i32 = 6;
    pub const U16: i32 = 7;
    pub const U32: i32 = 8;
    pub const U64: i32 = 9;
    pub const BF16: i32 = 10;
    pub const F16: i32 = 11;
    pub const F32: i32 = 12;
    pub const F64: i32 = 13;
}

/// A linear polynomial: constant offset plus named terms.
#[derive(Clone, PartialEq, Message)]
pub struct Affine {
    #[prost(int64, tag = "1")]
    pub offset: i64,
    #[prost(btree_map = "string, int64", tag = "2")]
    pub terms: BTreeMap<String, i64>,
}

/// A symbolic memory space.
#[derive(Clone, PartialEq, Message)]
pub struct Location {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub unit: Option<Affine>,
}

/// One dimension of a tensor shape.
#[derive(Clone, PartialEq, Message)]
pub struct TensorDim {
    #[prost(uint64, tag = "1")]
    pub size: u64,
    #[prost(int64, tag = "2")]
    pub stride: i64,
}

/// A tensor shape: element type plus dimensions.
#[derive(Clone, PartialEq, Message)]
pub struct Shape {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(message, repeated, tag = "2")]
    pub dims: Vec<TensorDim>,
}

/// A tensor view declaration.
#[derive(Clone, PartialEq, Message)]
pub struct Refinement {
    #[prost(int32, tag = "1")]
    pub dir: i32,
    #[prost(string, tag = "2")]
    pub from: String,
    #[prost(string, tag = "3")]
    pub into: String,
    #[prost(message, repeated, tag = "4")]
    pub access: Vec<Affine>,
    #[prost(message, optional, tag = "5")]
    pub interior_shape: Option<Shape>,
    #[prost(message, optional, tag = "6")]
    pub location: Option<Location>,
    #[prost(bool, tag = "7")]
    pub is_const: bool,
    #[prost(uint64, tag = "8")]
    pub offset: u64,
    #[prost(uint32, optional, tag = "9")]
    pub bank_dim: Option<u32>,
    #[prost(message, optional, tag = "10")]
    pub cache_unit: Option<Affine>,
    #[prost(string, repeated, tag = "11")]
    pub tags: Vec<String>,
}

/// A loop index declaration.
#[derive(Clone, PartialEq, Message)]
pub struct Index {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint64, tag = "2")]
    pub range: u64,
    #[prost(message, optional, tag = "3")]
    pub affine: Option<Affine>,
    #[prost(string, repeated, tag = "4")]
    pub tags: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Load {
    #[prost(string, tag = "1")]
    pub from: String,
    #[prost(string, tag = "2")]
    pub into: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Store {
    #[prost(string, tag = "1")]
    pub from: String,
    #[prost(string, tag = "2")]
    pub into: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Constant {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(oneof = "constant::Value", tags = "2, 3")]
    pub value: Option<constant::Value>,
}

/// Nested types for [`Constant`].
pub mod constant {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(int64, tag = "2")]
        Iconst(i64),
        #[prost(double, tag = "3")]
        Fconst(f64),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Intrinsic {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub r#type: i32,
    #[prost(string, repeated, tag = "3")]
    pub inputs: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub outputs: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Special {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub params: Vec<String>,
    #[prost(string, repeated, tag = "3")]
    pub inputs: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub outputs: Vec<String>,
}

/// A statement: dependency edges, tags, and one operation payload.
#[derive(Clone, PartialEq, Message)]
pub struct Statement {
    #[prost(uint64, repeated, tag = "1")]
    pub deps: Vec<u64>,
    #[prost(string, repeated, tag = "2")]
    pub tags: Vec<String>,
    #[prost(oneof = "statement::Op", tags = "3, 4, 5, 6, 7, 8")]
    pub op: Option<statement::Op>,
}

/// Nested types for [`Statement`].
pub mod statement {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Op {
        #[prost(message, tag = "3")]
        Load(super::Load),
        #[prost(message, tag = "4")]
        Store(super::Store),
        #[prost(message, tag = "5")]
        Constant(super::Constant),
        #[prost(message, tag = "6")]
        Intrinsic(super::Intrinsic),
        #[prost(message, tag = "7")]
        Special(super::Special),
        #[prost(message, tag = "8")]
        Block(Box<super::Block>),
    }
}

/// A block of the IR.
#[derive(Clone, PartialEq, Message)]
pub struct Block {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub comments: String,
    #[prost(message, repeated, tag = "3")]
    pub idxs: Vec<Index>,
    #[prost(message, repeated, tag = "4")]
    pub constraints: Vec<Affine>,
    #[prost(message, repeated, tag = "5")]
    pub refs: Vec<Refinement>,
    #[prost(message, repeated, tag = "6")]
    pub stmts: Vec<Statement>,
    #[prost(message, optional, tag = "7")]
    pub location: Option<Location>,
    #[prost(string, repeated, tag = "8")]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// IR -> proto
// ---------------------------------------------------------------------------

fn affine_to_proto(affine: &IrAffine) -> Affine {
    let mut out = Affine::default();
    for (name, coeff) in affine.terms() {
        if name.is_empty() {
            out.offset = coeff;
        } else {
            out.terms.insert(name.to_string(), coeff);
        }
    }
    out
}

fn location_to_proto(loc: &ir::Location) -> Location {
    Location {
        name: loc.name.clone(),
        unit: Some(affine_to_proto(&loc.unit)),
    }
}

fn data_type_to_proto(ty: DataType) -> i32 {
    match ty {
        DataType::Boolean => data_type::BOOLEAN,
        DataType::I8 => data_type::I8,
        DataType::I16 => data_type::I16,
        DataType::I32 => data_type::I32,
        DataType::I64 => data_type::I64,
        DataType::U8 => data_type::U8,
        DataType::U16 => data_type::U16,
        DataType::U32 => data_type::U32,
        DataType::U64 => data_type::U64,
        DataType::BF16 => data_type::BF16,
        DataType::F16 => data_type::F16,
        DataType::F32 => data_type::F32,
        DataType::F64 => data_type::F64,
    }
}

fn shape_to_proto(shape: &TensorShape) -> Shape {
    Shape {
        r#type: data_type_to_proto(shape.ty),
        dims: shape
            .dims
            .iter()
            .map(|d| TensorDim { size: d.size, stride: d.stride })
            .collect(),
    }
}

fn refinement_to_proto(r: &ir::Refinement) -> Refinement {
    Refinement {
        dir: match r.dir {
            ir::RefDir::None => ref_dir::NONE,
            ir::RefDir::In => ref_dir::IN,
            ir::RefDir::Out => ref_dir::OUT,
            ir::RefDir::InOut => ref_dir::INOUT,
        },
        from: r.from.clone(),
        into: r.into.clone(),
        access: r.access.iter().map(affine_to_proto).collect(),
        interior_shape: Some(shape_to_proto(&r.interior_shape)),
        location: Some(location_to_proto(&r.location)),
        is_const: r.is_const,
        offset: r.offset,
        bank_dim: r.bank_dim.map(|b| b.dim_pos as u32),
        cache_unit: r.cache_unit.as_ref().map(affine_to_proto),
        tags: r.tags.iter().cloned().collect(),
    }
}

fn index_to_proto(idx: &ir::Index) -> Index {
    Index {
        name: idx.name.clone(),
        range: idx.range,
        affine: Some(affine_to_proto(&idx.affine)),
        tags: idx.tags.iter().cloned().collect(),
    }
}

fn statement_to_proto(stmt: &ir::Statement) -> Statement {
    let op = match stmt {
        ir::Statement::Load(op) => statement::Op::Load(Load {
            from: op.from.clone(),
            into: op.into.clone(),
        }),
        ir::Statement::Store(op) => statement::Op::Store(Store {
            from: op.from.clone(),
            into: op.into.clone(),
        }),
        ir::Statement::Constant(op) => statement::Op::Constant(Constant {
            name: op.name.clone(),
            value: Some(match op.value {
                ir::ConstValue::Int(v) => constant::Value::Iconst(v),
                ir::ConstValue::Float(v) => constant::Value::Fconst(v),
            }),
        }),
        ir::Statement::Intrinsic(op) => statement::Op::Intrinsic(Intrinsic {
            name: op.name.clone(),
            r#type: data_type_to_proto(op.ty),
            inputs: op.inputs.clone(),
            outputs: op.outputs.clone(),
        }),
        ir::Statement::Special(op) => statement::Op::Special(Special {
            name: op.name.clone(),
            params: op.params.clone(),
            inputs: op.inputs.clone(),
            outputs: op.outputs.clone(),
        }),
        ir::Statement::Block(block) => statement::Op::Block(Box::new(block_to_proto(block))),
    };
    Statement {
        deps: stmt.deps().iter().map(|&d| d as u64).collect(),
        tags: stmt.tags().iter().cloned().collect(),
        op: Some(op),
    }
}

/// Converts a block tree to its serialized message form.
pub fn block_to_proto(block: &ir::Block) -> Block {
    Block {
        name: block.name.clone(),
        comments: block.comments.clone(),
        idxs: block.idxs.iter().map(index_to_proto).collect(),
        constraints: block.constraints.iter().map(affine_to_proto).collect(),
        refs: block.refs.iter().map(refinement_to_proto).collect(),
        stmts: block.stmts.iter().map(statement_to_proto).collect(),
        location: Some(location_to_proto(&block.location)),
        tags: block.tags.iter().cloned().collect(),
    }
}

// ---------------------------------------------------------------------------
// proto -> IR
// ---------------------------------------------------------------------------

/// Reconstructs an affine expression from its message form.
pub fn affine_from_proto(affine: &Affine) -> IrAffine {
    let mut out = IrAffine::constant(affine.offset);
    for (name, &coeff) in &affine.terms {
        out += IrAffine::term(name.clone(), coeff);
    }
    out
}

/// Reconstructs a location from its message form; absent means unnamed.
pub fn location_from_proto(loc: Option<&Location>) -> ir::Location {
    match loc {
        Some(loc) => ir::Location {
            name: loc.name.clone(),
            unit: loc.unit.as_ref().map(affine_from_proto).unwrap_or_default(),
        },
        None => ir::Location::default(),
    }
}

fn data_type_from_proto(value: i32) -> Result<DataType, IrError> {
    Ok(match value {
        data_type::BOOLEAN => DataType::Boolean,
        data_type::I8 => DataType::I8,
        data_type::I16 => DataType::I16,
        data_type::I32 => DataType::I32,
        data_type::I64 => DataType::I64,
        data_type::U8 => DataType::U8,
        data_type::U16 => DataType::U16,
        data_type::U32 => DataType::U32,
        data_type::U64 => DataType::U64,
        data_type::BF16 => DataType::BF16,
        data_type::F16 => DataType::F16,
        data_type::F32 => DataType::F32,
        data_type::F64 => DataType::F64,
        other => return Err(IrError::InvalidEnum { what: "data type", value: other }),
    })
}

fn shape_from_proto(shape: Option<&Shape>) -> Result<TensorShape, IrError> {
    let Some(shape) = shape else {
        return Ok(TensorShape::default());
    };
    Ok(TensorShape {
        ty: data_type_from_proto(shape.r#type)?,
        dims: shape
            .dims
            .iter()
            .map(|d| TensorDimension { size: d.size, stride: d.stride })
            .collect(),
    })
}

fn refinement_from_proto(r: &Refinement) -> Result<ir::Refinement, IrError> {
    Ok(ir::Refinement {
        dir: match r.dir {
            ref_dir::NONE => ir::RefDir::None,
            ref_dir::IN => ir::RefDir::In,
            ref_dir::OUT => ir::RefDir::Out,
            ref_dir::INOUT => ir::RefDir::InOut,
            other => return Err(IrError::InvalidEnum { what: "refinement dir", value: other }),
        },
        from: r.from.clone(),
        into: r.into.clone(),
        access: r.access.iter().map(affine_from_proto).collect(),
        interior_shape: shape_from_proto(r.interior_shape.as_ref())?,
        location: location_from_proto(r.location.as_ref()),
        is_const: r.is_const,
        offset: r.offset,
        bank_dim: r.bank_dim.map(|pos| ir::BankDimension { dim_pos: pos as usize }),
        cache_unit: r.cache_unit.as_ref().map(affine_from_proto),
        tags: r.tags.iter().cloned().collect(),
    })
}

fn index_from_proto(idx: &Index) -> ir::Index {
    ir::Index {
        name: idx.name.clone(),
        range: idx.range,
        affine: idx.affine.as_ref().map(affine_from_proto).unwrap_or_default(),
        tags: idx.tags.iter().cloned().collect(),
    }
}

fn statement_from_proto(stmt: &Statement) -> Result<ir::Statement, IrError> {
    let deps: Vec<usize> = stmt.deps.iter().map(|&d| d as usize).collect();
    let tags: ir::Tags = stmt.tags.iter().cloned().collect();
    let op = stmt.op.as_ref().ok_or(IrError::MissingField {
        message: "Statement",
        field: "op",
    })?;
    Ok(match op {
        statement::Op::Load(op) => ir::Statement::Load(ir::Load {
            from: op.from.clone(),
            into: op.into.clone(),
            deps,
            tags,
        }),
        statement::Op::Store(op) => ir::Statement::Store(ir::Store {
            from: op.from.clone(),
            into: op.into.clone(),
            deps,
            tags,
        }),
        statement::Op::Constant(op) => {
            let value = op.value.as_ref().ok_or(IrError::MissingField {
                message: "Constant",
                field: "value",
            })?;
            ir::Statement::Constant(ir::Constant {
                name: op.name.clone(),
                value: match value {
                    constant::Value::Iconst(v) => ir::ConstValue::Int(*v),
                    constant::Value::Fconst(v) => ir::ConstValue::Float(*v),
                },
                deps,
                tags,
            })
        }
        statement::Op::Intrinsic(op) => ir::Statement::Intrinsic(ir::Intrinsic {
            name: op.name.clone(),
            ty: data_type_from_proto(op.r#type)?,
            inputs: op.inputs.clone(),
            outputs: op.outputs.clone(),
            deps,
            tags,
        }),
        statement::Op::Special(op) => ir::Statement::Special(ir::Special {
            name: op.name.clone(),
            params: op.params.clone(),
            inputs: op.inputs.clone(),
            outputs: op.outputs.clone(),
            deps,
            tags,
        }),
        statement::Op::Block(block) => {
            let mut inner = block_from_proto(block)?;
            inner.deps = deps;
            inner.tags = tags;
            ir::Statement::Block(Box::new(inner))
        }
    })
}

/// Reconstructs a block tree from its serialized message form.
pub fn block_from_proto(block: &Block) -> Result<ir::Block, IrError> {
    Ok(ir::Block {
        name: block.name.clone(),
        comments: block.comments.clone(),
        idxs: block.idxs.iter().map(index_from_proto).collect(),
        constraints: block.constraints.iter().map(affine_from_proto).collect(),
        refs: block
            .refs
            .iter()
            .map(refinement_from_proto)
            .collect::<Result<_, _>>()?,
        stmts: block
            .stmts
            .iter()
            .map(statement_from_proto)
            .collect::<Result<_, _>>()?,
        location: location_from_proto(block.location.as_ref()),
        deps: Vec::new(),
        tags: block.tags.iter().cloned().collect(),
    })
}
