//! Display implementations and text dump for debugging.

use std::fmt;

use crate::ir::{
    Block, ConstValue, Constant, Index, Intrinsic, Load, Location, RefDir, Refinement, Special,
    Statement, Store, Tags,
};
use crate::shape::{DataType, TensorShape};

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::BF16 => "bf16",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.ty)?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", dim.size, dim.stride)?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_zero() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.unit)
        }
    }
}

impl fmt::Display for RefDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::In => "in",
            Self::Out => "out",
            Self::InOut => "inout",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.affine.is_zero() {
            write!(f, "{}:{}", self.name, self.range)
        } else {
            write!(f, "{} = {}", self.name, self.affine)
        }
    }
}

impl fmt::Display for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.dir)?;
        if !self.from.is_empty() && self.from != self.into {
            write!(f, "{} = {}", self.into, self.from)?;
        } else {
            write!(f, "{}", self.into)?;
        }
        write!(f, "[")?;
        for (i, access) in self.access.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{access}")?;
        }
        write!(f, "] {} @{}", self.interior_shape, self.location)?;
        if self.offset != 0 {
            write!(f, " offset={}", self.offset)?;
        }
        if self.is_const {
            write!(f, " const")?;
        }
        if let Some(bank) = self.bank_dim {
            write!(f, " bank={}", bank.dim_pos)?;
        }
        Ok(())
    }
}

impl fmt::Display for Load {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = load({})", self.into, self.from)
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = store({})", self.into, self.from)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            ConstValue::Int(v) => write!(f, "{} = {v}", self.name),
            ConstValue::Float(v) => write!(f, "{} = {v}", self.name),
        }
    }
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}({})", self.outputs.join(", "), self.name, self.inputs.join(", "))
    }
}

impl fmt::Display for Special {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) -> ({})", self.name, self.inputs.join(", "), self.outputs.join(", "))
    }
}

fn write_tags(f: &mut fmt::Formatter<'_>, tags: &Tags) -> fmt::Result {
    if !tags.is_empty() {
        write!(f, " #")?;
        for (i, tag) in tags.iter().enumerate() {
            if i > 0 {
                write!(f, " #")?;
            }
            write!(f, "{tag}")?;
        }
    }
    Ok(())
}

fn write_deps(f: &mut fmt::Formatter<'_>, deps: &[usize]) -> fmt::Result {
    if !deps.is_empty() {
        write!(f, " deps=[")?;
        for (i, dep) in deps.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dep}")?;
        }
        write!(f, "]")?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &Block, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    write!(f, "{pad}block {}", block.name)?;
    if !block.idxs.is_empty() {
        write!(f, " [")?;
        for (i, idx) in block.idxs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{idx}")?;
        }
        write!(f, "]")?;
    }
    write!(f, " @{}", block.location)?;
    write_tags(f, &block.tags)?;
    writeln!(f, " {{")?;
    if !block.comments.is_empty() {
        for line in block.comments.lines() {
            writeln!(f, "{pad}  // {line}")?;
        }
    }
    for constraint in &block.constraints {
        writeln!(f, "{pad}  {constraint} >= 0")?;
    }
    for r in &block.refs {
        writeln!(f, "{pad}  {r}")?;
    }
    for (i, stmt) in block.stmts.iter().enumerate() {
        match stmt {
            Statement::Block(inner) => {
                write!(f, "{pad}  {i}:")?;
                write_deps(f, &inner.deps)?;
                writeln!(f)?;
                write_block(f, inner, indent + 1)?;
            }
            other => {
                write!(f, "{pad}  {i}: ")?;
                match other {
                    Statement::Load(op) => write!(f, "{op}")?,
                    Statement::Store(op) => write!(f, "{op}")?,
                    Statement::Constant(op) => write!(f, "{op}")?,
                    Statement::Intrinsic(op) => write!(f, "{op}")?,
                    Statement::Special(op) => write!(f, "{op}")?,
                    Statement::Block(_) => unreachable!(),
                }
                write_tags(f, other.tags())?;
                write_deps(f, other.deps())?;
                writeln!(f)?;
            }
        }
    }
    writeln!(f, "{pad}}}")
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_block(f, self, 0)
    }
}

/// Renders a block tree to a string, as written by the pass dumper.
pub fn dump_block(block: &Block) -> String {
    block.to_string()
}
