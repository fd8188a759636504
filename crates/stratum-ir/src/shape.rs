//! Tensor element types and shapes.

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum DataType {
    Boolean,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    BF16,
    F16,
    #[default]
    F32,
    F64,
}

impl DataType {
    /// Width of one element in bytes.
    pub fn size_bytes(self) -> u64 {
        match self {
            Self::Boolean | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 | Self::BF16 | Self::F16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

/// One dimension of a tensor view: iteration count and element stride.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TensorDimension {
    pub size: u64,
    pub stride: i64,
}

/// The shape of a tensor view: element type plus per-dimension size/stride.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TensorShape {
    pub ty: DataType,
    pub dims: Vec<TensorDimension>,
}

impl TensorShape {
    /// Creates a shape with explicit dimensions.
    pub fn new(ty: DataType, dims: Vec<TensorDimension>) -> Self {
        Self { ty, dims }
    }

    /// Creates a dense shape: row-major, innermost stride one.
    pub fn simple(ty: DataType, sizes: &[u64]) -> Self {
        let mut dims = vec![TensorDimension::default(); sizes.len()];
        let mut stride = 1i64;
        for (dim, &size) in dims.iter_mut().zip(sizes).rev() {
            dim.size = size;
            dim.stride = stride;
            stride *= size as i64;
        }
        Self { ty, dims }
    }

    /// Per-dimension sizes.
    pub fn sizes(&self) -> Vec<u64> {
        self.dims.iter().map(|d| d.size).collect()
    }

    /// Number of distinct index points.
    pub fn elem_count(&self) -> u64 {
        self.dims.iter().map(|d| d.size).product()
    }

    /// Bytes spanned by the view: one past the furthest addressed element.
    pub fn byte_size(&self) -> u64 {
        let last = self
            .dims
            .iter()
            .map(|d| d.size.saturating_sub(1) * d.stride.unsigned_abs())
            .sum::<u64>();
        (last + 1) * self.ty.size_bytes()
    }

    /// Returns a copy with every dimension's size set to one.
    pub fn with_unit_sizes(&self) -> Self {
        let dims = self
            .dims
            .iter()
            .map(|d| TensorDimension { size: 1, stride: d.stride })
            .collect();
        Self { ty: self.ty, dims }
    }
}
