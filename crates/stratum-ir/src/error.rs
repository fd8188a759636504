//! Error types for the Stratum IR.

/// Errors that can occur when constructing, evaluating, or decoding IR.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// An affine expression referenced an index absent from the environment.
    #[error("unbound index '{name}' while evaluating affine expression")]
    UnboundIndex { name: String },

    /// A block has no refinement with the requested `into` name.
    #[error("block '{block}' has no refinement named '{name}'")]
    MissingRefinement { block: String, name: String },

    /// A block has no refinement borrowing the requested `from` name.
    #[error("block '{block}' has no refinement from '{name}'")]
    MissingRefinementFrom { block: String, name: String },

    /// A serialized enum value is out of range.
    #[error("invalid {what} value {value} in serialized IR")]
    InvalidEnum { what: &'static str, value: i32 },

    /// A serialized message is missing a required field.
    #[error("missing {field} in serialized {message}")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },
}
