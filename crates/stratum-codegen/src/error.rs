//! Error types for the codegen pipeline.

use stratum_ir::IrError;

/// Errors raised by the alias analysis, the passes, or the driver.
///
/// All of these are fatal: no pass recovers from another pass's failure, and
/// the driver stops at the first error.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// A refinement borrows a name absent from the enclosing scope.
    #[error("invalid ref '{from}' for '{into}' in block '{block}': not in enclosing scope")]
    BadRefFrom {
        block: String,
        from: String,
        into: String,
    },

    /// A refinement's access arity disagrees with its base allocation.
    #[error(
        "mismatched access dimensions on '{name}' in block '{block}': {found} vs base {expected}"
    )]
    AccessArity {
        block: String,
        name: String,
        found: usize,
        expected: usize,
    },

    /// A statement mentions a buffer the block does not declare.
    #[error("unknown buffer '{name}' referenced by a statement of block '{block}'")]
    UnknownBuffer { block: String, name: String },

    /// The scheduler ran out of scratchpad space.
    #[error(
        "scratchpad '{mem}' exhausted scheduling block '{block}': \
         need {needed} bytes, capacity {capacity} ({} bytes over)",
        needed - capacity
    )]
    CapacityExceeded {
        block: String,
        mem: String,
        needed: u64,
        capacity: u64,
    },

    /// A configured pass has no recognized kind.
    #[error("unsupported pass: '{name}'")]
    UnknownPass { name: String },

    /// A pass's options are ill-formed.
    #[error("invalid options for pass '{name}': {reason}")]
    InvalidOptions { name: String, reason: String },

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
