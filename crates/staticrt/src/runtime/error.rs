//! Fatal error kinds surfaced by runtime construction and invocation.

use thiserror::Error;

use crate::schema::SchemaError;

/// Every failure mode is fatal: the runtime does not recover, retry, or
/// degrade. Construction errors surface before any run; invocation errors
/// surface from `run`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// An attribute-read node is present; the graph was not frozen.
    #[error("cannot accelerate unfrozen graphs")]
    UnfrozenGraph,

    /// A graph output is neither a tensor, none, nor a tuple/list of tensors.
    #[error("unsupported output type: {0}")]
    UnsupportedOutputType(String),

    /// Keyword arguments were supplied but the module carries no schema.
    #[error("schema is not available; construct the runtime from a module with a schema to pass keyword arguments")]
    SchemaRequired,

    /// An operator returned a different number of values than the node has
    /// output slots.
    #[error("operator {kind} produced {actual} values, expected {expected}")]
    ArityMismatch {
        kind: String,
        expected: usize,
        actual: usize,
    },

    /// A non-aggregate node has no registered operation.
    #[error("no operation registered for {0}")]
    OperatorMissing(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// An operator kernel failed.
    #[error(transparent)]
    Operator(#[from] anyhow::Error),
}
