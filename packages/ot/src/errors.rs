//! Error types for the OT engine

use thiserror::Error;

/// Algebraic violations and protocol misuse.
///
/// Any of these rejects the offending operation as a whole; nothing is
/// partially applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    #[error("Operation expects a document of length {expected}, got {actual}")]
    BaseLengthMismatch { expected: usize, actual: usize },

    #[error("Cannot compose: first operation yields length {first_target}, second expects {second_base}")]
    ComposeLengthMismatch {
        first_target: usize,
        second_base: usize,
    },

    #[error("Cannot transform operations with base lengths {left} and {right}")]
    TransformLengthMismatch { left: usize, right: usize },

    #[error("Incompatible operations: {0}")]
    Incompatible(&'static str),

    #[error("Received an acknowledgement with no operation outstanding")]
    UnexpectedAck,

    #[error("Revision {requested} is ahead of the current revision {current}")]
    RevisionAhead { requested: u64, current: u64 },

    #[error("Invalid operation: {0}")]
    Invalid(String),
}
