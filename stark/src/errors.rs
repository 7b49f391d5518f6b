use thiserror::Error;

pub type StarkResult<T> = Result<T, StarkError>;

/// Errors surfaced by the prover and verifier. All of them abort the current
/// task; nothing is retried since every challenge is transcript-derived and a
/// re-run would reach the same state.
#[derive(Error, Debug)]
pub enum StarkError {
    /// Unknown opcode, argument-count mismatch or bad expression id in the
    /// compiled bytecode.
    #[error("bytecode error in expression {exp_id}: {reason}")]
    Bytecode { exp_id: u64, reason: String },

    /// A buffer length, stage width or opening-point count disagrees with
    /// the StarkInfo layout.
    #[error("shape error: {0}")]
    Shape(String),

    /// `batch_inverse` or an explicit inversion hit a zero.
    #[error("inverse of zero while evaluating expression {exp_id}")]
    InverseOfZero { exp_id: u64 },

    /// Verifier side: a Merkle path does not reconstruct the committed root.
    #[error("merkle proof invalid: {0}")]
    MerkleProofInvalid(String),

    /// Verifier side: an embedded value is inconsistent with the re-derived
    /// transcript state.
    #[error("transcript mismatch: {0}")]
    TranscriptMismatch(String),

    /// Verifier side: a FRI fold does not match the next step's value or the
    /// final polynomial sample.
    #[error("fri fold mismatch: {0}")]
    FriFoldMismatch(String),

    /// Debug constraint checking found a non-zero constraint evaluation.
    /// Carries up to ten offending row indices with their computed values.
    #[error("constraint violated at `{line}` ({} offending rows)", .rows.len())]
    ConstraintViolation {
        line: String,
        rows: Vec<ConstraintFailure>,
    },
}

#[derive(Debug, Clone)]
pub struct ConstraintFailure {
    pub row: usize,
    pub value: [u64; 3],
}

impl StarkError {
    pub fn bytecode(exp_id: u64, reason: impl Into<String>) -> Self {
        StarkError::Bytecode {
            exp_id,
            reason: reason.into(),
        }
    }

    pub fn shape(reason: impl Into<String>) -> Self {
        StarkError::Shape(reason.into())
    }
}
