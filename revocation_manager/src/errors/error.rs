use thiserror::Error as ThisError;

use crate::ledger::LedgerError;

pub type RevocationResult<T> = Result<T, RevocationError>;

/// Error surface of the revocation core. Variants carry enough structured
/// context (ids, expected vs actual state or count) for a caller to decide
/// between retry and abort without parsing the message text.
#[derive(Debug, ThisError)]
pub enum RevocationError {
    #[error(
        "Registry record {record_id} is in state '{actual}', operation requires one of \
         {expected:?}"
    )]
    InvalidState {
        record_id: String,
        expected: Vec<String>,
        actual: String,
    },
    #[error("Requested registry size {size} is outside the allowed range {min}..={max}")]
    BadRegistrySize { size: u32, min: u32, max: u32 },
    #[error("Credential definition {cred_def_id} does not support revocation: {reason}")]
    NotSupported {
        cred_def_id: String,
        reason: String,
    },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Ledger rejects writes: {0}")]
    LedgerReadOnly(String),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("No endorser connection resolvable for cred def {cred_def_id}")]
    NoEndorserConnection { cred_def_id: String },
    #[error(
        "Accumulator engine produced registry id '{engine_id}' but record {record_id} was \
         pre-assigned '{assigned_id}'"
    )]
    RegistryIdMismatch {
        record_id: String,
        assigned_id: String,
        engine_id: String,
    },
    #[error(
        "Timed out waiting for {expected} active registries for cred def {cred_def_id}, last \
         observed {observed}; registry generation may still complete in the background"
    )]
    TimedOut {
        cred_def_id: String,
        expected: usize,
        observed: usize,
    },
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Invalid tails URI '{uri}': {reason}")]
    InvalidUrl { uri: String, reason: String },
    #[error("Accumulator engine error: {0}")]
    Engine(String),
    #[error("Endorsement channel error: {0}")]
    Endorsement(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RevocationError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RevocationError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether a caller may expect the referenced object to appear later
    /// (e.g. registry generation still in flight).
    pub fn is_not_found(&self) -> bool {
        matches!(self, RevocationError::NotFound { .. })
    }
}
