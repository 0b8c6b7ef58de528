use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error as ThisError;

use crate::errors::error::RevocationError;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Classification of a ledger write/read failure, produced by the
/// `LedgerClient` implementation itself. The core dispatches on this tag and
/// never inspects the free-text message; the message is preserved verbatim
/// for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRejection {
    /// Ledger is in read-only mode.
    ReadOnly,
    /// The submitted entry was built against an accumulator value that is no
    /// longer the ledger's current one.
    StaleAccumulator,
    /// Transaction author agreement not accepted for this write.
    TaaRequired,
    /// Requested object does not exist on the ledger.
    NotFound,
    Other,
}

impl fmt::Display for LedgerRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LedgerRejection::ReadOnly => "read-only",
            LedgerRejection::StaleAccumulator => "stale accumulator",
            LedgerRejection::TaaRequired => "TAA not accepted",
            LedgerRejection::NotFound => "not found",
            LedgerRejection::Other => "ledger failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, ThisError)]
#[error("{kind}: {message}")]
pub struct LedgerError {
    pub kind: LedgerRejection,
    pub message: String,
}

impl LedgerError {
    pub fn new(kind: LedgerRejection, message: impl Into<String>) -> Self {
        LedgerError {
            kind,
            message: message.into(),
        }
    }
}

/// Read/write access to the ledger objects the revocation core needs.
///
/// Definitions, entries, deltas and responses are opaque JSON owned by the
/// ledger implementation. Write methods take `write_ledger = false` to build
/// and sign the transaction without submitting it (author/endorsement path);
/// the returned value is then the unsigned or partially signed payload.
/// A successful entry write echoes the accepted entry under `"value"` in its
/// response; recovery treats that echoed value as authoritative.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn is_read_only(&self) -> bool;

    async fn get_credential_definition(&self, cred_def_id: &str) -> LedgerResult<Value>;

    async fn get_registry_definition(&self, registry_id: &str) -> LedgerResult<Value>;

    /// Current delta for the registry between the two optional timestamps.
    /// Returns the delta and the ledger timestamp it was taken at.
    async fn get_registry_delta(
        &self,
        registry_id: &str,
        from: Option<u64>,
        to: Option<u64>,
    ) -> LedgerResult<(Value, u64)>;

    async fn send_registry_definition(
        &self,
        definition: &Value,
        issuer_did: &str,
        write_ledger: bool,
        endorser_did: Option<&str>,
    ) -> LedgerResult<Value>;

    async fn send_registry_entry(
        &self,
        registry_id: &str,
        registry_type: &str,
        entry: &Value,
        issuer_did: &str,
        write_ledger: bool,
        endorser_did: Option<&str>,
    ) -> LedgerResult<Value>;

    /// Pool-level genesis transactions, used as fallback input to accumulator
    /// recovery when none are configured.
    async fn genesis_transactions(&self) -> LedgerResult<String>;
}

/// Maps a ledger write failure onto the core error surface. Read-only and
/// TAA rejections are never retried; everything else passes through with the
/// original diagnostic preserved. `StaleAccumulator` is expected to be
/// intercepted by the recovery path before this runs.
pub fn classify_write_error(err: LedgerError) -> RevocationError {
    match err.kind {
        LedgerRejection::ReadOnly | LedgerRejection::TaaRequired => {
            RevocationError::LedgerReadOnly(err.to_string())
        }
        _ => RevocationError::Ledger(err),
    }
}

/// Ids revoked according to a ledger delta. The delta encoding is owned by
/// the accumulator engine; the one structural assumption shared with it is
/// the `value.revoked` id array.
pub fn delta_revoked_ids(delta: &Value) -> Vec<u32> {
    delta["value"]["revoked"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_u64)
                .map(|id| id as u32)
                .collect()
        })
        .unwrap_or_default()
}

/// Accumulator value carried by a delta or entry blob, when present.
pub fn accumulator_value(entry: &Value) -> Option<&str> {
    entry["value"]["accum"].as_str()
}
