use std::{collections::BTreeSet, path::Path};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::error::RevocationResult;

/// Output of registry creation. The definition, private material and entry
/// blobs are engine-owned JSON; the tails artifact is written to the staging
/// directory handed to `create_registry` and moved into place by the
/// lifecycle manager.
#[derive(Clone, Debug)]
pub struct CreatedRegistry {
    pub registry_id: String,
    pub registry_definition: Value,
    pub registry_definition_private: Value,
    pub registry_entry: Value,
    pub tails_hash: String,
    pub tails_staging_path: String,
}

/// Result of folding a batch of revocations into one delta.
///
/// `delta` is `None` when every requested id was already reflected in the
/// accumulator. Ids the engine could not fold (unknown, out of range) are
/// reported in `failed_ids` rather than failing the whole batch.
#[derive(Clone, Debug, Default)]
pub struct FoldOutcome {
    pub delta: Option<Value>,
    pub failed_ids: BTreeSet<u32>,
}

/// The cryptographic accumulator, out of scope beyond this contract.
#[async_trait]
pub trait AccumulatorEngine: Send + Sync {
    async fn create_registry(
        &self,
        issuer_did: &str,
        cred_def_id: &str,
        registry_type: &str,
        tag: &str,
        max_cred_num: u32,
        staging_dir: &Path,
    ) -> RevocationResult<CreatedRegistry>;

    /// Folds `cred_rev_ids` into a single delta against the registry's
    /// current accumulator.
    async fn revoke_and_fold(
        &self,
        cred_def_id: &str,
        registry_id: &str,
        tails_local_path: &str,
        cred_rev_ids: &BTreeSet<u32>,
    ) -> RevocationResult<FoldOutcome>;

    /// Deterministically recomputes a valid accumulator value and proof from
    /// the full known-revoked-id set. Identical inputs must produce an
    /// identical accumulator value (engine-internal nonces excluded).
    async fn compute_recovery(
        &self,
        genesis_transactions: &str,
        registry_id: &str,
        revoked_ids: &BTreeSet<u32>,
        cred_def: &Value,
        registry_def_private: &Value,
    ) -> RevocationResult<Value>;
}
