use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::StoredRecord;
use crate::errors::error::{RevocationError, RevocationResult};

/// Engine-imposed bounds on registry capacity.
pub const MIN_REGISTRY_SIZE: u32 = 4;
pub const MAX_REGISTRY_SIZE: u32 = 32768;
pub const DEFAULT_REGISTRY_SIZE: u32 = 1000;

pub const DEFAULT_REGISTRY_TYPE: &str = "CL_ACCUM";

/// Lifecycle states of a revocation registry.
///
/// `Init -> Generated -> Posted -> Active -> Full`, with `Decommissioned`
/// reachable from any non-init state. `Full` and `Decommissioned` stop
/// further issuance; corrective entries may still be published from them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevRegState {
    Init,
    Generated,
    Posted,
    Active,
    Full,
    Decommissioned,
}

impl RevRegState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RevRegState::Full | RevRegState::Decommissioned)
    }
}

impl fmt::Display for RevRegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RevRegState::Init => "init",
            RevRegState::Generated => "generated",
            RevRegState::Posted => "posted",
            RevRegState::Active => "active",
            RevRegState::Full => "full",
            RevRegState::Decommissioned => "decommissioned",
        };
        f.write_str(s)
    }
}

/// One cryptographic accumulator instance bound to one credential definition.
///
/// `registry_id`, the definition and the entry are assigned during
/// generation and the registry id is immutable from then on. The definition,
/// entry and private material blobs are engine-owned JSON, opaque here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevocationRegistryRecord {
    pub record_id: String,
    pub state: RevRegState,
    pub cred_def_id: String,
    pub issuer_did: String,
    pub registry_id: Option<String>,
    pub tag: Option<String>,
    pub registry_type: String,
    pub max_cred_num: u32,
    pub registry_definition: Option<Value>,
    pub registry_definition_private: Option<Value>,
    pub registry_entry: Option<Value>,
    pub tails_hash: Option<String>,
    pub tails_local_path: Option<String>,
    pub tails_public_uri: Option<String>,
    /// Credential revocation ids marked revoked locally but not yet folded
    /// into a published delta. Sorted-set semantics.
    pub pending_publication: BTreeSet<u32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RevocationRegistryRecord {
    pub fn new(
        cred_def_id: impl Into<String>,
        issuer_did: impl Into<String>,
        max_cred_num: u32,
        registry_type: impl Into<String>,
        tag: Option<String>,
    ) -> Self {
        RevocationRegistryRecord {
            record_id: Uuid::new_v4().to_string(),
            state: RevRegState::Init,
            cred_def_id: cred_def_id.into(),
            issuer_did: issuer_did.into(),
            registry_id: None,
            tag,
            registry_type: registry_type.into(),
            max_cred_num,
            registry_definition: None,
            registry_definition_private: None,
            registry_entry: None,
            tails_hash: None,
            tails_local_path: None,
            tails_public_uri: None,
            pending_publication: BTreeSet::new(),
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Tag used towards the accumulator engine; falls back to the record id
    /// when none was supplied at init.
    pub fn effective_tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.record_id)
    }

    /// Fails with `InvalidState` unless the current state is one of
    /// `expected`.
    pub fn require_state(&self, expected: &[RevRegState]) -> RevocationResult<()> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(RevocationError::InvalidState {
                record_id: self.record_id.clone(),
                expected: expected.iter().map(ToString::to_string).collect(),
                actual: self.state.to_string(),
            })
        }
    }

    /// Registry id, or `InvalidState` when the record has not been generated.
    pub fn require_registry_id(&self) -> RevocationResult<&str> {
        self.registry_id
            .as_deref()
            .ok_or_else(|| RevocationError::InvalidState {
                record_id: self.record_id.clone(),
                expected: vec![
                    RevRegState::Generated.to_string(),
                    RevRegState::Posted.to_string(),
                    RevRegState::Active.to_string(),
                    RevRegState::Full.to_string(),
                    RevRegState::Decommissioned.to_string(),
                ],
                actual: self.state.to_string(),
            })
    }

    /// Marks a credential revocation id for deferred publication. Idempotent.
    pub fn mark_pending(&mut self, cred_rev_id: u32) {
        self.pending_publication.insert(cred_rev_id);
    }

    /// Subtracts `folded` from whatever the pending set currently is.
    pub fn clear_pending(&mut self, folded: &BTreeSet<u32>) {
        self.pending_publication = &self.pending_publication - folded;
    }
}

impl StoredRecord for RevocationRegistryRecord {
    const RECORD_TYPE: &'static str = "revocation_registry";

    fn record_id(&self) -> &str {
        &self.record_id
    }

    fn tags(&self) -> HashMap<String, String> {
        let mut tags = HashMap::from([
            ("cred_def_id".to_string(), self.cred_def_id.clone()),
            ("state".to_string(), self.state.to_string()),
        ]);
        if let Some(registry_id) = &self.registry_id {
            tags.insert("registry_id".to_string(), registry_id.clone());
        }
        tags
    }
}
