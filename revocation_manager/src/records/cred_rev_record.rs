use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StoredRecord;

/// Issuance protocol version the credential was exchanged under, when known.
/// Revocation tolerates records of either version, or none at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredExVersion {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredRevState {
    Issued,
    Revoked,
}

impl CredRevState {
    fn as_str(self) -> &'static str {
        match self {
            CredRevState::Issued => "issued",
            CredRevState::Revoked => "revoked",
        }
    }
}

/// Local record of one credential's revocation status within a registry.
///
/// These records are the recovery protocol's source of truth for "locally
/// revoked": reconciliation re-derives the correct accumulator from the set
/// of records in `Revoked` state, independent of what the ledger reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialRevocationRecord {
    pub record_id: String,
    pub registry_id: String,
    pub cred_def_id: String,
    pub cred_rev_id: u32,
    pub cred_ex_id: Option<String>,
    pub cred_ex_version: Option<CredExVersion>,
    pub state: CredRevState,
    pub created_at: DateTime<Utc>,
}

impl CredentialRevocationRecord {
    pub fn new(
        registry_id: impl Into<String>,
        cred_def_id: impl Into<String>,
        cred_rev_id: u32,
        cred_ex_id: Option<String>,
        cred_ex_version: Option<CredExVersion>,
    ) -> Self {
        CredentialRevocationRecord {
            record_id: Uuid::new_v4().to_string(),
            registry_id: registry_id.into(),
            cred_def_id: cred_def_id.into(),
            cred_rev_id,
            cred_ex_id,
            cred_ex_version,
            state: CredRevState::Issued,
            created_at: Utc::now(),
        }
    }
}

impl StoredRecord for CredentialRevocationRecord {
    const RECORD_TYPE: &'static str = "credential_revocation";

    fn record_id(&self) -> &str {
        &self.record_id
    }

    fn tags(&self) -> HashMap<String, String> {
        HashMap::from([
            ("registry_id".to_string(), self.registry_id.clone()),
            ("cred_def_id".to_string(), self.cred_def_id.clone()),
            ("cred_rev_id".to_string(), self.cred_rev_id.to_string()),
            ("state".to_string(), self.state.as_str().to_string()),
        ])
    }
}
