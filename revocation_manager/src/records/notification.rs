use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StoredRecord;

/// Intent to notify a credential holder about a revocation.
///
/// Persisted before the batching logic runs so that notification delivery is
/// decoupled from whether the publication itself succeeds. Delivery is owned
/// by an out-of-scope messaging component keyed on `thread_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevocationNotificationRecord {
    pub record_id: String,
    pub thread_id: String,
    pub registry_id: String,
    pub cred_rev_id: u32,
    pub connection_id: Option<String>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RevocationNotificationRecord {
    pub fn new(
        registry_id: impl Into<String>,
        cred_rev_id: u32,
        thread_id: Option<String>,
        connection_id: Option<String>,
        comment: Option<String>,
    ) -> Self {
        let registry_id = registry_id.into();
        let thread_id =
            thread_id.unwrap_or_else(|| synthesize_thread_id(&registry_id, cred_rev_id));
        RevocationNotificationRecord {
            record_id: Uuid::new_v4().to_string(),
            thread_id,
            registry_id,
            cred_rev_id,
            connection_id,
            comment,
            created_at: Utc::now(),
        }
    }
}

/// Deterministic thread id for a (registry, credential) pair, used when the
/// caller does not supply one.
pub fn synthesize_thread_id(registry_id: &str, cred_rev_id: u32) -> String {
    format!("indy::{registry_id}::{cred_rev_id}")
}

impl StoredRecord for RevocationNotificationRecord {
    const RECORD_TYPE: &'static str = "revocation_notification";

    fn record_id(&self) -> &str {
        &self.record_id
    }

    fn tags(&self) -> HashMap<String, String> {
        HashMap::from([
            ("thread_id".to_string(), self.thread_id.clone()),
            ("registry_id".to_string(), self.registry_id.clone()),
            ("cred_rev_id".to_string(), self.cred_rev_id.to_string()),
        ])
    }
}
