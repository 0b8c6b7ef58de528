use std::sync::Arc;

use crate::{
    cache::TtlCache,
    config::RevocationConfig,
    endorsement::EndorsementChannel,
    engine::AccumulatorEngine,
    errors::error::{RevocationError, RevocationResult},
    events::EventNotifier,
    ledger::LedgerClient,
    records::{CredentialRevocationRecord, RevocationNotificationRecord, RevocationRegistryRecord},
    storage::{RecordStore, TagFilter},
    tails::TailsFileManager,
};

/// Capability bundle injected into every manager. One instance per
/// wallet/profile; the managers themselves are stateless beyond it.
#[derive(Clone)]
pub struct RevocationContext {
    pub registry_store: Arc<dyn RecordStore<RevocationRegistryRecord>>,
    pub cred_rev_store: Arc<dyn RecordStore<CredentialRevocationRecord>>,
    pub notification_store: Arc<dyn RecordStore<RevocationNotificationRecord>>,
    pub ledger: Arc<dyn LedgerClient>,
    pub engine: Arc<dyn AccumulatorEngine>,
    pub tails: Arc<dyn TailsFileManager>,
    pub events: Arc<dyn EventNotifier>,
    pub endorsement: Arc<dyn EndorsementChannel>,
    pub cache: Arc<dyn TtlCache>,
    pub config: RevocationConfig,
}

impl RevocationContext {
    /// Looks a registry record up by its on-ledger registry id (as opposed
    /// to its store record id).
    pub async fn registry_by_registry_id(
        &self,
        registry_id: &str,
    ) -> RevocationResult<RevocationRegistryRecord> {
        let found = self
            .registry_store
            .find(&TagFilter::new().eq("registry_id", registry_id).limit(1))
            .await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| RevocationError::not_found("revocation registry", registry_id))
    }
}
