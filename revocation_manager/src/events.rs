use async_trait::async_trait;
use serde_json::Value;

/// Topics emitted by the revocation core.
pub mod topic {
    /// A registry record entered INIT; payload carries the record id and
    /// endorsement parameters so a coordinator can drive generation.
    pub const REGISTRY_INIT: &str = "revocation::registry::init";
    /// A delta was accepted by the ledger.
    pub const REVOCATION_PUBLISHED: &str = "revocation::published";
    /// Pending ids were discarded without publication.
    pub const PENDING_CLEARED: &str = "revocation::pending::cleared";
    /// A credential's local status flipped to revoked.
    pub const CREDENTIAL_REVOKED: &str = "revocation::credential::revoked";
    /// A corrective entry was applied after accumulator drift.
    pub const REGISTRY_RECOVERED: &str = "revocation::registry::recovered";
}

/// Fire-and-forget event fan-out. Failures are the notifier's problem; the
/// core never blocks or errors on emission.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn notify(&self, topic: &str, payload: Value);
}

/// Notifier that drops every event, for hosts without an event bus.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl EventNotifier for NoopNotifier {
    async fn notify(&self, topic: &str, _payload: Value) {
        trace!("NoopNotifier::notify >>> dropping event on topic {topic}");
    }
}
