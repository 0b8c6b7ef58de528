use std::{collections::HashMap, path::PathBuf, time::Duration};

use crate::records::DEFAULT_REGISTRY_SIZE;

/// Process-wide settings of the revocation core. Built in code by the host
/// agent; every per-call override in the managers falls back to these.
#[derive(Clone, Debug)]
pub struct RevocationConfig {
    /// Capacity used when `init_registry` is called without an explicit size.
    pub default_registry_size: u32,
    /// Root under which per-registry tails artifacts are kept. Generation
    /// stages new artifacts in `<tails_base_dir>/staging`.
    pub tails_base_dir: PathBuf,
    /// Default budget for `wait_for_active`.
    pub waiter_timeout: Duration,
    pub waiter_poll_interval: Duration,
    /// Bound on recovery attempts per distinct accumulator value.
    pub recovery_max_attempts: u32,
    /// Window the attempt counter lives for.
    pub recovery_attempt_ttl: Duration,
    /// Pause between per-registry recovery iterations, bounding ledger load.
    pub recovery_pause: Duration,
    /// How long a cached active-registry lookup stays valid.
    pub registry_cache_ttl: Duration,
    /// Genesis transactions for recovery; when `None` the write ledger's
    /// pool-level genesis is used.
    pub genesis_transactions: Option<String>,
    /// Author role: no direct ledger write access, transactions go out for
    /// endorsement.
    pub author_role: bool,
    /// Endorser connection to use when a call supplies none.
    pub endorser_connection_id: Option<String>,
    /// DID-indy mappings preferred over the raw issuer segment of a cred def
    /// id when resolving the controlling DID.
    pub did_indy_aliases: HashMap<String, String>,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        RevocationConfig {
            default_registry_size: DEFAULT_REGISTRY_SIZE,
            tails_base_dir: std::env::temp_dir().join("revocation-tails"),
            waiter_timeout: Duration::from_secs(120),
            waiter_poll_interval: Duration::from_millis(500),
            recovery_max_attempts: 5,
            recovery_attempt_ttl: Duration::from_secs(30),
            recovery_pause: Duration::from_millis(500),
            registry_cache_ttl: Duration::from_secs(30),
            genesis_transactions: None,
            author_role: false,
            endorser_connection_id: None,
            did_indy_aliases: HashMap::new(),
        }
    }
}

impl RevocationConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.tails_base_dir.join("staging")
    }

    /// Resolves the controlling issuer DID from a cred def id, preferring a
    /// configured DID-indy alias over the raw issuer segment.
    pub fn resolve_issuer_did(&self, cred_def_id: &str) -> String {
        let raw = cred_def_id.split(':').next().unwrap_or(cred_def_id);
        self.did_indy_aliases
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }
}
