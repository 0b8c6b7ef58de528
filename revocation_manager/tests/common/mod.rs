#![allow(dead_code)]

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use mockall::mock;
use revocation_manager::{
    cache::InMemoryTtlCache,
    endorsement::{EndorsementChannel, EndorsementHandoff},
    engine::{AccumulatorEngine, CreatedRegistry, FoldOutcome},
    errors::error::RevocationResult,
    events::EventNotifier,
    ledger::{LedgerClient, LedgerError, LedgerRejection, LedgerResult},
    manager::{
        lifecycle::RegistryLifecycle, publish::RevocationBatcher, recovery::RecoveryProtocol,
        waiter::RegistryWaiter,
    },
    records::{
        CredRevState, CredentialRevocationRecord, RevRegState, RevocationNotificationRecord,
        RevocationRegistryRecord,
    },
    storage::InMemoryStore,
    tails::TailsFileManager,
    RevocationConfig, RevocationContext,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

pub const CRED_DEF_ID: &str = "55GkHamhTU1ZbTbV2ab9DE:3:CL:12:tag1";
pub const ISSUER_DID: &str = "55GkHamhTU1ZbTbV2ab9DE";
pub const REGISTRY_ID: &str = "55GkHamhTU1ZbTbV2ab9DE:4:55GkHamhTU1ZbTbV2ab9DE:3:CL:12:tag1:CL_ACCUM:tag1";
pub const TAILS_URI: &str = "https://tails.example.org/hash-abc";

pub fn cred_def_with_revocation() -> Value {
    json!({
        "id": CRED_DEF_ID,
        "value": {
            "primary": { "n": "123" },
            "revocation": { "y": "456" },
        }
    })
}

pub fn cred_def_without_revocation() -> Value {
    json!({
        "id": CRED_DEF_ID,
        "value": { "primary": { "n": "123" } }
    })
}

pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("revocation-manager-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Config with short enough budgets that a failing poll loop does not stall
/// the suite.
pub fn test_config(dir: &Path) -> RevocationConfig {
    RevocationConfig {
        tails_base_dir: dir.to_path_buf(),
        waiter_poll_interval: Duration::from_millis(10),
        waiter_timeout: Duration::from_millis(100),
        recovery_pause: Duration::from_millis(1),
        ..RevocationConfig::default()
    }
}

/// A registry record past generation, with a real tails file on disk under
/// `dir` so publication and folding preconditions hold.
pub fn registry_record(
    registry_id: &str,
    state: RevRegState,
    dir: &Path,
) -> RevocationRegistryRecord {
    let tails_dir = dir.join(registry_id);
    std::fs::create_dir_all(&tails_dir).unwrap();
    let tails_path = tails_dir.join("hash-abc");
    std::fs::write(&tails_path, b"tails").unwrap();

    let mut rec = RevocationRegistryRecord::new(
        CRED_DEF_ID,
        ISSUER_DID,
        1000,
        "CL_ACCUM",
        Some("tag1".to_string()),
    );
    rec.state = state;
    rec.registry_id = Some(registry_id.to_string());
    rec.registry_definition = Some(json!({
        "value": { "tailsHash": "hash-abc", "tailsLocation": TAILS_URI }
    }));
    rec.registry_definition_private = Some(json!({ "value": { "p_key": "priv" } }));
    rec.registry_entry = Some(json!({ "value": { "accum": "accum-0" } }));
    rec.tails_hash = Some("hash-abc".to_string());
    rec.tails_local_path = Some(tails_path.to_string_lossy().into_owned());
    rec.tails_public_uri = Some(TAILS_URI.to_string());
    rec
}

pub struct SentEntry {
    pub registry_id: String,
    pub entry: Value,
    pub write_ledger: bool,
    pub endorser_did: Option<String>,
}

pub struct SentDefinition {
    pub definition: Value,
    pub issuer_did: String,
    pub write_ledger: bool,
    pub endorser_did: Option<String>,
}

/// Scripted ledger double. Entry writes echo the accepted entry under
/// `"value"` unless a scripted response is queued; every write attempt is
/// recorded, including rejected ones.
#[derive(Default)]
pub struct StubLedger {
    pub cred_defs: Mutex<HashMap<String, Value>>,
    pub deltas: Mutex<HashMap<String, Value>>,
    pub entry_responses: Mutex<VecDeque<LedgerResult<Value>>>,
    pub sent_entries: Mutex<Vec<SentEntry>>,
    pub sent_definitions: Mutex<Vec<SentDefinition>>,
    pub genesis: String,
    pub read_only: bool,
}

impl StubLedger {
    pub fn with_revocable_cred_def() -> Self {
        let ledger = StubLedger {
            genesis: "pool-genesis".to_string(),
            ..StubLedger::default()
        };
        ledger
            .cred_defs
            .lock()
            .unwrap()
            .insert(CRED_DEF_ID.to_string(), cred_def_with_revocation());
        ledger
    }

    pub fn set_delta(&self, registry_id: &str, accum: &str, revoked: &[u32]) {
        self.deltas.lock().unwrap().insert(
            registry_id.to_string(),
            json!({ "value": { "accum": accum, "revoked": revoked } }),
        );
    }

    pub fn push_entry_response(&self, response: LedgerResult<Value>) {
        self.entry_responses.lock().unwrap().push_back(response);
    }

    pub fn entry_writes(&self) -> usize {
        self.sent_entries.lock().unwrap().len()
    }
}

#[async_trait]
impl LedgerClient for StubLedger {
    async fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn get_credential_definition(&self, cred_def_id: &str) -> LedgerResult<Value> {
        self.cred_defs
            .lock()
            .unwrap()
            .get(cred_def_id)
            .cloned()
            .ok_or_else(|| {
                LedgerError::new(
                    LedgerRejection::NotFound,
                    format!("cred def {cred_def_id} not found"),
                )
            })
    }

    async fn get_registry_definition(&self, registry_id: &str) -> LedgerResult<Value> {
        Ok(json!({ "id": registry_id, "value": {} }))
    }

    async fn get_registry_delta(
        &self,
        registry_id: &str,
        _from: Option<u64>,
        _to: Option<u64>,
    ) -> LedgerResult<(Value, u64)> {
        let delta = self
            .deltas
            .lock()
            .unwrap()
            .get(registry_id)
            .cloned()
            .unwrap_or_else(|| json!({ "value": { "accum": "accum-ledger", "revoked": [] } }));
        Ok((delta, 1_700_000_000))
    }

    async fn send_registry_definition(
        &self,
        definition: &Value,
        issuer_did: &str,
        write_ledger: bool,
        endorser_did: Option<&str>,
    ) -> LedgerResult<Value> {
        self.sent_definitions.lock().unwrap().push(SentDefinition {
            definition: definition.clone(),
            issuer_did: issuer_did.to_string(),
            write_ledger,
            endorser_did: endorser_did.map(ToString::to_string),
        });
        Ok(json!({ "result": { "txnMetadata": { "seqNo": 10 } } }))
    }

    async fn send_registry_entry(
        &self,
        registry_id: &str,
        _registry_type: &str,
        entry: &Value,
        _issuer_did: &str,
        write_ledger: bool,
        endorser_did: Option<&str>,
    ) -> LedgerResult<Value> {
        self.sent_entries.lock().unwrap().push(SentEntry {
            registry_id: registry_id.to_string(),
            entry: entry.clone(),
            write_ledger,
            endorser_did: endorser_did.map(ToString::to_string),
        });
        if let Some(scripted) = self.entry_responses.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(json!({ "value": entry["value"].clone() }))
    }

    async fn genesis_transactions(&self) -> LedgerResult<String> {
        Ok(self.genesis.clone())
    }
}

fn accum_for(ids: &BTreeSet<u32>) -> String {
    let joined: Vec<String> = ids.iter().map(ToString::to_string).collect();
    format!("accum[{}]", joined.join("-"))
}

/// Deterministic engine double. The accumulator value it produces is a pure
/// function of the folded id set, which is what the recovery determinism
/// contract requires.
#[derive(Default)]
pub struct StubEngine {
    pub fail_ids: BTreeSet<u32>,
    pub fail_recovery: bool,
    pub fold_calls: Mutex<Vec<(String, BTreeSet<u32>)>>,
    pub recovery_calls: Mutex<Vec<(String, BTreeSet<u32>)>>,
    pub fold_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl StubEngine {
    /// Parks the next `revoke_and_fold` call until the sender fires, letting
    /// a test interleave other work mid-fold.
    pub fn hold_next_fold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.fold_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn fold_count(&self) -> usize {
        self.fold_calls.lock().unwrap().len()
    }

    pub fn recovery_count(&self) -> usize {
        self.recovery_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AccumulatorEngine for StubEngine {
    async fn create_registry(
        &self,
        issuer_did: &str,
        cred_def_id: &str,
        registry_type: &str,
        tag: &str,
        _max_cred_num: u32,
        staging_dir: &Path,
    ) -> RevocationResult<CreatedRegistry> {
        let registry_id = format!("{issuer_did}:4:{cred_def_id}:{registry_type}:{tag}");
        let tails_hash = format!("hash-{tag}");
        let staging_path = staging_dir.join(&tails_hash);
        tokio::fs::write(&staging_path, b"tails").await?;
        Ok(CreatedRegistry {
            registry_id,
            registry_definition: json!({
                "value": { "tailsHash": tails_hash, "tailsLocation": "" }
            }),
            registry_definition_private: json!({ "value": { "p_key": "priv" } }),
            registry_entry: json!({ "value": { "accum": "accum-genesis" } }),
            tails_hash,
            tails_staging_path: staging_path.to_string_lossy().into_owned(),
        })
    }

    async fn revoke_and_fold(
        &self,
        _cred_def_id: &str,
        registry_id: &str,
        _tails_local_path: &str,
        cred_rev_ids: &BTreeSet<u32>,
    ) -> RevocationResult<FoldOutcome> {
        let gate = self.fold_gate.lock().unwrap().take();
        if let Some(rx) = gate {
            let _ = rx.await;
        }
        self.fold_calls
            .lock()
            .unwrap()
            .push((registry_id.to_string(), cred_rev_ids.clone()));
        let failed_ids: BTreeSet<u32> = cred_rev_ids & &self.fail_ids;
        let folded: BTreeSet<u32> = cred_rev_ids - &failed_ids;
        let delta = if folded.is_empty() {
            None
        } else {
            let revoked: Vec<u32> = folded.iter().copied().collect();
            Some(json!({
                "value": {
                    "prevAccum": "accum-0",
                    "accum": accum_for(&folded),
                    "revoked": revoked,
                }
            }))
        };
        Ok(FoldOutcome { delta, failed_ids })
    }

    async fn compute_recovery(
        &self,
        _genesis_transactions: &str,
        registry_id: &str,
        revoked_ids: &BTreeSet<u32>,
        _cred_def: &Value,
        _registry_def_private: &Value,
    ) -> RevocationResult<Value> {
        if self.fail_recovery {
            return Err(revocation_manager::errors::error::RevocationError::Engine(
                "accumulator recomputation failed".to_string(),
            ));
        }
        self.recovery_calls
            .lock()
            .unwrap()
            .push((registry_id.to_string(), revoked_ids.clone()));
        let revoked: Vec<u32> = revoked_ids.iter().copied().collect();
        Ok(json!({
            "value": { "accum": accum_for(revoked_ids), "revoked": revoked }
        }))
    }
}

/// Copies the staged artifact around without any real hosting.
#[derive(Default)]
pub struct StubTails {
    pub uploads: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<String>>,
}

#[async_trait]
impl TailsFileManager for StubTails {
    async fn upload(&self, registry_id: &str, _local_path: &Path) -> RevocationResult<String> {
        self.uploads.lock().unwrap().push(registry_id.to_string());
        Ok(format!("https://tails.example.org/{registry_id}"))
    }

    async fn download(
        &self,
        registry_id: &str,
        _public_uri: &str,
        dest_dir: &Path,
    ) -> RevocationResult<PathBuf> {
        self.downloads.lock().unwrap().push(registry_id.to_string());
        let path = dest_dir.join("hash-abc");
        tokio::fs::write(&path, b"tails").await?;
        Ok(path)
    }
}

#[derive(Default)]
pub struct StubEndorsement {
    pub default_connection: Option<String>,
    pub sent: Mutex<Vec<EndorsementHandoff>>,
}

impl StubEndorsement {
    pub fn with_default_connection(connection_id: &str) -> Self {
        StubEndorsement {
            default_connection: Some(connection_id.to_string()),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EndorsementChannel for StubEndorsement {
    async fn resolve_default_connection(&self) -> RevocationResult<Option<String>> {
        Ok(self.default_connection.clone())
    }

    async fn endorser_did(&self, connection_id: &str) -> RevocationResult<String> {
        Ok(format!("did:endorser:{connection_id}"))
    }

    async fn send(&self, handoff: EndorsementHandoff) -> RevocationResult<()> {
        self.sent.lock().unwrap().push(handoff);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingNotifier {
    pub fn topics(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn payloads(&self, topic: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn notify(&self, topic: &str, payload: Value) {
        self.events
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
    }
}

mock! {
    pub Ledger {}

    impl LedgerClient for Ledger {
        fn is_read_only<'life0, 'async_trait>(&'life0 self) -> core::pin::Pin<Box<dyn core::future::Future<Output = bool> + core::marker::Send + 'async_trait>> where 'life0: 'async_trait, Self: 'async_trait;
        fn get_credential_definition<'life0, 'life1, 'async_trait>(&'life0 self, cred_def_id: &'life1 str) -> core::pin::Pin<Box<dyn core::future::Future<Output = LedgerResult<Value>> + core::marker::Send + 'async_trait>> where 'life0: 'async_trait, 'life1: 'async_trait, Self: 'async_trait;
        fn get_registry_definition<'life0, 'life1, 'async_trait>(&'life0 self, registry_id: &'life1 str) -> core::pin::Pin<Box<dyn core::future::Future<Output = LedgerResult<Value>> + core::marker::Send + 'async_trait>> where 'life0: 'async_trait, 'life1: 'async_trait, Self: 'async_trait;
        fn get_registry_delta<'life0, 'life1, 'async_trait>(&'life0 self, registry_id: &'life1 str, from: Option<u64>, to: Option<u64>) -> core::pin::Pin<Box<dyn core::future::Future<Output = LedgerResult<(Value, u64)>> + core::marker::Send + 'async_trait>> where 'life0: 'async_trait, 'life1: 'async_trait, Self: 'async_trait;
        fn send_registry_definition<'life0, 'life1, 'life2, 'life3, 'async_trait>(&'life0 self, definition: &'life1 Value, issuer_did: &'life2 str, write_ledger: bool, endorser_did: Option<&'life3 str>) -> core::pin::Pin<Box<dyn core::future::Future<Output = LedgerResult<Value>> + core::marker::Send + 'async_trait>> where 'life0: 'async_trait, 'life1: 'async_trait, 'life2: 'async_trait, 'life3: 'async_trait, Self: 'async_trait;
        fn send_registry_entry<'life0, 'life1, 'life2, 'life3, 'life4, 'life5, 'async_trait>(&'life0 self, registry_id: &'life1 str, registry_type: &'life2 str, entry: &'life3 Value, issuer_did: &'life4 str, write_ledger: bool, endorser_did: Option<&'life5 str>) -> core::pin::Pin<Box<dyn core::future::Future<Output = LedgerResult<Value>> + core::marker::Send + 'async_trait>> where 'life0: 'async_trait, 'life1: 'async_trait, 'life2: 'async_trait, 'life3: 'async_trait, 'life4: 'async_trait, 'life5: 'async_trait, Self: 'async_trait;
        fn genesis_transactions<'life0, 'async_trait>(&'life0 self) -> core::pin::Pin<Box<dyn core::future::Future<Output = LedgerResult<String>> + core::marker::Send + 'async_trait>> where 'life0: 'async_trait, Self: 'async_trait;
    }
}

mock! {
    pub Engine {}

    #[async_trait]
    impl AccumulatorEngine for Engine {
        async fn create_registry(
            &self,
            issuer_did: &str,
            cred_def_id: &str,
            registry_type: &str,
            tag: &str,
            max_cred_num: u32,
            staging_dir: &Path,
        ) -> RevocationResult<CreatedRegistry>;
        async fn revoke_and_fold(
            &self,
            cred_def_id: &str,
            registry_id: &str,
            tails_local_path: &str,
            cred_rev_ids: &BTreeSet<u32>,
        ) -> RevocationResult<FoldOutcome>;
        async fn compute_recovery(
            &self,
            genesis_transactions: &str,
            registry_id: &str,
            revoked_ids: &BTreeSet<u32>,
            cred_def: &Value,
            registry_def_private: &Value,
        ) -> RevocationResult<Value>;
    }
}

pub struct Harness {
    pub ctx: Arc<RevocationContext>,
    pub ledger: Arc<StubLedger>,
    pub engine: Arc<StubEngine>,
    pub tails: Arc<StubTails>,
    pub endorsement: Arc<StubEndorsement>,
    pub events: Arc<RecordingNotifier>,
    pub dir: PathBuf,
}

pub struct HarnessBuilder {
    pub ledger: StubLedger,
    pub engine: StubEngine,
    pub endorsement: StubEndorsement,
    pub config: RevocationConfig,
    dir: PathBuf,
}

pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        init_test_logging();
        let dir = scratch_dir();
        HarnessBuilder {
            ledger: StubLedger::with_revocable_cred_def(),
            engine: StubEngine::default(),
            endorsement: StubEndorsement::default(),
            config: test_config(&dir),
            dir,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn lifecycle(&self) -> RegistryLifecycle {
        RegistryLifecycle::new(self.ctx.clone())
    }

    pub fn batcher(&self) -> RevocationBatcher {
        RevocationBatcher::new(self.ctx.clone())
    }

    pub fn recovery(&self) -> RecoveryProtocol {
        RecoveryProtocol::new(self.ctx.clone())
    }

    pub fn waiter(&self) -> RegistryWaiter {
        RegistryWaiter::new(self.ctx.clone())
    }

    pub async fn insert_registry(&self, record: RevocationRegistryRecord) -> String {
        self.ctx.registry_store.insert(record).await.unwrap()
    }

    /// Seeds a ready ACTIVE registry with its tails file on disk.
    pub async fn seed_active_registry(&self, registry_id: &str) -> String {
        self.insert_registry(registry_record(registry_id, RevRegState::Active, &self.dir))
            .await
    }

    pub async fn insert_cred_rev(
        &self,
        registry_id: &str,
        cred_rev_id: u32,
        state: CredRevState,
    ) -> String {
        let mut rec =
            CredentialRevocationRecord::new(registry_id, CRED_DEF_ID, cred_rev_id, None, None);
        rec.state = state;
        self.ctx.cred_rev_store.insert(rec).await.unwrap()
    }

    pub async fn registry(&self, record_id: &str) -> RevocationRegistryRecord {
        self.ctx.registry_store.get(record_id).await.unwrap()
    }

    pub async fn pending_of(&self, record_id: &str) -> Vec<u32> {
        self.registry(record_id)
            .await
            .pending_publication
            .iter()
            .copied()
            .collect()
    }
}

impl HarnessBuilder {
    pub fn build(self) -> Harness {
        let ledger = Arc::new(self.ledger);
        let engine = Arc::new(self.engine);
        let tails = Arc::new(StubTails::default());
        let endorsement = Arc::new(self.endorsement);
        let events = Arc::new(RecordingNotifier::default());
        let ctx = Arc::new(RevocationContext {
            registry_store: Arc::new(InMemoryStore::<RevocationRegistryRecord>::default()),
            cred_rev_store: Arc::new(InMemoryStore::<CredentialRevocationRecord>::default()),
            notification_store: Arc::new(InMemoryStore::<RevocationNotificationRecord>::default()),
            ledger: ledger.clone(),
            engine: engine.clone(),
            tails: tails.clone(),
            events: events.clone(),
            endorsement: endorsement.clone(),
            cache: Arc::new(InMemoryTtlCache::default()),
            config: self.config,
        });
        Harness {
            ctx,
            ledger,
            engine,
            tails,
            endorsement,
            events,
            dir: self.dir,
        }
    }
}

/// Context wired to mockall doubles where exact call verification matters,
/// with everything else stubbed.
pub fn mocked_context(
    ledger: MockLedger,
    engine: MockEngine,
    config: RevocationConfig,
) -> (Arc<RevocationContext>, Arc<RecordingNotifier>) {
    let events = Arc::new(RecordingNotifier::default());
    let ctx = Arc::new(RevocationContext {
        registry_store: Arc::new(InMemoryStore::<RevocationRegistryRecord>::default()),
        cred_rev_store: Arc::new(InMemoryStore::<CredentialRevocationRecord>::default()),
        notification_store: Arc::new(InMemoryStore::<RevocationNotificationRecord>::default()),
        ledger: Arc::new(ledger),
        engine: Arc::new(engine),
        tails: Arc::new(StubTails::default()),
        events: events.clone(),
        endorsement: Arc::new(StubEndorsement::default()),
        cache: Arc::new(InMemoryTtlCache::default()),
        config,
    });
    (ctx, events)
}
