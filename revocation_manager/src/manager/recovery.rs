use std::{collections::BTreeSet, sync::Arc};

use serde_json::Value;

use super::context::RevocationContext;
use crate::{
    endorsement::EndorsementHandoff,
    errors::error::{RevocationError, RevocationResult},
    events::topic,
    ledger::{accumulator_value, classify_write_error, delta_revoked_ids, LedgerError},
    records::{cred_rev_record::CredRevState, CredentialRevocationRecord},
    storage::TagFilter,
};

/// Divergence between the wallet's revoked-credential records and the
/// ledger's delta for one registry.
#[derive(Clone, Debug)]
pub struct Discrepancy {
    pub ledger_delta: Value,
    pub ledger_timestamp: u64,
    /// Every id the wallet holds a revoked-status record for.
    pub revoked_ids: BTreeSet<u32>,
    /// Locally revoked ids the ledger's delta does not reflect.
    pub mismatch_count: usize,
}

/// What a recovery attempt produced.
#[derive(Clone, Debug)]
pub struct RecoveryOutcome {
    /// The ledger delta the discrepancy was computed against.
    pub ledger_delta: Value,
    /// Corrective transaction; `None` when nothing needed fixing.
    pub recovery_txn: Option<Value>,
    /// Ledger response when the correction was submitted.
    pub applied: Option<Value>,
}

/// Detects accumulator drift between wallet and ledger and produces (and
/// optionally submits) the corrective transaction.
pub struct RecoveryProtocol {
    ctx: Arc<RevocationContext>,
}

impl RecoveryProtocol {
    pub fn new(ctx: Arc<RevocationContext>) -> Self {
        RecoveryProtocol { ctx }
    }

    /// Compares the ledger's delta with the wallet's revoked-credential
    /// records. A mismatch is every locally revoked id the ledger delta does
    /// not list; zero mismatches means there is nothing to fix.
    pub async fn compute_discrepancy(&self, registry_id: &str) -> RevocationResult<Discrepancy> {
        trace!("RecoveryProtocol::compute_discrepancy >>> registry_id: {registry_id}");
        let (ledger_delta, ledger_timestamp) = self
            .ctx
            .ledger
            .get_registry_delta(registry_id, None, None)
            .await?;
        let ledger_revoked: BTreeSet<u32> = delta_revoked_ids(&ledger_delta).into_iter().collect();

        let filter = TagFilter::new()
            .eq("registry_id", registry_id)
            .eq("state", "revoked");
        let local: Vec<CredentialRevocationRecord> = self.ctx.cred_rev_store.find(&filter).await?;
        let revoked_ids: BTreeSet<u32> = local
            .iter()
            .filter(|rec| rec.state == CredRevState::Revoked)
            .map(|rec| rec.cred_rev_id)
            .collect();

        let mismatch_count = revoked_ids.difference(&ledger_revoked).count();
        debug!(
            "Registry {registry_id}: {} locally revoked, {} on ledger, {mismatch_count} \
             mismatched",
            revoked_ids.len(),
            ledger_revoked.len()
        );
        Ok(Discrepancy {
            ledger_delta,
            ledger_timestamp,
            revoked_ids,
            mismatch_count,
        })
    }

    /// Recomputes a valid accumulator value and proof from the full
    /// known-revoked-id set. Pure and replayable: identical inputs produce
    /// an identical accumulator value.
    pub async fn build_recovery_transaction(
        &self,
        registry_id: &str,
        revoked_ids: &BTreeSet<u32>,
        cred_def: &Value,
        registry_def_private: &Value,
        genesis_transactions: &str,
    ) -> RevocationResult<Value> {
        trace!(
            "RecoveryProtocol::build_recovery_transaction >>> registry_id: {registry_id}, \
             revoked_ids: {revoked_ids:?}"
        );
        self.ctx
            .engine
            .compute_recovery(
                genesis_transactions,
                registry_id,
                revoked_ids,
                cred_def,
                registry_def_private,
            )
            .await
    }

    /// Submits a recovery transaction, or returns without ledger contact
    /// when `apply_to_ledger` is false (dry-run). On success the wallet's
    /// accumulator state is overwritten with the value the ledger confirmed,
    /// not the locally computed one.
    pub async fn apply_recovery(
        &self,
        registry_id: &str,
        recovery_txn: &Value,
        apply_to_ledger: bool,
    ) -> RevocationResult<Option<Value>> {
        trace!(
            "RecoveryProtocol::apply_recovery >>> registry_id: {registry_id}, apply_to_ledger: \
             {apply_to_ledger}"
        );
        if !apply_to_ledger {
            return Ok(None);
        }
        let record = self.ctx.registry_by_registry_id(registry_id).await?;
        let response = self
            .ctx
            .ledger
            .send_registry_entry(
                registry_id,
                &record.registry_type,
                recovery_txn,
                &record.issuer_did,
                true,
                None,
            )
            .await
            .map_err(classify_write_error)?;

        // The ledger response is authoritative; fall back to the computed
        // transaction only when the client does not echo the accepted entry.
        let confirmed = response
            .get("value")
            .map(|value| json!({ "value": value }))
            .unwrap_or_else(|| recovery_txn.clone());
        self.ctx
            .registry_store
            .update(&record.record_id, &mut |rec| {
                rec.registry_entry = Some(confirmed.clone());
                Ok(())
            })
            .await?;
        self.ctx
            .cache
            .invalidate(&active_registry_cache_key(&record.cred_def_id));
        self.ctx
            .events
            .notify(
                topic::REGISTRY_RECOVERED,
                json!({ "registry_id": registry_id }),
            )
            .await;
        Ok(Some(response))
    }

    /// Full recovery round for one registry: discrepancy check, corrective
    /// transaction, optional submission. Returns early with no transaction
    /// when wallet and ledger agree.
    pub async fn recover_registry_entry(
        &self,
        registry_id: &str,
        apply_to_ledger: bool,
    ) -> RevocationResult<RecoveryOutcome> {
        trace!(
            "RecoveryProtocol::recover_registry_entry >>> registry_id: {registry_id}, \
             apply_to_ledger: {apply_to_ledger}"
        );
        let discrepancy = self.compute_discrepancy(registry_id).await?;
        if discrepancy.mismatch_count == 0 {
            info!("Registry {registry_id} accumulator matches the ledger, nothing to recover");
            return Ok(RecoveryOutcome {
                ledger_delta: discrepancy.ledger_delta,
                recovery_txn: None,
                applied: None,
            });
        }

        let record = self.ctx.registry_by_registry_id(registry_id).await?;
        let genesis = match &self.ctx.config.genesis_transactions {
            Some(genesis) => genesis.clone(),
            None => self.ctx.ledger.genesis_transactions().await?,
        };
        let cred_def = self
            .ctx
            .ledger
            .get_credential_definition(&record.cred_def_id)
            .await?;
        let registry_def_private = record.registry_definition_private.ok_or_else(|| {
            RevocationError::InvalidInput(format!(
                "no private definition material held for registry {registry_id}"
            ))
        })?;

        let recovery_txn = self
            .build_recovery_transaction(
                registry_id,
                &discrepancy.revoked_ids,
                &cred_def,
                &registry_def_private,
                &genesis,
            )
            .await?;
        let applied = self
            .apply_recovery(registry_id, &recovery_txn, apply_to_ledger)
            .await?;
        Ok(RecoveryOutcome {
            ledger_delta: discrepancy.ledger_delta,
            recovery_txn: Some(recovery_txn),
            applied,
        })
    }

    /// Best-effort recovery sweep driven by a stale-accumulator rejection.
    ///
    /// Every registry whose current on-ledger accumulator value appears in
    /// the triggering error message is a candidate. Attempts per accumulator
    /// value are bounded through the TTL cache to stop retry storms, ledger
    /// load is paced between iterations, and one registry's failure never
    /// aborts the rest. Returns the ids of the registries recovered.
    pub async fn recover_from_error(&self, error: &LedgerError) -> RevocationResult<Vec<String>> {
        trace!("RecoveryProtocol::recover_from_error >>> error: {error}");
        let candidates = self.ctx.registry_store.find(&TagFilter::new()).await?;
        let mut recovered = Vec::new();
        let mut first = true;
        for record in candidates {
            let Some(registry_id) = record.registry_id.clone() else {
                continue;
            };
            if !first {
                tokio::time::sleep(self.ctx.config.recovery_pause).await;
            }
            first = false;

            let accum = match self
                .ctx
                .ledger
                .get_registry_delta(&registry_id, None, None)
                .await
            {
                Ok((delta, _)) => match accumulator_value(&delta) {
                    Some(accum) => accum.to_string(),
                    None => continue,
                },
                Err(err) => {
                    warn!("Could not read delta for registry {registry_id}: {err}");
                    continue;
                }
            };
            if !error.message.contains(&accum) {
                continue;
            }

            let attempt_key = attempt_cache_key(&accum);
            let attempts = self
                .ctx
                .cache
                .get(&attempt_key)
                .and_then(|value| value.as_u64())
                .unwrap_or(0);
            if attempts >= u64::from(self.ctx.config.recovery_max_attempts) {
                warn!(
                    "Giving up on registry {registry_id}: {attempts} recovery attempts for \
                     accumulator {accum}"
                );
                continue;
            }
            self.ctx.cache.set(
                &attempt_key,
                json!(attempts + 1),
                self.ctx.config.recovery_attempt_ttl,
            );

            let result = if self.ctx.config.author_role {
                self.recover_via_endorser(&registry_id, &record.cred_def_id)
                    .await
            } else {
                self.recover_registry_entry(&registry_id, true)
                    .await
                    .map(|_| ())
            };
            match result {
                Ok(()) => {
                    self.ctx.cache.invalidate(&attempt_key);
                    recovered.push(registry_id);
                }
                Err(err) => {
                    error!("Recovery failed for registry {registry_id}: {err}");
                }
            }
        }
        Ok(recovered)
    }

    /// Author path: compute the correction locally and hand it to the
    /// endorser instead of writing the ledger directly.
    async fn recover_via_endorser(
        &self,
        registry_id: &str,
        cred_def_id: &str,
    ) -> RevocationResult<()> {
        let connection_id = match self.ctx.config.endorser_connection_id.clone() {
            Some(connection_id) => Some(connection_id),
            None => self.ctx.endorsement.resolve_default_connection().await?,
        }
        .ok_or_else(|| RevocationError::NoEndorserConnection {
            cred_def_id: cred_def_id.to_string(),
        })?;
        let outcome = self.recover_registry_entry(registry_id, false).await?;
        let Some(recovery_txn) = outcome.recovery_txn else {
            return Ok(());
        };
        self.ctx
            .endorsement
            .send(EndorsementHandoff::new(connection_id, recovery_txn))
            .await
    }
}

fn attempt_cache_key(accum: &str) -> String {
    format!("recovery_attempts::{accum}")
}

/// Key of the cached active-registry lookup for a cred def. Owned by the
/// lifecycle manager; invalidated here when a recovery rewrites the entry.
pub(crate) fn active_registry_cache_key(cred_def_id: &str) -> String {
    format!("active_registry::{cred_def_id}")
}
