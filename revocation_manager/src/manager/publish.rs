use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde_json::Value;

use super::{
    context::RevocationContext, lifecycle::RegistryLifecycle,
    recovery::active_registry_cache_key,
};
use crate::{
    endorsement::EndorsementHandoff,
    errors::error::{RevocationError, RevocationResult},
    events::topic,
    records::{
        cred_rev_record::CredRevState, CredentialRevocationRecord, RevocationNotificationRecord,
        RevocationRegistryRecord,
    },
    storage::TagFilter,
};

/// One "revoke credential X" request.
#[derive(Clone, Debug)]
pub struct RevokeRequest {
    pub registry_id: String,
    pub cred_rev_id: u32,
    /// Publish immediately instead of deferring to the next batch.
    pub publish: bool,
    /// Persist a holder-notification intent, independent of publication.
    pub notify: bool,
    pub thread_id: Option<String>,
    pub connection_id: Option<String>,
    pub comment: Option<String>,
    pub endorser_connection_id: Option<String>,
    pub write_ledger: bool,
}

impl RevokeRequest {
    pub fn new(registry_id: impl Into<String>, cred_rev_id: u32) -> Self {
        RevokeRequest {
            registry_id: registry_id.into(),
            cred_rev_id,
            publish: false,
            notify: false,
            thread_id: None,
            connection_id: None,
            comment: None,
            endorser_connection_id: None,
            write_ledger: true,
        }
    }
}

/// Result of an immediate-publish revocation.
#[derive(Clone, Debug)]
pub enum RevokeResponse {
    /// The delta was written to the ledger; carries the ledger response.
    Published(Value),
    /// Author path: the unsigned transaction packaged for the endorser.
    Endorse(EndorsementHandoff),
}

/// Selection of pending ids to operate on, keyed by registry id. An empty
/// id list under a key means "all pending for that registry"; an absent key
/// means "skip that registry"; `None` (or an empty map) means every registry
/// with pending ids.
pub type PendingSelection = BTreeMap<String, Vec<u32>>;

struct FoldCommit {
    folded: BTreeSet<u32>,
    delta: Option<Value>,
}

/// Turns discrete revocation requests into batched ledger writes and flips
/// the local credential status records when a revocation becomes effective.
pub struct RevocationBatcher {
    ctx: Arc<RevocationContext>,
    lifecycle: RegistryLifecycle,
}

impl RevocationBatcher {
    pub fn new(ctx: Arc<RevocationContext>) -> Self {
        RevocationBatcher {
            lifecycle: RegistryLifecycle::new(ctx.clone()),
            ctx,
        }
    }

    /// Revokes one credential, either deferring it into the registry's
    /// pending set or folding and publishing right away.
    pub async fn revoke(
        &self,
        request: RevokeRequest,
    ) -> RevocationResult<Option<RevokeResponse>> {
        trace!(
            "RevocationBatcher::revoke >>> registry_id: {}, cred_rev_id: {}, publish: {}, \
             notify: {}, write_ledger: {}",
            request.registry_id,
            request.cred_rev_id,
            request.publish,
            request.notify,
            request.write_ledger
        );
        let record = self
            .ctx
            .registry_by_registry_id(&request.registry_id)
            .await?;

        if request.notify {
            // Persisted up front so delivery does not depend on whether
            // publication succeeds.
            let notification = RevocationNotificationRecord::new(
                &request.registry_id,
                request.cred_rev_id,
                request.thread_id.clone(),
                request.connection_id.clone(),
                request.comment.clone(),
            );
            self.ctx.notification_store.insert(notification).await?;
        }

        if !request.publish {
            let cred_rev_id = request.cred_rev_id;
            self.ctx
                .registry_store
                .update(&record.record_id, &mut |rec| {
                    rec.mark_pending(cred_rev_id);
                    Ok(())
                })
                .await?;
            return Ok(None);
        }

        let mut ids = record.pending_publication.clone();
        ids.insert(request.cred_rev_id);
        let commit = self.fold_and_commit(&record, &ids).await?;
        if commit.delta.is_none() {
            debug!(
                "Fold for registry {} produced no delta, nothing to publish",
                request.registry_id
            );
            return Ok(None);
        }

        if request.write_ledger {
            let response = self
                .lifecycle
                .publish_entry(&record.record_id, true, None)
                .await?;
            self.notify_published(&request.registry_id, &commit.folded)
                .await;
            Ok(Some(RevokeResponse::Published(response)))
        } else {
            let connection_id = self
                .resolve_endorser_connection(
                    request.endorser_connection_id.clone(),
                    &record.cred_def_id,
                )
                .await?;
            let endorser_did = self.ctx.endorsement.endorser_did(&connection_id).await?;
            let payload = self
                .lifecycle
                .publish_entry(&record.record_id, false, Some(&endorser_did))
                .await?;
            Ok(Some(RevokeResponse::Endorse(EndorsementHandoff::new(
                connection_id,
                payload,
            ))))
        }
    }

    /// Folds and publishes pending revocations across registries.
    ///
    /// Returns the raw publish responses (unsigned payloads on the
    /// endorsement path) and, per registry, the sorted ids actually folded.
    /// Ids the engine reports as failed to fold are left pending and
    /// excluded from the map. A failure on one registry is isolated from the
    /// others.
    pub async fn publish_pending(
        &self,
        selection: Option<&PendingSelection>,
        write_ledger: bool,
        endorser_connection_id: Option<String>,
    ) -> RevocationResult<(Vec<Value>, BTreeMap<String, Vec<u32>>)> {
        trace!(
            "RevocationBatcher::publish_pending >>> selection: {selection:?}, write_ledger: \
             {write_ledger}, endorser_connection_id: {endorser_connection_id:?}"
        );
        let endorser = match endorser_connection_id {
            Some(connection_id) => {
                let endorser_did = self.ctx.endorsement.endorser_did(&connection_id).await?;
                Some((connection_id, endorser_did))
            }
            None => None,
        };

        let mut responses = Vec::new();
        let mut published = BTreeMap::new();
        for (record, ids) in self.select_targets(selection).await? {
            if ids.is_empty() {
                continue;
            }
            let registry_id = match record.registry_id.clone() {
                Some(registry_id) => registry_id,
                None => continue,
            };
            let commit = match self.fold_and_commit(&record, &ids).await {
                Ok(commit) => commit,
                Err(err) => {
                    error!("Failed to fold pending revocations for registry {registry_id}: {err}");
                    continue;
                }
            };
            if commit.folded.is_empty() {
                continue;
            }
            published.insert(
                registry_id.clone(),
                commit.folded.iter().copied().collect::<Vec<_>>(),
            );
            if commit.delta.is_none() {
                // All folded ids were already reflected in the accumulator.
                continue;
            }
            let sent = match &endorser {
                Some((_, endorser_did)) => {
                    self.lifecycle
                        .publish_entry(&record.record_id, false, Some(endorser_did.as_str()))
                        .await
                }
                None => {
                    self.lifecycle
                        .publish_entry(&record.record_id, write_ledger, None)
                        .await
                }
            };
            match sent {
                Ok(response) => {
                    self.notify_published(&registry_id, &commit.folded).await;
                    responses.push(response);
                }
                Err(err) => {
                    error!("Failed to publish entry for registry {registry_id}: {err}");
                }
            }
        }
        Ok((responses, published))
    }

    /// Discards selected pending ids without publishing them. Returns the
    /// remaining pending ids of every registry examined, including an empty
    /// list for registries that ended up fully cleared.
    pub async fn clear_pending(
        &self,
        selection: Option<&PendingSelection>,
    ) -> RevocationResult<BTreeMap<String, Vec<u32>>> {
        trace!("RevocationBatcher::clear_pending >>> selection: {selection:?}");
        let mut remaining_map = BTreeMap::new();
        for (record, ids) in self.select_targets(selection).await? {
            let registry_id = match record.registry_id.clone() {
                Some(registry_id) => registry_id,
                None => continue,
            };
            let updated = self
                .ctx
                .registry_store
                .update(&record.record_id, &mut |rec| {
                    rec.clear_pending(&ids);
                    Ok(())
                })
                .await?;
            let remaining: Vec<u32> = updated.pending_publication.iter().copied().collect();
            self.ctx
                .events
                .notify(
                    topic::PENDING_CLEARED,
                    json!({ "registry_id": registry_id, "remaining": remaining }),
                )
                .await;
            remaining_map.insert(registry_id, remaining);
        }
        Ok(remaining_map)
    }

    /// Resolves the selection against the latest persisted pending sets.
    async fn select_targets(
        &self,
        selection: Option<&PendingSelection>,
    ) -> RevocationResult<Vec<(RevocationRegistryRecord, BTreeSet<u32>)>> {
        match selection.filter(|sel| !sel.is_empty()) {
            Some(selection) => {
                let mut targets = Vec::new();
                for (registry_id, ids) in selection {
                    let record = self.ctx.registry_by_registry_id(registry_id).await?;
                    let chosen = if ids.is_empty() {
                        record.pending_publication.clone()
                    } else {
                        let requested: BTreeSet<u32> = ids.iter().copied().collect();
                        &record.pending_publication & &requested
                    };
                    targets.push((record, chosen));
                }
                Ok(targets)
            }
            None => {
                let records = self.ctx.registry_store.find(&TagFilter::new()).await?;
                Ok(records
                    .into_iter()
                    .filter(|rec| !rec.pending_publication.is_empty())
                    .map(|rec| {
                        let pending = rec.pending_publication.clone();
                        (rec, pending)
                    })
                    .collect())
            }
        }
    }

    /// Folds `ids` into one delta and commits the result: the new entry
    /// replaces the record's accumulator state and exactly the folded ids
    /// are subtracted from whatever the pending set is at commit time.
    async fn fold_and_commit(
        &self,
        record: &RevocationRegistryRecord,
        ids: &BTreeSet<u32>,
    ) -> RevocationResult<FoldCommit> {
        let registry_id = record.require_registry_id()?;
        let tails_local_path = record.tails_local_path.as_deref().ok_or_else(|| {
            RevocationError::InvalidInput(format!(
                "registry {registry_id} has no local tails artifact to fold against"
            ))
        })?;
        let outcome = self
            .ctx
            .engine
            .revoke_and_fold(&record.cred_def_id, registry_id, tails_local_path, ids)
            .await?;
        if !outcome.failed_ids.is_empty() {
            warn!(
                "Engine could not fold cred rev ids {:?} for registry {registry_id}, leaving \
                 them pending",
                outcome.failed_ids
            );
        }
        let folded: BTreeSet<u32> = ids - &outcome.failed_ids;
        if folded.is_empty() {
            return Ok(FoldCommit {
                folded,
                delta: outcome.delta,
            });
        }

        let delta = outcome.delta.clone();
        self.ctx
            .registry_store
            .update(&record.record_id, &mut |rec| {
                if let Some(delta) = &delta {
                    rec.registry_entry = Some(delta.clone());
                }
                rec.clear_pending(&folded);
                Ok(())
            })
            .await?;
        self.ctx
            .cache
            .invalidate(&active_registry_cache_key(&record.cred_def_id));
        self.mark_credentials_revoked(registry_id, &folded).await?;
        Ok(FoldCommit {
            folded,
            delta: outcome.delta,
        })
    }

    /// Flips the local credential status records for the folded ids. Both
    /// issuance protocol versions store the same record kind here; a missing
    /// record is tolerated, not an error.
    async fn mark_credentials_revoked(
        &self,
        registry_id: &str,
        cred_rev_ids: &BTreeSet<u32>,
    ) -> RevocationResult<()> {
        for cred_rev_id in cred_rev_ids {
            let filter = TagFilter::new()
                .eq("registry_id", registry_id)
                .eq("cred_rev_id", cred_rev_id.to_string())
                .limit(1);
            let found: Vec<CredentialRevocationRecord> =
                self.ctx.cred_rev_store.find(&filter).await?;
            let Some(cred_rev) = found.into_iter().next() else {
                debug!(
                    "No credential revocation record for registry {registry_id} cred_rev_id \
                     {cred_rev_id}"
                );
                continue;
            };
            self.ctx
                .cred_rev_store
                .update(&cred_rev.record_id, &mut |rec| {
                    rec.state = CredRevState::Revoked;
                    Ok(())
                })
                .await?;
            self.ctx
                .events
                .notify(
                    topic::CREDENTIAL_REVOKED,
                    json!({
                        "registry_id": registry_id,
                        "cred_rev_id": cred_rev_id,
                        "cred_ex_id": cred_rev.cred_ex_id,
                    }),
                )
                .await;
        }
        Ok(())
    }

    async fn resolve_endorser_connection(
        &self,
        explicit: Option<String>,
        cred_def_id: &str,
    ) -> RevocationResult<String> {
        let resolved = match explicit.or_else(|| self.ctx.config.endorser_connection_id.clone()) {
            Some(connection_id) => Some(connection_id),
            None => self.ctx.endorsement.resolve_default_connection().await?,
        };
        resolved.ok_or_else(|| RevocationError::NoEndorserConnection {
            cred_def_id: cred_def_id.to_string(),
        })
    }

    async fn notify_published(&self, registry_id: &str, folded: &BTreeSet<u32>) {
        self.ctx
            .events
            .notify(
                topic::REVOCATION_PUBLISHED,
                json!({
                    "registry_id": registry_id,
                    "cred_rev_ids": folded.iter().copied().collect::<Vec<_>>(),
                }),
            )
            .await;
    }
}
