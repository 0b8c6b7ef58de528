use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde_json::Value;
use url::Url;

use super::{
    context::RevocationContext,
    recovery::{active_registry_cache_key, RecoveryProtocol},
};
use crate::{
    errors::error::{RevocationError, RevocationResult},
    events::topic,
    ledger::{classify_write_error, LedgerRejection},
    records::{
        rev_reg_record::DEFAULT_REGISTRY_TYPE, RevRegState, RevocationRegistryRecord,
        MAX_REGISTRY_SIZE, MIN_REGISTRY_SIZE,
    },
    storage::TagFilter,
};

/// An active registry together with a guarantee that its tails artifact is
/// available on the local filesystem.
#[derive(Clone, Debug)]
pub struct ActiveRegistryHandle {
    pub record: RevocationRegistryRecord,
    pub tails_local_path: PathBuf,
}

/// Owns the revocation registry state machine: creation, generation,
/// posting, activation, fullness and decommissioning, plus the ledger writes
/// that drive the INIT → ACTIVE half of the lifecycle.
pub struct RegistryLifecycle {
    ctx: Arc<RevocationContext>,
}

impl RegistryLifecycle {
    pub fn new(ctx: Arc<RevocationContext>) -> Self {
        RegistryLifecycle { ctx }
    }

    /// Allocates a new registry record in INIT for a credential definition.
    ///
    /// The cred def must exist on the ledger and declare revocation support.
    /// In author mode an endorser connection is resolved up front; not being
    /// able to resolve one is a configuration error, not something to retry.
    pub async fn init_registry(
        &self,
        cred_def_id: &str,
        max_cred_num: Option<u32>,
        registry_type: Option<&str>,
        tag: Option<&str>,
        endorser_connection_id: Option<String>,
    ) -> RevocationResult<RevocationRegistryRecord> {
        trace!(
            "RegistryLifecycle::init_registry >>> cred_def_id: {cred_def_id}, max_cred_num: \
             {max_cred_num:?}, registry_type: {registry_type:?}, tag: {tag:?}"
        );
        if let Some(size) = max_cred_num {
            if !(MIN_REGISTRY_SIZE..=MAX_REGISTRY_SIZE).contains(&size) {
                return Err(RevocationError::BadRegistrySize {
                    size,
                    min: MIN_REGISTRY_SIZE,
                    max: MAX_REGISTRY_SIZE,
                });
            }
        }

        let cred_def = match self.ctx.ledger.get_credential_definition(cred_def_id).await {
            Ok(cred_def) => cred_def,
            Err(err) if err.kind == LedgerRejection::NotFound => {
                return Err(RevocationError::NotSupported {
                    cred_def_id: cred_def_id.to_string(),
                    reason: "credential definition not found on ledger".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        if cred_def["value"]["revocation"].is_null() {
            return Err(RevocationError::NotSupported {
                cred_def_id: cred_def_id.to_string(),
                reason: "credential definition carries no revocation key material".to_string(),
            });
        }

        let endorser_connection_id = self
            .resolve_init_endorser(cred_def_id, endorser_connection_id)
            .await?;

        let issuer_did = self.ctx.config.resolve_issuer_did(cred_def_id);
        let record = RevocationRegistryRecord::new(
            cred_def_id,
            issuer_did,
            max_cred_num.unwrap_or(self.ctx.config.default_registry_size),
            registry_type.unwrap_or(DEFAULT_REGISTRY_TYPE),
            tag.map(ToString::to_string),
        );
        self.ctx.registry_store.insert(record.clone()).await?;
        self.ctx
            .events
            .notify(
                topic::REGISTRY_INIT,
                json!({
                    "record_id": record.record_id,
                    "cred_def_id": cred_def_id,
                    "author": self.ctx.config.author_role,
                    "endorser_connection_id": endorser_connection_id,
                }),
            )
            .await;
        Ok(record)
    }

    async fn resolve_init_endorser(
        &self,
        cred_def_id: &str,
        endorser_connection_id: Option<String>,
    ) -> RevocationResult<Option<String>> {
        if !self.ctx.config.author_role {
            return Ok(endorser_connection_id);
        }
        let resolved = match endorser_connection_id
            .or_else(|| self.ctx.config.endorser_connection_id.clone())
        {
            Some(connection_id) => Some(connection_id),
            None => self.ctx.endorsement.resolve_default_connection().await?,
        };
        resolved
            .map(Some)
            .ok_or_else(|| RevocationError::NoEndorserConnection {
                cred_def_id: cred_def_id.to_string(),
            })
    }

    /// INIT → GENERATED: asks the accumulator engine for the registry
    /// material and moves the tails artifact from staging to its
    /// registry-scoped path.
    pub async fn generate(&self, record_id: &str) -> RevocationResult<RevocationRegistryRecord> {
        trace!("RegistryLifecycle::generate >>> record_id: {record_id}");
        let record = self.ctx.registry_store.get(record_id).await?;
        record.require_state(&[RevRegState::Init])?;

        let staging_dir = self.ctx.config.staging_dir();
        tokio::fs::create_dir_all(&staging_dir).await?;
        let created = self
            .ctx
            .engine
            .create_registry(
                &record.issuer_did,
                &record.cred_def_id,
                &record.registry_type,
                record.effective_tag(),
                record.max_cred_num,
                &staging_dir,
            )
            .await?;
        if let Some(assigned) = &record.registry_id {
            if assigned != &created.registry_id {
                return Err(RevocationError::RegistryIdMismatch {
                    record_id: record.record_id.clone(),
                    assigned_id: assigned.clone(),
                    engine_id: created.registry_id,
                });
            }
        }

        let tails_dir = self.ctx.config.tails_base_dir.join(&created.registry_id);
        tokio::fs::create_dir_all(&tails_dir).await?;
        let tails_local_path = tails_dir.join(&created.tails_hash);
        tokio::fs::rename(&created.tails_staging_path, &tails_local_path).await?;

        self.ctx
            .registry_store
            .update(record_id, &mut |rec| {
                rec.require_state(&[RevRegState::Init])?;
                rec.registry_id = Some(created.registry_id.clone());
                rec.registry_definition = Some(created.registry_definition.clone());
                rec.registry_definition_private =
                    Some(created.registry_definition_private.clone());
                rec.registry_entry = Some(created.registry_entry.clone());
                rec.tails_hash = Some(created.tails_hash.clone());
                rec.tails_local_path = Some(tails_local_path.to_string_lossy().into_owned());
                rec.state = RevRegState::Generated;
                Ok(())
            })
            .await
    }

    /// Stores a validated public URI for the tails artifact, mirroring it
    /// into the registry definition's tails location.
    pub async fn set_tails_public_uri(
        &self,
        record_id: &str,
        uri: &str,
    ) -> RevocationResult<RevocationRegistryRecord> {
        trace!("RegistryLifecycle::set_tails_public_uri >>> record_id: {record_id}, uri: {uri}");
        validate_tails_uri(uri)?;
        self.ctx
            .registry_store
            .update(record_id, &mut |rec| {
                let definition = rec.registry_definition.as_mut().ok_or_else(|| {
                    RevocationError::InvalidInput(format!(
                        "registry record {record_id} has no registry definition yet"
                    ))
                })?;
                definition["value"]["tailsLocation"] = json!(uri);
                rec.tails_public_uri = Some(uri.to_string());
                Ok(())
            })
            .await
    }

    /// Uploads the local tails artifact and records the returned public URI.
    pub async fn upload_tails(&self, record_id: &str) -> RevocationResult<String> {
        trace!("RegistryLifecycle::upload_tails >>> record_id: {record_id}");
        let record = self.ctx.registry_store.get(record_id).await?;
        let registry_id = record.require_registry_id()?.to_string();
        let local_path = record.tails_local_path.as_deref().ok_or_else(|| {
            RevocationError::InvalidInput(format!(
                "registry record {record_id} has no local tails artifact"
            ))
        })?;
        let uri = self
            .ctx
            .tails
            .upload(&registry_id, Path::new(local_path))
            .await?;
        self.set_tails_public_uri(record_id, &uri).await?;
        Ok(uri)
    }

    /// GENERATED → POSTED: submits the registry definition to the ledger.
    pub async fn publish_definition(
        &self,
        record_id: &str,
        write_ledger: bool,
        endorser_did: Option<&str>,
    ) -> RevocationResult<Value> {
        trace!(
            "RegistryLifecycle::publish_definition >>> record_id: {record_id}, write_ledger: \
             {write_ledger}"
        );
        let record = self.ctx.registry_store.get(record_id).await?;
        record.require_state(&[RevRegState::Generated])?;
        let uri = record.tails_public_uri.as_deref().ok_or_else(|| {
            RevocationError::InvalidInput(format!(
                "registry record {record_id} has no tails public URI"
            ))
        })?;
        validate_tails_uri(uri)?;
        let definition = record.registry_definition.as_ref().ok_or_else(|| {
            RevocationError::InvalidInput(format!(
                "registry record {record_id} has no registry definition"
            ))
        })?;

        let response = self
            .ctx
            .ledger
            .send_registry_definition(definition, &record.issuer_did, write_ledger, endorser_did)
            .await
            .map_err(classify_write_error)?;
        self.ctx
            .registry_store
            .update(record_id, &mut |rec| {
                rec.state = RevRegState::Posted;
                Ok(())
            })
            .await?;
        Ok(response)
    }

    /// Submits the current registry entry (accumulator value) to the ledger.
    ///
    /// Legal from POSTED, ACTIVE, FULL and DECOMMISSIONED — full and
    /// decommissioned registries may still publish corrective entries. On the
    /// first successful publish from POSTED the record becomes ACTIVE.
    ///
    /// A stale-accumulator rejection triggers the recovery protocol inline;
    /// when recovery manages to apply a corrective entry, its ledger response
    /// is returned in place of the failed one.
    pub async fn publish_entry(
        &self,
        record_id: &str,
        write_ledger: bool,
        endorser_did: Option<&str>,
    ) -> RevocationResult<Value> {
        trace!(
            "RegistryLifecycle::publish_entry >>> record_id: {record_id}, write_ledger: \
             {write_ledger}, endorser_did: {endorser_did:?}"
        );
        let record = self.ctx.registry_store.get(record_id).await?;
        record.require_state(&[
            RevRegState::Posted,
            RevRegState::Active,
            RevRegState::Full,
            RevRegState::Decommissioned,
        ])?;
        let registry_id = record.require_registry_id()?.to_string();
        let entry = record.registry_entry.as_ref().ok_or_else(|| {
            RevocationError::InvalidInput(format!(
                "registry record {record_id} has no registry entry"
            ))
        })?;
        let uri = record.tails_public_uri.as_deref().ok_or_else(|| {
            RevocationError::InvalidInput(format!(
                "registry record {record_id} has no tails public URI"
            ))
        })?;
        validate_tails_uri(uri)?;

        let sent = self
            .ctx
            .ledger
            .send_registry_entry(
                &registry_id,
                &record.registry_type,
                entry,
                &record.issuer_did,
                write_ledger,
                endorser_did,
            )
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(err) if err.kind == LedgerRejection::StaleAccumulator => {
                warn!(
                    "Ledger reports stale accumulator for registry {registry_id}, attempting \
                     recovery: {err}"
                );
                let recovery = RecoveryProtocol::new(self.ctx.clone());
                let outcome = recovery.recover_registry_entry(&registry_id, true).await?;
                return outcome.applied.ok_or(RevocationError::Ledger(err));
            }
            Err(err) => return Err(classify_write_error(err)),
        };

        if record.state == RevRegState::Posted {
            self.ctx
                .registry_store
                .update(record_id, &mut |rec| {
                    if rec.state == RevRegState::Posted {
                        rec.state = RevRegState::Active;
                    }
                    Ok(())
                })
                .await?;
        }
        Ok(response)
    }

    /// Marks a registry FULL. No replacement is seeded here; forward
    /// availability is the issuance path's concern via
    /// `get_or_create_active_registry`.
    pub async fn mark_full(
        &self,
        registry_id: &str,
    ) -> RevocationResult<RevocationRegistryRecord> {
        trace!("RegistryLifecycle::mark_full >>> registry_id: {registry_id}");
        let record = self.ctx.registry_by_registry_id(registry_id).await?;
        self.set_status(&record.record_id, RevRegState::Full, false)
            .await
    }

    /// Decommissions every non-INIT registry of a cred def. The one that was
    /// ACTIVE gets a replacement seeded with the same parameters. Returns
    /// the decommissioned records, not the replacement.
    pub async fn decommission(
        &self,
        cred_def_id: &str,
    ) -> RevocationResult<Vec<RevocationRegistryRecord>> {
        trace!("RegistryLifecycle::decommission >>> cred_def_id: {cred_def_id}");
        let records = self.list_registries(cred_def_id, None).await?;
        let mut decommissioned = Vec::new();
        for record in records {
            if record.state == RevRegState::Init {
                continue;
            }
            let was_active = record.state == RevRegState::Active;
            let updated = self
                .set_status(&record.record_id, RevRegState::Decommissioned, was_active)
                .await?;
            decommissioned.push(updated);
        }
        Ok(decommissioned)
    }

    /// Internal status-setter. No-op when the state already matches. When
    /// the new state is terminal and `init_replacement` is set, a fresh INIT
    /// record with the same parameters is seeded to keep issuance going.
    pub async fn set_status(
        &self,
        record_id: &str,
        new_state: RevRegState,
        init_replacement: bool,
    ) -> RevocationResult<RevocationRegistryRecord> {
        let current = self.ctx.registry_store.get(record_id).await?;
        if current.state == new_state {
            return Ok(current);
        }
        debug!(
            "RegistryLifecycle::set_status >>> record_id: {record_id}, {} -> {new_state}",
            current.state
        );
        let updated = self
            .ctx
            .registry_store
            .update(record_id, &mut |rec| {
                rec.state = new_state;
                Ok(())
            })
            .await?;
        self.ctx
            .cache
            .invalidate(&active_registry_cache_key(&updated.cred_def_id));
        if new_state.is_terminal() {
            if !updated.pending_publication.is_empty() {
                warn!(
                    "Registry record {record_id} entered terminal state {new_state} with {} \
                     pending unpublished revocations: {:?}",
                    updated.pending_publication.len(),
                    updated.pending_publication
                );
            }
            if init_replacement {
                self.init_registry(
                    &updated.cred_def_id,
                    Some(updated.max_cred_num),
                    Some(&updated.registry_type),
                    None,
                    None,
                )
                .await?;
            }
        }
        Ok(updated)
    }

    /// The single oldest ACTIVE registry for a cred def.
    pub async fn get_active_registry(
        &self,
        cred_def_id: &str,
    ) -> RevocationResult<RevocationRegistryRecord> {
        let mut active = self
            .list_registries(cred_def_id, Some(RevRegState::Active))
            .await?;
        if active.is_empty() {
            return Err(RevocationError::not_found(
                "active revocation registry",
                cred_def_id,
            ));
        }
        Ok(active.remove(0))
    }

    /// Level-triggered issuance entry point.
    ///
    /// Returns the active registry with a locally available tails file, or
    /// `None` after kicking off whatever brings one into existence (a fresh
    /// INIT record, or activation of a staged POSTED one). Callers are
    /// expected to retry after a delay rather than block: generation is slow
    /// and, for authors, involves an endorsement round-trip.
    pub async fn get_or_create_active_registry(
        &self,
        cred_def_id: &str,
    ) -> RevocationResult<Option<ActiveRegistryHandle>> {
        trace!("RegistryLifecycle::get_or_create_active_registry >>> cred_def_id: {cred_def_id}");
        let cache_key = active_registry_cache_key(cred_def_id);
        if let Some(cached) = self.ctx.cache.get(&cache_key) {
            if let Ok(record) = serde_json::from_value::<RevocationRegistryRecord>(cached) {
                if record.state == RevRegState::Active {
                    let tails_local_path = self.ensure_local_tails(&record).await?;
                    return Ok(Some(ActiveRegistryHandle {
                        record,
                        tails_local_path,
                    }));
                }
            }
        }
        match self.get_active_registry(cred_def_id).await {
            Ok(record) => {
                let tails_local_path = self.ensure_local_tails(&record).await?;
                if let Ok(cached) = serde_json::to_value(&record) {
                    self.ctx
                        .cache
                        .set(&cache_key, cached, self.ctx.config.registry_cache_ttl);
                }
                Ok(Some(ActiveRegistryHandle {
                    record,
                    tails_local_path,
                }))
            }
            Err(err) if err.is_not_found() => {
                self.stage_replacement(cred_def_id).await?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn stage_replacement(&self, cred_def_id: &str) -> RevocationResult<()> {
        let all = self.list_registries(cred_def_id, None).await?;
        let Some(template) = all.last().cloned() else {
            // Nothing to base a replacement on; creating registries out of
            // thin air is an explicit init_registry decision.
            return Err(RevocationError::not_found("revocation registry", cred_def_id));
        };
        let any_full = all.iter().any(|rec| rec.state == RevRegState::Full);
        if any_full {
            if let Some(posted) = all.iter().find(|rec| rec.state == RevRegState::Posted) {
                info!(
                    "Activating staged registry record {} for cred def {cred_def_id}",
                    posted.record_id
                );
                self.set_status(&posted.record_id, RevRegState::Active, false)
                    .await?;
                return Ok(());
            }
        }
        info!("Initializing replacement registry for cred def {cred_def_id}");
        self.init_registry(
            cred_def_id,
            Some(template.max_cred_num),
            Some(&template.registry_type),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn ensure_local_tails(
        &self,
        record: &RevocationRegistryRecord,
    ) -> RevocationResult<PathBuf> {
        let registry_id = record.require_registry_id()?;
        if let Some(local) = &record.tails_local_path {
            let path = PathBuf::from(local);
            if tokio::fs::metadata(&path).await.is_ok() {
                return Ok(path);
            }
        }
        let uri = record.tails_public_uri.as_deref().ok_or_else(|| {
            RevocationError::InvalidInput(format!(
                "tails artifact for registry {registry_id} is missing locally and no public URI \
                 is known"
            ))
        })?;
        let dest_dir = self.ctx.config.tails_base_dir.join(registry_id);
        tokio::fs::create_dir_all(&dest_dir).await?;
        let fetched = self.ctx.tails.download(registry_id, uri, &dest_dir).await?;
        self.ctx
            .registry_store
            .update(&record.record_id, &mut |rec| {
                rec.tails_local_path = Some(fetched.to_string_lossy().into_owned());
                Ok(())
            })
            .await?;
        Ok(fetched)
    }

    /// Registries of a cred def, oldest first, optionally state-filtered.
    pub async fn list_registries(
        &self,
        cred_def_id: &str,
        state: Option<RevRegState>,
    ) -> RevocationResult<Vec<RevocationRegistryRecord>> {
        let mut filter = TagFilter::new().eq("cred_def_id", cred_def_id);
        if let Some(state) = state {
            filter = filter.eq("state", state.to_string());
        }
        let mut records = self.ctx.registry_store.find(&filter).await?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

/// A tails URI must carry scheme, host and a non-empty path.
pub fn validate_tails_uri(uri: &str) -> RevocationResult<()> {
    let parsed = Url::parse(uri).map_err(|err| RevocationError::InvalidUrl {
        uri: uri.to_string(),
        reason: err.to_string(),
    })?;
    if parsed.host_str().is_none() {
        return Err(RevocationError::InvalidUrl {
            uri: uri.to_string(),
            reason: "missing host".to_string(),
        });
    }
    if parsed.path().is_empty() || parsed.path() == "/" {
        return Err(RevocationError::InvalidUrl {
            uri: uri.to_string(),
            reason: "missing path".to_string(),
        });
    }
    Ok(())
}
