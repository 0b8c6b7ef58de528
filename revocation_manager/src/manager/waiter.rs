use std::{sync::Arc, time::Duration};

use super::context::RevocationContext;
use crate::{
    errors::error::{RevocationError, RevocationResult},
    records::RevRegState,
    storage::TagFilter,
};

/// Polls for registry readiness after a rotation.
///
/// Registry generation is slow and, for authors, involves an asynchronous
/// endorsement round-trip, so issuance coordinates through this bounded poll
/// rather than a blocking wait inside the lifecycle manager.
pub struct RegistryWaiter {
    ctx: Arc<RevocationContext>,
}

impl RegistryWaiter {
    pub fn new(ctx: Arc<RevocationContext>) -> Self {
        RegistryWaiter { ctx }
    }

    /// Waits until at least `required_count` registries of the cred def are
    /// ACTIVE, polling at `poll_interval` up to `timeout` (both falling back
    /// to the configured defaults). Query failures while polling are
    /// transient; only exhausting the budget fails, with the last observed
    /// count attached. The registries may still become active afterwards.
    pub async fn wait_for_active(
        &self,
        cred_def_id: &str,
        required_count: usize,
        poll_interval: Option<Duration>,
        timeout: Option<Duration>,
    ) -> RevocationResult<()> {
        let poll_interval = poll_interval.unwrap_or(self.ctx.config.waiter_poll_interval);
        let timeout = timeout.unwrap_or(self.ctx.config.waiter_timeout);
        let max_polls = max_polls(timeout, poll_interval);
        trace!(
            "RegistryWaiter::wait_for_active >>> cred_def_id: {cred_def_id}, required_count: \
             {required_count}, max_polls: {max_polls}"
        );

        let mut observed = 0;
        for attempt in 0..max_polls {
            if attempt > 0 {
                tokio::time::sleep(poll_interval).await;
            }
            match self.count_active(cred_def_id).await {
                Ok(count) => {
                    observed = count;
                    if count >= required_count {
                        debug!(
                            "Cred def {cred_def_id} has {count} active registries after \
                             {attempt} polls"
                        );
                        return Ok(());
                    }
                }
                Err(err) => {
                    warn!("Transient failure counting active registries for {cred_def_id}: {err}");
                }
            }
        }
        Err(RevocationError::TimedOut {
            cred_def_id: cred_def_id.to_string(),
            expected: required_count,
            observed,
        })
    }

    async fn count_active(&self, cred_def_id: &str) -> RevocationResult<usize> {
        let filter = TagFilter::new()
            .eq("cred_def_id", cred_def_id)
            .eq("state", RevRegState::Active.to_string());
        Ok(self.ctx.registry_store.find(&filter).await?.len())
    }
}

/// Number of store polls a timeout budget allows, at least one.
fn max_polls(timeout: Duration, poll_interval: Duration) -> usize {
    if poll_interval.is_zero() {
        return 1;
    }
    let polls = (timeout.as_secs_f64() / poll_interval.as_secs_f64()).ceil() as usize;
    polls.max(1)
}
