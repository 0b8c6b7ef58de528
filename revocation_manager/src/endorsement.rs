use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::error::RevocationResult;

/// Goal code attached to transaction-endorsement requests.
pub const ENDORSE_TRANSACTION_GOAL: &str = "aries.transaction.ledger.write";

/// One author-to-endorser round: a transaction the author cannot submit
/// itself, addressed to the connection that can. Produced by this core,
/// consumed by the external transaction-endorsement protocol; the endorsed
/// transaction eventually arrives back through a separate inbound path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndorsementHandoff {
    pub connection_id: String,
    pub payload: Value,
    pub goal_code: String,
}

impl EndorsementHandoff {
    pub fn new(connection_id: impl Into<String>, payload: Value) -> Self {
        EndorsementHandoff {
            connection_id: connection_id.into(),
            payload,
            goal_code: ENDORSE_TRANSACTION_GOAL.to_string(),
        }
    }
}

/// Outbound side of the endorsement exchange, plus the connection directory
/// lookups the author path needs.
#[async_trait]
pub trait EndorsementChannel: Send + Sync {
    /// The connection to fall back to when the caller supplies none.
    async fn resolve_default_connection(&self) -> RevocationResult<Option<String>>;

    /// DID of the endorser behind a connection.
    async fn endorser_did(&self, connection_id: &str) -> RevocationResult<String>;

    /// Hands the transaction off. Fire-and-forget: the core does not wait
    /// for the endorser's reply.
    async fn send(&self, handoff: EndorsementHandoff) -> RevocationResult<()>;
}
