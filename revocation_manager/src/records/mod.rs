use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};

pub mod cred_rev_record;
pub mod notification;
pub mod rev_reg_record;

pub use cred_rev_record::{CredExVersion, CredRevState, CredentialRevocationRecord};
pub use notification::RevocationNotificationRecord;
pub use rev_reg_record::{
    RevRegState, RevocationRegistryRecord, DEFAULT_REGISTRY_SIZE, MAX_REGISTRY_SIZE,
    MIN_REGISTRY_SIZE,
};

/// A persistable record: a stable per-kind type name, a unique id and the
/// tags the store may filter on.
pub trait StoredRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const RECORD_TYPE: &'static str;

    fn record_id(&self) -> &str;

    fn tags(&self) -> HashMap<String, String>;
}
