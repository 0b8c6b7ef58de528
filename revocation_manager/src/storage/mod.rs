use async_trait::async_trait;

use crate::{errors::error::RevocationResult, records::StoredRecord};

pub mod in_memory;

pub use in_memory::InMemoryStore;

/// Tag query with positive and negative post-filters and an optional result
/// limit. All positive filters must match, no negative filter may match.
#[derive(Clone, Debug, Default)]
pub struct TagFilter {
    pub eq: Vec<(String, String)>,
    pub ne: Vec<(String, String)>,
    pub limit: Option<usize>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, tag: &str, value: impl Into<String>) -> Self {
        self.eq.push((tag.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn ne(mut self, tag: &str, value: impl Into<String>) -> Self {
        self.ne.push((tag.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, tags: &std::collections::HashMap<String, String>) -> bool {
        self.eq
            .iter()
            .all(|(tag, value)| tags.get(tag) == Some(value))
            && !self
                .ne
                .iter()
                .any(|(tag, value)| tags.get(tag) == Some(value))
    }
}

/// Mutation applied inside a single-record transaction.
pub type RecordMutator<'a, R> = &'a mut (dyn FnMut(&mut R) -> RevocationResult<()> + Send);

/// Transactional, tag-filterable persistence for one record kind.
///
/// `update` is the single-record atomic read-modify-write primitive: the
/// mutator runs against the latest persisted value and its result is
/// committed before any other writer touches the record. All read-then-write
/// sequences in the core go through it rather than re-persisting a copy the
/// caller held.
#[async_trait]
pub trait RecordStore<R: StoredRecord>: Send + Sync {
    async fn insert(&self, record: R) -> RevocationResult<String>;

    async fn get(&self, record_id: &str) -> RevocationResult<R>;

    async fn find(&self, filter: &TagFilter) -> RevocationResult<Vec<R>>;

    async fn update(&self, record_id: &str, apply: RecordMutator<'_, R>) -> RevocationResult<R>;

    async fn remove(&self, record_id: &str) -> RevocationResult<()>;
}
