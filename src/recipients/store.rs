use super::record::{Recipient, RecipientId, RecipientPatch};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Systemic failure reading or writing recipient records. Never absorbed
/// into a single recipient's outcome.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid page request (page {page}, limit {limit}); both must be at least 1")]
    InvalidPage { page: usize, limit: usize },
    #[error("recipient store unavailable: {0}")]
    Unavailable(String),
}

/// One page of recipients along with the store-wide record count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipientPage {
    pub records: Vec<Recipient>,
    pub total: usize,
}

impl RecipientPage {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Paginated, keyed recipient storage consumed by the dispatch engine.
///
/// Pages are 1-based. A page beyond the last record returns no records but
/// still reports the correct `total`.
pub trait RecipientStore: Send + Sync {
    fn get_page<'a>(
        &'a self,
        page: usize,
        limit: usize,
    ) -> BoxFuture<'a, Result<RecipientPage, StoreError>>;

    /// Merges `patch` into the record identified by `id`.
    fn update_record<'a>(
        &'a self,
        id: RecipientId,
        patch: RecipientPatch,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn count<'a>(&'a self) -> BoxFuture<'a, Result<usize, StoreError>> {
        Box::pin(async move { Ok(self.get_page(1, 1).await?.total) })
    }
}

#[derive(Debug)]
struct StoreState {
    next_id: u64,
    records: BTreeMap<RecipientId, Recipient>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            next_id: 1,
            records: BTreeMap::new(),
        }
    }
}

/// In-process store keyed by auto-incrementing ids starting at 1.
#[derive(Debug, Default)]
pub struct InMemoryRecipientStore {
    state: RwLock<StoreState>,
}

impl InMemoryRecipientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record per row, assigning ids in row order.
    pub async fn insert_many<I>(&self, rows: I) -> Vec<RecipientId>
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let mut state = self.state.write().await;
        let mut ids = Vec::new();
        for fields in rows {
            let id = RecipientId::new(state.next_id);
            state.next_id = state.next_id.saturating_add(1);
            state.records.insert(id, Recipient::new(id, fields));
            ids.push(id);
        }
        tracing::debug!(inserted = ids.len(), "recipients inserted");
        ids
    }

    pub async fn get(&self, id: RecipientId) -> Option<Recipient> {
        self.state.read().await.records.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Returns every record in id order.
    pub async fn snapshot(&self) -> Vec<Recipient> {
        self.state.read().await.records.values().cloned().collect()
    }

    /// Field names of the first stored record followed by the outcome columns.
    pub async fn columns(&self) -> Vec<String> {
        let state = self.state.read().await;
        let Some(first) = state.records.values().next() else {
            return Vec::new();
        };
        let mut columns: Vec<String> = first.fields.keys().cloned().collect();
        for outcome_column in ["sent_at", "status"] {
            if !columns.iter().any(|existing| existing == outcome_column) {
                columns.push(outcome_column.to_owned());
            }
        }
        columns
    }

    /// Drops every record and restarts id assignment at 1.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let dropped = state.records.len();
        *state = StoreState::default();
        tracing::debug!(dropped, "recipient store cleared");
    }
}

impl RecipientStore for InMemoryRecipientStore {
    fn get_page<'a>(
        &'a self,
        page: usize,
        limit: usize,
    ) -> BoxFuture<'a, Result<RecipientPage, StoreError>> {
        Box::pin(async move {
            if page == 0 || limit == 0 {
                return Err(StoreError::InvalidPage { page, limit });
            }
            let state = self.state.read().await;
            let total = state.records.len();
            let start = (page - 1).saturating_mul(limit);
            let records = state
                .records
                .values()
                .skip(start)
                .take(limit)
                .cloned()
                .collect();
            Ok(RecipientPage { records, total })
        })
    }

    fn update_record<'a>(
        &'a self,
        id: RecipientId,
        patch: RecipientPatch,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            match state.records.get_mut(&id) {
                Some(recipient) => patch.apply_to(recipient),
                None => {
                    tracing::warn!(%id, "ignoring update for unknown recipient");
                }
            }
            Ok(())
        })
    }
}
