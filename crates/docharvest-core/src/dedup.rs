use std::sync::Arc;

use crate::store::{DocumentStore, StoreError};
use crate::Unit;

/// Existence checks run before fetching and again before persisting.
///
/// Both checks are reads against the store's indexed lookups. They only avoid wasted
/// fetches; the store's uniqueness constraints stay the last word on duplicates.
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn DocumentStore>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// A covered unit is skipped without any network call.
    pub fn already_covered(&self, unit: &Unit) -> Result<bool, StoreError> {
        self.store.exists(unit)
    }

    /// A fetched document whose URL is already stored is discarded as a duplicate.
    pub fn url_already_covered(&self, url: &str) -> Result<bool, StoreError> {
        self.store.exists_by_url(url)
    }
}
