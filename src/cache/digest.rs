//! Single-flight lookup cache keyed by image reference or path

use crate::error::ImageBuilderResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

/// Memoizes one value per key, running each lookup at most once even when
/// callers race.
#[derive(Debug)]
pub struct DigestCache<V = String> {
    cells: Mutex<HashMap<String, Arc<OnceCell<V>>>>,
}

impl<V> Default for DigestCache<V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> DigestCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, running `fetch` if there is none.
    ///
    /// A failed lookup leaves the key empty and the error is returned to the
    /// caller that ran it.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> ImageBuilderResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ImageBuilderResult<V>>,
    {
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(cells.entry(key.to_string()).or_default())
        };

        let value = cell
            .get_or_try_init(|| async {
                debug!("Looking up {}", key);
                fetch().await
            })
            .await?;

        Ok(value.clone())
    }

    /// Value already resolved for `key`, without triggering a lookup
    pub async fn get(&self, key: &str) -> Option<V> {
        let cells = self.cells.lock().await;
        cells.get(key).and_then(|cell| cell.get().cloned())
    }
}
