//! Endpoint-keyed state with one exclusive-access cell per endpoint.
//!
//! The outer map lock is held only long enough to find or create an
//! endpoint's cell; all mutation happens under that endpoint's own
//! mutex, so unrelated endpoints never serialize on each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

pub struct EndpointMap<T> {
    cells: Arc<RwLock<HashMap<String, Arc<Mutex<T>>>>>,
}

impl<T> Clone for EndpointMap<T> {
    fn clone(&self) -> Self {
        Self {
            cells: self.cells.clone(),
        }
    }
}

impl<T> Default for EndpointMap<T> {
    fn default() -> Self {
        Self {
            cells: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T> EndpointMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cell for `endpoint`, if one exists.
    pub async fn get(&self, endpoint: &str) -> Option<Arc<Mutex<T>>> {
        self.cells.read().await.get(endpoint).cloned()
    }

    /// The cell for `endpoint`, created with `init` on first use.
    pub async fn get_or_insert_with(&self, endpoint: &str, init: impl FnOnce() -> T) -> Arc<Mutex<T>> {
        if let Some(cell) = self.get(endpoint).await {
            return cell;
        }
        let mut cells = self.cells.write().await;
        cells
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    pub async fn remove(&self, endpoint: &str) -> Option<Arc<Mutex<T>>> {
        self.cells.write().await.remove(endpoint)
    }

    pub async fn contains(&self, endpoint: &str) -> bool {
        self.cells.read().await.contains_key(endpoint)
    }

    pub async fn endpoints(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cells.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn clear(&self) {
        self.cells.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_cell_once() {
        let map: EndpointMap<u32> = EndpointMap::new();

        let first = map.get_or_insert_with("/a", || 1).await;
        *first.lock().await += 1;

        let again = map.get_or_insert_with("/a", || 100).await;
        assert_eq!(*again.lock().await, 2);
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[tokio::test]
    async fn endpoints_are_independent() {
        let map: EndpointMap<Vec<u32>> = EndpointMap::new();
        let a = map.get_or_insert_with("/a", Vec::new).await;
        let b = map.get_or_insert_with("/b", Vec::new).await;

        // Holding /a's lock does not block /b.
        let _held = a.lock().await;
        b.lock().await.push(7);
        assert_eq!(*b.lock().await, vec![7]);
        assert_eq!(map.endpoints().await, vec!["/a".to_string(), "/b".to_string()]);
    }

    #[tokio::test]
    async fn remove_drops_cell() {
        let map: EndpointMap<u32> = EndpointMap::new();
        map.get_or_insert_with("/a", || 1).await;
        assert!(map.contains("/a").await);

        assert!(map.remove("/a").await.is_some());
        assert!(!map.contains("/a").await);
        assert!(map.get("/a").await.is_none());
    }
}
