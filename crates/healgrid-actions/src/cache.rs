//! Cache TTL/capacity tuning with a per-endpoint cooldown and
//! paced hot-key warming.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use healgrid_core::EndpointMap;
use healgrid_core::config::CacheSettings;

use crate::driver::CacheBackend;
use crate::error::ExecResult;

/// Cache settings pushed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub capacity: u64,
}

/// What an adjustment ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The endpoint was adjusted recently; nothing was done.
    Cooldown,
    Adjusted {
        warmed_batches: usize,
        failed_batches: usize,
    },
}

#[derive(Debug, Default)]
struct CacheSlot {
    config: Option<CacheConfig>,
    last_modified: Option<Instant>,
    hot_keys: BTreeSet<String>,
}

pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    settings: CacheSettings,
    slots: EndpointMap<CacheSlot>,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        Self {
            backend,
            settings,
            slots: EndpointMap::new(),
        }
    }

    /// Apply a new TTL/capacity to `endpoint` and warm its hot keys.
    ///
    /// The config is stored before it is pushed, so a failed push still
    /// starts the cooldown. Warming failures are per batch and never
    /// abort the remaining batches.
    pub async fn adjust(&self, endpoint: &str, ttl_seconds: u64, capacity: u64) -> ExecResult<CacheOutcome> {
        let cell = self.slots.get_or_insert_with(endpoint, CacheSlot::default).await;
        let mut slot = cell.lock().await;

        if let Some(last) = slot.last_modified
            && last.elapsed() < self.settings.cooldown
        {
            info!(%endpoint, "cache adjustment in cooldown period");
            return Ok(CacheOutcome::Cooldown);
        }

        let config = CacheConfig { ttl_seconds, capacity };
        slot.config = Some(config);
        slot.last_modified = Some(Instant::now());

        self.backend.apply_config(endpoint, &config).await?;
        info!(%endpoint, ttl_seconds, capacity, "cache config applied");

        let keys: Vec<String> = slot.hot_keys.iter().cloned().collect();
        let (warmed_batches, failed_batches) = self.warm(endpoint, &keys).await;

        Ok(CacheOutcome::Adjusted {
            warmed_batches,
            failed_batches,
        })
    }

    /// Replace the hot-key set warmed after each adjustment.
    pub async fn update_hot_keys<I, S>(&self, endpoint: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cell = self.slots.get_or_insert_with(endpoint, CacheSlot::default).await;
        let mut slot = cell.lock().await;
        slot.hot_keys = keys.into_iter().map(Into::into).collect();
        debug!(%endpoint, keys = slot.hot_keys.len(), "hot keys updated");
    }

    /// Last config stored for `endpoint`.
    pub async fn config(&self, endpoint: &str) -> Option<CacheConfig> {
        let cell = self.slots.get(endpoint).await?;
        let slot = cell.lock().await;
        slot.config
    }

    async fn warm(&self, endpoint: &str, keys: &[String]) -> (usize, usize) {
        let mut warmed = 0;
        let mut failed = 0;
        let batches: Vec<&[String]> = keys.chunks(self.settings.warm_batch_size.max(1)).collect();

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.warm_batch_delay).await;
            }
            match self.backend.warm_batch(endpoint, batch).await {
                Ok(()) => warmed += 1,
                Err(e) => {
                    warn!(%endpoint, batch = index, error = %e, "cache warming batch failed");
                    failed += 1;
                }
            }
        }

        if !batches.is_empty() {
            info!(%endpoint, warmed, failed, keys = keys.len(), "cache warming finished");
        }
        (warmed, failed)
    }
}
