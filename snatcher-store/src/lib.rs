pub mod app_config;
pub mod memory;
pub mod redis_repo;

use snatcher_core::BookingStore;
use std::sync::Arc;
use tracing::{info, warn};

pub use memory::MemoryStore;
pub use redis_repo::RedisStore;

use app_config::{StoreBackend, StoreConfig};

/// Opens the configured backend, retrying Redis until it answers or the
/// attempts run out.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn BookingStore>, redis::RedisError> {
    match config.backend {
        StoreBackend::Memory => {
            info!(
                "Using in-memory store (replication factor {}, lag {:?})",
                config.replication_factor,
                config.replication_lag()
            );
            Ok(Arc::new(MemoryStore::from_config(config)))
        }
        StoreBackend::Redis => {
            let attempts = config.connect_attempts.max(1);
            let mut attempt = 1;
            loop {
                match RedisStore::new(config).await {
                    Ok(store) => {
                        info!("Connected to Redis at {}", config.redis_url);
                        return Ok(Arc::new(store));
                    }
                    Err(e) if attempt < attempts => {
                        warn!("Waiting for Redis ({}/{}): {}", attempt, attempts, e);
                        tokio::time::sleep(config.connect_backoff()).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
