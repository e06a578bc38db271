pub mod config;
pub mod spill;
pub mod stats;

use std::sync::Arc;

pub use config::{MiniBatchConfig, SpillBackendKind, SpillStoreConfig};
pub use spill::{DiskSpillStore, DynSpillStore, InMemSpillStore, SpillStore, StoreError};
pub use stats::{MiniBatchStats, MiniBatchStatsSnapshot};

/// Builds the spill store selected by `config.backend`.
pub fn create_spill_store(
    config: &MiniBatchConfig,
    stats: Arc<MiniBatchStats>,
) -> Result<DynSpillStore, StoreError> {
    match config.backend {
        SpillBackendKind::InMem => Ok(Box::new(InMemSpillStore::new())),
        SpillBackendKind::Disk => Ok(Box::new(DiskSpillStore::open(config.spill.clone(), stats)?)),
    }
}
