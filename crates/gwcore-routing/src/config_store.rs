use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;

use crate::model::VersionedConfig;

/// Atomic snapshot holder for the routing config, mirroring the teacher's
/// `AppState` pattern: readers take a cheap `Arc` clone off the hot path,
/// writers serialize through a reload mutex and install a brand new
/// snapshot rather than mutating one in place (invariant 1 & 4).
pub struct ConfigStore {
    current: ArcSwap<VersionedConfig>,
    reload_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(initial: VersionedConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn empty() -> Self {
        Self::new(VersionedConfig::empty())
    }

    /// Cheap `Arc` clone of the currently installed snapshot. In-flight
    /// requests keep using whatever snapshot they loaded even if a reload
    /// races ahead of them.
    pub fn current(&self) -> Arc<VersionedConfig> {
        self.current.load_full()
    }

    pub fn version(&self) -> i64 {
        self.current.load().version
    }

    /// Installs `next` as the new snapshot, serialized against any other
    /// concurrent reload so the installed version always strictly
    /// increases. Returns the version actually installed.
    pub async fn install(&self, next: VersionedConfig) -> i64 {
        let _guard = self.reload_lock.lock().await;
        let version = next.version;
        self.current.store(Arc::new(next));
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VersionedConfig;

    #[tokio::test]
    async fn install_replaces_snapshot_atomically() {
        let store = ConfigStore::empty();
        assert_eq!(store.version(), 0);

        let mut next = VersionedConfig::empty();
        next.version = 1;
        store.install(next).await;

        assert_eq!(store.version(), 1);
    }

    #[tokio::test]
    async fn in_flight_snapshot_is_unaffected_by_later_reload() {
        let store = ConfigStore::empty();
        let held = store.current();

        let mut next = VersionedConfig::empty();
        next.version = 7;
        store.install(next).await;

        assert_eq!(held.version, 0);
        assert_eq!(store.version(), 7);
    }
}
