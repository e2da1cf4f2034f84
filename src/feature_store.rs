use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::api::{Constraint, Feature, FeatureResponse};

/// An immutable set of features and segments, as returned by one fetch.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub(crate) features: HashMap<String, Arc<Feature>>,
    pub(crate) segments: HashMap<i64, Vec<Constraint>>,
}

impl Snapshot {
    pub fn new(
        features: HashMap<String, Feature>,
        segments: HashMap<i64, Vec<Constraint>>,
    ) -> Snapshot {
        Snapshot {
            features: features
                .into_iter()
                .map(|(name, feature)| (name, Arc::new(feature)))
                .collect(),
            segments,
        }
    }

    pub fn feature(&self, name: &str) -> Option<&Arc<Feature>> {
        self.features.get(name)
    }

    pub fn features(&self) -> impl Iterator<Item = &Arc<Feature>> {
        self.features.values()
    }

    pub fn segment(&self, id: i64) -> Option<&[Constraint]> {
        self.segments.get(&id).map(Vec::as_slice)
    }
}

impl From<FeatureResponse> for Snapshot {
    fn from(response: FeatureResponse) -> Self {
        Snapshot::new(response.feature_map(), response.segment_map())
    }
}

/// `FeatureStore` holds the current [`Snapshot`]. Readers clone the `Arc` under a short read lock
/// and never observe a partially updated set of features.
#[derive(Debug, Default)]
pub(crate) struct FeatureStore {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl FeatureStore {
    pub fn snapshot(&self) -> Arc<Snapshot> {
        // A writer can only panic inside `mem::replace`, so the value behind a poisoned lock is
        // still consistent.
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&snapshot)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Feature>> {
        self.snapshot().feature(name).cloned()
    }

    /// Replace the snapshot, returning the previous one.
    pub fn swap(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Arc::new(snapshot);

        let mut slot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut slot, new_value)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use crate::api::Feature;

    use super::{FeatureStore, Snapshot};

    fn snapshot(names: &[&str]) -> Snapshot {
        let features = names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    Feature {
                        name: name.to_string(),
                        enabled: true,
                        ..Default::default()
                    },
                )
            })
            .collect();
        Snapshot::new(features, HashMap::new())
    }

    #[test]
    fn can_swap_snapshot_from_another_thread() {
        let store = Arc::new(FeatureStore::default());
        assert!(store.get("f1").is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.swap(snapshot(&["f1"]));
            })
            .join();
        }

        assert!(store.get("f1").is_some());
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = FeatureStore::default();
        store.swap(snapshot(&["old"]));
        let before = store.snapshot();

        let previous = store.swap(snapshot(&["new"]));

        assert!(Arc::ptr_eq(&before, &previous));
        assert!(before.feature("old").is_some());
        assert!(before.feature("new").is_none());
        assert!(store.get("new").is_some());
        assert!(store.get("old").is_none());
    }
}
