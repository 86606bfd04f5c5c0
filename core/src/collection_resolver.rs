//! `CollectionResolver`: resolves collection-level wants into effective
//! NFT-level want sets during discovery, without materializing the full
//! expansion when collections are large. See `spec.md` §4.2.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::graph_index::GraphSnapshot;
use crate::ids::{CollectionId, NftId, WalletId};

/// Memoized `nft -> collectionId` and `collection -> {wallets wanting it}`
/// lookups, per `SPEC_FULL.md` §3. Lives for the lifetime of a tenant, not
/// one run; `MutationPipeline` invalidates entries on mutation.
#[derive(Debug, Default)]
pub struct CollectionResolver {
    expansion_threshold: usize,
    nft_collection_cache: DashMap<NftId, Option<CollectionId>>,
    collection_wanters_cache: DashMap<CollectionId, BTreeSet<WalletId>>,
    inflight: DashMap<CollectionId, Arc<Mutex<()>>>,
}

impl CollectionResolver {
    pub fn new(expansion_threshold: usize) -> Self {
        Self {
            expansion_threshold,
            ..Default::default()
        }
    }

    /// Unknown NFT degrades to `None`; never raises.
    pub fn collection_of(&self, snapshot: &GraphSnapshot, nft: &NftId) -> Option<CollectionId> {
        if let Some(hit) = self.nft_collection_cache.get(nft) {
            return hit.clone();
        }
        let resolved = snapshot.nft(nft).and_then(|n| n.collection_id.clone());
        self.nft_collection_cache.insert(nft.clone(), resolved.clone());
        resolved
    }

    /// Unknown collection degrades to an empty wanter set; never raises.
    pub fn collection_wanters(
        &self,
        snapshot: &GraphSnapshot,
        collection: &CollectionId,
    ) -> BTreeSet<WalletId> {
        if let Some(hit) = self.collection_wanters_cache.get(collection) {
            return hit.clone();
        }

        // Single-flight: only one caller computes a missing entry per key.
        let guard = self
            .inflight
            .entry(collection.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _lock = guard.lock();

        if let Some(hit) = self.collection_wanters_cache.get(collection) {
            return hit.clone();
        }
        let wanters = snapshot.collection_wanters(collection);
        self.collection_wanters_cache
            .insert(collection.clone(), wanters.clone());
        wanters
    }

    /// Whether `collection`'s membership should be eagerly materialized as
    /// specific wants (size at or below the configured threshold) rather
    /// than kept as a lazy collection edge.
    pub fn should_eager_expand(&self, snapshot: &GraphSnapshot, collection: &CollectionId) -> bool {
        snapshot
            .collection(collection)
            .map(|c| c.size <= self.expansion_threshold)
            .unwrap_or(false)
    }

    /// The full set of wallets that would accept `nft`: its specific
    /// wanters unioned with the wanters of its collection (if any),
    /// hiding the eager/lazy distinction from algorithms.
    pub fn wanters_for_nft(&self, snapshot: &GraphSnapshot, nft: &NftId) -> BTreeSet<WalletId> {
        let mut wanters = snapshot.specific_wanters(nft);
        if let Some(collection) = self.collection_of(snapshot, nft) {
            wanters.extend(self.collection_wanters(snapshot, &collection));
        }
        wanters
    }

    /// Invalidates memoized entries touched by a mutation. Called by
    /// `MutationPipeline` with the entities a delta referenced.
    pub fn invalidate_nft(&self, nft: &NftId) {
        self.nft_collection_cache.remove(nft);
    }

    pub fn invalidate_collection(&self, collection: &CollectionId) {
        self.collection_wanters_cache.remove(collection);
        self.inflight.remove(collection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergePolicy;
    use crate::graph_index::GraphIndex;
    use crate::model::{Collection, Nft};

    fn snapshot_with_small_collection() -> GraphSnapshot {
        let index = GraphIndex::new();
        index.upsert_collection(Collection {
            id: CollectionId::from("G"),
            size: 2,
        });
        let mut n1 = Nft::new(NftId::from("g1"));
        n1.collection_id = Some(CollectionId::from("G"));
        index
            .upsert_inventory(&WalletId::from("alice"), &[n1], MergePolicy::Reject)
            .unwrap();
        index
            .upsert_wants(&WalletId::from("bob"), &[], &[CollectionId::from("G")])
            .unwrap();
        index.snapshot()
    }

    #[test]
    fn wanters_for_nft_includes_collection_wanters() {
        let snapshot = snapshot_with_small_collection();
        let resolver = CollectionResolver::new(100);
        let wanters = resolver.wanters_for_nft(&snapshot, &NftId::from("g1"));
        assert!(wanters.contains(&WalletId::from("bob")));
    }

    #[test]
    fn unknown_nft_has_no_collection() {
        let snapshot = snapshot_with_small_collection();
        let resolver = CollectionResolver::new(100);
        assert_eq!(resolver.collection_of(&snapshot, &NftId::from("ghost")), None);
    }

    #[test]
    fn eager_expand_below_threshold() {
        let snapshot = snapshot_with_small_collection();
        let resolver = CollectionResolver::new(1);
        assert!(!resolver.should_eager_expand(&snapshot, &CollectionId::from("G")));
        let resolver = CollectionResolver::new(100);
        assert!(resolver.should_eager_expand(&snapshot, &CollectionId::from("G")));
    }
}
