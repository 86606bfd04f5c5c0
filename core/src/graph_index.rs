//! `GraphIndex`: source of truth for one tenant's wallets, NFTs, wants and
//! collection memberships. See `spec.md` §4.1.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::config::MergePolicy;
use crate::error::{CoreError, CoreResult, EntityRef};
use crate::ids::{CollectionId, NftId, WalletId};
use crate::model::{Collection, Nft, Wallet};

/// What changed as a result of `upsertInventory`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryDelta {
    pub added_nfts: Vec<NftId>,
    pub removed_nfts: Vec<NftId>,
    /// NFTs that moved from one wallet's `owned` set to another's (the
    /// wallet upserting inventory), as `(nft, previous_owner)`.
    pub moved_nfts: Vec<(NftId, WalletId)>,
}

/// What changed as a result of `upsertWants`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WantsDelta {
    pub added_nft_wants: Vec<NftId>,
    pub added_collection_wants: Vec<CollectionId>,
}

/// Every entity invalidated by a `remove(...)` call, used by
/// `MutationPipeline` to scope `LoopCache::invalidate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationDelta {
    pub wallets: Vec<WalletId>,
    pub nfts: Vec<NftId>,
    pub collections: Vec<CollectionId>,
}

/// Entity removed via `GraphIndex::remove`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalTarget {
    Wallet(WalletId),
    Nft(NftId),
    Collection(CollectionId),
}

#[derive(Debug, Default, Clone)]
struct GraphState {
    wallets: HashMap<WalletId, Wallet>,
    nfts: HashMap<NftId, Nft>,
    collections: HashMap<CollectionId, Collection>,
    nft_owner: HashMap<NftId, WalletId>,
    collection_members: HashMap<CollectionId, BTreeSet<NftId>>,
    /// Derived: nft -> wallets specifically wanting it.
    nft_wanters: HashMap<NftId, BTreeSet<WalletId>>,
    /// Derived: collection -> wallets wanting any member of it.
    collection_wanters: HashMap<CollectionId, BTreeSet<WalletId>>,
}

/// Immutable view of a tenant's graph at one point in time, suitable for one
/// discovery run. Cheap to construct for moderate graph sizes; `spec.md`
/// allows either copy-on-write references or a versioned arena — this
/// implementation takes the simpler deep-clone route since `GraphState`
/// holds only small, flat collections.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    state: GraphState,
    pub version: u64,
}

impl GraphSnapshot {
    pub fn wallet_ids(&self) -> impl Iterator<Item = &WalletId> {
        self.state.wallets.keys()
    }

    pub fn wallet(&self, id: &WalletId) -> Option<&Wallet> {
        self.state.wallets.get(id)
    }

    pub fn nft(&self, id: &NftId) -> Option<&Nft> {
        self.state.nfts.get(id)
    }

    pub fn collection(&self, id: &CollectionId) -> Option<&Collection> {
        self.state.collections.get(id)
    }

    pub fn owner_of(&self, nft: &NftId) -> Option<&WalletId> {
        self.state.nft_owner.get(nft)
    }

    pub fn owned_by(&self, wallet: &WalletId) -> BTreeSet<NftId> {
        self.state
            .wallets
            .get(wallet)
            .map(|w| w.owned.clone())
            .unwrap_or_default()
    }

    pub fn collection_members(&self, collection: &CollectionId) -> BTreeSet<NftId> {
        self.state
            .collection_members
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn specific_wanters(&self, nft: &NftId) -> BTreeSet<WalletId> {
        self.state.nft_wanters.get(nft).cloned().unwrap_or_default()
    }

    pub fn collection_wanters(&self, collection: &CollectionId) -> BTreeSet<WalletId> {
        self.state
            .collection_wanters
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn wallet_count(&self) -> usize {
        self.state.wallets.len()
    }
}

/// Per-tenant mutable adjacency structures. See module docs.
#[derive(Debug, Default)]
pub struct GraphIndex {
    state: RwLock<GraphState>,
    version: std::sync::atomic::AtomicU64,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version.load(std::sync::atomic::Ordering::Acquire)
    }

    fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, std::sync::atomic::Ordering::AcqRel) + 1
    }

    /// Replaces or merges the wallet's owned set with `nfts`, per the
    /// tenant's `MergePolicy`. Fails with `InvalidOwnership` if any NFT is
    /// already owned elsewhere and the policy disallows stealing.
    pub fn upsert_inventory(
        &self,
        wallet_id: &WalletId,
        nfts: &[Nft],
        merge_policy: MergePolicy,
    ) -> CoreResult<InventoryDelta> {
        let mut state = self.state.write();

        // Validate before mutating: an atomic all-or-nothing move.
        if merge_policy == MergePolicy::Reject {
            for nft in nfts {
                if let Some(owner) = state.nft_owner.get(&nft.id) {
                    if owner != wallet_id {
                        return Err(CoreError::InvalidOwnership {
                            nft: nft.id.clone(),
                            current_owner: owner.clone(),
                        });
                    }
                }
            }
        }

        let mut delta = InventoryDelta::default();
        let wallet = state
            .wallets
            .entry(wallet_id.clone())
            .or_insert_with(|| Wallet::new(wallet_id.clone()));
        let previously_owned: BTreeSet<NftId> = wallet.owned.clone();
        let incoming: BTreeSet<NftId> = nfts.iter().map(|n| n.id.clone()).collect();

        for nft in &previously_owned {
            if !incoming.contains(nft) {
                delta.removed_nfts.push(nft.clone());
            }
        }

        for nft in nfts {
            if !previously_owned.contains(&nft.id) {
                if let Some(prev_owner) = state.nft_owner.get(&nft.id).cloned() {
                    if &prev_owner != wallet_id {
                        delta.moved_nfts.push((nft.id.clone(), prev_owner));
                    }
                } else {
                    delta.added_nfts.push(nft.id.clone());
                }
            }
        }

        // Apply: remove stolen NFTs from their previous owner's `owned` set.
        for (nft_id, prev_owner) in &delta.moved_nfts {
            if let Some(prev_wallet) = state.wallets.get_mut(prev_owner) {
                prev_wallet.owned.remove(nft_id);
            }
        }
        for nft_id in &delta.removed_nfts {
            state.nft_owner.remove(nft_id);
        }

        let wallet = state.wallets.get_mut(wallet_id).expect("inserted above");
        wallet.owned = incoming.clone();

        for nft in nfts {
            state.nft_owner.insert(nft.id.clone(), wallet_id.clone());
            state.nfts.entry(nft.id.clone()).or_insert_with(|| nft.clone());
            if let Some(nft_entry) = state.nfts.get_mut(&nft.id) {
                *nft_entry = nft.clone();
            }
            if let Some(collection_id) = &nft.collection_id {
                state
                    .collection_members
                    .entry(collection_id.clone())
                    .or_default()
                    .insert(nft.id.clone());
            }
        }

        self.bump_version();
        Ok(delta)
    }

    /// Adds to the wallet's want sets. Duplicates are idempotent.
    pub fn upsert_wants(
        &self,
        wallet_id: &WalletId,
        nft_ids: &[NftId],
        collection_ids: &[CollectionId],
    ) -> CoreResult<WantsDelta> {
        let mut state = self.state.write();
        let mut delta = WantsDelta::default();

        let wallet = state
            .wallets
            .entry(wallet_id.clone())
            .or_insert_with(|| Wallet::new(wallet_id.clone()));

        for nft_id in nft_ids {
            if wallet.wanted_nfts.insert(nft_id.clone()) {
                delta.added_nft_wants.push(nft_id.clone());
            }
        }
        for collection_id in collection_ids {
            if wallet.wanted_collections.insert(collection_id.clone()) {
                delta.added_collection_wants.push(collection_id.clone());
            }
        }

        for nft_id in &delta.added_nft_wants {
            state
                .nft_wanters
                .entry(nft_id.clone())
                .or_default()
                .insert(wallet_id.clone());
        }
        for collection_id in &delta.added_collection_wants {
            state
                .collection_wanters
                .entry(collection_id.clone())
                .or_default()
                .insert(wallet_id.clone());
        }

        if !delta.added_nft_wants.is_empty() || !delta.added_collection_wants.is_empty() {
            self.bump_version();
        }
        Ok(delta)
    }

    /// Registers (or updates) a collection's declared size, used by
    /// `CollectionResolver`'s eager/lazy policy.
    pub fn upsert_collection(&self, collection: Collection) {
        let mut state = self.state.write();
        state.collections.insert(collection.id.clone(), collection);
        self.bump_version();
    }

    /// Removes the entity and all references to it; returns the full
    /// invalidation delta for affected entities.
    pub fn remove(&self, target: RemovalTarget) -> CoreResult<InvalidationDelta> {
        let mut state = self.state.write();
        let mut delta = InvalidationDelta::default();

        match target {
            RemovalTarget::Wallet(wallet_id) => {
                let wallet = state
                    .wallets
                    .remove(&wallet_id)
                    .ok_or_else(|| CoreError::NotFound(EntityRef::Wallet(wallet_id.clone())))?;

                for nft in &wallet.owned {
                    state.nft_owner.remove(nft);
                    delta.nfts.push(nft.clone());
                }
                for nft in &wallet.wanted_nfts {
                    if let Some(wanters) = state.nft_wanters.get_mut(nft) {
                        wanters.remove(&wallet_id);
                    }
                    delta.nfts.push(nft.clone());
                }
                for collection in &wallet.wanted_collections {
                    if let Some(wanters) = state.collection_wanters.get_mut(collection) {
                        wanters.remove(&wallet_id);
                    }
                    delta.collections.push(collection.clone());
                }
                delta.wallets.push(wallet_id);
            }
            RemovalTarget::Nft(nft_id) => {
                if state.nfts.remove(&nft_id).is_none() {
                    return Err(CoreError::NotFound(EntityRef::Nft(nft_id)));
                }
                if let Some(owner) = state.nft_owner.remove(&nft_id) {
                    if let Some(wallet) = state.wallets.get_mut(&owner) {
                        wallet.owned.remove(&nft_id);
                    }
                    delta.wallets.push(owner);
                }
                if let Some(wanters) = state.nft_wanters.remove(&nft_id) {
                    delta.wallets.extend(wanters);
                }
                for members in state.collection_members.values_mut() {
                    members.remove(&nft_id);
                }
                delta.nfts.push(nft_id);
            }
            RemovalTarget::Collection(collection_id) => {
                if state.collections.remove(&collection_id).is_none() {
                    return Err(CoreError::NotFound(EntityRef::Collection(collection_id)));
                }
                state.collection_members.remove(&collection_id);
                if let Some(wanters) = state.collection_wanters.remove(&collection_id) {
                    for wallet_id in &wanters {
                        if let Some(wallet) = state.wallets.get_mut(wallet_id) {
                            wallet.wanted_collections.remove(&collection_id);
                        }
                    }
                    delta.wallets.extend(wanters);
                }
                delta.collections.push(collection_id);
            }
        }

        self.bump_version();
        Ok(delta)
    }

    /// Returns an immutable view for use by one discovery run.
    pub fn snapshot(&self) -> GraphSnapshot {
        let state = self.state.read();
        GraphSnapshot {
            state: state.clone(),
            version: self.version(),
        }
    }
}
