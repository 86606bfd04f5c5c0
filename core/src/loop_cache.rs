//! `LoopCache`: the active-loop store, with secondary indices for
//! invalidation lookups. See `spec.md` §4.10.

use std::collections::HashSet;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::ids::{CanonicalId, NftId, WalletId};
use crate::model::TradeLoop;

/// `DashMap`'s per-shard locking keeps each individual map consistent, but
/// the primary store and its two secondary indices must move together or a
/// reader can observe a loop present in one and absent from another. A
/// single `Mutex` serializes the triple update; lookups still go straight to
/// the `DashMap`s without taking it.
#[derive(Default)]
pub struct LoopCache {
    primary: DashMap<CanonicalId, TradeLoop>,
    by_wallet: DashMap<WalletId, HashSet<CanonicalId>>,
    by_nft: DashMap<NftId, HashSet<CanonicalId>>,
    write_lock: Mutex<()>,
}

impl LoopCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &CanonicalId) -> Option<TradeLoop> {
        self.primary.get(id).map(|r| r.clone())
    }

    pub fn contains(&self, id: &CanonicalId) -> bool {
        self.primary.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Inserts or replaces a loop, updating both secondary indices within
    /// the same critical section. Replacing an existing id first removes
    /// its old index entries, so a re-scored loop never leaves stale
    /// wallet/nft references behind.
    pub fn insert(&self, trade_loop: TradeLoop) {
        let _guard = self.write_lock.lock();
        if let Some(old) = self.primary.get(&trade_loop.canonical_id) {
            self.remove_from_indices(&old);
        }
        self.add_to_indices(&trade_loop);
        self.primary.insert(trade_loop.canonical_id.clone(), trade_loop);
    }

    pub fn remove(&self, id: &CanonicalId) -> Option<TradeLoop> {
        let _guard = self.write_lock.lock();
        let removed = self.primary.remove(id).map(|(_, v)| v);
        if let Some(loop_ref) = &removed {
            self.remove_from_indices(loop_ref);
        }
        removed
    }

    pub fn by_wallet(&self, wallet: &WalletId) -> Vec<TradeLoop> {
        self.by_wallet
            .get(wallet)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn by_nft(&self, nft: &NftId) -> Vec<TradeLoop> {
        self.by_nft
            .get(nft)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Removes every cached loop referencing any of `wallets` or `nfts`.
    /// Returns the ids removed, so the caller can log / account for them.
    pub fn invalidate(&self, wallets: &[WalletId], nfts: &[NftId]) -> Vec<CanonicalId> {
        let _guard = self.write_lock.lock();
        let mut to_remove: HashSet<CanonicalId> = HashSet::new();
        for wallet in wallets {
            if let Some(ids) = self.by_wallet.get(wallet) {
                to_remove.extend(ids.iter().cloned());
            }
        }
        for nft in nfts {
            if let Some(ids) = self.by_nft.get(nft) {
                to_remove.extend(ids.iter().cloned());
            }
        }

        for id in &to_remove {
            if let Some((_, loop_ref)) = self.primary.remove(id) {
                self.remove_from_indices(&loop_ref);
            }
        }

        to_remove.into_iter().collect()
    }

    fn add_to_indices(&self, trade_loop: &TradeLoop) {
        for wallet in &trade_loop.participants {
            self.by_wallet
                .entry(wallet.clone())
                .or_default()
                .insert(trade_loop.canonical_id.clone());
        }
        for step in &trade_loop.steps {
            self.by_nft
                .entry(step.nft.clone())
                .or_default()
                .insert(trade_loop.canonical_id.clone());
        }
    }

    fn remove_from_indices(&self, trade_loop: &TradeLoop) {
        for wallet in &trade_loop.participants {
            if let Some(mut ids) = self.by_wallet.get_mut(wallet) {
                ids.remove(&trade_loop.canonical_id);
            }
        }
        for step in &trade_loop.steps {
            if let Some(mut ids) = self.by_nft.get_mut(&step.nft) {
                ids.remove(&trade_loop.canonical_id);
            }
        }
    }
}
