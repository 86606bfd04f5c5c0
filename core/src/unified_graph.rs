//! `UnifiedTradeGraph`: presents algorithms a single `wanters(nft)` function
//! that hides specific-vs-collection sourcing, plus a lazily-memoized
//! wallet-level adjacency projection for SCC/Johnson. See `spec.md` §4.3.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use petgraph::graphmap::DiGraphMap;

use crate::collection_resolver::CollectionResolver;
use crate::graph_index::GraphSnapshot;
use crate::ids::{NftId, WalletId};
use crate::model::Edge;

/// Wallet-level directed graph: an edge `a -> b` exists iff some NFT owned
/// by `a` is wanted by `b` under the unified relation. Wallets are indexed
/// by `u32` because `petgraph::graphmap` requires `Copy` node weights and
/// `WalletId` wraps a `String`.
pub struct WalletGraph {
    pub graph: DiGraphMap<u32, ()>,
    pub index_of: HashMap<WalletId, u32>,
    pub wallet_of: Vec<WalletId>,
    /// All concrete edges between a pair of wallets (there may be several:
    /// different NFTs, or one collection edge with several candidates).
    pub edges: HashMap<(u32, u32), Vec<Edge>>,
}

impl WalletGraph {
    pub fn wallet_id(&self, idx: u32) -> &WalletId {
        &self.wallet_of[idx as usize]
    }
}

/// Stable, read-only view over one `GraphSnapshot` plus a `CollectionResolver`,
/// valid for the duration of one discovery run. No mutation methods.
pub struct UnifiedTradeGraph<'a> {
    snapshot: &'a GraphSnapshot,
    resolver: &'a CollectionResolver,
    expand_collections: bool,
    wallet_graph: OnceLock<WalletGraph>,
}

impl<'a> UnifiedTradeGraph<'a> {
    pub fn new(
        snapshot: &'a GraphSnapshot,
        resolver: &'a CollectionResolver,
        expand_collections: bool,
    ) -> Self {
        Self {
            snapshot,
            resolver,
            expand_collections,
            wallet_graph: OnceLock::new(),
        }
    }

    pub fn owned_by(&self, wallet: &WalletId) -> BTreeSet<NftId> {
        self.snapshot.owned_by(wallet)
    }

    pub fn owner_of(&self, nft: &NftId) -> Option<&WalletId> {
        self.snapshot.owner_of(nft)
    }

    /// All wallets willing to accept `nft`, merging specific and
    /// (if enabled) collection-derived wants.
    pub fn wanters(&self, nft: &NftId) -> BTreeSet<WalletId> {
        if !self.expand_collections {
            return self.snapshot.specific_wanters(nft);
        }
        self.resolver.wanters_for_nft(self.snapshot, nft)
    }

    pub fn snapshot(&self) -> &GraphSnapshot {
        self.snapshot
    }

    /// The memoized wallet-level projection, computed on first access.
    pub fn wallet_graph(&self) -> &WalletGraph {
        self.wallet_graph.get_or_init(|| self.build_wallet_graph())
    }

    fn build_wallet_graph(&self) -> WalletGraph {
        let mut index_of = HashMap::new();
        let mut wallet_of = Vec::new();
        // Deterministic ordering: GraphSnapshot's wallets come from a
        // BTreeSet-backed model upstream of us only for per-wallet fields;
        // sort ids here so SCC/Johnson see a stable input order.
        let mut ids: Vec<&WalletId> = self.snapshot.wallet_ids().collect();
        ids.sort();
        for id in ids {
            let idx = wallet_of.len() as u32;
            index_of.insert(id.clone(), idx);
            wallet_of.push(id.clone());
        }

        let mut graph = DiGraphMap::new();
        for idx in 0..wallet_of.len() as u32 {
            graph.add_node(idx);
        }

        let mut edges: HashMap<(u32, u32), Vec<Edge>> = HashMap::new();
        // Grouped lazy collection candidates, keyed by (from, to, collection).
        let mut collection_groups: HashMap<(u32, u32, String), Vec<NftId>> = HashMap::new();

        for from_id in &wallet_of {
            let from_idx = index_of[from_id];
            for nft in self.snapshot.owned_by(from_id) {
                for to_id in self.snapshot.specific_wanters(&nft) {
                    if &to_id == from_id {
                        continue;
                    }
                    let to_idx = index_of[&to_id];
                    graph.add_edge(from_idx, to_idx, ());
                    edges.entry((from_idx, to_idx)).or_default().push(Edge::Specific {
                        from: from_id.clone(),
                        to: to_id.clone(),
                        nft: nft.clone(),
                    });
                }

                if !self.expand_collections {
                    continue;
                }
                if let Some(collection) = self.resolver.collection_of(self.snapshot, &nft) {
                    let eager = self.resolver.should_eager_expand(self.snapshot, &collection);
                    for to_id in self.resolver.collection_wanters(self.snapshot, &collection) {
                        if &to_id == from_id {
                            continue;
                        }
                        // A wallet already specifically wanting this NFT is
                        // already connected above; avoid a redundant edge.
                        if self.snapshot.specific_wanters(&nft).contains(&to_id) {
                            continue;
                        }
                        let to_idx = index_of[&to_id];
                        graph.add_edge(from_idx, to_idx, ());
                        if eager {
                            edges.entry((from_idx, to_idx)).or_default().push(Edge::Specific {
                                from: from_id.clone(),
                                to: to_id.clone(),
                                nft: nft.clone(),
                            });
                        } else {
                            collection_groups
                                .entry((from_idx, to_idx, collection.as_str().to_owned()))
                                .or_default()
                                .push(nft.clone());
                        }
                    }
                }
            }
        }

        for ((from_idx, to_idx, collection), candidates) in collection_groups {
            edges.entry((from_idx, to_idx)).or_default().push(Edge::Collection {
                from: wallet_of[from_idx as usize].clone(),
                to: wallet_of[to_idx as usize].clone(),
                collection: collection.into(),
                candidates,
            });
        }

        WalletGraph {
            graph,
            index_of,
            wallet_of,
            edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergePolicy;
    use crate::graph_index::GraphIndex;
    use crate::model::Nft;

    #[test]
    fn two_party_projection_has_both_edges() {
        let index = GraphIndex::new();
        index
            .upsert_inventory(&WalletId::from("a"), &[Nft::new(NftId::from("n1"))], MergePolicy::Reject)
            .unwrap();
        index
            .upsert_inventory(&WalletId::from("b"), &[Nft::new(NftId::from("n2"))], MergePolicy::Reject)
            .unwrap();
        index
            .upsert_wants(&WalletId::from("a"), &[NftId::from("n2")], &[])
            .unwrap();
        index
            .upsert_wants(&WalletId::from("b"), &[NftId::from("n1")], &[])
            .unwrap();

        let snapshot = index.snapshot();
        let resolver = CollectionResolver::new(100);
        let unified = UnifiedTradeGraph::new(&snapshot, &resolver, true);
        let wg = unified.wallet_graph();
        assert_eq!(wg.graph.node_count(), 2);
        assert_eq!(wg.graph.edge_count(), 2);
    }
}
