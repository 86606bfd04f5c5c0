//! Core entity and value types: `spec.md` §3, closed sum types per §9's
//! "dynamic typing of entities" design note.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{CanonicalId, CollectionId, NftId, WalletId};

/// A wallet's desire, resolved to one of two closed shapes rather than an
/// open record. `AnyOfCollection` is expanded to concrete NFTs lazily by
/// `CollectionResolver` / `UnifiedTradeGraph`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Want {
    SpecificNft(NftId),
    AnyOfCollection(CollectionId),
}

/// An edge in the wallet-level want graph, tagged with its provenance so
/// downstream NFT-choice resolution (for collection edges) knows it has a
/// choice to make. Purely an algorithmic helper type; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edge {
    /// `to` wants exactly `nft`, which `from` owns.
    Specific { from: WalletId, to: WalletId, nft: NftId },
    /// `to` wants any member of `collection`; `from` owns `candidates`,
    /// all members of that collection.
    Collection {
        from: WalletId,
        to: WalletId,
        collection: CollectionId,
        candidates: Vec<NftId>,
    },
}

impl Edge {
    pub fn from(&self) -> &WalletId {
        match self {
            Edge::Specific { from, .. } => from,
            Edge::Collection { from, .. } => from,
        }
    }

    pub fn to(&self) -> &WalletId {
        match self {
            Edge::Specific { to, .. } => to,
            Edge::Collection { to, .. } => to,
        }
    }
}

/// An NFT. `estimated_value`/`currency` are advisory, used only by `Scorer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nft {
    pub id: NftId,
    pub collection_id: Option<CollectionId>,
    pub estimated_value: Option<f64>,
    pub currency: Option<String>,
}

impl Nft {
    pub fn new(id: NftId) -> Self {
        Self {
            id,
            collection_id: None,
            estimated_value: None,
            currency: None,
        }
    }
}

/// A collection of NFTs. `size` governs the eager/lazy expansion policy in
/// `CollectionResolver`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub size: usize,
}

/// A wallet: what it owns and what it wants, within one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owned: BTreeSet<NftId>,
    pub wanted_nfts: BTreeSet<NftId>,
    pub wanted_collections: BTreeSet<CollectionId>,
}

impl Wallet {
    pub fn new(id: WalletId) -> Self {
        Self {
            id,
            owned: BTreeSet::new(),
            wanted_nfts: BTreeSet::new(),
            wanted_collections: BTreeSet::new(),
        }
    }
}

/// One leg of a trade loop: `from` gives `nft` to `to`.
///
/// Invariant (checked at emission, see `DiscoveryEngine`): `from` owned `nft`
/// in the snapshot used for the run, and `to` wanted `nft` specifically or
/// via a wanted collection containing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStep {
    pub from: WalletId,
    pub to: WalletId,
    pub nft: NftId,
}

/// A closed cycle of `TradeStep`s in which every participant both gives and
/// receives exactly one NFT. See `spec.md` §3 for the full invariant list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLoop {
    pub canonical_id: CanonicalId,
    pub steps: Vec<TradeStep>,
    pub participants: BTreeSet<WalletId>,
    pub score: f64,
    pub efficiency: f64,
    pub valuation_incomplete: bool,
    pub created_at: u64,
    pub version: u64,
}

impl TradeLoop {
    /// Every consecutive pair closes: `steps[i].to == steps[(i+1) % n].from`.
    pub fn is_closed(&self) -> bool {
        let n = self.steps.len();
        if n < 2 {
            return false;
        }
        (0..n).all(|i| self.steps[i].to == self.steps[(i + 1) % n].from)
    }

    pub fn references(&self, wallet: &WalletId) -> bool {
        self.participants.contains(wallet)
    }

    pub fn references_nft(&self, nft: &NftId) -> bool {
        self.steps.iter().any(|s| &s.nft == nft)
    }
}

/// Discovery run mode, per `spec.md` §6's `discover(...)` input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryMode {
    Informational,
    Executable,
}
