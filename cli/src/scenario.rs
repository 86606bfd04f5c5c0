//! Scenario file loading, mirroring the teacher's JSON chain-spec loading in
//! `chain_spec.rs`: a `serde`-deserialized file describes everything needed
//! to run the demo end to end, rather than a pile of ad hoc CLI flags.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use swaps_core::config::TenantConfig;
use swaps_core::graph_index::RemovalTarget;
use swaps_core::ids::{CollectionId, NftId, TenantId, WalletId};
use swaps_core::model::{Collection, DiscoveryMode, Nft};
use swaps_core::mutation::Mutation;
use swaps_core::tenant::TenantRegistry;

#[derive(Debug, Deserialize)]
pub struct ScenarioFile {
    pub tenant_id: String,
    #[serde(default)]
    pub config: TenantConfig,
    pub actions: Vec<Action>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    UpsertInventory {
        wallet: String,
        nfts: Vec<ScenarioNft>,
    },
    UpsertWants {
        wallet: String,
        #[serde(default)]
        nft_ids: Vec<String>,
        #[serde(default)]
        collection_ids: Vec<String>,
    },
    UpsertCollection {
        id: String,
        size: usize,
    },
    RemoveWallet {
        wallet: String,
    },
    Discover,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioNft {
    pub id: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub estimated_value: Option<f64>,
}

impl From<ScenarioNft> for Nft {
    fn from(s: ScenarioNft) -> Self {
        Nft {
            id: NftId::from(s.id),
            collection_id: s.collection_id.map(CollectionId::from),
            estimated_value: s.estimated_value,
            currency: None,
        }
    }
}

pub fn load(path: &Path) -> Result<ScenarioFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing scenario file {}", path.display()))
}

/// Runs every action in order against a fresh `TenantRegistry`, printing
/// each `Discover` action's result as JSON to stdout.
pub fn run(scenario: ScenarioFile) -> Result<()> {
    let tenant_id = TenantId::from(scenario.tenant_id.clone());
    let registry = TenantRegistry::new();
    registry
        .open_tenant(tenant_id.clone(), scenario.config)
        .context("opening tenant")?;
    let handle = registry.tenant(&tenant_id).context("fetching tenant handle")?;

    for action in scenario.actions {
        match action {
            Action::UpsertInventory { wallet, nfts } => {
                handle
                    .mutate(Mutation::UpsertInventory {
                        wallet: WalletId::from(wallet),
                        nfts: nfts.into_iter().map(Nft::from).collect(),
                    })
                    .context("applying upsert_inventory")?;
            }
            Action::UpsertWants {
                wallet,
                nft_ids,
                collection_ids,
            } => {
                handle
                    .mutate(Mutation::UpsertWants {
                        wallet: WalletId::from(wallet),
                        nft_ids: nft_ids.into_iter().map(NftId::from).collect(),
                        collection_ids: collection_ids.into_iter().map(CollectionId::from).collect(),
                    })
                    .context("applying upsert_wants")?;
            }
            Action::UpsertCollection { id, size } => {
                handle
                    .mutate(Mutation::UpsertCollection(Collection {
                        id: CollectionId::from(id),
                        size,
                    }))
                    .context("applying upsert_collection")?;
            }
            Action::RemoveWallet { wallet } => {
                handle
                    .mutate(Mutation::Remove(RemovalTarget::Wallet(WalletId::from(wallet))))
                    .context("applying remove")?;
            }
            Action::Discover => {
                let result = handle.discover(&tenant_id, Default::default(), DiscoveryMode::Informational);
                println!("{}", serde_json::to_string_pretty(&DiscoverView::from(result))?);
            }
        }
    }

    Ok(())
}

/// Serializable projection of `DiscoverResult`, since the core type carries
/// a few fields (like `Strategy`) that don't derive `Serialize` directly.
#[derive(Debug, serde::Serialize)]
struct DiscoverView {
    run_id: Option<String>,
    loop_count: usize,
    truncated: bool,
    strategy: Option<String>,
    cycles_enumerated: usize,
    cycles_after_dedup: usize,
    elapsed_ms: u64,
}

impl From<swaps_core::DiscoverResult> for DiscoverView {
    fn from(r: swaps_core::DiscoverResult) -> Self {
        Self {
            run_id: r.run_id.map(|id| id.to_string()),
            loop_count: r.loops.len(),
            truncated: r.truncated,
            strategy: r.stats.strategy.map(|s| s.to_string()),
            cycles_enumerated: r.stats.cycles_enumerated,
            cycles_after_dedup: r.stats.cycles_after_dedup,
            elapsed_ms: r.stats.elapsed_ms,
        }
    }
}
