//! `MutationPipeline`: the single-writer serial queue each tenant's wallet
//! and want updates flow through. See `spec.md` §4.11.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info_span, warn};

use crate::collection_resolver::CollectionResolver;
use crate::config::TenantConfig;
use crate::dedup::Deduper;
use crate::discovery::{DiscoverResult, DiscoveryEngine, DiscoveryParams, RecentRunTimings};
use crate::error::{CoreError, CoreResult};
use crate::graph_index::{GraphIndex, InvalidationDelta, RemovalTarget};
use crate::ids::{CanonicalId, CollectionId, NftId, TenantId, WalletId};
use crate::loop_cache::LoopCache;
use crate::model::{Collection, DiscoveryMode, Nft};

/// One pending change to a tenant's graph. Constructed by the boundary
/// layer, applied synchronously (from the caller's perspective) by the
/// tenant's dedicated worker thread.
pub enum Mutation {
    UpsertInventory {
        wallet: WalletId,
        nfts: Vec<Nft>,
    },
    UpsertWants {
        wallet: WalletId,
        nft_ids: Vec<NftId>,
        collection_ids: Vec<CollectionId>,
    },
    UpsertCollection(Collection),
    Remove(RemovalTarget),
}

#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    pub invalidated_loops: Vec<CanonicalId>,
    pub discovery: Option<DiscoverResult>,
}

struct QueuedItem {
    mutation: Mutation,
    reply: crossbeam_channel::Sender<CoreResult<MutationOutcome>>,
}

/// Shared handles the worker thread needs; cloned into the thread closure.
struct Worker {
    tenant: TenantId,
    graph_index: Arc<GraphIndex>,
    resolver: Arc<CollectionResolver>,
    deduper: Arc<Deduper>,
    loop_cache: Arc<LoopCache>,
    engine: Arc<DiscoveryEngine>,
    config: TenantConfig,
}

impl Worker {
    fn apply_one(&self, mutation: Mutation) -> CoreResult<MutationOutcome> {
        let span = info_span!("apply_mutation", tenant = %self.tenant);
        let _enter = span.enter();

        let invalidation = match mutation {
            Mutation::UpsertInventory { wallet, nfts } => {
                let delta = self
                    .graph_index
                    .upsert_inventory(&wallet, &nfts, self.config.merge_policy)?;
                for nft in &delta.added_nfts {
                    self.resolver.invalidate_nft(nft);
                }
                for (nft, _) in &delta.moved_nfts {
                    self.resolver.invalidate_nft(nft);
                }
                let mut wallets = vec![wallet];
                wallets.extend(delta.moved_nfts.iter().map(|(_, prev)| prev.clone()));
                InvalidationDelta {
                    wallets,
                    nfts: delta
                        .added_nfts
                        .into_iter()
                        .chain(delta.removed_nfts)
                        .chain(delta.moved_nfts.into_iter().map(|(id, _)| id))
                        .collect(),
                    collections: Vec::new(),
                }
            }
            Mutation::UpsertWants {
                wallet,
                nft_ids,
                collection_ids,
            } => {
                let delta = self
                    .graph_index
                    .upsert_wants(&wallet, &nft_ids, &collection_ids)?;
                InvalidationDelta {
                    wallets: vec![wallet],
                    nfts: delta.added_nft_wants,
                    collections: delta.added_collection_wants,
                }
            }
            Mutation::UpsertCollection(collection) => {
                let id = collection.id.clone();
                self.graph_index.upsert_collection(collection);
                self.resolver.invalidate_collection(&id);
                InvalidationDelta {
                    wallets: Vec::new(),
                    nfts: Vec::new(),
                    collections: vec![id],
                }
            }
            Mutation::Remove(target) => {
                let delta = self.graph_index.remove(target)?;
                for nft in &delta.nfts {
                    self.resolver.invalidate_nft(nft);
                }
                for collection in &delta.collections {
                    self.resolver.invalidate_collection(collection);
                }
                delta
            }
        };

        let invalidated_loops = self
            .loop_cache
            .invalidate(&invalidation.wallets, &invalidation.nfts);
        if !invalidated_loops.is_empty() {
            warn!(count = invalidated_loops.len(), "loops invalidated by mutation");
        }

        let snapshot = self.graph_index.snapshot();
        let discovery = self.engine.discover(
            &self.tenant,
            DiscoveryParams {
                snapshot: &snapshot,
                resolver: &self.resolver,
                deduper: &self.deduper,
                loop_cache: &self.loop_cache,
                settings: self.config.algorithm,
                scoring: self.config.scoring,
                neutral_efficiency: self.config.neutral_efficiency,
                fairness_imbalance_threshold: self.config.fairness_imbalance_threshold,
                mode: DiscoveryMode::Executable,
                timings: RecentRunTimings::default(),
            },
        );

        Ok(MutationOutcome {
            invalidated_loops,
            discovery: Some(discovery),
        })
    }
}

/// Per-tenant mutation queue. `apply` blocks the caller until the worker
/// thread has processed the mutation and run its follow-up incremental
/// discovery, so callers see a consistent view immediately after the call
/// returns — concurrency is bounded to "one writer per tenant," not "one
/// writer across all tenants."
pub struct MutationPipeline {
    sender: crossbeam_channel::Sender<QueuedItem>,
    tenant: TenantId,
    queue_depth: usize,
    nominal_drain_per_sec: f64,
    _worker: std::thread::JoinHandle<()>,
}

impl MutationPipeline {
    pub fn spawn(
        tenant: TenantId,
        graph_index: Arc<GraphIndex>,
        resolver: Arc<CollectionResolver>,
        deduper: Arc<Deduper>,
        loop_cache: Arc<LoopCache>,
        engine: Arc<DiscoveryEngine>,
        config: TenantConfig,
    ) -> Self {
        let queue_depth = config.mutation_queue_depth;
        let (sender, receiver) = crossbeam_channel::bounded::<QueuedItem>(queue_depth);
        let worker = Worker {
            tenant: tenant.clone(),
            graph_index,
            resolver,
            deduper,
            loop_cache,
            engine,
            config,
        };

        let handle = std::thread::spawn(move || {
            for item in receiver {
                let outcome = worker.apply_one(item.mutation);
                let _ = item.reply.send(outcome);
            }
        });

        Self {
            sender,
            tenant,
            queue_depth,
            nominal_drain_per_sec: 200.0,
            _worker: handle,
        }
    }

    /// Applies one mutation, blocking until the worker thread finishes. On a
    /// full queue, returns `CoreError::Backpressure` with an advisory
    /// retry-after derived from the configured queue depth and a nominal
    /// drain rate, rather than blocking indefinitely.
    pub fn apply(&self, mutation: Mutation) -> CoreResult<MutationOutcome> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        if self
            .sender
            .try_send(QueuedItem {
                mutation,
                reply: reply_tx,
            })
            .is_err()
        {
            let retry_after = Duration::from_secs_f64(self.queue_depth as f64 / self.nominal_drain_per_sec);
            return Err(CoreError::Backpressure {
                tenant: self.tenant.clone(),
                retry_after,
            });
        }
        reply_rx
            .recv()
            .map_err(|_| CoreError::internal("mutation worker terminated unexpectedly"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenantConfig;
    use crate::discovery::AlgorithmPolicy;
    use crate::ids::NftId;
    use crate::model::Nft;

    fn pipeline() -> MutationPipeline {
        let tenant = TenantId::from("t1");
        let config = TenantConfig {
            algorithm: crate::config::AlgorithmSettings {
                min_efficiency: 0.0,
                ..crate::config::AlgorithmSettings::default()
            },
            ..TenantConfig::default()
        };
        MutationPipeline::spawn(
            tenant,
            Arc::new(GraphIndex::new()),
            Arc::new(CollectionResolver::new(100)),
            Arc::new(Deduper::new(64, 0.01)),
            Arc::new(LoopCache::new()),
            Arc::new(DiscoveryEngine::new(AlgorithmPolicy::new(1_000))),
            config,
        )
    }

    #[test]
    fn applies_inventory_mutation_and_runs_discovery() {
        let pipeline = pipeline();
        let outcome = pipeline
            .apply(Mutation::UpsertInventory {
                wallet: WalletId::from("alice"),
                nfts: vec![Nft::new(NftId::from("n1"))],
            })
            .unwrap();
        assert!(outcome.discovery.is_some());
    }

    #[test]
    fn three_party_loop_appears_after_the_third_mutation() {
        let pipeline = pipeline();
        pipeline
            .apply(Mutation::UpsertInventory {
                wallet: WalletId::from("a"),
                nfts: vec![Nft::new(NftId::from("n1"))],
            })
            .unwrap();
        pipeline
            .apply(Mutation::UpsertWants {
                wallet: WalletId::from("a"),
                nft_ids: vec![NftId::from("n2")],
                collection_ids: vec![],
            })
            .unwrap();
        pipeline
            .apply(Mutation::UpsertInventory {
                wallet: WalletId::from("b"),
                nfts: vec![Nft::new(NftId::from("n2"))],
            })
            .unwrap();
        pipeline
            .apply(Mutation::UpsertWants {
                wallet: WalletId::from("b"),
                nft_ids: vec![NftId::from("n3")],
                collection_ids: vec![],
            })
            .unwrap();
        pipeline
            .apply(Mutation::UpsertInventory {
                wallet: WalletId::from("c"),
                nfts: vec![Nft::new(NftId::from("n3"))],
            })
            .unwrap();
        let outcome = pipeline
            .apply(Mutation::UpsertWants {
                wallet: WalletId::from("c"),
                nft_ids: vec![NftId::from("n1")],
                collection_ids: vec![],
            })
            .unwrap();

        let discovery = outcome.discovery.unwrap();
        assert_eq!(discovery.loops.len(), 1);
    }
}
