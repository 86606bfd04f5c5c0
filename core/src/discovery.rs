//! `DiscoveryEngine`: orchestrates one `discover` run end to end — strategy
//! selection, SCC, cycle enumeration, dedup, scoring. See `spec.md` §4.9.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use tracing::{debug, info_span, warn};

use crate::collection_resolver::CollectionResolver;
use crate::config::{AlgorithmSettings, ScoringWeights, DEFAULT_SEQUENTIAL_COMMUNITY_THRESHOLD};
use crate::cycles::{resolve_cycle, CycleEnumerator};
use crate::dedup::Deduper;
use crate::graph_index::GraphSnapshot;
use crate::ids::{RunId, TenantId};
use crate::loop_cache::LoopCache;
use crate::model::{DiscoveryMode, TradeLoop};
use crate::partition::CommunityPartitioner;
use crate::scc::SccFinder;
use crate::scorer::Scorer;
use crate::unified_graph::UnifiedTradeGraph;

/// How many elementary cycles `ProbabilisticSampling` enumerates per sampled
/// component, relative to `maxResults` — a single start vertex's worth of
/// cycles is rarely the full yield, so sampling biases toward breadth
/// (more components, capped depth) over exhaustiveness.
const SAMPLING_FANOUT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SingleJohnson,
    PartitionedLouvain,
    ProbabilisticSampling,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::SingleJohnson => "single_johnson",
            Strategy::PartitionedLouvain => "partitioned_louvain",
            Strategy::ProbabilisticSampling => "probabilistic_sampling",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphStats {
    pub wallet_count: usize,
    pub edge_count: usize,
}

/// Timing of the tenant's most recent run, consulted by the policy so a run
/// that is trending slow escalates to sampling before it times out outright.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecentRunTimings {
    pub last_elapsed_ms: Option<u64>,
}

/// Decides which strategy a run uses. Constructed once per tenant
/// (composition root, not a singleton) and directly unit-testable.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmPolicy {
    pub partition_threshold: usize,
    pub probabilistic_wallet_threshold: usize,
    pub slow_run_threshold_ms: u64,
}

impl AlgorithmPolicy {
    pub fn new(partition_threshold: usize) -> Self {
        Self {
            partition_threshold,
            probabilistic_wallet_threshold: partition_threshold.saturating_mul(20).max(20_000),
            slow_run_threshold_ms: 20_000,
        }
    }

    pub fn select(&self, stats: &GraphStats, timings: &RecentRunTimings) -> Strategy {
        let was_slow = timings
            .last_elapsed_ms
            .map(|ms| ms >= self.slow_run_threshold_ms)
            .unwrap_or(false);
        if stats.wallet_count >= self.probabilistic_wallet_threshold || was_slow {
            Strategy::ProbabilisticSampling
        } else if stats.wallet_count > self.partition_threshold {
            Strategy::PartitionedLouvain
        } else {
            Strategy::SingleJohnson
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub strategy: Option<Strategy>,
    pub wallets_visited: usize,
    pub sccs_found: usize,
    pub cycles_enumerated: usize,
    pub cycles_after_dedup: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoverResult {
    pub run_id: Option<RunId>,
    pub loops: Vec<TradeLoop>,
    pub stats: RunStats,
    pub truncated: bool,
}

/// Everything one `discover` call needs beyond the engine's own policy.
/// Bundled so the call site doesn't thread a dozen positional arguments.
pub struct DiscoveryParams<'a> {
    pub snapshot: &'a GraphSnapshot,
    pub resolver: &'a CollectionResolver,
    pub deduper: &'a Deduper,
    pub loop_cache: &'a LoopCache,
    pub settings: AlgorithmSettings,
    pub scoring: ScoringWeights,
    pub neutral_efficiency: f64,
    pub fairness_imbalance_threshold: f64,
    pub mode: DiscoveryMode,
    pub timings: RecentRunTimings,
}

pub struct DiscoveryEngine {
    pub policy: AlgorithmPolicy,
}

impl DiscoveryEngine {
    pub fn new(policy: AlgorithmPolicy) -> Self {
        Self { policy }
    }

    pub fn discover(&self, tenant: &TenantId, params: DiscoveryParams<'_>) -> DiscoverResult {
        let run_id = RunId::new();
        let span = info_span!("discover", tenant = %tenant, run_id = %run_id);
        let _enter = span.enter();

        let started = Instant::now();
        let deadline = Instant::now() + Duration::from_millis(params.settings.timeout_ms);

        let unified = UnifiedTradeGraph::new(
            params.snapshot,
            params.resolver,
            params.settings.enable_collection_expansion,
        );
        let wallet_graph = unified.wallet_graph();
        let stats = GraphStats {
            wallet_count: wallet_graph.wallet_of.len(),
            edge_count: wallet_graph.graph.edge_count(),
        };
        let strategy = self.policy.select(&stats, &params.timings);
        debug!(strategy = %strategy, wallets = stats.wallet_count, "strategy selected");

        let scorer = Scorer::new(
            params.scoring,
            params.neutral_efficiency,
            params.fairness_imbalance_threshold,
        );

        let mut run_stats = RunStats {
            strategy: Some(strategy),
            wallets_visited: stats.wallet_count,
            ..Default::default()
        };
        let mut truncated = false;
        let mut loops: Vec<TradeLoop> = Vec::new();

        let mut components: Vec<Vec<u32>> = match strategy {
            Strategy::SingleJohnson => {
                let scc = SccFinder::with_timeout(deadline.saturating_duration_since(Instant::now())).find(wallet_graph);
                truncated |= scc.truncated;
                run_stats.sccs_found = scc.components.len();
                scc.components
            }
            Strategy::PartitionedLouvain => {
                let partitioner = CommunityPartitioner {
                    min_wallets_to_partition: params.settings.partition_threshold,
                };
                let partition = partitioner.partition(wallet_graph);
                let communities: Vec<&Vec<u32>> =
                    partition.communities.iter().filter(|c| c.len() >= 2).collect();

                // Large community counts run the per-community SCC pass on
                // the rayon pool; small ones stay sequential since spawning
                // tasks would outweigh the work. Either way the per-community
                // results are sorted back into a deterministic order before
                // cycle enumeration runs, so strategy choice never affects
                // which loops are found.
                let per_community: Vec<(bool, Vec<Vec<u32>>)> =
                    if communities.len() > DEFAULT_SEQUENTIAL_COMMUNITY_THRESHOLD {
                        communities
                            .par_iter()
                            .map(|community| {
                                let finder = SccFinder::with_timeout(
                                    deadline.saturating_duration_since(Instant::now()),
                                );
                                let scc = finder.find_restricted(wallet_graph, community);
                                (scc.truncated, scc.components)
                            })
                            .collect()
                    } else {
                        communities
                            .iter()
                            .map(|community| {
                                let finder = SccFinder::with_timeout(
                                    deadline.saturating_duration_since(Instant::now()),
                                );
                                let scc = finder.find_restricted(wallet_graph, community);
                                (scc.truncated, scc.components)
                            })
                            .collect()
                    };

                let mut all_components = Vec::new();
                for (was_truncated, components) in per_community {
                    truncated |= was_truncated;
                    all_components.extend(components);
                }
                all_components.sort_by_key(|c| c.iter().min().copied().unwrap_or(u32::MAX));
                run_stats.sccs_found = all_components.len();
                all_components
            }
            Strategy::ProbabilisticSampling => {
                let scc = SccFinder::with_timeout(deadline.saturating_duration_since(Instant::now())).find(wallet_graph);
                truncated |= scc.truncated;
                run_stats.sccs_found = scc.components.len();
                let mut non_trivial: Vec<Vec<u32>> =
                    scc.components.into_iter().filter(|c| c.len() >= 2).collect();
                non_trivial.sort_by_key(|c| c.iter().min().copied().unwrap_or(u32::MAX));
                let sample_size = (params.settings.max_results * SAMPLING_FANOUT).max(1);
                if non_trivial.len() > sample_size {
                    warn!(
                        dropped = non_trivial.len() - sample_size,
                        "probabilistic sampling: dropping lower-priority components"
                    );
                    truncated = true;
                    non_trivial.truncate(sample_size);
                }
                non_trivial
            }
        };
        components.retain(|c| c.len() >= 2);

        let remaining_budget = |produced: usize| params.settings.max_results.saturating_sub(produced);

        'components: for component in &components {
            if Instant::now() >= deadline {
                truncated = true;
                break;
            }
            let budget = remaining_budget(loops.len());
            if budget == 0 {
                break;
            }
            let enumerator = CycleEnumerator::new(
                params.settings.max_depth,
                budget.saturating_mul(4).max(16),
                Some(deadline.saturating_duration_since(Instant::now())),
            );
            let result = enumerator.enumerate(wallet_graph, component);
            truncated |= result.truncated;
            run_stats.cycles_enumerated += result.cycles.len();

            for raw in &result.cycles {
                if loops.len() >= params.settings.max_results {
                    break 'components;
                }
                let Some(steps) = resolve_cycle(params.snapshot, wallet_graph, raw) else {
                    continue;
                };
                let id = params.deduper.canonical_id(&steps);
                if params.settings.enable_canonical_discovery
                    && params.deduper.probably_seen(&id)
                    && params.loop_cache.contains(&id)
                {
                    continue;
                }

                let score_result = scorer.score(&steps, params.snapshot);
                if score_result.efficiency < params.settings.min_efficiency {
                    continue;
                }

                let participants = steps.iter().map(|s| s.from.clone()).collect();
                let created_at = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let trade_loop = TradeLoop {
                    canonical_id: id.clone(),
                    steps,
                    participants,
                    score: score_result.score,
                    efficiency: score_result.efficiency,
                    valuation_incomplete: score_result.valuation_incomplete,
                    created_at,
                    version: params.snapshot.version,
                };

                if params.settings.enable_canonical_discovery {
                    params.deduper.record(&id);
                }
                if matches!(params.mode, DiscoveryMode::Executable) {
                    params.loop_cache.insert(trade_loop.clone());
                }
                run_stats.cycles_after_dedup += 1;
                loops.push(trade_loop);
            }
        }

        run_stats.elapsed_ms = started.elapsed().as_millis() as u64;
        DiscoverResult {
            run_id: Some(run_id),
            loops,
            stats: run_stats,
            truncated,
        }
    }
}
