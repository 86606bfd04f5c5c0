//! Tenant-scoped configuration, per `spec.md` §6. The core never reads env
//! vars or files; boundary code constructs one of these per tenant.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Whether `upsertInventory` may steal an NFT from another wallet's `owned`
/// set, or must reject the move. Default `Reject` (the stricter reading of
/// "fails ... under strict merge policy" in `spec.md` §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    Reject,
    Steal,
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy::Reject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub efficiency: f64,
    pub size: f64,
    pub fairness: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            efficiency: 0.6,
            size: 0.2,
            fairness: 0.2,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> CoreResult<()> {
        let sum = self.efficiency + self.size + self.fairness;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(CoreError::invalid_input(format!(
                "scoring weights must sum to 1.0, got {sum}"
            )));
        }
        if [self.efficiency, self.size, self.fairness]
            .iter()
            .any(|w| *w < 0.0)
        {
            return Err(CoreError::invalid_input("scoring weights must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmSettings {
    pub max_depth: usize,
    pub min_efficiency: f64,
    pub max_results: usize,
    pub timeout_ms: u64,
    pub enable_canonical_discovery: bool,
    pub enable_collection_expansion: bool,
    pub partition_threshold: usize,
    pub expansion_threshold: usize,
}

impl Default for AlgorithmSettings {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_efficiency: 0.6,
            max_results: 100,
            timeout_ms: 30_000,
            enable_canonical_discovery: true,
            enable_collection_expansion: true,
            partition_threshold: 1_000,
            expansion_threshold: 100,
        }
    }
}

impl AlgorithmSettings {
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_depth < 2 {
            return Err(CoreError::invalid_input("algorithm.maxDepth must be >= 2"));
        }
        if !(0.0..=1.0).contains(&self.min_efficiency) {
            return Err(CoreError::invalid_input(
                "algorithm.minEfficiency must be in [0,1]",
            ));
        }
        if self.max_results == 0 {
            return Err(CoreError::invalid_input("algorithm.maxResults must be >= 1"));
        }
        Ok(())
    }
}

/// Second threshold from `spec.md` §4.6: communities at or below this size
/// are processed sequentially; larger ones may run on the rayon pool.
pub const DEFAULT_SEQUENTIAL_COMMUNITY_THRESHOLD: usize = 50;

/// Target false-positive rate for the Deduper's Bloom filter, per `spec.md` §4.7.
pub const DEFAULT_BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// How many hops of neighborhood the `MutationPipeline` includes in an
/// incremental discovery run's scoped subgraph (`spec.md` §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationRadius {
    OneHop,
    TwoHop,
}

impl Default for InvalidationRadius {
    fn default() -> Self {
        InvalidationRadius::OneHop
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TenantConfig {
    pub algorithm: AlgorithmSettings,
    pub scoring: ScoringWeights,
    pub merge_policy: MergePolicy,
    pub invalidation_radius: InvalidationRadius,
    /// Bounded queue depth for the tenant's `MutationPipeline`.
    pub mutation_queue_depth: usize,
    /// Neutral efficiency assigned when a loop's values are all unknown.
    pub neutral_efficiency: f64,
    /// Per-participant imbalance threshold above which `fairness` is penalized.
    pub fairness_imbalance_threshold: f64,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmSettings::default(),
            scoring: ScoringWeights::default(),
            merge_policy: MergePolicy::default(),
            invalidation_radius: InvalidationRadius::default(),
            mutation_queue_depth: 1024,
            neutral_efficiency: 0.5,
            fairness_imbalance_threshold: 0.5,
        }
    }
}

impl TenantConfig {
    pub fn validate(&self) -> CoreResult<()> {
        self.algorithm.validate()?;
        self.scoring.validate()?;
        Ok(())
    }
}

/// Per-call override of the tenant's algorithm settings, per `spec.md` §6's
/// `discover(...)` `settings` field. `None` fields fall back to the tenant
/// config.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiscoverSettings {
    pub max_depth: Option<usize>,
    pub min_efficiency: Option<f64>,
    pub max_results: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub consider_collections: Option<bool>,
}

impl DiscoverSettings {
    pub fn resolve(&self, tenant: &AlgorithmSettings) -> AlgorithmSettings {
        AlgorithmSettings {
            max_depth: self.max_depth.unwrap_or(tenant.max_depth),
            min_efficiency: self.min_efficiency.unwrap_or(tenant.min_efficiency),
            max_results: self.max_results.unwrap_or(tenant.max_results),
            timeout_ms: self.timeout_ms.unwrap_or(tenant.timeout_ms),
            enable_canonical_discovery: tenant.enable_canonical_discovery,
            enable_collection_expansion: self
                .consider_collections
                .unwrap_or(tenant.enable_collection_expansion),
            partition_threshold: tenant.partition_threshold,
            expansion_threshold: tenant.expansion_threshold,
        }
    }
}
