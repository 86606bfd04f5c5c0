//! `TenantRegistry`: the composition root. Replaces the singleton idiom
//! with explicit, boundary-driven tenant creation. See `spec.md` §9's design
//! note and `SPEC_FULL.md` §13.

use std::sync::Arc;

use dashmap::DashMap;

use crate::collection_resolver::CollectionResolver;
use crate::config::{DiscoverSettings, TenantConfig};
use crate::dedup::Deduper;
use crate::discovery::{AlgorithmPolicy, DiscoverResult, DiscoveryEngine, DiscoveryParams, RecentRunTimings};
use crate::error::{CoreError, CoreResult, EntityRef};
use crate::graph_index::GraphIndex;
use crate::ids::TenantId;
use crate::loop_cache::LoopCache;
use crate::model::DiscoveryMode;
use crate::mutation::{Mutation, MutationOutcome, MutationPipeline};

/// Everything one tenant owns. Never shared across tenants; a bug that
/// leaks a handle between tenants is the one cross-tenant isolation defect
/// this type exists to rule out by construction.
pub struct TenantHandle {
    pub config: TenantConfig,
    pub graph_index: Arc<GraphIndex>,
    pub resolver: Arc<CollectionResolver>,
    pub deduper: Arc<Deduper>,
    pub loop_cache: Arc<LoopCache>,
    pub engine: Arc<DiscoveryEngine>,
    pipeline: MutationPipeline,
}

impl TenantHandle {
    pub fn mutate(&self, mutation: Mutation) -> CoreResult<MutationOutcome> {
        self.pipeline.apply(mutation)
    }

    /// Runs a one-off `discover` outside the mutation pipeline (e.g. the
    /// informational "preview" mode of `spec.md` §6, which never writes to
    /// `LoopCache`).
    pub fn discover(
        &self,
        tenant: &TenantId,
        overrides: DiscoverSettings,
        mode: DiscoveryMode,
    ) -> DiscoverResult {
        let snapshot = self.graph_index.snapshot();
        let settings = overrides.resolve(&self.config.algorithm);
        self.engine.discover(
            tenant,
            DiscoveryParams {
                snapshot: &snapshot,
                resolver: &self.resolver,
                deduper: &self.deduper,
                loop_cache: &self.loop_cache,
                settings,
                scoring: self.config.scoring,
                neutral_efficiency: self.config.neutral_efficiency,
                fairness_imbalance_threshold: self.config.fairness_imbalance_threshold,
                mode,
                timings: RecentRunTimings::default(),
            },
        )
    }
}

#[derive(Default)]
pub struct TenantRegistry {
    tenants: DashMap<TenantId, Arc<TenantHandle>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicitly creates a tenant's isolated state. Fails with
    /// `CoreError::Conflict` if the tenant id is already open — there is no
    /// implicit "create on first use."
    pub fn open_tenant(&self, tenant: TenantId, config: TenantConfig) -> CoreResult<()> {
        config.validate()?;
        if self.tenants.contains_key(&tenant) {
            return Err(CoreError::Conflict(EntityRef::Tenant(tenant)));
        }

        let graph_index = Arc::new(GraphIndex::new());
        let resolver = Arc::new(CollectionResolver::new(config.algorithm.expansion_threshold));
        let deduper = Arc::new(Deduper::new(4096, crate::config::DEFAULT_BLOOM_FALSE_POSITIVE_RATE));
        let loop_cache = Arc::new(LoopCache::new());
        let engine = Arc::new(DiscoveryEngine::new(AlgorithmPolicy::new(
            config.algorithm.partition_threshold,
        )));

        let pipeline = MutationPipeline::spawn(
            tenant.clone(),
            graph_index.clone(),
            resolver.clone(),
            deduper.clone(),
            loop_cache.clone(),
            engine.clone(),
            config,
        );

        self.tenants.insert(
            tenant,
            Arc::new(TenantHandle {
                config,
                graph_index,
                resolver,
                deduper,
                loop_cache,
                engine,
                pipeline,
            }),
        );
        Ok(())
    }

    pub fn tenant(&self, tenant: &TenantId) -> CoreResult<Arc<TenantHandle>> {
        self.tenants
            .get(tenant)
            .map(|r| r.clone())
            .ok_or_else(|| CoreError::NotFound(EntityRef::Tenant(tenant.clone())))
    }

    pub fn close_tenant(&self, tenant: &TenantId) -> CoreResult<()> {
        self.tenants
            .remove(tenant)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(EntityRef::Tenant(tenant.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_twice_conflicts() {
        let registry = TenantRegistry::new();
        let tenant = TenantId::from("t1");
        registry.open_tenant(tenant.clone(), TenantConfig::default()).unwrap();
        let err = registry
            .open_tenant(tenant, TenantConfig::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn unknown_tenant_is_not_found() {
        let registry = TenantRegistry::new();
        let err = registry.tenant(&TenantId::from("ghost")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn invalid_config_is_rejected_before_any_state_is_created() {
        let registry = TenantRegistry::new();
        let mut config = TenantConfig::default();
        config.algorithm.max_depth = 1;
        let err = registry
            .open_tenant(TenantId::from("t1"), config)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
        assert!(registry.tenant(&TenantId::from("t1")).is_err());
    }
}
