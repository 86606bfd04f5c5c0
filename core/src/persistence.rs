//! `PersistenceAdapter`: the seam `spec.md` §6 leaves external. This module
//! only supplies the trait plus an in-memory implementation for tests and
//! the CLI demo; a real database-backed adapter is out of scope (`spec.md` §1).

use dashmap::DashMap;

use crate::error::CoreResult;
use crate::ids::TenantId;
use crate::model::{Collection, Nft, TradeLoop, Wallet};

#[derive(Debug, Clone, Default)]
pub struct TenantSnapshot {
    pub wallets: Vec<Wallet>,
    pub nfts: Vec<Nft>,
    pub collections: Vec<Collection>,
    pub active_loops: Vec<TradeLoop>,
}

/// Boundary trait a real deployment implements against a database. `core`
/// never calls this itself; `TenantRegistry`/`cli` call it at startup and
/// shutdown to hydrate and persist state.
pub trait PersistenceAdapter: Send + Sync {
    fn load_tenant(&self, tenant: &TenantId) -> CoreResult<Option<TenantSnapshot>>;
    fn save_wallets(&self, tenant: &TenantId, wallets: &[Wallet]) -> CoreResult<()>;
    fn save_active_loops(&self, tenant: &TenantId, loops: &[TradeLoop]) -> CoreResult<()>;
}

/// Reference implementation: holds everything in a `DashMap`, nothing ever
/// touches disk. Used by `core`'s own tests and by the `cli` crate's demo
/// scenario runner.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    tenants: DashMap<TenantId, TenantSnapshot>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceAdapter for InMemoryPersistence {
    fn load_tenant(&self, tenant: &TenantId) -> CoreResult<Option<TenantSnapshot>> {
        Ok(self.tenants.get(tenant).map(|r| r.clone()))
    }

    fn save_wallets(&self, tenant: &TenantId, wallets: &[Wallet]) -> CoreResult<()> {
        let mut entry = self.tenants.entry(tenant.clone()).or_default();
        entry.wallets = wallets.to_vec();
        Ok(())
    }

    fn save_active_loops(&self, tenant: &TenantId, loops: &[TradeLoop]) -> CoreResult<()> {
        let mut entry = self.tenants.entry(tenant.clone()).or_default();
        entry.active_loops = loops.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WalletId;

    #[test]
    fn round_trips_saved_wallets() {
        let adapter = InMemoryPersistence::new();
        let tenant = TenantId::from("t1");
        let wallets = vec![Wallet::new(WalletId::from("alice"))];
        adapter.save_wallets(&tenant, &wallets).unwrap();

        let loaded = adapter.load_tenant(&tenant).unwrap().unwrap();
        assert_eq!(loaded.wallets.len(), 1);
    }

    #[test]
    fn unknown_tenant_loads_as_none() {
        let adapter = InMemoryPersistence::new();
        assert!(adapter.load_tenant(&TenantId::from("ghost")).unwrap().is_none());
    }
}
