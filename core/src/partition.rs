//! `CommunityPartitioner`: Louvain modularity partitioning used to shard
//! very large graphs before SCC, per `spec.md` §4.6.
//!
//! No crate in the example pack supplies Louvain directly, so this is a
//! direct implementation (Blondel et al., 2008) over the undirected
//! projection (union of in/out edges) of the wallet graph — the standard
//! formulation for directed want-graphs where what matters for sharding is
//! "these wallets interact," not edge direction.

use std::collections::HashMap;

use crate::unified_graph::WalletGraph;

const MAX_PASSES: usize = 20;
const MIN_MODULARITY_GAIN: f64 = 1e-6;

#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub communities: Vec<Vec<u32>>,
}

/// Compact undirected weighted graph used internally by the Louvain passes.
struct WeightedGraph {
    /// node -> (neighbor -> weight)
    adjacency: Vec<HashMap<u32, f64>>,
    /// Sum of all edge weights incident to each node (including self-loops
    /// counted twice), i.e. node degree.
    degree: Vec<f64>,
    total_weight: f64,
}

impl WeightedGraph {
    fn from_wallet_graph(graph: &WalletGraph) -> Self {
        let n = graph.wallet_of.len();
        let mut adjacency: Vec<HashMap<u32, f64>> = vec![HashMap::new(); n];
        for a in 0..n as u32 {
            for b in graph
                .graph
                .neighbors_directed(a, petgraph::Direction::Outgoing)
            {
                if a == b {
                    *adjacency[a as usize].entry(a).or_insert(0.0) += 2.0;
                    continue;
                }
                *adjacency[a as usize].entry(b).or_insert(0.0) += 1.0;
                *adjacency[b as usize].entry(a).or_insert(0.0) += 1.0;
            }
        }
        let degree: Vec<f64> = adjacency.iter().map(|m| m.values().sum()).collect();
        let total_weight = degree.iter().sum::<f64>() / 2.0;
        Self {
            adjacency,
            degree,
            total_weight,
        }
    }

    fn aggregate(&self, assignment: &[u32], num_communities: usize) -> Self {
        let mut adjacency: Vec<HashMap<u32, f64>> = vec![HashMap::new(); num_communities];
        for (node, neighbors) in self.adjacency.iter().enumerate() {
            let c_node = assignment[node];
            for (&neighbor, &weight) in neighbors {
                let c_neighbor = assignment[neighbor as usize];
                if c_node == c_neighbor {
                    *adjacency[c_node as usize].entry(c_node).or_insert(0.0) += weight / 2.0;
                } else {
                    *adjacency[c_node as usize].entry(c_neighbor).or_insert(0.0) += weight / 2.0;
                }
            }
        }
        let degree: Vec<f64> = adjacency.iter().map(|m| m.values().sum()).collect();
        Self {
            adjacency,
            degree,
            total_weight: self.total_weight,
        }
    }
}

pub struct CommunityPartitioner {
    /// Only partition graphs with more wallets than this (`spec.md` §4.9
    /// calls this `partitionThreshold`; callers decide whether to invoke
    /// the partitioner at all — this struct just implements Louvain).
    pub min_wallets_to_partition: usize,
}

impl Default for CommunityPartitioner {
    fn default() -> Self {
        Self {
            min_wallets_to_partition: 1_000,
        }
    }
}

impl CommunityPartitioner {
    /// One Louvain local-moving pass over `g`, given an initial
    /// one-node-per-community assignment. Returns the refined assignment
    /// and whether modularity improved at all.
    fn local_moving_pass(g: &WeightedGraph) -> (Vec<u32>, bool) {
        let n = g.adjacency.len();
        let mut assignment: Vec<u32> = (0..n as u32).collect();
        let mut community_degree: Vec<f64> = g.degree.clone();
        let two_m = 2.0 * g.total_weight;
        if two_m <= 0.0 {
            return (assignment, false);
        }

        let mut improved_any = false;
        let mut improved = true;
        let mut passes = 0;
        while improved && passes < MAX_PASSES {
            improved = false;
            passes += 1;
            for node in 0..n {
                let node = node as u32;
                let current_community = assignment[node as usize];
                let node_degree = g.degree[node as usize];

                // Weight from `node` into each neighboring community.
                let mut weight_to_community: HashMap<u32, f64> = HashMap::new();
                for (&neighbor, &w) in &g.adjacency[node as usize] {
                    if neighbor == node {
                        continue;
                    }
                    *weight_to_community
                        .entry(assignment[neighbor as usize])
                        .or_insert(0.0) += w;
                }

                // Remove node from its current community before evaluating moves.
                community_degree[current_community as usize] -= node_degree;

                let base_gain = |comm: u32, w_to: f64| -> f64 {
                    let sigma_tot = community_degree[comm as usize];
                    w_to - sigma_tot * node_degree / two_m
                };

                let mut best_community = current_community;
                let mut best_gain = base_gain(
                    current_community,
                    *weight_to_community.get(&current_community).unwrap_or(&0.0),
                );

                let mut candidates: Vec<(u32, f64)> = weight_to_community.into_iter().collect();
                candidates.sort_unstable_by_key(|(c, _)| *c);
                for (community, w_to) in candidates {
                    let gain = base_gain(community, w_to);
                    if gain > best_gain + 1e-12
                        || (gain > best_gain - 1e-12 && community < best_community)
                    {
                        best_gain = gain;
                        best_community = community;
                    }
                }

                community_degree[best_community as usize] += node_degree;
                if best_community != current_community {
                    assignment[node as usize] = best_community;
                    improved = true;
                    improved_any = true;
                }
            }
        }

        (assignment, improved_any)
    }

    /// Runs Louvain to convergence and returns the final wallet-index
    /// communities. Deterministic: nodes and communities are always
    /// iterated/compared in ascending numeric order.
    pub fn partition(&self, graph: &WalletGraph) -> Partition {
        let n = graph.wallet_of.len();
        if n == 0 {
            return Partition::default();
        }

        let mut g = WeightedGraph::from_wallet_graph(graph);
        // node_of_original[i] = original wallet index represented by
        // aggregated node i at the current level.
        let mut node_members: Vec<Vec<u32>> = (0..n as u32).map(|i| vec![i]).collect();

        loop {
            let (assignment, improved) = Self::local_moving_pass(&g);
            if !improved {
                break;
            }

            let mut relabel: HashMap<u32, u32> = HashMap::new();
            let mut next_id = 0u32;
            let mut remapped = vec![0u32; assignment.len()];
            for (i, &c) in assignment.iter().enumerate() {
                let id = *relabel.entry(c).or_insert_with(|| {
                    let id = next_id;
                    next_id += 1;
                    id
                });
                remapped[i] = id;
            }

            let mut new_members: Vec<Vec<u32>> = vec![Vec::new(); next_id as usize];
            for (i, members) in node_members.iter().enumerate() {
                new_members[remapped[i] as usize].extend(members.iter().copied());
            }

            if next_id as usize == node_members.len() {
                // No communities merged this round; stop to avoid looping.
                node_members = new_members;
                break;
            }

            let modularity_before = Self::modularity(&g, &(0..g.adjacency.len() as u32).collect::<Vec<_>>());
            let _ = modularity_before; // kept for clarity; convergence is driven by `improved` + merge count above.

            g = g.aggregate(&remapped, next_id as usize);
            node_members = new_members;

            if g.adjacency.len() <= 1 {
                break;
            }
        }

        let mut communities: Vec<Vec<u32>> = node_members
            .into_iter()
            .map(|mut members| {
                members.sort_unstable();
                members
            })
            .filter(|m| !m.is_empty())
            .collect();
        communities.sort_unstable_by_key(|c| c[0]);
        Partition { communities }
    }

    fn modularity(g: &WeightedGraph, assignment: &[u32]) -> f64 {
        let two_m = 2.0 * g.total_weight;
        if two_m <= 0.0 {
            return 0.0;
        }
        let mut q = 0.0;
        for (i, neighbors) in g.adjacency.iter().enumerate() {
            for (&j, &w) in neighbors {
                if assignment[i] == assignment[j as usize] {
                    q += w - (g.degree[i] * g.degree[j as usize]) / two_m;
                }
            }
        }
        q / two_m
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

    fn two_disjoint_triangles() -> GraphIndex {
        let index = GraphIndex::new();
        for (owner, owned, wanted) in [
            ("a1", "x1", "x2"),
            ("a2", "x2", "x3"),
            ("a3", "x3", "x1"),
            ("b1", "y1", "y2"),
            ("b2", "y2", "y3"),
            ("b3", "y3", "y1"),
        ] {
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
    fn separates_two_disjoint_triangles() {
        let index = two_disjoint_triangles();
        let snapshot = index.snapshot();
        let resolver = CollectionResolver::new(100);
        let unified = UnifiedTradeGraph::new(&snapshot, &resolver, true);
        let wg = unified.wallet_graph();

        let partitioner = CommunityPartitioner::default();
        let partition = partitioner.partition(wg);

        assert!(partition.communities.len() >= 2);
        // Every community should be internally homogeneous: a1/a2/a3 never
        // split across the boundary of b1/b2/b3.
        let wallet_label = |idx: u32| -> char {
            wg.wallet_id(idx).as_str().chars().next().unwrap()
        };
        for community in &partition.communities {
            let labels: std::collections::HashSet<char> =
                community.iter().map(|&i| wallet_label(i)).collect();
            assert_eq!(labels.len(), 1, "community mixed prefixes: {community:?}");
        }
    }
}
