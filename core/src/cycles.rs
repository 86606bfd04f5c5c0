//! `CycleEnumerator`: Johnson's elementary-cycle algorithm applied per SCC,
//! bounded by depth and time, plus the secondary NFT-choice resolver for
//! edges with more than one candidate. See `spec.md` §4.5.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::graph_index::GraphSnapshot;
use crate::ids::NftId;
use crate::model::Edge;
use crate::unified_graph::WalletGraph;

/// One raw elementary cycle: a sequence of wallet indices, rotated to start
/// at the lexicographically (numerically, since indices are assigned in
/// sorted wallet-id order) smallest member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCycle {
    pub nodes: Vec<u32>,
}

impl RawCycle {
    fn canonical_rotation(mut nodes: Vec<u32>) -> Self {
        if let Some((min_pos, _)) = nodes.iter().enumerate().min_by_key(|(_, n)| **n) {
            nodes.rotate_left(min_pos);
        }
        Self { nodes }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnumerationResult {
    pub cycles: Vec<RawCycle>,
    pub truncated: bool,
}

pub struct CycleEnumerator {
    pub max_depth: usize,
    pub max_loops: usize,
    pub deadline: Option<Instant>,
}

impl CycleEnumerator {
    pub fn new(max_depth: usize, max_loops: usize, timeout: Option<Duration>) -> Self {
        Self {
            max_depth,
            max_loops,
            deadline: timeout.map(|d| Instant::now() + d),
        }
    }

    fn deadline_hit(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Enumerates elementary cycles within `component` (a set of wallet
    /// indices forming one SCC), restricted to edges of `graph`.
    pub fn enumerate(&self, graph: &WalletGraph, component: &[u32]) -> EnumerationResult {
        let mut members: Vec<u32> = component.to_vec();
        members.sort_unstable();

        if members.len() < 2 {
            return EnumerationResult::default();
        }

        let member_set: HashSet<u32> = members.iter().copied().collect();
        let adjacency = Self::induced_adjacency(graph, &member_set);

        let mut cycles = Vec::new();
        let mut truncated = false;

        // Johnson's algorithm processes one start vertex at a time against
        // the subgraph induced on {start} union {v > start}, recomputing
        // the strongly connected component containing `start` within that
        // shrinking subgraph each iteration.
        'starts: for (pos, &start) in members.iter().enumerate() {
            if self.deadline_hit() || cycles.len() >= self.max_loops {
                truncated = true;
                break;
            }
            let remaining: HashSet<u32> = members[pos..].iter().copied().collect();
            let sub_scc = Self::least_scc_containing(&adjacency, &remaining, start);
            if sub_scc.len() < 2 {
                continue 'starts;
            }

            let mut blocked: HashSet<u32> = HashSet::new();
            let mut block_map: HashMap<u32, HashSet<u32>> = HashMap::new();
            let mut stack: Vec<u32> = Vec::new();
            let mut hit_limits = false;

            self.circuit(
                start,
                start,
                &adjacency,
                &sub_scc,
                &mut blocked,
                &mut block_map,
                &mut stack,
                &mut cycles,
                &mut hit_limits,
            );
            if hit_limits {
                truncated = true;
                break 'starts;
            }
        }

        EnumerationResult { cycles, truncated }
    }

    fn induced_adjacency(graph: &WalletGraph, members: &HashSet<u32>) -> HashMap<u32, Vec<u32>> {
        let mut adjacency: HashMap<u32, Vec<u32>> = HashMap::new();
        for &node in members {
            let mut out: Vec<u32> = graph
                .graph
                .neighbors_directed(node, petgraph::Direction::Outgoing)
                .filter(|n| members.contains(n))
                .collect();
            out.sort_unstable();
            adjacency.insert(node, out);
        }
        adjacency
    }

    /// Smallest-indexed SCC of the subgraph induced on `universe` that
    /// contains `start` — a tiny local Tarjan pass, recomputed per start
    /// vertex per classic Johnson's algorithm.
    fn least_scc_containing(
        adjacency: &HashMap<u32, Vec<u32>>,
        universe: &HashSet<u32>,
        start: u32,
    ) -> HashSet<u32> {
        let mut index_of: HashMap<u32, u32> = HashMap::new();
        let mut lowlink: HashMap<u32, u32> = HashMap::new();
        let mut on_stack: HashSet<u32> = HashSet::new();
        let mut stack: Vec<u32> = Vec::new();
        let mut next_index = 0u32;
        let mut components: Vec<Vec<u32>> = Vec::new();

        let mut ordered: Vec<u32> = universe.iter().copied().collect();
        ordered.sort_unstable();

        for &root in &ordered {
            if index_of.contains_key(&root) {
                continue;
            }
            let mut work: Vec<(u32, usize)> = vec![(root, 0)];
            while let Some(&(node, cursor)) = work.last() {
                if !index_of.contains_key(&node) {
                    index_of.insert(node, next_index);
                    lowlink.insert(node, next_index);
                    next_index += 1;
                    stack.push(node);
                    on_stack.insert(node);
                }
                let neighbors = adjacency.get(&node).cloned().unwrap_or_default();
                let neighbors: Vec<u32> = neighbors
                    .into_iter()
                    .filter(|n| universe.contains(n))
                    .collect();

                if cursor < neighbors.len() {
                    let next = neighbors[cursor];
                    work.last_mut().unwrap().1 += 1;
                    if !index_of.contains_key(&next) {
                        work.push((next, 0));
                    } else if on_stack.contains(&next) {
                        let candidate = index_of[&next];
                        let entry = lowlink.get_mut(&node).unwrap();
                        if candidate < *entry {
                            *entry = candidate;
                        }
                    }
                } else {
                    work.pop();
                    let node_low = lowlink[&node];
                    if let Some(&(parent, _)) = work.last() {
                        let parent_low = lowlink[&parent];
                        if node_low < parent_low {
                            lowlink.insert(parent, node_low);
                        }
                    }
                    if node_low == index_of[&node] {
                        let mut component = Vec::new();
                        loop {
                            let w = stack.pop().expect("closed node was pushed");
                            on_stack.remove(&w);
                            component.push(w);
                            if w == node {
                                break;
                            }
                        }
                        components.push(component);
                    }
                }
            }
        }

        components
            .into_iter()
            .find(|c| c.contains(&start))
            .map(|c| c.into_iter().collect())
            .unwrap_or_default()
    }

    /// Returns whether a cycle back to `start` was found through `v`.
    /// `truncated` is set and short-circuits the search once `max_loops` or
    /// the deadline is hit.
    #[allow(clippy::too_many_arguments)]
    fn circuit(
        &self,
        v: u32,
        start: u32,
        adjacency: &HashMap<u32, Vec<u32>>,
        scc: &HashSet<u32>,
        blocked: &mut HashSet<u32>,
        block_map: &mut HashMap<u32, HashSet<u32>>,
        stack: &mut Vec<u32>,
        cycles: &mut Vec<RawCycle>,
        truncated: &mut bool,
    ) -> bool {
        if *truncated || stack.len() >= self.max_depth {
            return false;
        }
        if self.deadline_hit() {
            *truncated = true;
            return false;
        }

        stack.push(v);
        blocked.insert(v);
        let mut found_cycle = false;

        let neighbors = adjacency.get(&v).cloned().unwrap_or_default();
        for w in neighbors {
            if *truncated {
                break;
            }
            if !scc.contains(&w) {
                continue;
            }
            if w == start {
                cycles.push(RawCycle::canonical_rotation(stack.clone()));
                found_cycle = true;
                if cycles.len() >= self.max_loops {
                    *truncated = true;
                    break;
                }
            } else if !blocked.contains(&w) {
                let sub_found = self.circuit(
                    w, start, adjacency, scc, blocked, block_map, stack, cycles, truncated,
                );
                if sub_found {
                    found_cycle = true;
                }
            }
        }

        if found_cycle {
            Self::unblock(v, blocked, block_map);
        } else {
            for w in adjacency.get(&v).cloned().unwrap_or_default() {
                if scc.contains(&w) {
                    block_map.entry(w).or_default().insert(v);
                }
            }
        }
        stack.pop();
        found_cycle
    }

    fn unblock(u: u32, blocked: &mut HashSet<u32>, block_map: &mut HashMap<u32, HashSet<u32>>) {
        blocked.remove(&u);
        if let Some(dependents) = block_map.remove(&u) {
            for w in dependents {
                if blocked.contains(&w) {
                    Self::unblock(w, blocked, block_map);
                }
            }
        }
    }
}

/// Picks the candidate NFT minimizing value imbalance across a set of
/// alternatives for one edge, tie-broken by lexicographic NFT id. Used both
/// for collection edges (several members owned by `from`) and for wallet
/// pairs connected by more than one specific-want edge (`SPEC_FULL.md` §6).
pub fn resolve_edge_choice(snapshot: &GraphSnapshot, candidates: &[NftId]) -> NftId {
    if candidates.len() == 1 {
        return candidates[0].clone();
    }

    let values: Vec<(NftId, Option<f64>)> = candidates
        .iter()
        .map(|id| (id.clone(), snapshot.nft(id).and_then(|n| n.estimated_value)))
        .collect();

    let known: Vec<f64> = values.iter().filter_map(|(_, v)| *v).collect();
    if known.is_empty() {
        return values.iter().map(|(id, _)| id).min().unwrap().clone();
    }
    let mean = known.iter().sum::<f64>() / known.len() as f64;

    let mut best: Option<(NftId, f64)> = None;
    for (id, value) in values {
        let imbalance = value.map(|v| (v - mean).abs()).unwrap_or(f64::MAX);
        best = Some(match best {
            None => (id, imbalance),
            Some((best_id, best_imb)) => {
                if imbalance < best_imb || (imbalance == best_imb && id < best_id) {
                    (id, imbalance)
                } else {
                    (best_id, best_imb)
                }
            }
        });
    }
    best.unwrap().0
}

/// Resolves every step of a raw node cycle into a concrete `(from, to, nft)`
/// choice, using `graph.edges` to find the candidate(s) for each hop.
pub fn resolve_cycle(
    snapshot: &GraphSnapshot,
    graph: &WalletGraph,
    cycle: &RawCycle,
) -> Option<Vec<crate::model::TradeStep>> {
    let n = cycle.nodes.len();
    let mut steps = Vec::with_capacity(n);
    for i in 0..n {
        let from_idx = cycle.nodes[i];
        let to_idx = cycle.nodes[(i + 1) % n];
        let edges = graph.edges.get(&(from_idx, to_idx))?;
        let candidates: Vec<NftId> = edges
            .iter()
            .flat_map(|e| match e {
                Edge::Specific { nft, .. } => vec![nft.clone()],
                Edge::Collection { candidates, .. } => candidates.clone(),
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let nft = resolve_edge_choice(snapshot, &candidates);
        steps.push(crate::model::TradeStep {
            from: graph.wallet_id(from_idx).clone(),
            to: graph.wallet_id(to_idx).clone(),
            nft,
        });
    }
    Some(steps)
}
