// 4.0: cycle guard. an obligation edge requester→owner means "requester is waiting on owner to
// release an item". a closed loop of such edges lets a ring of users farm points without ever
// settling, so a new request that would close one is vetoed before it is written.
//
// graphs here are immutable snapshots built per check from the active requests. the candidate
// edge is overlaid during the search instead of inserted, so concurrent checks never share state.

use crate::types::{ExchangeId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// 4.1: one active (PENDING/APPROVED) request seen as a dependency between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub exchange_id: ExchangeId,
    pub requester: UserId,
    pub owner: UserId,
}

/// 4.2: directed graph of users, one edge per distinct requester→owner pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObligationGraph {
    adjacency: BTreeMap<UserId, Vec<UserId>>,
}

impl ObligationGraph {
    pub fn from_obligations<'a, I>(obligations: I) -> Self
    where
        I: IntoIterator<Item = &'a Obligation>,
    {
        Self::from_edges(obligations.into_iter().map(|o| (o.requester, o.owner)))
    }

    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (UserId, UserId)>,
    {
        let mut adjacency: BTreeMap<UserId, Vec<UserId>> = BTreeMap::new();
        for (from, to) in edges {
            let targets = adjacency.entry(from).or_default();
            if !targets.contains(&to) {
                targets.push(to);
            }
        }
        Self { adjacency }
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    pub fn node_count(&self) -> usize {
        let mut nodes: BTreeSet<UserId> = self.adjacency.keys().copied().collect();
        nodes.extend(self.adjacency.values().flatten().copied());
        nodes.len()
    }

    pub fn has_edge(&self, from: UserId, to: UserId) -> bool {
        self.adjacency.get(&from).is_some_and(|t| t.contains(&to))
    }

    fn neighbors(&self, node: UserId) -> &[UserId] {
        self.adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Would admitting requester→owner leave a cycle reachable from requester?
    ///
    /// Depth-first from `requester` with the candidate edge overlaid; a node met
    /// again while still on the recursion stack is a cycle. A self-request is never
    /// circular here; ownership checks reject it separately.
    pub fn would_create_cycle(&self, requester: UserId, owner: UserId) -> bool {
        if requester == owner {
            return false;
        }

        let successors = |node: UserId| -> Vec<UserId> {
            let mut next = self.neighbors(node).to_vec();
            if node == requester && !next.contains(&owner) {
                next.push(owner);
            }
            next
        };

        let mut visited: HashSet<UserId> = HashSet::new();
        let mut on_stack: HashSet<UserId> = HashSet::new();
        // (node, its successors, index of the next successor to explore)
        let mut stack: Vec<(UserId, Vec<UserId>, usize)> = Vec::new();

        visited.insert(requester);
        on_stack.insert(requester);
        stack.push((requester, successors(requester), 0));

        while let Some((node, next, idx)) = stack.last_mut() {
            let node = *node;
            if *idx >= next.len() {
                on_stack.remove(&node);
                stack.pop();
                continue;
            }
            let neighbor = next[*idx];
            *idx += 1;

            if on_stack.contains(&neighbor) {
                return true;
            }
            if visited.insert(neighbor) {
                on_stack.insert(neighbor);
                stack.push((neighbor, successors(neighbor), 0));
            }
        }
        false
    }

    /// Every elementary cycle reachable by the audit walk, each rotated to start at
    /// its smallest user id and listed without repeating the first node.
    pub fn find_cycles(&self) -> Vec<Vec<UserId>> {
        let mut found: BTreeSet<Vec<UserId>> = BTreeSet::new();
        let mut visited: HashSet<UserId> = HashSet::new();

        for &start in self.adjacency.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut path: Vec<UserId> = Vec::new();
            self.collect_cycles(start, &mut path, &mut visited, &mut found);
        }
        found.into_iter().collect()
    }

    fn collect_cycles(
        &self,
        node: UserId,
        path: &mut Vec<UserId>,
        visited: &mut HashSet<UserId>,
        found: &mut BTreeSet<Vec<UserId>>,
    ) {
        if let Some(pos) = path.iter().position(|&n| n == node) {
            found.insert(canonical_cycle(&path[pos..]));
            return;
        }
        if !visited.insert(node) {
            return;
        }
        path.push(node);
        for &next in self.neighbors(node) {
            self.collect_cycles(next, path, visited, found);
        }
        path.pop();
    }
}

fn canonical_cycle(cycle: &[UserId]) -> Vec<UserId> {
    let min_pos = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[min_pos..].iter().chain(&cycle[..min_pos]).copied().collect()
}
