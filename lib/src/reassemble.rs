// Copyright 2024 The Chronicle Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Reconstruction of ancestor/descendant links among a sparse result set.
//!
//! A filtered page usually names parents that were filtered out, so its
//! records don't connect to each other. This pass derives, for each record,
//! its nearest ancestors and descendants *within* the result set and
//! materializes them as pseudo-edges, bridging any number of filtered-out
//! changesets in between.

use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::trace;

use crate::page::HistoryPage;
use crate::store::{ChangesetId, ChangesetNode, ChangesetStore, StoreResult};

/// Dagnode fetch cache shared across one reassembly call. Never outlives the
/// call; every call rebuilds its own.
struct NodeCache<'a> {
    store: &'a dyn ChangesetStore,
    nodes: HashMap<ChangesetId, ChangesetNode>,
}

impl<'a> NodeCache<'a> {
    fn new(store: &'a dyn ChangesetStore) -> Self {
        NodeCache {
            store,
            nodes: HashMap::new(),
        }
    }

    fn insert(&mut self, node: ChangesetNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    fn get(&mut self, id: &ChangesetId) -> StoreResult<&ChangesetNode> {
        let store = self.store;
        match self.nodes.entry(id.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(store.changeset(id)?)),
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct ProbeItem {
    generation: i32,
    id: ChangesetId,
}

/// Whether `target` is an ancestor of the node whose parents are given.
///
/// Walks toward ancestors, highest generation first, pruning any branch that
/// drops to or below the target's generation (nothing there can still reach
/// it) and any branch that hits an already-summarized node (its known
/// ancestors stand in for the whole subgraph).
fn probe_ancestry(
    cache: &mut NodeCache,
    known: &HashMap<ChangesetId, HashSet<ChangesetId>>,
    from_parents: &[ChangesetId],
    target: &ChangesetId,
    target_generation: i32,
) -> StoreResult<bool> {
    let mut queue = BinaryHeap::new();
    let mut queued: HashSet<ChangesetId> = HashSet::new();
    for parent_id in from_parents {
        if queued.insert(parent_id.clone()) {
            let generation = cache.get(parent_id)?.generation;
            queue.push(ProbeItem {
                generation,
                id: parent_id.clone(),
            });
        }
    }
    while let Some(ProbeItem { generation, id }) = queue.pop() {
        if id == *target {
            return Ok(true);
        }
        if let Some(ancestors) = known.get(&id) {
            if ancestors.contains(target) {
                return Ok(true);
            }
            continue;
        }
        if generation <= target_generation {
            continue;
        }
        let parent_ids: Vec<ChangesetId> = cache.get(&id)?.parents.to_vec();
        for parent_id in parent_ids {
            if queued.insert(parent_id.clone()) {
                let generation = cache.get(&parent_id)?.generation;
                queue.push(ProbeItem {
                    generation,
                    id: parent_id,
                });
            }
        }
    }
    Ok(false)
}

/// Derives pseudo-parent edges within `page` and, when `prior_known_ids`
/// (oldest to newest) names records returned on earlier pages, pseudo-child
/// edges from this page's records to those.
///
/// Processing requires descending-generation order; the incoming order is
/// put back afterwards when `restore_order` is set. Any store failure aborts
/// the whole call; no partial edge set is kept quiet.
pub fn reassemble_page(
    store: &dyn ChangesetStore,
    page: &mut HistoryPage,
    prior_known_ids: &[ChangesetId],
    restore_order: bool,
) -> StoreResult<()> {
    if page.is_empty() {
        return Ok(());
    }
    let original_order = page.ids();
    page.sort_by_generation_desc();

    let mut cache = NodeCache::new(store);
    // Page records double as dagnodes; seed the cache so probes don't
    // refetch them.
    for record in page.records() {
        cache.insert(ChangesetNode {
            id: record.id.clone(),
            revno: record.revno,
            generation: record.generation,
            parents: record.parents.keys().cloned().collect(),
        });
    }

    // Known-parents cache: for each processed node, every result-set id
    // certain to be reachable from it. Discarded with this call.
    let mut known: HashMap<ChangesetId, HashSet<ChangesetId>> = HashMap::new();

    let info: Vec<(ChangesetId, u32, i32)> = page
        .records()
        .iter()
        .map(|record| (record.id.clone(), record.revno, record.generation))
        .collect();
    let n = info.len();

    // Pass 1: link the page to itself, oldest record first, so that each
    // record only ever probes toward already-summarized nodes. Candidates
    // are scanned nearest generation first; a candidate already known to be
    // transitively reachable is skipped, which is what keeps every edge a
    // *nearest*-ancestor edge.
    for i in (0..n).rev() {
        let mut ancestors: HashSet<ChangesetId> = HashSet::new();
        let own_parents: Vec<ChangesetId> =
            page.records()[i].parents.keys().cloned().collect();
        for (candidate_id, candidate_revno, candidate_generation) in &info[i + 1..] {
            if ancestors.contains(candidate_id) {
                continue;
            }
            let direct = page.records()[i].parents.contains_key(candidate_id);
            let matched = direct
                || probe_ancestry(
                    &mut cache,
                    &known,
                    &own_parents,
                    candidate_id,
                    *candidate_generation,
                )?;
            if matched {
                page.records_mut()[i]
                    .pseudo_parents
                    .insert(candidate_id.clone(), *candidate_revno);
                ancestors.insert(candidate_id.clone());
                if let Some(candidate_ancestors) = known.get(candidate_id) {
                    ancestors.extend(candidate_ancestors.iter().cloned());
                }
            }
        }
        known.insert(info[i].0.clone(), ancestors);
    }

    // Pass 2: link earlier pages to this one. Pagination moves toward
    // ancestors, so prior ids are potential descendants of this page; a
    // match lands as a pseudo-child edge on the page record (prior records
    // were already delivered and can't be amended).
    let mut processed_priors: Vec<ChangesetId> = vec![];
    for prior_id in prior_known_ids {
        if known.contains_key(prior_id) {
            continue;
        }
        let prior = cache.get(prior_id)?.clone();
        let mut ancestors: HashSet<ChangesetId> = HashSet::new();
        let prior_parents: Vec<ChangesetId> = prior.parents.to_vec();

        // Nearer priors first: they summarize everything below them, so a
        // record reachable only through another prior never gets a second,
        // redundant edge.
        for candidate_id in processed_priors.iter().rev() {
            if ancestors.contains(candidate_id) {
                continue;
            }
            let candidate_generation = cache.get(candidate_id)?.generation;
            let matched = prior_parents.contains(candidate_id)
                || probe_ancestry(
                    &mut cache,
                    &known,
                    &prior_parents,
                    candidate_id,
                    candidate_generation,
                )?;
            if matched {
                ancestors.insert(candidate_id.clone());
                if let Some(candidate_ancestors) = known.get(candidate_id) {
                    ancestors.extend(candidate_ancestors.iter().cloned());
                }
            }
        }

        for (index, (candidate_id, _, candidate_generation)) in info.iter().enumerate() {
            // Once every remaining record is a known ancestor, nothing
            // further can produce an edge.
            if info[index..]
                .iter()
                .all(|(id, _, _)| ancestors.contains(id))
            {
                break;
            }
            if ancestors.contains(candidate_id) {
                continue;
            }
            let matched = prior_parents.contains(candidate_id)
                || probe_ancestry(
                    &mut cache,
                    &known,
                    &prior_parents,
                    candidate_id,
                    *candidate_generation,
                )?;
            if matched {
                page.records_mut()[index]
                    .pseudo_children
                    .insert(prior.id.clone(), prior.revno);
                ancestors.insert(candidate_id.clone());
                if let Some(candidate_ancestors) = known.get(candidate_id) {
                    ancestors.extend(candidate_ancestors.iter().cloned());
                }
            }
        }
        known.insert(prior_id.clone(), ancestors);
        processed_priors.push(prior_id.clone());
    }

    let parent_edges: usize = page
        .records()
        .iter()
        .map(|record| record.pseudo_parents.len())
        .sum();
    let child_edges: usize = page
        .records()
        .iter()
        .map(|record| record.pseudo_children.len())
        .sum();
    trace!(parent_edges, child_edges, "reassembled result graph");

    if restore_order {
        page.restore_order(&original_order);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::mem_store::MemChangesetStore;
    use crate::page::ResultRecord;

    fn id(name: &str) -> ChangesetId {
        ChangesetId::new(name)
    }

    fn page_for(store: &MemChangesetStore, ids: &[&str]) -> HistoryPage {
        let records = ids
            .iter()
            .map(|name| {
                let node = store.changeset(&id(name)).unwrap();
                let mut parents = IndexMap::new();
                for parent_id in &node.parents {
                    let parent = store.changeset(parent_id).unwrap();
                    parents.insert(parent_id.clone(), parent.revno);
                }
                ResultRecord::new(&node, parents)
            })
            .collect();
        HistoryPage::new(records)
    }

    fn pseudo_parents(page: &HistoryPage, name: &str) -> Vec<(ChangesetId, u32)> {
        let record = page
            .records()
            .iter()
            .find(|record| record.id == id(name))
            .unwrap();
        record
            .pseudo_parents
            .iter()
            .map(|(id, revno)| (id.clone(), *revno))
            .collect()
    }

    #[test]
    fn test_bridges_single_filtered_node() {
        // R (gen 1) <- A (gen 2) <- B (gen 3), filtered to {R, B}.
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        store.add_changeset("a", &["r"]).unwrap();
        store.add_changeset("b", &["a"]).unwrap();

        let mut page = page_for(&store, &["b", "r"]);
        reassemble_page(&store, &mut page, &[], true).unwrap();

        assert_eq!(pseudo_parents(&page, "b"), vec![(id("r"), 1)]);
        assert_eq!(pseudo_parents(&page, "r"), vec![]);
    }

    #[test]
    fn test_bridges_three_generations() {
        // Ancestor three generations removed through two filtered-out
        // intermediates: exactly one pseudo-parent edge must appear.
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        store.add_changeset("i1", &["r"]).unwrap();
        store.add_changeset("i2", &["i1"]).unwrap();
        store.add_changeset("x", &["i2"]).unwrap();

        let mut page = page_for(&store, &["x", "r"]);
        reassemble_page(&store, &mut page, &[], true).unwrap();

        assert_eq!(pseudo_parents(&page, "x"), vec![(id("r"), 1)]);
    }

    #[test]
    fn test_nearest_ancestor_only() {
        // Chain r <- .. <- m <- .. <- x with {r, m, x} in the page: x links
        // to m, m links to r, and x gets no duplicate edge to r.
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        store.add_changeset("f1", &["r"]).unwrap();
        store.add_changeset("m", &["f1"]).unwrap();
        store.add_changeset("f2", &["m"]).unwrap();
        store.add_changeset("x", &["f2"]).unwrap();

        let mut page = page_for(&store, &["x", "m", "r"]);
        reassemble_page(&store, &mut page, &[], true).unwrap();

        assert_eq!(pseudo_parents(&page, "x"), vec![(id("m"), 3)]);
        assert_eq!(pseudo_parents(&page, "m"), vec![(id("r"), 1)]);
    }

    #[test]
    fn test_no_edge_between_siblings() {
        // a and b are sibling branches off r; filtering to {a, b} must not
        // invent any ancestry between them.
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        store.add_changeset("a", &["r"]).unwrap();
        store.add_changeset("b", &["r"]).unwrap();

        let mut page = page_for(&store, &["b", "a"]);
        reassemble_page(&store, &mut page, &[], true).unwrap();

        assert_eq!(pseudo_parents(&page, "a"), vec![]);
        assert_eq!(pseudo_parents(&page, "b"), vec![]);
    }

    #[test]
    fn test_direct_parents_also_linked() {
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        store.add_changeset("a", &["r"]).unwrap();

        let mut page = page_for(&store, &["a", "r"]);
        reassemble_page(&store, &mut page, &[], true).unwrap();

        assert_eq!(pseudo_parents(&page, "a"), vec![(id("r"), 1)]);
    }

    #[test]
    fn test_merge_gets_edge_per_branch() {
        // Diamond r <- a, r <- b, m = merge(a, b); filtered to {m, a, b}.
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        store.add_changeset("a", &["r"]).unwrap();
        store.add_changeset("b", &["r"]).unwrap();
        store.add_changeset("m", &["a", "b"]).unwrap();

        let mut page = page_for(&store, &["m", "b", "a"]);
        reassemble_page(&store, &mut page, &[], true).unwrap();

        let edges = pseudo_parents(&page, "m");
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(&(id("a"), 2)));
        assert!(edges.contains(&(id("b"), 3)));
    }

    #[test]
    fn test_cross_page_pseudo_children() {
        // Linear r <- a <- b <- c <- d. Page one returned {d}; this page is
        // {b}. b must gain a pseudo-child edge up to d (c was filtered out).
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        store.add_changeset("a", &["r"]).unwrap();
        store.add_changeset("b", &["a"]).unwrap();
        store.add_changeset("c", &["b"]).unwrap();
        store.add_changeset("d", &["c"]).unwrap();

        let mut page = page_for(&store, &["b"]);
        reassemble_page(&store, &mut page, &[id("d")], true).unwrap();

        let record = page.record(0).unwrap();
        assert_eq!(record.pseudo_child_count(), 1);
        assert_eq!(record.pseudo_child_at(0), Some((&id("d"), 5)));
    }

    #[test]
    fn test_cross_page_nearest_prior_wins() {
        // Priors d (newest) and c, page {a}: a links up to c only; d is
        // covered transitively through c.
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        store.add_changeset("a", &["r"]).unwrap();
        store.add_changeset("b", &["a"]).unwrap();
        store.add_changeset("c", &["b"]).unwrap();
        store.add_changeset("d", &["c"]).unwrap();

        let mut page = page_for(&store, &["a"]);
        // Oldest to newest, as the resume token accumulates them.
        reassemble_page(&store, &mut page, &[id("c"), id("d")], true).unwrap();

        let record = page.record(0).unwrap();
        assert_eq!(record.pseudo_child_count(), 1);
        assert_eq!(record.pseudo_child_at(0), Some((&id("c"), 4)));
    }

    #[test]
    fn test_restores_caller_order() {
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        store.add_changeset("a", &["r"]).unwrap();
        store.add_changeset("b", &["a"]).unwrap();

        // Deliberately not generation-sorted.
        let mut page = page_for(&store, &["r", "b", "a"]);
        let original = page.ids();
        reassemble_page(&store, &mut page, &[], true).unwrap();
        assert_eq!(page.ids(), original);

        let mut page = page_for(&store, &["r", "b", "a"]);
        reassemble_page(&store, &mut page, &[], false).unwrap();
        assert_eq!(page.ids(), vec![id("b"), id("a"), id("r")]);
    }

    #[test]
    fn test_probe_failure_aborts() {
        // The prior id is unknown to the store: the whole call must fail
        // rather than return a partially linked page.
        let mut store = MemChangesetStore::new();
        store.add_changeset("r", &[]).unwrap();
        let mut page = page_for(&store, &["r"]);
        assert!(reassemble_page(&store, &mut page, &[id("ghost")], true).is_err());
    }
}
