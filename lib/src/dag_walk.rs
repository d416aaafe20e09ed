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

//! Generation-ordered, resumable walk over changeset ancestors.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use serde::{Deserialize, Serialize};

use crate::store::{ChangesetId, ChangesetNode, ChangesetStore, StoreError, StoreResult};

/// What the per-node callback tells the walk to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkControl {
    /// Keep walking.
    Continue,
    /// Stop immediately; queued nodes are captured in the continuation token.
    StopNow,
    /// Visit the already-queued nodes but stop discovering new ancestors.
    DrainQueued,
}

/// Continuation state of a stopped walk. Opaque to callers; feed it back to
/// [`AncestorWalk::resume`] to pick up where the walk left off.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkToken {
    frontier: Vec<ChangesetId>,
    visited: Vec<ChangesetId>,
}

/// Heap entry ordered by generation; ties resolve to the node queued first.
struct QueuedNode {
    seq: u64,
    node: ChangesetNode,
}

impl QueuedNode {
    fn sort_key(&self) -> (i32, std::cmp::Reverse<u64>) {
        (self.node.generation, std::cmp::Reverse(self.seq))
    }
}

impl PartialEq for QueuedNode {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for QueuedNode {}

impl PartialOrd for QueuedNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Visits the ancestors of a start set in non-increasing generation order,
/// handing each node to a callback that decides whether to keep going.
///
/// The walk holds no reference to the store; the caller passes it to each
/// operation, in the style of an index-detached iterator.
pub struct AncestorWalk {
    queue: BinaryHeap<QueuedNode>,
    visited: HashSet<ChangesetId>,
    emitted: Vec<ChangesetId>,
    next_seq: u64,
    draining: bool,
}

impl AncestorWalk {
    /// Starts a fresh walk from the given changesets.
    pub fn new(store: &dyn ChangesetStore, start: &[ChangesetId]) -> StoreResult<Self> {
        let mut walk = AncestorWalk {
            queue: BinaryHeap::new(),
            visited: HashSet::new(),
            emitted: Vec::new(),
            next_seq: 0,
            draining: false,
        };
        for id in start {
            let node = store.changeset(id)?;
            walk.push(node);
        }
        Ok(walk)
    }

    /// Rebuilds a walk from a continuation token, refetching the frontier
    /// nodes to recover their generations.
    pub fn resume(store: &dyn ChangesetStore, token: &WalkToken) -> StoreResult<Self> {
        let mut walk = AncestorWalk {
            queue: BinaryHeap::new(),
            visited: token.visited.iter().cloned().collect(),
            emitted: token.visited.clone(),
            next_seq: 0,
            draining: false,
        };
        for id in &token.frontier {
            let node = store.changeset(id)?;
            walk.push(node);
        }
        Ok(walk)
    }

    fn push(&mut self, node: ChangesetNode) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedNode { seq, node });
    }

    fn token(&self) -> Option<WalkToken> {
        if self.queue.is_empty() {
            return None;
        }
        Some(WalkToken {
            frontier: self
                .queue
                .iter()
                .map(|queued| queued.node.id.clone())
                .collect(),
            visited: self.emitted.clone(),
        })
    }

    /// Runs the walk until the callback stops it or the ancestry is
    /// exhausted. Returns a continuation token if unvisited work remains.
    pub fn run<E: From<StoreError>>(
        &mut self,
        store: &dyn ChangesetStore,
        mut visit: impl FnMut(&ChangesetNode) -> Result<WalkControl, E>,
    ) -> Result<Option<WalkToken>, E> {
        while let Some(queued) = self.queue.pop() {
            let node = queued.node;
            if !self.visited.insert(node.id.clone()) {
                continue;
            }
            self.emitted.push(node.id.clone());
            if !self.draining {
                // Parents are queued before the callback runs so that a
                // StopNow token continues past the node just visited.
                for parent_id in &node.parents {
                    if !self.visited.contains(parent_id) {
                        let parent = store.changeset(parent_id).map_err(E::from)?;
                        self.push(parent);
                    }
                }
            }
            match visit(&node)? {
                WalkControl::Continue => {}
                WalkControl::StopNow => return Ok(self.token()),
                WalkControl::DrainQueued => self.draining = true,
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_store::MemChangesetStore;

    fn id(name: &str) -> ChangesetId {
        ChangesetId::new(name)
    }

    // This graph:
    //  o F
    //  |\
    //  o | E
    //  | o D
    //  | o C
    //  | o B
    //  |/
    //  o A
    fn branchy_store() -> MemChangesetStore {
        let mut store = MemChangesetStore::new();
        store.add_changeset("a", &[]).unwrap();
        store.add_changeset("b", &["a"]).unwrap();
        store.add_changeset("c", &["b"]).unwrap();
        store.add_changeset("d", &["c"]).unwrap();
        store.add_changeset("e", &["a"]).unwrap();
        store.add_changeset("f", &["e", "d"]).unwrap();
        store
    }

    fn collect_walk(
        store: &MemChangesetStore,
        walk: &mut AncestorWalk,
        stop_after: usize,
    ) -> (Vec<ChangesetId>, Option<WalkToken>) {
        let mut seen = vec![];
        let token = walk
            .run(store, |node: &ChangesetNode| {
                seen.push(node.id.clone());
                Ok::<_, StoreError>(if seen.len() >= stop_after {
                    WalkControl::StopNow
                } else {
                    WalkControl::Continue
                })
            })
            .unwrap();
        (seen, token)
    }

    #[test]
    fn test_walk_generation_order() {
        let store = branchy_store();
        let mut walk = AncestorWalk::new(&store, &[id("f")]).unwrap();
        let (seen, token) = collect_walk(&store, &mut walk, usize::MAX);
        // f (gen 5), d (4), c (3), then b and e (gen 2, queue order), a (1).
        assert_eq!(
            seen,
            vec![id("f"), id("d"), id("c"), id("e"), id("b"), id("a")]
        );
        assert!(token.is_none());
    }

    #[test]
    fn test_walk_stop_and_resume() {
        let store = branchy_store();
        let mut walk = AncestorWalk::new(&store, &[id("f")]).unwrap();
        let (first, token) = collect_walk(&store, &mut walk, 2);
        assert_eq!(first, vec![id("f"), id("d")]);
        let token = token.unwrap();

        let mut walk = AncestorWalk::resume(&store, &token).unwrap();
        let (rest, token) = collect_walk(&store, &mut walk, usize::MAX);
        assert_eq!(rest, vec![id("c"), id("e"), id("b"), id("a")]);
        assert!(token.is_none());
    }

    #[test]
    fn test_walk_resume_skips_visited() {
        let store = branchy_store();
        let mut walk = AncestorWalk::new(&store, &[id("f")]).unwrap();
        let (_, token) = collect_walk(&store, &mut walk, 3);
        let token = token.unwrap();

        // Resumed pages never repeat an id from an earlier page.
        let mut walk = AncestorWalk::resume(&store, &token).unwrap();
        let (rest, _) = collect_walk(&store, &mut walk, usize::MAX);
        assert_eq!(rest, vec![id("e"), id("b"), id("a")]);
    }

    #[test]
    fn test_walk_drain_queued() {
        let store = branchy_store();
        let mut walk = AncestorWalk::new(&store, &[id("f")]).unwrap();
        let mut seen = vec![];
        let token = walk
            .run(&store, |node: &ChangesetNode| {
                seen.push(node.id.clone());
                Ok::<_, StoreError>(if node.id == id("d") {
                    WalkControl::DrainQueued
                } else {
                    WalkControl::Continue
                })
            })
            .unwrap();
        // After draining starts at d, its parent c is already queued but
        // c's ancestors are never discovered.
        assert_eq!(seen, vec![id("f"), id("d"), id("c"), id("e")]);
        assert!(token.is_none());
    }

    #[test]
    fn test_walk_multiple_starts_dedupes() {
        let store = branchy_store();
        let mut walk = AncestorWalk::new(&store, &[id("d"), id("e")]).unwrap();
        let (seen, _) = collect_walk(&store, &mut walk, usize::MAX);
        assert_eq!(seen, vec![id("d"), id("c"), id("e"), id("b"), id("a")]);
    }

    #[test]
    fn test_walk_token_round_trips_as_json() {
        let store = branchy_store();
        let mut walk = AncestorWalk::new(&store, &[id("f")]).unwrap();
        let (_, token) = collect_walk(&store, &mut walk, 2);
        let token = token.unwrap();
        let text = serde_json::to_string(&token).unwrap();
        let decoded: WalkToken = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_walk_unknown_start() {
        let store = branchy_store();
        assert!(AncestorWalk::new(&store, &[id("nope")]).is_err());
    }
}
