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

//! A complete in-memory [`ChangesetStore`]. Backs the test suite and is handy
//! as a scratch repository for embedders.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap, HashSet};

use itertools::Itertools as _;
use smallvec::SmallVec;

use crate::store::{
    Audit, ChangesetId, ChangesetNode, ChangesetStore, Comment, FetchSession, GlobalId,
    MillisSinceEpoch, Stamp, StoreError, StoreResult, Tag, User, UserId,
};

#[derive(Clone, Debug, Default)]
pub struct MemChangesetStore {
    nodes: HashMap<ChangesetId, ChangesetNode>,
    by_revno: BTreeMap<u32, ChangesetId>,
    children: HashMap<ChangesetId, Vec<ChangesetId>>,
    audits: Vec<Audit>,
    tags: Vec<Tag>,
    stamps: Vec<Stamp>,
    comments: Vec<Comment>,
    users: Vec<User>,
    touched: HashMap<ChangesetId, HashSet<GlobalId>>,
    indexed: HashMap<ChangesetId, HashSet<GlobalId>>,
}

impl MemChangesetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new changeset with the given parents. The revision number is
    /// the next in commit order; the generation is derived from the parents.
    pub fn add_changeset(&mut self, id: &str, parents: &[&str]) -> StoreResult<ChangesetId> {
        let id = ChangesetId::new(id);
        let mut parent_ids: SmallVec<[ChangesetId; 2]> = SmallVec::new();
        let mut generation = 1;
        for parent in parents {
            let parent_id = ChangesetId::new(*parent);
            let parent_node = self.nodes.get(&parent_id).ok_or(StoreError::NotFound)?;
            generation = generation.max(parent_node.generation + 1);
            parent_ids.push(parent_id);
        }
        let revno = self.by_revno.len() as u32 + 1;
        for parent_id in &parent_ids {
            self.children
                .entry(parent_id.clone())
                .or_default()
                .push(id.clone());
        }
        self.by_revno.insert(revno, id.clone());
        self.nodes.insert(
            id.clone(),
            ChangesetNode {
                id: id.clone(),
                revno,
                generation,
                parents: parent_ids,
            },
        );
        Ok(id)
    }

    pub fn add_user(&mut self, id: &str, name: &str) {
        self.users.push(User {
            id: UserId::new(id),
            name: name.to_string(),
        });
    }

    pub fn add_audit(&mut self, changeset: &str, user: &str, timestamp: MillisSinceEpoch) {
        self.audits.push(Audit {
            changeset_id: ChangesetId::new(changeset),
            user_id: UserId::new(user),
            timestamp,
        });
    }

    pub fn add_tag(&mut self, changeset: &str, name: &str) {
        self.tags.push(Tag {
            changeset_id: ChangesetId::new(changeset),
            name: name.to_string(),
        });
    }

    pub fn add_stamp(&mut self, changeset: &str, name: &str) {
        self.stamps.push(Stamp {
            changeset_id: ChangesetId::new(changeset),
            name: name.to_string(),
        });
    }

    pub fn add_comment(&mut self, changeset: &str, text: &str) {
        self.comments.push(Comment {
            changeset_id: ChangesetId::new(changeset),
            text: text.to_string(),
        });
    }

    /// Marks the objects whose content the changeset materially changed.
    /// This also enters the changeset in the path index for those objects.
    pub fn set_touched(&mut self, changeset: &str, objects: &[&str]) {
        let entry = self.touched.entry(ChangesetId::new(changeset)).or_default();
        entry.extend(objects.iter().map(|gid| GlobalId::new(*gid)));
    }

    /// Enters the changeset in the path index for the objects without
    /// marking it as materially changing them. Merge changesets that carry
    /// an object's history are indexed this way.
    pub fn index_object(&mut self, changeset: &str, objects: &[&str]) {
        let entry = self.indexed.entry(ChangesetId::new(changeset)).or_default();
        entry.extend(objects.iter().map(|gid| GlobalId::new(*gid)));
    }
}

struct MemFetchSession<'a> {
    store: &'a MemChangesetStore,
}

impl FetchSession for MemFetchSession<'_> {
    fn fetch(&mut self, ids: &[ChangesetId]) -> StoreResult<Vec<ChangesetNode>> {
        ids.iter().map(|id| self.store.changeset(id)).collect()
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

impl ChangesetStore for MemChangesetStore {
    fn changeset(&self, id: &ChangesetId) -> StoreResult<ChangesetNode> {
        self.nodes.get(id).cloned().ok_or(StoreError::NotFound)
    }

    fn begin_fetch(&self) -> StoreResult<Box<dyn FetchSession + '_>> {
        Ok(Box::new(MemFetchSession { store: self }))
    }

    fn head_revno(&self) -> StoreResult<u32> {
        Ok(self.by_revno.keys().next_back().copied().unwrap_or(0))
    }

    fn changesets_in_revno_range(&self, lo: u32, hi: u32) -> StoreResult<Vec<ChangesetId>> {
        Ok(self.by_revno.range(lo..=hi).map(|(_, id)| id.clone()).collect())
    }

    fn leaf_ids(&self) -> StoreResult<Vec<ChangesetId>> {
        // Newest leaves first, so a default walk starts at the latest head.
        Ok(self
            .nodes
            .values()
            .filter(|node| !self.children.contains_key(&node.id))
            .sorted_by_key(|node| std::cmp::Reverse(node.revno))
            .map(|node| node.id.clone())
            .collect())
    }

    fn children(&self, id: &ChangesetId) -> StoreResult<Vec<ChangesetId>> {
        if !self.nodes.contains_key(id) {
            return Err(StoreError::NotFound);
        }
        Ok(self.children.get(id).cloned().unwrap_or_default())
    }

    fn audits_matching(
        &self,
        user: Option<&UserId>,
        from: Option<MillisSinceEpoch>,
        to: Option<MillisSinceEpoch>,
    ) -> StoreResult<Vec<Audit>> {
        Ok(self
            .audits
            .iter()
            .filter(|audit| user.map_or(true, |user| audit.user_id == *user))
            .filter(|audit| from.map_or(true, |from| audit.timestamp >= from))
            .filter(|audit| to.map_or(true, |to| audit.timestamp <= to))
            .cloned()
            .collect())
    }

    fn audits_for(&self, ids: &[ChangesetId]) -> StoreResult<Vec<Audit>> {
        let wanted: HashSet<&ChangesetId> = ids.iter().collect();
        Ok(self
            .audits
            .iter()
            .filter(|audit| wanted.contains(&audit.changeset_id))
            .cloned()
            .collect())
    }

    fn tags_for(&self, ids: &[ChangesetId]) -> StoreResult<Vec<Tag>> {
        let wanted: HashSet<&ChangesetId> = ids.iter().collect();
        Ok(self
            .tags
            .iter()
            .filter(|tag| wanted.contains(&tag.changeset_id))
            .cloned()
            .collect())
    }

    fn stamps_for(&self, ids: &[ChangesetId]) -> StoreResult<Vec<Stamp>> {
        let wanted: HashSet<&ChangesetId> = ids.iter().collect();
        Ok(self
            .stamps
            .iter()
            .filter(|stamp| wanted.contains(&stamp.changeset_id))
            .cloned()
            .collect())
    }

    fn comments_for(&self, ids: &[ChangesetId]) -> StoreResult<Vec<Comment>> {
        let wanted: HashSet<&ChangesetId> = ids.iter().collect();
        Ok(self
            .comments
            .iter()
            .filter(|comment| wanted.contains(&comment.changeset_id))
            .cloned()
            .collect())
    }

    fn resolve_stamp(&self, name: &str) -> StoreResult<Vec<ChangesetId>> {
        Ok(self
            .stamps
            .iter()
            .filter(|stamp| stamp.name == name)
            .map(|stamp| stamp.changeset_id.clone())
            .collect())
    }

    fn changesets_touching(&self, objects: &[GlobalId]) -> StoreResult<Vec<ChangesetId>> {
        Ok(self
            .touched
            .iter()
            .chain(self.indexed.iter())
            .filter(|(_, entries)| objects.iter().any(|object| entries.contains(object)))
            .map(|(id, _)| id.clone())
            .sorted()
            .dedup()
            .collect())
    }

    fn changeset_touches(&self, id: &ChangesetId, object: &GlobalId) -> StoreResult<bool> {
        if !self.nodes.contains_key(id) {
            return Err(StoreError::NotFound);
        }
        Ok(self
            .touched
            .get(id)
            .is_some_and(|touched| touched.contains(object)))
    }

    fn resolve_user(&self, name: &str) -> StoreResult<Option<User>> {
        Ok(self.users.iter().find(|user| user.name == name).cloned())
    }

    fn users(&self) -> StoreResult<Vec<User>> {
        Ok(self.users.clone())
    }
}
