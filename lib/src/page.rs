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

#![allow(missing_docs)]

use std::cmp::Reverse;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::store::{ChangesetId, ChangesetNode, MillisSinceEpoch, UserId};

/// An audit attached to a result record, with the user id resolved to a
/// display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultAudit {
    pub user_id: UserId,
    pub user_name: String,
    pub timestamp: MillisSinceEpoch,
}

/// One changeset in a history result page.
///
/// Created by an enumeration strategy with the DAG fields filled in;
/// enrichment adds the audit/tag/stamp/comment lists and reassembly adds the
/// pseudo-edge maps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: ChangesetId,
    pub revno: u32,
    pub generation: i32,
    /// Direct parents, id to revno, in the changeset's parent order.
    pub parents: IndexMap<ChangesetId, u32>,
    pub audits: Vec<ResultAudit>,
    pub tags: Vec<String>,
    pub stamps: Vec<String>,
    pub comments: Vec<String>,
    /// Nearest in-result ancestors bridging filtered-out changesets.
    pub pseudo_parents: IndexMap<ChangesetId, u32>,
    /// Nearest previously-returned descendants, filled on later pages.
    pub pseudo_children: IndexMap<ChangesetId, u32>,
}

impl ResultRecord {
    pub fn new(node: &ChangesetNode, parents: IndexMap<ChangesetId, u32>) -> Self {
        ResultRecord {
            id: node.id.clone(),
            revno: node.revno,
            generation: node.generation,
            parents,
            audits: vec![],
            tags: vec![],
            stamps: vec![],
            comments: vec![],
            pseudo_parents: IndexMap::new(),
            pseudo_children: IndexMap::new(),
        }
    }

    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    pub fn parent_at(&self, index: usize) -> Option<(&ChangesetId, u32)> {
        self.parents.get_index(index).map(|(id, revno)| (id, *revno))
    }

    pub fn pseudo_parent_count(&self) -> usize {
        self.pseudo_parents.len()
    }

    pub fn pseudo_parent_at(&self, index: usize) -> Option<(&ChangesetId, u32)> {
        self.pseudo_parents
            .get_index(index)
            .map(|(id, revno)| (id, *revno))
    }

    pub fn pseudo_child_count(&self) -> usize {
        self.pseudo_children.len()
    }

    pub fn pseudo_child_at(&self, index: usize) -> Option<(&ChangesetId, u32)> {
        self.pseudo_children
            .get_index(index)
            .map(|(id, revno)| (id, *revno))
    }
}

/// An ordered page of history results with a movable cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    records: Vec<ResultRecord>,
    cursor: usize,
}

impl HistoryPage {
    pub fn new(records: Vec<ResultRecord>) -> Self {
        HistoryPage { records, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [ResultRecord] {
        &mut self.records
    }

    pub fn record(&self, index: usize) -> Option<&ResultRecord> {
        self.records.get(index)
    }

    pub fn ids(&self) -> Vec<ChangesetId> {
        self.records.iter().map(|record| record.id.clone()).collect()
    }

    pub fn reverse(&mut self) {
        self.records.reverse();
    }

    /// Sorts by descending generation. The sort is stable: records of equal
    /// generation keep the order the enumeration strategy produced.
    pub fn sort_by_generation_desc(&mut self) {
        self.records.sort_by_key(|record| Reverse(record.generation));
    }

    /// Restores the record order captured by an earlier [`HistoryPage::ids`]
    /// call. Ids absent from `order` sort last, keeping their relative order.
    pub(crate) fn restore_order(&mut self, order: &[ChangesetId]) {
        let position: IndexMap<&ChangesetId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        self.records
            .sort_by_key(|record| position.get(&record.id).copied().unwrap_or(usize::MAX));
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, position: usize) {
        self.cursor = position.min(self.records.len().saturating_sub(1));
    }

    pub fn current(&self) -> Option<&ResultRecord> {
        self.records.get(self.cursor)
    }

    /// Moves the cursor one record forward and returns the new current
    /// record, or `None` at the end of the page.
    pub fn advance(&mut self) -> Option<&ResultRecord> {
        if self.cursor + 1 >= self.records.len() {
            return None;
        }
        self.cursor += 1;
        self.current()
    }

    /// Moves the cursor one record back and returns the new current record,
    /// or `None` at the start of the page.
    pub fn retreat(&mut self) -> Option<&ResultRecord> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.current()
    }

    pub fn seek_start(&mut self) {
        self.cursor = 0;
    }

    /// Parks the cursor on the last record, for consumers that iterate a
    /// page oldest-first.
    pub fn seek_end(&mut self) {
        self.cursor = self.records.len().saturating_sub(1);
    }
}
