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

//! Intersection of history filters into a changeset membership set.

#![allow(missing_docs)]

use std::collections::HashSet;

use itertools::Itertools as _;

use crate::history::{HistoryError, HistoryQuery};
use crate::store::{ChangesetId, ChangesetStore};

/// The ids admitted by the active filters. Absence of a set (a `None` from
/// [`build_candidates`]) means "unbounded": every changeset is admitted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CandidateSet {
    ids: HashSet<ChangesetId>,
}

impl CandidateSet {
    pub fn from_ids(ids: impl IntoIterator<Item = ChangesetId>) -> Self {
        CandidateSet {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: &ChangesetId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The members as an explicit sorted list, for embedding in a resume
    /// token.
    pub fn to_id_list(&self) -> Vec<ChangesetId> {
        self.ids.iter().cloned().sorted().collect()
    }
}

/// Narrows `acc` by intersection, or adopts `ids` outright if no filter has
/// established a set yet.
fn intersect_into(acc: &mut Option<HashSet<ChangesetId>>, ids: HashSet<ChangesetId>) {
    match acc {
        None => *acc = Some(ids),
        Some(current) => current.retain(|id| ids.contains(id)),
    }
}

/// Builds the candidate set for a query, or `None` when the query carries no
/// membership filter at all.
///
/// Each filter kind narrows whatever the earlier kinds established; the
/// result is the same whatever order the kinds are applied in. An empty
/// result set is not an error here: the caller reports it as an empty page.
pub fn build_candidates(
    store: &dyn ChangesetStore,
    query: &HistoryQuery,
) -> Result<Option<CandidateSet>, HistoryError> {
    let mut acc: Option<HashSet<ChangesetId>> = None;

    let user = match &query.username {
        Some(name) => Some(
            store
                .resolve_user(name)?
                .ok_or_else(|| HistoryError::UserNotFound(name.clone()))?,
        ),
        None => None,
    };
    if user.is_some() || query.from_date.is_some() || query.to_date.is_some() {
        let audits =
            store.audits_matching(user.as_ref().map(|user| &user.id), query.from_date, query.to_date)?;
        acc = Some(audits.into_iter().map(|audit| audit.changeset_id).collect());
    }

    if let Some(stamp) = &query.stamp {
        let ids: HashSet<ChangesetId> = store.resolve_stamp(stamp)?.into_iter().collect();
        if ids.is_empty() {
            return Err(HistoryError::StampNotFound(stamp.clone()));
        }
        intersect_into(&mut acc, ids);
    }

    // A filter naming the repository root covers the whole tree, so it does
    // not restrict membership.
    if !query.object_filter_ids.is_empty()
        && !query.object_filter_ids.iter().any(|object| object.is_root())
    {
        let ids = store
            .changesets_touching(&query.object_filter_ids)?
            .into_iter()
            .collect();
        intersect_into(&mut acc, ids);
    }

    if !query.single_revision_filter.is_empty() {
        intersect_into(&mut acc, query.single_revision_filter.iter().cloned().collect());
    }

    Ok(acc.map(|ids| CandidateSet { ids }))
}
