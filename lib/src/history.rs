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

//! The history query engine. A [`HistoryQuery`] describes which changesets
//! the caller wants and how they should be enumerated; [`run_history_query`]
//! produces the first [`HistoryPage`] and, when more results remain, a
//! [`ResumeToken`] that [`fetch_more`] turns into the next page.

#![allow(missing_docs)]

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing::instrument;

use crate::candidates::build_candidates;
use crate::candidates::CandidateSet;
use crate::dag_walk::AncestorWalk;
use crate::dag_walk::WalkControl;
use crate::dag_walk::WalkToken;
use crate::enrich::enrich_page;
use crate::page::HistoryPage;
use crate::page::ResultRecord;
use crate::reassemble::reassemble_page;
use crate::store::ChangesetId;
use crate::store::ChangesetNode;
use crate::store::ChangesetStore;
use crate::store::GlobalId;
use crate::store::MillisSinceEpoch;
use crate::store::StoreError;

/// How many revision numbers a single chronological scan step covers.
const LIST_SCAN_BATCH: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Invalid query: {0}")]
    InvalidArgument(String),
    #[error("No such user: {0}")]
    UserNotFound(String),
    #[error("No such stamp: {0}")]
    StampNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What to enumerate and how. The default query is the unfiltered history of
/// the whole repository, newest first.
#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
    /// Restrict to changesets recorded against any of these objects.
    pub object_filter_ids: Vec<GlobalId>,
    /// Walk ancestry from these changesets instead of the DAG leaves.
    pub starting_changesets: Vec<ChangesetId>,
    /// Restrict to exactly these changesets.
    pub single_revision_filter: Vec<ChangesetId>,
    /// Restrict to changesets audited by this user (display name).
    pub username: Option<String>,
    /// Restrict to changesets carrying this stamp.
    pub stamp: Option<String>,
    /// Page size. Zero means no limit.
    pub result_limit: usize,
    /// Start the ancestry walk from the DAG leaves even when
    /// `starting_changesets` is set.
    pub leaves_only: bool,
    /// Drop merge changesets whose own diff does not materially affect any
    /// filtered object. Requires `object_filter_ids`.
    pub hide_object_merges: bool,
    /// Inclusive lower bound on audit timestamps.
    pub from_date: Option<MillisSinceEpoch>,
    /// Inclusive upper bound on audit timestamps.
    pub to_date: Option<MillisSinceEpoch>,
    /// Enumerate by ancestry walk rather than by descending revno.
    pub prefer_dag_walk: bool,
    /// Reconnect the filtered result graph with pseudo edges.
    pub reassemble_dag: bool,
}

/// Where to pick up a paginated query. Opaque to callers but serializable,
/// so it can round-trip through an API boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    state: TokenState,
    hide_merges: bool,
    /// The resolved candidate set, so later pages skip filter resolution
    /// and see the same membership even if the repository gained changesets.
    candidate_ids: Option<Vec<ChangesetId>>,
    object_ids: Vec<GlobalId>,
    whole_history: bool,
    reassemble: bool,
    /// Ids already returned, newest first. Only tracked when reassembly is
    /// on, where later pages need them to direct pseudo-child edges.
    known_ids: Vec<ChangesetId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum TokenState {
    List { next_revno: u32 },
    Walk { walk: WalkToken },
}

/// Inclusion policy inputs shared by both enumeration strategies.
struct IncludeContext<'a> {
    candidates: Option<&'a CandidateSet>,
    hide_merges: bool,
    objects: &'a [GlobalId],
    whole_history: bool,
}

/// Whether an examined changeset belongs in the page.
///
/// Candidate membership is decided first so that the per-object diff lookups
/// only run for changesets that already passed every other filter.
fn include_changeset(
    store: &dyn ChangesetStore,
    node: &ChangesetNode,
    ctx: &IncludeContext<'_>,
) -> Result<bool, HistoryError> {
    if let Some(candidates) = ctx.candidates {
        if !candidates.contains(&node.id) {
            return Ok(false);
        }
    }
    if ctx.whole_history || !ctx.hide_merges {
        return Ok(true);
    }
    for object in ctx.objects {
        if store.changeset_touches(&node.id, object)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Builds the result record for a node, resolving parent revnos through a
/// page-scoped cache.
fn make_record(
    store: &dyn ChangesetStore,
    node: &ChangesetNode,
    revno_cache: &mut HashMap<ChangesetId, u32>,
) -> Result<ResultRecord, HistoryError> {
    let mut parents = IndexMap::new();
    for parent_id in &node.parents {
        let revno = match revno_cache.get(parent_id) {
            Some(revno) => *revno,
            None => {
                let parent = store.changeset(parent_id)?;
                revno_cache.insert(parent_id.clone(), parent.revno);
                parent.revno
            }
        };
        parents.insert(parent_id.clone(), revno);
    }
    Ok(ResultRecord::new(node, parents))
}

fn effective_limit(result_limit: usize) -> usize {
    if result_limit == 0 {
        usize::MAX
    } else {
        result_limit
    }
}

/// Chronological strategy: scan revnos downward from `start_revno` in
/// batches, keeping the changesets the policy admits. Returns the records
/// and, when the scan stopped at a full page, the revno to resume from.
fn run_list_page(
    store: &dyn ChangesetStore,
    count: usize,
    start_revno: u32,
    ctx: &IncludeContext<'_>,
) -> Result<(Vec<ResultRecord>, Option<u32>), HistoryError> {
    // Without a candidate set every examined changeset is a hit, so a batch
    // larger than the page would fetch nodes the page cannot hold.
    let batch = if ctx.candidates.is_some() {
        LIST_SCAN_BATCH
    } else {
        count.min(LIST_SCAN_BATCH)
    };
    let mut records = vec![];
    let mut revno_cache = HashMap::new();
    let mut next_start = start_revno;
    let mut last_examined = None;
    'scan: while records.len() < count && next_start >= 1 {
        let hi = next_start;
        let lo = hi.saturating_sub(batch as u32 - 1).max(1);
        let ids = store.changesets_in_revno_range(lo, hi)?;
        let mut session = store.begin_fetch()?;
        let nodes = session.fetch(&ids)?;
        session.close()?;
        for node in &nodes {
            revno_cache.insert(node.id.clone(), node.revno);
        }
        for node in nodes.iter().rev() {
            if include_changeset(store, node, ctx)? {
                records.push(make_record(store, node, &mut revno_cache)?);
            }
            last_examined = Some(node.revno);
            if records.len() == count {
                break 'scan;
            }
        }
        next_start = lo - 1;
    }
    let resume = if records.len() == count {
        last_examined
            .map(|revno| revno.saturating_sub(1))
            .filter(|revno| *revno >= 1)
    } else {
        None
    };
    Ok((records, resume))
}

/// DAG-walk strategy: drive an [`AncestorWalk`] until the page is full or
/// the ancestry runs out.
fn run_walk_page(
    store: &dyn ChangesetStore,
    walk: &mut AncestorWalk,
    count: usize,
    ctx: &IncludeContext<'_>,
) -> Result<(Vec<ResultRecord>, Option<WalkToken>), HistoryError> {
    let mut records = vec![];
    let mut revno_cache = HashMap::new();
    let token = walk.run::<HistoryError>(store, |node| {
        if include_changeset(store, node, ctx)? {
            records.push(make_record(store, node, &mut revno_cache)?);
        }
        if records.len() >= count {
            Ok(WalkControl::StopNow)
        } else {
            Ok(WalkControl::Continue)
        }
    })?;
    Ok((records, token))
}

/// Runs a history query from the top: resolves filters, enumerates the first
/// page, enriches it, and reassembles the result DAG when asked to.
#[instrument(skip(store))]
pub fn run_history_query(
    store: &dyn ChangesetStore,
    query: &HistoryQuery,
) -> Result<(HistoryPage, Option<ResumeToken>), HistoryError> {
    if query.hide_object_merges && query.object_filter_ids.is_empty() {
        return Err(HistoryError::InvalidArgument(
            "hide_object_merges requires an object filter".to_string(),
        ));
    }
    let candidates = build_candidates(store, query)?;
    if let Some(set) = &candidates {
        if set.is_empty() {
            debug!("filters matched no changesets");
            return Ok((HistoryPage::default(), None));
        }
    }
    let whole_history = query.object_filter_ids.is_empty()
        || query.object_filter_ids.iter().any(|object| object.is_root());
    let ctx = IncludeContext {
        candidates: candidates.as_ref(),
        hide_merges: query.hide_object_merges,
        objects: &query.object_filter_ids,
        whole_history,
    };
    let count = effective_limit(query.result_limit);
    let use_walk = query.prefer_dag_walk || !query.starting_changesets.is_empty();
    let (records, state) = if use_walk {
        let start = if query.leaves_only || query.starting_changesets.is_empty() {
            store.leaf_ids()?
        } else {
            query.starting_changesets.clone()
        };
        if start.is_empty() {
            return Err(HistoryError::InvalidArgument(
                "ancestry walk requires at least one starting changeset".to_string(),
            ));
        }
        let mut walk = AncestorWalk::new(store, &start)?;
        let (records, token) = run_walk_page(store, &mut walk, count, &ctx)?;
        (records, token.map(|walk| TokenState::Walk { walk }))
    } else {
        let (records, resume) = run_list_page(store, count, store.head_revno()?, &ctx)?;
        (records, resume.map(|next_revno| TokenState::List { next_revno }))
    };
    let mut page = HistoryPage::new(records);
    enrich_page(store, &mut page)?;
    if query.reassemble_dag {
        reassemble_page(store, &mut page, &[], true)?;
    }
    let token = state.map(|state| ResumeToken {
        state,
        hide_merges: query.hide_object_merges,
        candidate_ids: candidates.as_ref().map(CandidateSet::to_id_list),
        object_ids: query.object_filter_ids.clone(),
        whole_history,
        reassemble: query.reassemble_dag,
        known_ids: if query.reassemble_dag {
            page.ids()
        } else {
            vec![]
        },
    });
    Ok((page, token))
}

/// Continues a paginated query from a [`ResumeToken`]. The token pins the
/// resolved filters, so the page is consistent with the earlier ones.
#[instrument(skip(store))]
pub fn fetch_more(
    store: &dyn ChangesetStore,
    token: &ResumeToken,
    result_limit: usize,
) -> Result<(HistoryPage, Option<ResumeToken>), HistoryError> {
    let count = effective_limit(result_limit);
    let candidates = token
        .candidate_ids
        .as_ref()
        .map(|ids| CandidateSet::from_ids(ids.iter().cloned()));
    let ctx = IncludeContext {
        candidates: candidates.as_ref(),
        hide_merges: token.hide_merges,
        objects: &token.object_ids,
        whole_history: token.whole_history,
    };
    let (records, state) = match &token.state {
        TokenState::List { next_revno } => {
            let (records, resume) = run_list_page(store, count, *next_revno, &ctx)?;
            (records, resume.map(|next_revno| TokenState::List { next_revno }))
        }
        TokenState::Walk { walk } => {
            let mut walk = AncestorWalk::resume(store, walk)?;
            let (records, next) = run_walk_page(store, &mut walk, count, &ctx)?;
            (records, next.map(|walk| TokenState::Walk { walk }))
        }
    };
    let mut page = HistoryPage::new(records);
    enrich_page(store, &mut page)?;
    if token.reassemble {
        // known_ids is newest first; reassembly wants the prior results
        // oldest first so the nearest prior ancestor wins.
        let priors: Vec<_> = token.known_ids.iter().rev().cloned().collect();
        reassemble_page(store, &mut page, &priors, true)?;
    }
    let next_token = state.map(|state| {
        let mut known_ids = token.known_ids.clone();
        if token.reassemble {
            known_ids.extend(page.ids());
        }
        ResumeToken {
            state,
            hide_merges: token.hide_merges,
            candidate_ids: token.candidate_ids.clone(),
            object_ids: token.object_ids.clone(),
            whole_history: token.whole_history,
            reassemble: token.reassemble,
            known_ids,
        }
    });
    Ok((page, next_token))
}
