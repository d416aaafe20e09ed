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

//! Batch attachment of audits, tags, stamps and comments to a result page.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::page::{HistoryPage, ResultAudit};
use crate::store::{ChangesetId, ChangesetStore, StoreResult};

/// Attaches the detail lists to every record of `page`.
///
/// Issues one batch lookup per detail kind for the whole page instead of one
/// lookup per record, then splices the results back by changeset id. The
/// lists are assigned, not appended, so enriching twice leaves the page
/// unchanged.
pub fn enrich_page(store: &dyn ChangesetStore, page: &mut HistoryPage) -> StoreResult<()> {
    if page.is_empty() {
        return Ok(());
    }
    let ids = page.ids();

    // One "list all users" call resolves every audit's display name.
    let users = store.users()?;
    let name_by_user: HashMap<_, _> = users
        .iter()
        .map(|user| (&user.id, user.name.as_str()))
        .collect();

    let mut audits: IndexMap<ChangesetId, Vec<ResultAudit>> = IndexMap::new();
    for audit in store.audits_for(&ids)? {
        let user_name = name_by_user
            .get(&audit.user_id)
            .map(|name| (*name).to_string())
            .unwrap_or_default();
        audits.entry(audit.changeset_id).or_default().push(ResultAudit {
            user_id: audit.user_id,
            user_name,
            timestamp: audit.timestamp,
        });
    }

    let mut tags: IndexMap<ChangesetId, Vec<String>> = IndexMap::new();
    for tag in store.tags_for(&ids)? {
        tags.entry(tag.changeset_id).or_default().push(tag.name);
    }

    let mut stamps: IndexMap<ChangesetId, Vec<String>> = IndexMap::new();
    for stamp in store.stamps_for(&ids)? {
        stamps.entry(stamp.changeset_id).or_default().push(stamp.name);
    }

    let mut comments: IndexMap<ChangesetId, Vec<String>> = IndexMap::new();
    for comment in store.comments_for(&ids)? {
        comments.entry(comment.changeset_id).or_default().push(comment.text);
    }

    for record in page.records_mut() {
        record.audits = audits.swap_remove(&record.id).unwrap_or_default();
        record.tags = tags.swap_remove(&record.id).unwrap_or_default();
        record.stamps = stamps.swap_remove(&record.id).unwrap_or_default();
        record.comments = comments.swap_remove(&record.id).unwrap_or_default();
    }
    Ok(())
}
