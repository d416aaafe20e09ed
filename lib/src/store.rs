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

use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

/// Content-derived identifier of a changeset. Immutable once assigned and
/// globally unique, unlike revision numbers.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangesetId(String);

impl Debug for ChangesetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChangesetId").field(&self.0).finish()
    }
}

impl Display for ChangesetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ChangesetId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stable, path-independent identifier of a versioned object (file or
/// folder), used for object-scoped history filtering.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(String);

const ROOT_GLOBAL_ID: &str = "*repository-root*";

impl Debug for GlobalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GlobalId").field(&self.0).finish()
    }
}

impl GlobalId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The well-known id of the repository root folder. Filtering history by
    /// the root object is the same as not filtering by object at all.
    pub fn root() -> Self {
        Self(ROOT_GLOBAL_ID.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_GLOBAL_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl Debug for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UserId").field(&self.0).finish()
    }
}

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
pub struct MillisSinceEpoch(pub i64);

impl MillisSinceEpoch {
    pub fn now() -> Self {
        Self::from_datetime(chrono::offset::Utc::now())
    }

    pub fn from_datetime<Tz: chrono::TimeZone>(datetime: chrono::DateTime<Tz>) -> Self {
        MillisSinceEpoch(datetime.timestamp_millis())
    }
}

/// Parent ids of a changeset. Few changesets have more than two parents.
pub type ParentIdsVec = SmallVec<[ChangesetId; 2]>;

/// Read-only view of one node of the changeset DAG.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ChangesetNode {
    pub id: ChangesetId,
    /// Dense 1-based sequence number assigned at commit time. Not stable
    /// across repository copies.
    pub revno: u32,
    /// 1 + the maximum generation among the parents; roots have generation 1.
    pub generation: i32,
    pub parents: ParentIdsVec,
}

/// A (user, timestamp) record marking who committed a changeset and when.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Audit {
    pub changeset_id: ChangesetId,
    pub user_id: UserId,
    pub timestamp: MillisSinceEpoch,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Tag {
    pub changeset_id: ChangesetId,
    pub name: String,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stamp {
    pub changeset_id: ChangesetId,
    pub name: String,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Comment {
    pub changeset_id: ChangesetId,
    pub text: String,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Object not found")]
    NotFound,
    #[error("Error: {0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Scoped handle for fetching changeset nodes in batches. Must be closed
/// explicitly so the store can release whatever the scope pinned.
pub trait FetchSession {
    /// Fetches the nodes for `ids`, in the same order.
    fn fetch(&mut self, ids: &[ChangesetId]) -> StoreResult<Vec<ChangesetNode>>;

    fn close(self: Box<Self>) -> StoreResult<()>;
}

/// Read-side boundary to the repository storage engine. The history engine
/// never writes through this interface.
pub trait ChangesetStore {
    fn changeset(&self, id: &ChangesetId) -> StoreResult<ChangesetNode>;

    fn begin_fetch(&self) -> StoreResult<Box<dyn FetchSession + '_>>;

    /// The highest revision number in the repository, or 0 if it is empty.
    fn head_revno(&self) -> StoreResult<u32>;

    /// Ids of the changesets with revnos in `lo..=hi`, ascending by revno.
    fn changesets_in_revno_range(&self, lo: u32, hi: u32) -> StoreResult<Vec<ChangesetId>>;

    /// Ids of the childless changesets (the DAG heads).
    fn leaf_ids(&self) -> StoreResult<Vec<ChangesetId>>;

    fn children(&self, id: &ChangesetId) -> StoreResult<Vec<ChangesetId>>;

    /// Audit records matching the given user and/or inclusive time range.
    /// Open bounds match everything on that side.
    fn audits_matching(
        &self,
        user: Option<&UserId>,
        from: Option<MillisSinceEpoch>,
        to: Option<MillisSinceEpoch>,
    ) -> StoreResult<Vec<Audit>>;

    fn audits_for(&self, ids: &[ChangesetId]) -> StoreResult<Vec<Audit>>;

    fn tags_for(&self, ids: &[ChangesetId]) -> StoreResult<Vec<Tag>>;

    fn stamps_for(&self, ids: &[ChangesetId]) -> StoreResult<Vec<Stamp>>;

    fn comments_for(&self, ids: &[ChangesetId]) -> StoreResult<Vec<Comment>>;

    /// Ids of the changesets carrying the named stamp. An unknown stamp
    /// resolves to an empty list; the caller decides whether that is an error.
    fn resolve_stamp(&self, name: &str) -> StoreResult<Vec<ChangesetId>>;

    /// Path-index lookup: ids of the changesets that touched any of the given
    /// objects.
    fn changesets_touching(&self, objects: &[GlobalId]) -> StoreResult<Vec<ChangesetId>>;

    /// Whether the changeset's own content changes materially affected the
    /// given object, per the changeset's diff summary.
    fn changeset_touches(&self, id: &ChangesetId, object: &GlobalId) -> StoreResult<bool>;

    fn resolve_user(&self, name: &str) -> StoreResult<Option<User>>;

    fn users(&self) -> StoreResult<Vec<User>>;
}
