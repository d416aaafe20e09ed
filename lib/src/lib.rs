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

//! History queries over a changeset DAG: filtered enumeration, resumable
//! pagination, record enrichment, and sparse-graph reassembly.

#![warn(missing_docs)]
#![deny(unused_must_use)]
#![forbid(unsafe_code)]

pub mod candidates;
pub mod dag_walk;
pub mod enrich;
pub mod history;
pub mod mem_store;
pub mod page;
pub mod reassemble;
pub mod store;
