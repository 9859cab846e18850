// Copyright ⓒ 2024-2025 Peter Morgan <peter.james.morgan@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The RPC seam between the consumer and the brokers.

use std::collections::{BTreeMap, BTreeSet};

use gregor_sans_io::{
    JoinGroupRequest, JoinGroupResponse, SyncGroupRequest, SyncGroupResponse, record::RecordBatch,
};

use crate::{Node, Result, Topition};

/// Fetched batches per partition.
pub type FetchedRecords = BTreeMap<Topition, Vec<RecordBatch>>;

/// The coarse RPCs the consumer drives.
///
/// Group membership responses are returned raw, error code included, since
/// the consumer owns the classification of membership errors; the remaining
/// calls surface a non zero code as [`crate::Error::Api`]. A fetch touching
/// a mix of healthy and failing partitions fails with
/// [`crate::Error::Fetch`], carrying the partial result next to the per
/// partition errors.
///
/// The consumer treats its client as exclusive for the duration of a call;
/// the methods take `&mut self`.
#[allow(async_fn_in_trait)]
pub trait Api {
    /// the broker coordinating the given group
    async fn find_coordinator(&mut self, group_id: &str) -> Result<Node>;

    async fn join_group(
        &mut self,
        coordinator: &Node,
        request: JoinGroupRequest,
    ) -> Result<JoinGroupResponse>;

    async fn sync_group(
        &mut self,
        coordinator: &Node,
        request: SyncGroupRequest,
    ) -> Result<SyncGroupResponse>;

    async fn heartbeat(
        &mut self,
        coordinator: &Node,
        group_id: &str,
        generation_id: i32,
        member_id: &str,
    ) -> Result<()>;

    async fn leave_group(&mut self, coordinator: &Node, group_id: &str, member_id: &str)
    -> Result<()>;

    /// committed offsets for the given partitions, `None` where nothing is
    /// committed
    async fn offset_fetch(
        &mut self,
        coordinator: &Node,
        group_id: &str,
        topitions: &BTreeSet<Topition>,
    ) -> Result<BTreeMap<Topition, Option<i64>>>;

    async fn offset_commit(
        &mut self,
        coordinator: &Node,
        group_id: &str,
        generation_id: i32,
        member_id: &str,
        offsets: &BTreeMap<Topition, i64>,
        retention_time_ms: i64,
    ) -> Result<()>;

    /// fetch from each partition's leader starting at the given offsets,
    /// waiting at most `max_wait_ms` at the broker for data
    async fn fetch(
        &mut self,
        offsets: &BTreeMap<Topition, i64>,
        max_wait_ms: i32,
    ) -> Result<FetchedRecords>;

    /// log offsets by timestamp, `None` where the broker knows of none
    async fn list_offsets(
        &mut self,
        timestamps: &BTreeMap<Topition, i64>,
    ) -> Result<BTreeMap<Topition, Option<i64>>>;

    /// partition ids per topic, refreshing cluster metadata on demand
    async fn topic_partitions(&mut self, topics: &[String]) -> Result<BTreeMap<String, Vec<i32>>>;
}
