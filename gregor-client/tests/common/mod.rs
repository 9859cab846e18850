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

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, VecDeque},
    rc::Rc,
};

use gregor_client::{Api, Error, FetchedRecords, Node, Result, Topition};
use gregor_sans_io::{
    JoinGroupRequest, JoinGroupResponse, SyncGroupRequest, SyncGroupResponse,
};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() -> Result<DefaultGuard, Error> {
    use std::{fs::File, sync::Arc, thread};

    Ok(tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_level(true)
            .with_line_number(true)
            .with_thread_names(false)
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(
                    format!("{}=debug", env!("CARGO_CRATE_NAME"))
                        .parse()
                        .map_err(|_| Error::Message("parse filter".into()))?,
                ),
            )
            .with_writer(
                thread::current()
                    .name()
                    .ok_or(Error::Message(String::from("unnamed thread")))
                    .and_then(|name| {
                        let logs = format!("../logs/{}", env!("CARGO_PKG_NAME"));
                        std::fs::create_dir_all(&logs)?;

                        File::create(format!("{logs}/{}.log", name.replace("::", "-")))
                            .map_err(Into::into)
                    })
                    .map(Arc::new)?,
            )
            .finish(),
    ))
}

/// A scripted stand in for the broker side of the RPC seam.
///
/// Responses are dequeued in call order; every call is recorded so tests
/// can assert on what the consumer sent.
#[derive(Clone, Debug, Default)]
pub(crate) struct Script {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) coordinator: Node,
    pub(crate) topic_partitions: BTreeMap<String, Vec<i32>>,

    pub(crate) join_responses: VecDeque<JoinGroupResponse>,
    pub(crate) sync_responses: VecDeque<SyncGroupResponse>,
    pub(crate) heartbeat_responses: VecDeque<Result<(), Error>>,
    pub(crate) offset_fetch_responses: VecDeque<BTreeMap<Topition, Option<i64>>>,
    pub(crate) list_offsets_responses: VecDeque<BTreeMap<Topition, Option<i64>>>,
    pub(crate) fetch_responses: VecDeque<Result<FetchedRecords, Error>>,

    pub(crate) coordinator_lookups: usize,
    pub(crate) heartbeats: usize,
    pub(crate) leaves: usize,
    pub(crate) join_requests: Vec<JoinGroupRequest>,
    pub(crate) sync_requests: Vec<SyncGroupRequest>,
    pub(crate) fetch_requests: Vec<BTreeMap<Topition, i64>>,
    pub(crate) list_offsets_requests: Vec<BTreeMap<Topition, i64>>,
    pub(crate) commits: Vec<(i32, BTreeMap<Topition, i64>)>,
}

impl Script {
    pub(crate) fn new() -> Self {
        let script = Self::default();
        script.with(|inner| inner.coordinator = Node::new(1001, "localhost", 9092));
        script
    }

    pub(crate) fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        f(&mut self.inner.borrow_mut())
    }
}

impl Api for Script {
    async fn find_coordinator(&mut self, _group_id: &str) -> Result<Node, Error> {
        self.with(|inner| {
            inner.coordinator_lookups += 1;
            Ok(inner.coordinator.clone())
        })
    }

    async fn join_group(
        &mut self,
        _coordinator: &Node,
        request: JoinGroupRequest,
    ) -> Result<JoinGroupResponse, Error> {
        self.with(|inner| {
            inner.join_requests.push(request);
            inner
                .join_responses
                .pop_front()
                .ok_or(Error::Message("join beyond script".into()))
        })
    }

    async fn sync_group(
        &mut self,
        _coordinator: &Node,
        request: SyncGroupRequest,
    ) -> Result<SyncGroupResponse, Error> {
        self.with(|inner| {
            inner.sync_requests.push(request);
            inner
                .sync_responses
                .pop_front()
                .ok_or(Error::Message("sync beyond script".into()))
        })
    }

    async fn heartbeat(
        &mut self,
        _coordinator: &Node,
        _group_id: &str,
        _generation_id: i32,
        _member_id: &str,
    ) -> Result<(), Error> {
        self.with(|inner| {
            inner.heartbeats += 1;
            inner.heartbeat_responses.pop_front().unwrap_or(Ok(()))
        })
    }

    async fn leave_group(
        &mut self,
        _coordinator: &Node,
        _group_id: &str,
        _member_id: &str,
    ) -> Result<(), Error> {
        self.with(|inner| {
            inner.leaves += 1;
            Ok(())
        })
    }

    async fn offset_fetch(
        &mut self,
        _coordinator: &Node,
        _group_id: &str,
        _topitions: &BTreeSet<Topition>,
    ) -> Result<BTreeMap<Topition, Option<i64>>, Error> {
        self.with(|inner| {
            inner
                .offset_fetch_responses
                .pop_front()
                .ok_or(Error::Message("offset fetch beyond script".into()))
        })
    }

    async fn offset_commit(
        &mut self,
        _coordinator: &Node,
        _group_id: &str,
        generation_id: i32,
        _member_id: &str,
        offsets: &BTreeMap<Topition, i64>,
        _retention_time_ms: i64,
    ) -> Result<(), Error> {
        self.with(|inner| {
            inner.commits.push((generation_id, offsets.clone()));
            Ok(())
        })
    }

    async fn fetch(
        &mut self,
        offsets: &BTreeMap<Topition, i64>,
        _max_wait_ms: i32,
    ) -> Result<FetchedRecords, Error> {
        self.with(|inner| {
            inner.fetch_requests.push(offsets.clone());
            inner
                .fetch_responses
                .pop_front()
                .ok_or(Error::Message("fetch beyond script".into()))
        })?
    }

    async fn list_offsets(
        &mut self,
        timestamps: &BTreeMap<Topition, i64>,
    ) -> Result<BTreeMap<Topition, Option<i64>>, Error> {
        self.with(|inner| {
            inner.list_offsets_requests.push(timestamps.clone());
            inner
                .list_offsets_responses
                .pop_front()
                .ok_or(Error::Message("list offsets beyond script".into()))
        })
    }

    async fn topic_partitions(
        &mut self,
        topics: &[String],
    ) -> Result<BTreeMap<String, Vec<i32>>, Error> {
        self.with(|inner| {
            topics
                .iter()
                .map(|topic| {
                    inner
                        .topic_partitions
                        .get(topic)
                        .cloned()
                        .map(|partitions| (topic.clone(), partitions))
                        .ok_or(Error::Message(format!("unknown topic {topic}")))
                })
                .collect()
        })
    }
}
