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

//! The consumer: group membership, fetch positions and the poll loop.
//!
//! A consumer is single task cooperative: every piece of state is mutated on
//! the task calling [`Consumer::poll`] and friends, and every suspension
//! point is an RPC through [`Api`]. Callers wanting parallelism run one
//! consumer per worker.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use gregor_sans_io::{
    EARLIEST_TIMESTAMP, ErrorCode, JoinGroupRequest, JoinGroupResponse, LATEST_TIMESTAMP,
    SyncGroupRequest,
    consumer::{self as protocol, Assignor, GroupMember, MemberAssignment, Subscription, assignor},
    message::group::{JoinGroupRequestProtocol, SyncGroupRequestAssignment},
};
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, warn};

use crate::{Api, AutoOffsetReset, Client, Config, Error, FetchedRecords, Node, Result, Topition, check};

const JOIN_ATTEMPTS: u64 = 4;
const RETRY_BACKOFF_MS: u64 = 100;

/// Where the consumer is in the group membership lifecycle.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum State {
    #[default]
    Unsubscribed,
    Joining,
    Syncing,
    Assigned,
    Leaving,
}

/// A consumer group member.
///
/// Tracks, per assigned partition, the offset of the record most recently
/// delivered to the caller; the next fetch starts one past it. Committed
/// offsets carry the current generation and are rejected by the coordinator
/// once a newer generation exists.
///
/// There is no destructor magic: call [`Consumer::unsubscribe`] on teardown,
/// otherwise the coordinator only notices the departure once the session
/// times out.
#[derive(Debug)]
pub struct Consumer<A> {
    config: Config,
    api: A,
    assignor: Box<dyn Assignor + Sync>,

    state: State,
    subscription: Vec<String>,
    assigned: BTreeSet<Topition>,
    offsets: BTreeMap<Topition, i64>,
    paused: BTreeSet<Topition>,

    coordinator: Option<Node>,
    member_id: String,
    generation_id: i32,

    last_heartbeat: Option<Instant>,
    last_auto_commit: Option<Instant>,
}

impl Consumer<Client> {
    /// bootstrap a client from the configured seed brokers
    pub async fn connect(config: Config) -> Result<Self> {
        let client = Client::connect(config.bootstrap.clone(), config.client_id.clone()).await?;
        Self::with_api(config, client)
    }
}

impl<A> Consumer<A>
where
    A: Api,
{
    /// a consumer over an already established client
    pub fn with_api(config: Config, api: A) -> Result<Self> {
        let assignor = assignor::from_name(&config.partition_assignment_strategy)
            .map_err(Error::Protocol)?;

        Ok(Self {
            config,
            api,
            assignor,
            state: State::default(),
            subscription: Vec::new(),
            assigned: BTreeSet::new(),
            offsets: BTreeMap::new(),
            paused: BTreeSet::new(),
            coordinator: None,
            member_id: String::new(),
            generation_id: -1,
            last_heartbeat: None,
            last_auto_commit: None,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn generation_id(&self) -> i32 {
        self.generation_id
    }

    pub fn subscription(&self) -> &[String] {
        &self.subscription
    }

    pub fn assignment(&self) -> &BTreeSet<Topition> {
        &self.assigned
    }

    /// join the group for the given topics, receiving a partition
    /// assignment from the coordinator
    ///
    /// Transitional coordinator errors rediscover the coordinator and
    /// rejoin; anything else surfaces.
    pub async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        if topics.is_empty() {
            return Err(Error::EmptySubscription);
        }

        self.subscription = topics.to_vec();
        self.state = State::Joining;

        let mut attempt = 0;

        loop {
            match self.join().await {
                Ok(()) => return Ok(()),

                Err(reason) if retriable(&reason) && attempt < JOIN_ATTEMPTS => {
                    attempt += 1;
                    warn!(%reason, attempt, "rejoining");

                    if matches!(
                        reason,
                        Error::Api(ErrorCode::UnknownMemberId | ErrorCode::FencedInstanceId)
                    ) {
                        self.member_id.clear();
                    }

                    self.coordinator = None;
                    self.state = State::Joining;
                    sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt)).await;
                }

                Err(reason) => return Err(reason),
            }
        }
    }

    async fn join(&mut self) -> Result<()> {
        let coordinator = match self.coordinator.clone() {
            Some(coordinator) => coordinator,
            None => {
                let coordinator = self.api.find_coordinator(&self.config.group_id).await?;
                debug!(?coordinator);
                self.coordinator = Some(coordinator.clone());
                coordinator
            }
        };

        let subscription = Subscription::default()
            .version(protocol::VERSION)
            .topics(self.subscription.iter().cloned());

        let metadata = Bytes::try_from(&subscription).map_err(Error::Protocol)?;

        let request = JoinGroupRequest::default()
            .group_id(self.config.group_id.as_str())
            .session_timeout_ms(self.config.session_timeout_ms)
            .rebalance_timeout_ms(self.config.rebalance_timeout_ms)
            .member_id(self.member_id.as_str())
            .protocol_type(protocol::CONSUMER)
            .protocols([JoinGroupRequestProtocol::default()
                .name(self.assignor.name())
                .metadata(metadata)]);

        let mut response = self.api.join_group(&coordinator, request.clone()).await?;

        if ErrorCode::try_from(response.error_code).map_err(Error::from)?
            == ErrorCode::MemberIdRequired
        {
            // the coordinator allocated an id for us to rejoin with
            let request = request.member_id(response.member_id.as_str());
            response = self.api.join_group(&coordinator, request).await?;
        }

        check(response.error_code)?;

        self.member_id = response.member_id.clone();
        self.generation_id = response.generation_id;
        self.state = State::Syncing;

        debug!(
            member_id = %self.member_id,
            generation_id = self.generation_id,
            leader = %response.leader,
        );

        let assignment = if response.member_id == response.leader {
            self.leader_sync(&coordinator, &response).await?
        } else {
            self.follower_sync(&coordinator).await?
        };

        let topitions = assignment
            .assigned_partitions
            .iter()
            .flat_map(|topic| {
                topic
                    .partitions
                    .iter()
                    .map(|partition| Topition::new(&topic.topic, *partition))
            })
            .collect::<BTreeSet<_>>();

        self.assign_topitions(&topitions).await?;
        self.last_heartbeat = Some(Instant::now());

        Ok(())
    }

    /// run the assignor over the cluster and every member's subscription,
    /// handing the coordinator the full table; our own assignment is read
    /// straight out of that table
    async fn leader_sync(
        &mut self,
        coordinator: &Node,
        join: &JoinGroupResponse,
    ) -> Result<MemberAssignment> {
        let members = join
            .members
            .iter()
            .map(|member| {
                Subscription::try_from(member.metadata.clone()).map(|subscription| {
                    GroupMember::default()
                        .member_id(member.member_id.as_str())
                        .subscription(subscription)
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::Protocol)?;

        let topics = members
            .iter()
            .flat_map(|member| member.subscription.topics.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();

        let partitions = self.api.topic_partitions(&topics).await?;

        let mut assignments = self
            .assignor
            .assign(&partitions, &members)
            .map_err(Error::Protocol)?;

        let own = assignments.remove(&self.member_id).unwrap_or_default();

        let table = assignments
            .into_iter()
            .chain([(self.member_id.clone(), own.clone())])
            .map(|(member_id, assignment)| {
                Bytes::try_from(&assignment).map(|encoded| {
                    SyncGroupRequestAssignment::default()
                        .member_id(member_id)
                        .assignment(encoded)
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::Protocol)?;

        let response = self
            .api
            .sync_group(
                coordinator,
                SyncGroupRequest::default()
                    .group_id(self.config.group_id.as_str())
                    .generation_id(self.generation_id)
                    .member_id(self.member_id.as_str())
                    .assignments(table),
            )
            .await?;

        check(response.error_code)?;

        Ok(own)
    }

    /// sync with no table, decoding the assignment the leader computed for
    /// us
    async fn follower_sync(&mut self, coordinator: &Node) -> Result<MemberAssignment> {
        let response = self
            .api
            .sync_group(
                coordinator,
                SyncGroupRequest::default()
                    .group_id(self.config.group_id.as_str())
                    .generation_id(self.generation_id)
                    .member_id(self.member_id.as_str()),
            )
            .await?;

        check(response.error_code)?;

        MemberAssignment::try_from(response.assignment).map_err(Error::Protocol)
    }

    /// take ownership of the given partitions, initializing their fetch
    /// positions from the group's committed offsets
    ///
    /// Partitions without a committed offset are positioned by the
    /// configured reset policy.
    pub async fn assign(&mut self, topitions: &BTreeSet<Topition>) -> Result<()> {
        self.assign_topitions(topitions).await
    }

    async fn assign_topitions(&mut self, topitions: &BTreeSet<Topition>) -> Result<()> {
        if topitions.is_empty() {
            return Err(Error::EmptyAssignment);
        }

        if let Some(unknown) = topitions.iter().find(|topition| {
            !self
                .subscription
                .iter()
                .any(|topic| topic.as_str() == topition.topic())
        }) {
            return Err(Error::UnknownTopicOrPartition(unknown.clone()));
        }

        let coordinator = match self.coordinator.clone() {
            Some(coordinator) => coordinator,
            None => {
                let coordinator = self.api.find_coordinator(&self.config.group_id).await?;
                self.coordinator = Some(coordinator.clone());
                coordinator
            }
        };

        let committed = self
            .api
            .offset_fetch(&coordinator, &self.config.group_id, topitions)
            .await?;

        let mut offsets = BTreeMap::new();
        let mut unknown = BTreeSet::new();

        for topition in topitions {
            match committed.get(topition).copied().flatten() {
                Some(offset) => {
                    _ = offsets.insert(topition.clone(), offset);
                }

                None => {
                    _ = unknown.insert(topition.clone());
                }
            }
        }

        if !unknown.is_empty() {
            offsets.extend(self.auto_reset_offsets(&unknown).await?);
        }

        self.assigned = topitions.clone();
        self.offsets = offsets;
        self.paused = self
            .paused
            .intersection(&self.assigned)
            .cloned()
            .collect();
        self.state = State::Assigned;

        if self.last_auto_commit.is_none() {
            self.last_auto_commit = Some(Instant::now());
        }

        Ok(())
    }

    async fn auto_reset_offsets(
        &mut self,
        unknown: &BTreeSet<Topition>,
    ) -> Result<BTreeMap<Topition, i64>> {
        let timestamp = match self.config.auto_offset_reset {
            AutoOffsetReset::Earliest => EARLIEST_TIMESTAMP,
            AutoOffsetReset::Latest => LATEST_TIMESTAMP,
            AutoOffsetReset::None => return Err(Error::Api(ErrorCode::OffsetOutOfRange)),
        };

        debug!(reset = self.config.auto_offset_reset.as_ref(), ?unknown);

        let request = unknown
            .iter()
            .map(|topition| (topition.clone(), timestamp))
            .collect();

        let listed = self.api.list_offsets(&request).await?;

        unknown
            .iter()
            .map(|topition| {
                listed
                    .get(topition)
                    .copied()
                    .flatten()
                    .map(|offset| (topition.clone(), offset))
                    .ok_or(Error::Api(ErrorCode::OffsetOutOfRange))
            })
            .collect()
    }

    /// one turn of the steady state loop: heartbeat when due, fetch from
    /// the active partitions, advance positions over what came back, and
    /// auto commit when due
    pub async fn poll(&mut self, timeout_ms: i32) -> Result<FetchedRecords> {
        if self.state != State::Assigned {
            return Err(Error::State {
                operation: "poll",
                state: self.state,
            });
        }

        self.heartbeat_tick().await?;

        let active = self
            .offsets
            .iter()
            .filter(|(topition, _)| !self.paused.contains(topition))
            .map(|(topition, offset)| (topition.clone(), *offset))
            .collect::<BTreeMap<_, _>>();

        let records = self.fetch_messages(&active, timeout_ms).await?;

        for (topition, batches) in &records {
            if let Some(last) = batches.iter().filter_map(|batch| batch.last_offset()).max() {
                _ = self.offsets.insert(topition.clone(), last);
            }
        }

        if self.config.enable_auto_commit
            && self.last_auto_commit.is_none_or(|last| {
                last.elapsed() >= Duration::from_millis(self.config.auto_commit_interval_ms)
            })
        {
            self.commit_sync(None).await?;
            self.last_auto_commit = Some(Instant::now());
        }

        Ok(records)
    }

    /// heartbeats are spaced at least the configured interval apart; any
    /// failure rejoins the group with the recorded topics before the fetch
    /// proceeds
    async fn heartbeat_tick(&mut self) -> Result<()> {
        let due = self.last_heartbeat.is_none_or(|last| {
            last.elapsed() >= Duration::from_millis(self.config.heartbeat_interval_ms)
        });

        if !due {
            return Ok(());
        }

        let coordinator = self.coordinator.clone().ok_or(Error::State {
            operation: "heartbeat",
            state: self.state,
        })?;

        match self
            .api
            .heartbeat(
                &coordinator,
                &self.config.group_id,
                self.generation_id,
                &self.member_id,
            )
            .await
        {
            Ok(()) => {
                self.last_heartbeat = Some(Instant::now());
                Ok(())
            }

            Err(reason) => {
                warn!(%reason, "rejoining after heartbeat failure");

                if let Error::Api(ErrorCode::UnknownMemberId | ErrorCode::FencedInstanceId) =
                    reason
                {
                    self.member_id.clear();
                }

                self.coordinator = None;

                let topics = self.subscription.clone();
                self.subscribe(&topics).await
            }
        }
    }

    /// fetch one past each active position, repairing out of range
    /// partitions in band
    ///
    /// Out of range partitions are repositioned from the log (falling back
    /// to the earliest offset when the log end is unknown), the new
    /// positions committed so the group agrees with what is about to be
    /// refetched, and just those partitions fetched again. Residual errors
    /// surface with the merged partial result attached.
    async fn fetch_messages(
        &mut self,
        active: &BTreeMap<Topition, i64>,
        timeout_ms: i32,
    ) -> Result<FetchedRecords> {
        if active.is_empty() {
            return Ok(FetchedRecords::new());
        }

        let request = next_offsets(active);

        match self.api.fetch(&request, timeout_ms).await {
            Ok(records) => Ok(records),

            Err(Error::Fetch {
                result: mut records,
                errors,
            }) => {
                let (out_of_range, mut errors) = split_out_of_range(errors);

                if out_of_range.is_empty() {
                    return Err(Error::Fetch {
                        result: records,
                        errors,
                    });
                }

                let repositioned = self.reposition(&out_of_range, &mut errors).await?;

                if repositioned.is_empty() {
                    return Err(Error::Fetch {
                        result: records,
                        errors,
                    });
                }

                self.offsets.extend(repositioned.clone());
                self.commit_sync(Some(&repositioned)).await?;

                match self.api.fetch(&next_offsets(&repositioned), timeout_ms).await {
                    Ok(refetched) => merge(&mut records, refetched),

                    Err(Error::Fetch {
                        result: refetched,
                        errors: residual,
                    }) => {
                        merge(&mut records, refetched);
                        errors.extend(residual);
                    }

                    Err(reason) => return Err(reason),
                }

                if errors.is_empty() {
                    Ok(records)
                } else {
                    Err(Error::Fetch {
                        result: records,
                        errors,
                    })
                }
            }

            Err(reason) => Err(reason),
        }
    }

    /// current valid offsets for partitions found out of range, using the
    /// earliest offset as the last resort for any the log end is unknown on
    async fn reposition(
        &mut self,
        out_of_range: &BTreeSet<Topition>,
        errors: &mut BTreeMap<Topition, ErrorCode>,
    ) -> Result<BTreeMap<Topition, i64>> {
        let request = out_of_range
            .iter()
            .map(|topition| (topition.clone(), LATEST_TIMESTAMP))
            .collect();

        let listed = self.api.list_offsets(&request).await?;

        let mut repositioned = BTreeMap::new();
        let mut still_unknown = BTreeMap::new();

        for topition in out_of_range {
            match listed.get(topition).copied().flatten() {
                Some(offset) => {
                    _ = repositioned.insert(topition.clone(), offset);
                }

                None => {
                    _ = still_unknown.insert(topition.clone(), EARLIEST_TIMESTAMP);
                }
            }
        }

        if !still_unknown.is_empty() {
            let earliest = self.api.list_offsets(&still_unknown).await?;

            for topition in still_unknown.into_keys() {
                match earliest.get(&topition).copied().flatten() {
                    Some(offset) => {
                        _ = repositioned.insert(topition, offset);
                    }

                    None => {
                        _ = errors.insert(topition, ErrorCode::OffsetOutOfRange);
                    }
                }
            }
        }

        Ok(repositioned)
    }

    /// synchronously commit the given offsets, or a snapshot of the current
    /// positions when none are given
    pub async fn commit_sync(&mut self, offsets: Option<&BTreeMap<Topition, i64>>) -> Result<()> {
        if self.state != State::Assigned {
            return Err(Error::State {
                operation: "commit",
                state: self.state,
            });
        }

        let coordinator = self.coordinator.clone().ok_or(Error::State {
            operation: "commit",
            state: self.state,
        })?;

        let offsets = offsets.unwrap_or(&self.offsets);

        if offsets.is_empty() {
            return Ok(());
        }

        self.api
            .offset_commit(
                &coordinator,
                &self.config.group_id,
                self.generation_id,
                &self.member_id,
                offsets,
                self.config.offset_retention_ms,
            )
            .await
    }

    /// override the position of an assigned partition
    pub fn seek(&mut self, topition: &Topition, offset: i64) -> Result<()> {
        if !self.assigned.contains(topition) {
            return Err(Error::UnknownTopicOrPartition(topition.clone()));
        }

        _ = self.offsets.insert(topition.clone(), offset);
        Ok(())
    }

    pub async fn seek_to_beginning(&mut self, topitions: &BTreeSet<Topition>) -> Result<()> {
        self.seek_to(topitions, EARLIEST_TIMESTAMP).await
    }

    pub async fn seek_to_end(&mut self, topitions: &BTreeSet<Topition>) -> Result<()> {
        self.seek_to(topitions, LATEST_TIMESTAMP).await
    }

    async fn seek_to(&mut self, topitions: &BTreeSet<Topition>, timestamp: i64) -> Result<()> {
        if let Some(unknown) = topitions
            .iter()
            .find(|topition| !self.assigned.contains(*topition))
        {
            return Err(Error::UnknownTopicOrPartition(unknown.clone()));
        }

        let request = topitions
            .iter()
            .map(|topition| (topition.clone(), timestamp))
            .collect();

        let listed = self.api.list_offsets(&request).await?;

        for topition in topitions {
            let offset = listed
                .get(topition)
                .copied()
                .flatten()
                .ok_or(Error::Api(ErrorCode::OffsetOutOfRange))?;

            _ = self.offsets.insert(topition.clone(), offset);
        }

        Ok(())
    }

    /// assigned partitions excluded from fetching until resumed
    pub fn pause(&mut self, topitions: &BTreeSet<Topition>) {
        self.paused
            .extend(topitions.intersection(&self.assigned).cloned());
    }

    pub fn resume(&mut self, topitions: &BTreeSet<Topition>) {
        for topition in topitions {
            _ = self.paused.remove(topition);
        }
    }

    pub fn paused(&self) -> &BTreeSet<Topition> {
        &self.paused
    }

    /// one past the most recently delivered offset: the next to fetch
    pub fn position(&self, topition: &Topition) -> Result<i64> {
        self.offsets
            .get(topition)
            .map(|offset| offset + 1)
            .ok_or(Error::UnknownTopicOrPartition(topition.clone()))
    }

    /// leave the group and clear all membership and position state
    ///
    /// Idempotent, and safe on a consumer that never joined.
    pub async fn unsubscribe(&mut self) {
        if let Some(coordinator) = self.coordinator.take()
            && !self.member_id.is_empty()
        {
            self.state = State::Leaving;

            if let Err(reason) = self
                .api
                .leave_group(&coordinator, &self.config.group_id, &self.member_id)
                .await
            {
                debug!(%reason, "leaving group");
            }
        }

        self.subscription.clear();
        self.assigned.clear();
        self.offsets.clear();
        self.paused.clear();
        self.member_id.clear();
        self.generation_id = -1;
        self.last_heartbeat = None;
        self.last_auto_commit = None;
        self.state = State::Unsubscribed;
    }
}

fn retriable(error: &Error) -> bool {
    match error {
        Error::Api(code) => code.is_retriable(),
        Error::Io(_) | Error::Pool(_) => true,
        _ => false,
    }
}

/// positions name the last delivered record; fetches start one past them
fn next_offsets(offsets: &BTreeMap<Topition, i64>) -> BTreeMap<Topition, i64> {
    offsets
        .iter()
        .map(|(topition, offset)| (topition.clone(), offset + 1))
        .collect()
}

fn merge(into: &mut FetchedRecords, from: FetchedRecords) {
    for (topition, batches) in from {
        into.entry(topition).or_default().extend(batches);
    }
}

/// split the recoverable out of range partitions from the rest
fn split_out_of_range(
    errors: BTreeMap<Topition, ErrorCode>,
) -> (BTreeSet<Topition>, BTreeMap<Topition, ErrorCode>) {
    let mut out_of_range = BTreeSet::new();
    let mut residual = BTreeMap::new();

    for (topition, code) in errors {
        if code == ErrorCode::OffsetOutOfRange {
            _ = out_of_range.insert(topition);
        } else {
            _ = residual.insert(topition, code);
        }
    }

    (out_of_range, residual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_offsets_are_one_past_position() {
        let offsets = BTreeMap::from([(Topition::new("t", 0), 10), (Topition::new("t", 1), -1)]);

        let next = next_offsets(&offsets);

        assert_eq!(11, next[&Topition::new("t", 0)]);
        assert_eq!(0, next[&Topition::new("t", 1)]);
    }

    #[test]
    fn out_of_range_split() {
        let errors = BTreeMap::from([
            (Topition::new("t", 0), ErrorCode::OffsetOutOfRange),
            (Topition::new("t", 1), ErrorCode::UnknownTopicOrPartition),
        ]);

        let (out_of_range, residual) = split_out_of_range(errors);

        assert!(out_of_range.contains(&Topition::new("t", 0)));
        assert_eq!(
            Some(&ErrorCode::UnknownTopicOrPartition),
            residual.get(&Topition::new("t", 1))
        );
    }
}
