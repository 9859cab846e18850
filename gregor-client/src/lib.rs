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

//! Gregor Client
//!
//! A Kafka consumer group client: broker connections, the typed RPC
//! surface, a cached cluster view, and the consumer itself.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, io,
    net::SocketAddr,
    sync::Arc,
};

use deadpool::managed::{self, BuildError, PoolError};
use gregor_sans_io::{
    ApiVersionsRequest, ErrorCode, FetchRequest, FindCoordinatorRequest, Frame, Header,
    HeartbeatRequest, JoinGroupRequest, JoinGroupResponse, LeaveGroupRequest, ListOffsetsRequest,
    MetadataRequest, MetadataResponse, OffsetCommitRequest, OffsetFetchRequest, Request,
    Response as _, SyncGroupRequest, SyncGroupResponse,
    message::{
        fetch::{CONSUMER_REPLICA_ID, FetchRequestPartition, FetchRequestTopic},
        offsets::{
            ListOffsetsRequestPartition, ListOffsetsRequestTopic, OffsetCommitRequestPartition,
            OffsetCommitRequestTopic, OffsetFetchRequestTopic, UNKNOWN_OFFSET,
        },
    },
    record::RecordBatch,
};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpStream, lookup_host},
};
use tracing::{debug, error, warn};
use url::Url;

pub mod api;
pub mod cluster;
pub mod config;
pub mod consumer;

pub use api::{Api, FetchedRecords};
pub use cluster::{Cluster, Node};
pub use config::{AutoOffsetReset, Config};
pub use consumer::{Consumer, State};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    Api(ErrorCode),
    Correlation { expected: i32, received: i32 },
    DeadPoolBuild(#[from] BuildError),
    EmptyAssignment,
    EmptySubscription,
    Fetch {
        result: FetchedRecords,
        errors: BTreeMap<Topition, ErrorCode>,
    },
    Io(Arc<io::Error>),
    Message(String),
    Pool(Box<dyn std::error::Error + Send + Sync>),
    Protocol(#[from] gregor_sans_io::Error),
    State {
        operation: &'static str,
        state: State,
    },
    UnknownHost(Url),
    UnknownOffsetReset(String),
    UnknownTopicOrPartition(Topition),
    UrlParse(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api(code) => write!(f, "{code}"),
            Self::Message(msg) => f.write_str(msg),
            error => write!(f, "{error:?}"),
        }
    }
}

impl<E> From<PoolError<E>> for Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(value: PoolError<E>) -> Self {
        Self::Pool(Box::new(value))
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

/// surface a non zero response error code
pub(crate) fn check(error_code: i16) -> Result<()> {
    match ErrorCode::try_from(error_code).map_err(Error::from)? {
        ErrorCode::None => Ok(()),
        code => Err(Error::Api(code)),
    }
}

/// A topic and partition pair.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Topition {
    topic: String,
    partition: i32,
}

impl Topition {
    pub fn new(topic: &str, partition: i32) -> Self {
        let topic = topic.to_owned();
        Self { topic, partition }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl fmt::Display for Topition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// partition ids grouped per topic
pub(crate) fn by_topic<'a>(
    topitions: impl IntoIterator<Item = &'a Topition>,
) -> BTreeMap<String, Vec<i32>> {
    topitions
        .into_iter()
        .fold(BTreeMap::new(), |mut topics, topition| {
            topics
                .entry(topition.topic.clone())
                .or_insert_with(Vec::new)
                .push(topition.partition);
            topics
        })
}

const FETCH_MIN_BYTES: i32 = 1;
const FETCH_PARTITION_MAX_BYTES: i32 = 1024 * 1024;
const LIST_OFFSETS_SINGLE: i32 = 1;

/// a broker connection with a correlation id
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    correlation_id: i32,
}

impl Connection {
    /// write a request frame, read and decode its correlated response
    async fn call<Q>(
        &mut self,
        request: Q,
        api_version: i16,
        client_id: Option<String>,
    ) -> Result<Q::Response>
    where
        Q: Request,
    {
        let correlation_id = self.correlation_id;
        self.correlation_id += 1;

        let encoded = Frame::request(
            Header::Request {
                api_key: Q::KEY,
                api_version,
                correlation_id,
                client_id,
            },
            &request.into_value(api_version),
            Q::scheme(api_version),
        )?;

        self.stream.write_all(&encoded[..]).await?;

        let response = self.read_frame().await?;
        let (received, value) =
            Frame::response_from_bytes(response, <Q::Response>::scheme(api_version))?;

        if received != correlation_id {
            return Err(Error::Correlation {
                expected: correlation_id,
                received,
            });
        }

        <Q::Response>::from_value(value, api_version)
            .map_err(Into::into)
            .inspect(|response| debug!(?response))
    }

    /// read a length prefixed frame from the broker
    async fn read_frame(&mut self) -> Result<bytes::Bytes> {
        let mut size = [0u8; 4];
        _ = self.stream.read_exact(&mut size).await?;

        let length = i32::from_be_bytes(size);

        if length < 0 || length as usize > gregor_sans_io::MAX_FRAME_LENGTH {
            return Err(Error::Protocol(
                gregor_sans_io::Error::LengthBeyondMaximum {
                    field: "frame",
                    length,
                },
            ));
        }

        let mut buffer: Vec<u8> = vec![0u8; frame_length(size)];
        buffer[0..size.len()].copy_from_slice(&size[..]);
        _ = self.stream.read_exact(&mut buffer[4..]).await?;

        Ok(bytes::Bytes::from(buffer))
    }
}

fn frame_length(encoded: [u8; 4]) -> usize {
    i32::from_be_bytes(encoded) as usize + encoded.len()
}

/// manager of pooled connections to one broker, holding the API versions it
/// supports
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Manager {
    broker: Url,
    client_id: Option<String>,
    versions: BTreeMap<i16, (i16, i16)>,
}

impl Manager {
    pub fn client_id(&self) -> Option<String> {
        self.client_id.clone()
    }

    /// the highest version of an api key spoken by both sides
    pub fn api_version(&self, api_key: i16, min_version: i16, max_version: i16) -> Result<i16> {
        let (broker_min, broker_max) = self.versions.get(&api_key).copied().ok_or(
            Error::Protocol(gregor_sans_io::Error::UnsupportedApiVersion {
                api_key,
                api_version: min_version,
            }),
        )?;

        let api_version = max_version.min(broker_max);

        if api_version < min_version || api_version < broker_min {
            Err(Error::Protocol(
                gregor_sans_io::Error::UnsupportedApiVersion {
                    api_key,
                    api_version,
                },
            ))
        } else {
            Ok(api_version)
        }
    }

    /// resolve the broker host into an IP socket address
    async fn host_port(&self) -> Result<SocketAddr> {
        if let Some(host) = self.broker.host_str()
            && let Some(port) = self.broker.port()
        {
            let mut addresses = lookup_host(format!("{host}:{port}"))
                .await?
                .filter(|socket_addr| matches!(socket_addr, SocketAddr::V4(_)));

            if let Some(socket_addr) = addresses.next().inspect(|socket_addr| debug!(?socket_addr))
            {
                return Ok(socket_addr);
            }
        }

        Err(Error::UnknownHost(self.broker.clone()))
    }
}

impl managed::Manager for Manager {
    type Type = Connection;
    type Error = Error;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        debug!(%self.broker);

        TcpStream::connect(self.host_port().await?)
            .await
            .inspect_err(|err| error!(broker = %self.broker, ?err))
            .map(|stream| Connection {
                stream,
                correlation_id: 0,
            })
            .map_err(Into::into)
    }

    async fn recycle(
        &self,
        obj: &mut Self::Type,
        metrics: &managed::Metrics,
    ) -> managed::RecycleResult<Self::Error> {
        debug!(?obj, ?metrics);
        Ok(())
    }
}

/// a managed pool of connections to one broker
pub type Pool = managed::Pool<Manager>;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Builder {
    broker: Url,
    client_id: Option<String>,
}

impl Builder {
    /// broker url
    pub fn broker(broker: Url) -> Self {
        Self {
            broker,
            client_id: None,
        }
    }

    /// client id used when making requests to the broker
    pub fn client_id(self, client_id: Option<String>) -> Self {
        Self { client_id, ..self }
    }

    /// inquire with the broker which api versions it supports
    async fn bootstrap(&self) -> Result<BTreeMap<i16, (i16, i16)>> {
        let versions = BTreeMap::from([(ApiVersionsRequest::KEY, (0, 0))]);

        let pool = Pool::builder(Manager {
            broker: self.broker.clone(),
            client_id: self.client_id.clone(),
            versions,
        })
        .build()?;

        let mut connection = pool.get().await?;
        let response = connection
            .call(ApiVersionsRequest, 0, self.client_id.clone())
            .await?;

        check(response.error_code)?;

        Ok(response
            .api_keys
            .into_iter()
            .map(|api| (api.api_key, (api.min_version, api.max_version)))
            .collect())
    }

    /// establish the api versions supported by the broker
    pub async fn build(self) -> Result<Pool> {
        self.bootstrap().await.and_then(|versions| {
            Pool::builder(Manager {
                broker: self.broker,
                client_id: self.client_id,
                versions,
            })
            .build()
            .map_err(Into::into)
        })
    }
}

/// API client routing each request to an appropriate broker
#[derive(Debug)]
pub struct Client {
    client_id: Option<String>,
    bootstrap: Vec<Url>,
    cluster: Cluster,
    pools: BTreeMap<String, Pool>,
}

impl Client {
    /// bootstrap the cluster view from seed brokers
    pub async fn connect(
        bootstrap: impl IntoIterator<Item = Url>,
        client_id: Option<String>,
    ) -> Result<Self> {
        let mut client = Self {
            client_id,
            bootstrap: bootstrap.into_iter().collect(),
            cluster: Cluster::default(),
            pools: BTreeMap::new(),
        };

        if client.bootstrap.is_empty() {
            return Err(Error::Message("no bootstrap brokers".into()));
        }

        _ = client.refresh_metadata(None).await?;
        Ok(client)
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    async fn pool_at(&mut self, url: &Url) -> Result<Pool> {
        if let Some(pool) = self.pools.get(url.as_str()) {
            return Ok(pool.clone());
        }

        let pool = Builder::broker(url.clone())
            .client_id(self.client_id.clone())
            .build()
            .await?;

        _ = self.pools.insert(url.as_str().to_owned(), pool.clone());
        Ok(pool)
    }

    async fn call_url<Q>(&mut self, url: &Url, request: Q) -> Result<Q::Response>
    where
        Q: Request,
    {
        debug!(%url, ?request);

        let pool = self.pool_at(url).await?;
        let api_version =
            pool.manager()
                .api_version(Q::KEY, Q::MIN_VERSION, Q::MAX_VERSION)?;
        let client_id = pool.manager().client_id();

        let mut connection = pool.get().await?;
        connection.call(request, api_version, client_id).await
    }

    async fn call<Q>(&mut self, node: &Node, request: Q) -> Result<Q::Response>
    where
        Q: Request,
    {
        let url = node.url()?;
        self.call_url(&url, request).await
    }

    /// issue a metadata request against any reachable broker, folding the
    /// response into the cluster view
    pub async fn refresh_metadata(
        &mut self,
        topics: Option<Vec<String>>,
    ) -> Result<MetadataResponse> {
        let urls = self
            .cluster
            .brokers()
            .filter_map(|node| node.url().ok())
            .chain(self.bootstrap.iter().cloned())
            .collect::<Vec<_>>();

        let mut unreachable = None;

        for url in urls {
            match self
                .call_url(&url, MetadataRequest::default().topics(topics.clone()))
                .await
            {
                Ok(response) => {
                    self.cluster.update(&response);
                    return Ok(response);
                }

                Err(reason) => {
                    warn!(%url, %reason);
                    unreachable = Some(reason);
                }
            }
        }

        Err(unreachable.unwrap_or_else(|| Error::Message("no bootstrap brokers".into())))
    }

    async fn any_broker(&mut self) -> Result<Url> {
        if let Some(node) = self.cluster.brokers().next() {
            node.url()
        } else {
            self.bootstrap
                .first()
                .cloned()
                .ok_or_else(|| Error::Message("no bootstrap brokers".into()))
        }
    }

    /// group the partitions by their leader, recording those without one
    async fn route(
        &mut self,
        topitions: &[Topition],
        errors: &mut BTreeMap<Topition, ErrorCode>,
    ) -> Result<BTreeMap<Node, Vec<Topition>>> {
        let missing = topitions
            .iter()
            .filter(|topition| !self.cluster.contains_topic(topition.topic()))
            .map(|topition| topition.topic().to_owned())
            .collect::<BTreeSet<_>>();

        if !missing.is_empty() {
            _ = self
                .refresh_metadata(Some(missing.into_iter().collect()))
                .await?;
        }

        let mut routes = BTreeMap::<Node, Vec<Topition>>::new();

        for topition in topitions {
            if let Some(node) = self
                .cluster
                .leader_for(topition.topic(), topition.partition())
            {
                routes.entry(node.clone()).or_default().push(topition.clone());
            } else {
                _ = errors.insert(topition.clone(), ErrorCode::UnknownTopicOrPartition);
            }
        }

        Ok(routes)
    }
}

impl Api for Client {
    async fn find_coordinator(&mut self, group_id: &str) -> Result<Node> {
        let url = self.any_broker().await?;

        let response = self
            .call_url(&url, FindCoordinatorRequest::default().key(group_id))
            .await?;

        check(response.error_code)?;

        Ok(Node::new(response.node_id, response.host, response.port))
    }

    async fn join_group(
        &mut self,
        coordinator: &Node,
        request: JoinGroupRequest,
    ) -> Result<JoinGroupResponse> {
        self.call(coordinator, request).await
    }

    async fn sync_group(
        &mut self,
        coordinator: &Node,
        request: SyncGroupRequest,
    ) -> Result<SyncGroupResponse> {
        self.call(coordinator, request).await
    }

    async fn heartbeat(
        &mut self,
        coordinator: &Node,
        group_id: &str,
        generation_id: i32,
        member_id: &str,
    ) -> Result<()> {
        let response = self
            .call(
                coordinator,
                HeartbeatRequest::default()
                    .group_id(group_id)
                    .generation_id(generation_id)
                    .member_id(member_id),
            )
            .await?;

        check(response.error_code)
    }

    async fn leave_group(
        &mut self,
        coordinator: &Node,
        group_id: &str,
        member_id: &str,
    ) -> Result<()> {
        let response = self
            .call(
                coordinator,
                LeaveGroupRequest::default()
                    .group_id(group_id)
                    .member_id(member_id),
            )
            .await?;

        check(response.error_code)
    }

    async fn offset_fetch(
        &mut self,
        coordinator: &Node,
        group_id: &str,
        topitions: &BTreeSet<Topition>,
    ) -> Result<BTreeMap<Topition, Option<i64>>> {
        let request = OffsetFetchRequest::default().group_id(group_id).topics(
            by_topic(topitions).into_iter().map(|(name, indexes)| {
                OffsetFetchRequestTopic::default()
                    .name(name)
                    .partition_indexes(indexes)
            }),
        );

        let response = self.call(coordinator, request).await?;

        let mut committed = BTreeMap::new();

        for topic in response.topics {
            for partition in topic.partitions {
                check(partition.error_code)?;

                _ = committed.insert(
                    Topition::new(&topic.name, partition.partition_index),
                    (partition.committed_offset != UNKNOWN_OFFSET)
                        .then_some(partition.committed_offset),
                );
            }
        }

        Ok(committed)
    }

    async fn offset_commit(
        &mut self,
        coordinator: &Node,
        group_id: &str,
        generation_id: i32,
        member_id: &str,
        offsets: &BTreeMap<Topition, i64>,
        retention_time_ms: i64,
    ) -> Result<()> {
        let mut topics = BTreeMap::<String, Vec<OffsetCommitRequestPartition>>::new();

        for (topition, offset) in offsets {
            topics.entry(topition.topic().to_owned()).or_default().push(
                OffsetCommitRequestPartition::default()
                    .partition_index(topition.partition())
                    .committed_offset(*offset),
            );
        }

        let request = OffsetCommitRequest::default()
            .group_id(group_id)
            .generation_id(generation_id)
            .member_id(member_id)
            .retention_time_ms(retention_time_ms)
            .topics(topics.into_iter().map(|(name, partitions)| {
                OffsetCommitRequestTopic::default()
                    .name(name)
                    .partitions(partitions)
            }));

        let response = self.call(coordinator, request).await?;

        for topic in &response.topics {
            for partition in &topic.partitions {
                check(partition.error_code).inspect_err(|reason| {
                    error!(topic = %topic.name, partition = partition.partition_index, %reason)
                })?;
            }
        }

        Ok(())
    }

    async fn fetch(
        &mut self,
        offsets: &BTreeMap<Topition, i64>,
        max_wait_ms: i32,
    ) -> Result<FetchedRecords> {
        let mut result = FetchedRecords::new();
        let mut errors = BTreeMap::new();

        let topitions = offsets.keys().cloned().collect::<Vec<_>>();
        let routes = self.route(&topitions, &mut errors).await?;

        for (node, routed) in routes {
            let mut topics = BTreeMap::<String, Vec<FetchRequestPartition>>::new();

            for topition in &routed {
                topics.entry(topition.topic().to_owned()).or_default().push(
                    FetchRequestPartition::default()
                        .partition(topition.partition())
                        .fetch_offset(offsets[topition])
                        .partition_max_bytes(FETCH_PARTITION_MAX_BYTES),
                );
            }

            let request = FetchRequest::default()
                .replica_id(CONSUMER_REPLICA_ID)
                .max_wait_ms(max_wait_ms)
                .min_bytes(FETCH_MIN_BYTES)
                .topics(topics.into_iter().map(|(topic, partitions)| {
                    FetchRequestTopic::default()
                        .topic(topic)
                        .partitions(partitions)
                }));

            match self.call(&node, request).await {
                Ok(response) => {
                    for topic in response.responses {
                        for partition in topic.partitions {
                            let topition = Topition::new(&topic.topic, partition.partition_index);

                            match ErrorCode::try_from(partition.error_code)
                                .map_err(Error::from)?
                            {
                                ErrorCode::None => {
                                    if let Some(records) = partition.records {
                                        let batch = RecordBatch::try_from(records)
                                            .map_err(Error::from)?;

                                        if !batch.is_empty() {
                                            result.entry(topition).or_default().push(batch);
                                        }
                                    }
                                }

                                code @ (ErrorCode::NotLeaderOrFollower
                                | ErrorCode::LeaderNotAvailable) => {
                                    self.cluster.invalidate(&topic.topic);
                                    _ = errors.insert(topition, code);
                                }

                                code => {
                                    _ = errors.insert(topition, code);
                                }
                            }
                        }
                    }
                }

                Err(reason) => {
                    warn!(node.node_id, %reason);

                    for topition in routed {
                        _ = errors.insert(topition, ErrorCode::NetworkException);
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(result)
        } else {
            Err(Error::Fetch { result, errors })
        }
    }

    async fn list_offsets(
        &mut self,
        timestamps: &BTreeMap<Topition, i64>,
    ) -> Result<BTreeMap<Topition, Option<i64>>> {
        let mut unroutable = BTreeMap::new();

        let topitions = timestamps.keys().cloned().collect::<Vec<_>>();
        let routes = self.route(&topitions, &mut unroutable).await?;

        if let Some((topition, _)) = unroutable.pop_first() {
            return Err(Error::UnknownTopicOrPartition(topition));
        }

        let mut listed = BTreeMap::new();

        for (node, routed) in routes {
            let mut topics = BTreeMap::<String, Vec<ListOffsetsRequestPartition>>::new();

            for topition in &routed {
                topics.entry(topition.topic().to_owned()).or_default().push(
                    ListOffsetsRequestPartition::default()
                        .partition_index(topition.partition())
                        .timestamp(timestamps[topition])
                        .max_num_offsets(LIST_OFFSETS_SINGLE),
                );
            }

            let request = ListOffsetsRequest::default()
                .replica_id(CONSUMER_REPLICA_ID)
                .topics(topics.into_iter().map(|(name, partitions)| {
                    ListOffsetsRequestTopic::default()
                        .name(name)
                        .partitions(partitions)
                }));

            let response = self.call(&node, request).await?;

            for topic in response.topics {
                for partition in topic.partitions {
                    check(partition.error_code)?;

                    _ = listed.insert(
                        Topition::new(&topic.name, partition.partition_index),
                        partition.old_style_offsets.first().copied(),
                    );
                }
            }
        }

        Ok(listed)
    }

    async fn topic_partitions(&mut self, topics: &[String]) -> Result<BTreeMap<String, Vec<i32>>> {
        let missing = topics
            .iter()
            .filter(|topic| !self.cluster.contains_topic(topic))
            .cloned()
            .collect::<Vec<_>>();

        if !missing.is_empty() {
            _ = self.refresh_metadata(Some(missing)).await?;
        }

        topics
            .iter()
            .map(|topic| {
                self.cluster
                    .partitions_for_topic(topic)
                    .map(|partitions| {
                        let mut indexes = partitions
                            .iter()
                            .map(|partition| partition.partition_index)
                            .collect::<Vec<_>>();
                        indexes.sort_unstable();

                        (topic.clone(), indexes)
                    })
                    .ok_or(Error::Api(ErrorCode::UnknownTopicOrPartition))
            })
            .collect()
    }
}
