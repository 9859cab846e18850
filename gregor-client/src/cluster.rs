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

//! A cached view of the cluster: broker endpoints and partition leadership.

use std::collections::BTreeMap;

use gregor_sans_io::MetadataResponse;
use tracing::debug;
use url::Url;

use crate::Result;

/// A broker endpoint.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Node {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

impl Node {
    pub fn new(node_id: i32, host: impl Into<String>, port: i32) -> Self {
        Self {
            node_id,
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> Result<Url> {
        Url::parse(&format!("tcp://{}:{}", self.host, self.port)).map_err(Into::into)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PartitionMetadata {
    pub partition_index: i32,
    pub leader_id: i32,
}

/// Refreshed through the wire client on leadership errors and on topics not
/// yet seen; read by fetch routing and the group leader's assignor.
#[derive(Clone, Debug, Default)]
pub struct Cluster {
    brokers: BTreeMap<i32, Node>,
    topics: BTreeMap<String, Vec<PartitionMetadata>>,
}

impl Cluster {
    /// fold a metadata response into the cached view
    pub fn update(&mut self, metadata: &MetadataResponse) {
        self.brokers = metadata
            .brokers
            .iter()
            .map(|broker| {
                (
                    broker.node_id,
                    Node::new(broker.node_id, broker.host.as_str(), broker.port),
                )
            })
            .collect();

        for topic in &metadata.topics {
            if topic.error_code != 0 {
                debug!(topic = %topic.name, error_code = topic.error_code);
                continue;
            }

            _ = self.topics.insert(
                topic.name.clone(),
                topic
                    .partitions
                    .iter()
                    .map(|partition| PartitionMetadata {
                        partition_index: partition.partition_index,
                        leader_id: partition.leader_id,
                    })
                    .collect(),
            );
        }
    }

    pub fn brokers(&self) -> impl Iterator<Item = &Node> {
        self.brokers.values()
    }

    pub fn broker(&self, node_id: i32) -> Option<&Node> {
        self.brokers.get(&node_id)
    }

    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn partitions_for_topic(&self, topic: &str) -> Option<&[PartitionMetadata]> {
        self.topics.get(topic).map(Vec::as_slice)
    }

    pub fn leader_for(&self, topic: &str, partition: i32) -> Option<&Node> {
        self.topics.get(topic).and_then(|partitions| {
            partitions
                .iter()
                .find(|metadata| metadata.partition_index == partition)
                .and_then(|metadata| self.broker(metadata.leader_id))
        })
    }

    /// drop a topic whose leadership is known stale, forcing a refresh
    /// before its next use
    pub fn invalidate(&mut self, topic: &str) {
        _ = self.topics.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use gregor_sans_io::message::metadata::{
        MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic,
    };

    use super::*;

    fn metadata() -> MetadataResponse {
        MetadataResponse::default()
            .brokers([
                MetadataResponseBroker::default()
                    .node_id(1001)
                    .host("broker-0")
                    .port(9092),
                MetadataResponseBroker::default()
                    .node_id(1002)
                    .host("broker-1")
                    .port(9092),
            ])
            .controller_id(1001)
            .topics([MetadataResponseTopic::default().name("t").partitions([
                MetadataResponsePartition::default()
                    .partition_index(0)
                    .leader_id(1001),
                MetadataResponsePartition::default()
                    .partition_index(1)
                    .leader_id(1002),
            ])])
    }

    #[test]
    fn leadership() {
        let mut cluster = Cluster::default();
        cluster.update(&metadata());

        assert_eq!(2, cluster.brokers().count());
        assert_eq!(Some(1001), cluster.leader_for("t", 0).map(|node| node.node_id));
        assert_eq!(Some(1002), cluster.leader_for("t", 1).map(|node| node.node_id));
        assert_eq!(None, cluster.leader_for("t", 2));
        assert_eq!(None, cluster.leader_for("unknown", 0));

        assert_eq!(
            2,
            cluster
                .partitions_for_topic("t")
                .map(|partitions| partitions.len())
                .unwrap_or(0)
        );
    }

    #[test]
    fn invalidation() {
        let mut cluster = Cluster::default();
        cluster.update(&metadata());

        cluster.invalidate("t");
        assert!(!cluster.contains_topic("t"));
        assert!(cluster.leader_for("t", 0).is_none());

        // brokers survive topic invalidation
        assert!(cluster.broker(1001).is_some());
    }

    #[test]
    fn node_url() -> Result<()> {
        let url = Node::new(1001, "broker-0", 9092).url()?;
        assert_eq!(Some("broker-0"), url.host_str());
        assert_eq!(Some(9092), url.port());
        Ok(())
    }
}
