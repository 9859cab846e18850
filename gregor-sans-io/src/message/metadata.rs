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

//! Cluster metadata: broker endpoints and partition leadership.

use std::sync::LazyLock;

use crate::{
    Request, Response, Result,
    scheme::{Field, Kind, Scheme, Value},
};

/// A null topic list requests metadata for every topic in the cluster.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MetadataRequest {
    pub topics: Option<Vec<String>>,
}

impl MetadataRequest {
    pub fn topics(self, topics: Option<Vec<String>>) -> Self {
        Self { topics }
    }
}

static METADATA_REQUEST_V2: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([Field::new(
        "topics",
        Kind::NullableArray(Box::new(Kind::String)),
    )])
});

static METADATA_RESPONSE_V2: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new(
            "brokers",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("node_id", Kind::Int32),
                Field::new("host", Kind::String),
                Field::new("port", Kind::Int32),
                Field::new("rack", Kind::NullableString),
            ])))),
        ),
        Field::new("cluster_id", Kind::NullableString),
        Field::new("controller_id", Kind::Int32),
        Field::new(
            "topics",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("error_code", Kind::Int16),
                Field::new("name", Kind::String),
                Field::new("is_internal", Kind::Int8),
                Field::new(
                    "partitions",
                    Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                        Field::new("error_code", Kind::Int16),
                        Field::new("partition_index", Kind::Int32),
                        Field::new("leader_id", Kind::Int32),
                        Field::new("replica_nodes", Kind::Array(Box::new(Kind::Int32))),
                        Field::new("isr_nodes", Kind::Array(Box::new(Kind::Int32))),
                    ])))),
                ),
            ])))),
        ),
    ])
});

impl Request for MetadataRequest {
    const KEY: i16 = 3;
    const MIN_VERSION: i16 = 2;
    const MAX_VERSION: i16 = 2;

    type Response = MetadataResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &METADATA_REQUEST_V2
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::Array(
            self.topics
                .map(|topics| topics.into_iter().map(Value::string).collect()),
        )])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MetadataResponse {
    pub brokers: Vec<MetadataResponseBroker>,
    pub cluster_id: Option<String>,
    pub controller_id: i32,
    pub topics: Vec<MetadataResponseTopic>,
}

impl MetadataResponse {
    pub fn brokers(self, brokers: impl IntoIterator<Item = MetadataResponseBroker>) -> Self {
        Self {
            brokers: brokers.into_iter().collect(),
            ..self
        }
    }

    pub fn cluster_id(self, cluster_id: Option<String>) -> Self {
        Self { cluster_id, ..self }
    }

    pub fn controller_id(self, controller_id: i32) -> Self {
        Self {
            controller_id,
            ..self
        }
    }

    pub fn topics(self, topics: impl IntoIterator<Item = MetadataResponseTopic>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MetadataResponseBroker {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

impl MetadataResponseBroker {
    pub fn node_id(self, node_id: i32) -> Self {
        Self { node_id, ..self }
    }

    pub fn host(self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self
        }
    }

    pub fn port(self, port: i32) -> Self {
        Self { port, ..self }
    }

    pub fn rack(self, rack: Option<String>) -> Self {
        Self { rack, ..self }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MetadataResponseTopic {
    pub error_code: i16,
    pub name: String,
    pub is_internal: bool,
    pub partitions: Vec<MetadataResponsePartition>,
}

impl MetadataResponseTopic {
    pub fn error_code(self, error_code: i16) -> Self {
        Self { error_code, ..self }
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn partitions(self, partitions: impl IntoIterator<Item = MetadataResponsePartition>) -> Self {
        Self {
            partitions: partitions.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MetadataResponsePartition {
    pub error_code: i16,
    pub partition_index: i32,
    pub leader_id: i32,
    pub replica_nodes: Vec<i32>,
    pub isr_nodes: Vec<i32>,
}

impl MetadataResponsePartition {
    pub fn error_code(self, error_code: i16) -> Self {
        Self { error_code, ..self }
    }

    pub fn partition_index(self, partition_index: i32) -> Self {
        Self {
            partition_index,
            ..self
        }
    }

    pub fn leader_id(self, leader_id: i32) -> Self {
        Self { leader_id, ..self }
    }
}

impl Response for MetadataResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &METADATA_RESPONSE_V2
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        let brokers = fields
            .array()?
            .into_iter()
            .map(|broker| {
                let mut fields = broker.into_fields()?;

                Ok(MetadataResponseBroker {
                    node_id: fields.int32()?,
                    host: fields.string()?,
                    port: fields.int32()?,
                    rack: fields.nullable_string()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let cluster_id = fields.nullable_string()?;
        let controller_id = fields.int32()?;

        let topics = fields
            .array()?
            .into_iter()
            .map(|topic| {
                let mut fields = topic.into_fields()?;

                Ok(MetadataResponseTopic {
                    error_code: fields.int16()?,
                    name: fields.string()?,
                    is_internal: fields.int8()? != 0,
                    partitions: fields
                        .array()?
                        .into_iter()
                        .map(|partition| {
                            let mut fields = partition.into_fields()?;

                            Ok(MetadataResponsePartition {
                                error_code: fields.int16()?,
                                partition_index: fields.int32()?,
                                leader_id: fields.int32()?,
                                replica_nodes: ints(fields.array()?)?,
                                isr_nodes: ints(fields.array()?)?,
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            brokers,
            cluster_id,
            controller_id,
            topics,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::array(self.brokers.into_iter().map(|broker| {
                Value::record([
                    Value::Int32(broker.node_id),
                    Value::string(broker.host),
                    Value::Int32(broker.port),
                    Value::nullable_string(broker.rack),
                ])
            })),
            Value::nullable_string(self.cluster_id),
            Value::Int32(self.controller_id),
            Value::array(self.topics.into_iter().map(|topic| {
                Value::record([
                    Value::Int16(topic.error_code),
                    Value::string(topic.name),
                    Value::Int8(topic.is_internal as i8),
                    Value::array(topic.partitions.into_iter().map(|partition| {
                        Value::record([
                            Value::Int16(partition.error_code),
                            Value::Int32(partition.partition_index),
                            Value::Int32(partition.leader_id),
                            Value::array(partition.replica_nodes.into_iter().map(Value::Int32)),
                            Value::array(partition.isr_nodes.into_iter().map(Value::Int32)),
                        ])
                    })),
                ])
            })),
        ])
    }
}

fn ints(values: Vec<Value>) -> Result<Vec<i32>> {
    values
        .into_iter()
        .map(|value| {
            if let Value::Int32(i) = value {
                Ok(i)
            } else {
                Err(crate::Error::UnexpectedType {
                    field: "node",
                    kind: "Int32",
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Frame};

    #[test]
    fn metadata_response_round_trip() -> Result<(), Error> {
        let response = MetadataResponse::default()
            .brokers([
                MetadataResponseBroker::default()
                    .node_id(1001)
                    .host("localhost")
                    .port(9092),
                MetadataResponseBroker::default()
                    .node_id(1002)
                    .host("localhost")
                    .port(9093)
                    .rack(Some("eu-west-1a".into())),
            ])
            .cluster_id(Some("abc".into()))
            .controller_id(1001)
            .topics([MetadataResponseTopic::default().name("balances").partitions(
                (0..3).map(|partition_index| {
                    MetadataResponsePartition::default()
                        .partition_index(partition_index)
                        .leader_id(1001 + (partition_index % 2))
                }),
            )]);

        let encoded = Frame::response(
            298,
            &response.clone().into_value(2),
            MetadataResponse::scheme(2),
        )?;

        let (correlation_id, value) =
            Frame::response_from_bytes(encoded, MetadataResponse::scheme(2))?;

        assert_eq!(298, correlation_id);
        assert_eq!(response, MetadataResponse::from_value(value, 2)?);

        Ok(())
    }
}
