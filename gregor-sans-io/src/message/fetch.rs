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

//! Fetching messages from partition leaders.

use std::sync::LazyLock;

use bytes::Bytes;

use crate::{
    Request, Response, Result,
    scheme::{Field, Kind, Scheme, Value},
};

/// A fetch from a consumer rather than a follower replica.
pub const CONSUMER_REPLICA_ID: i32 = -1;

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FetchRequest {
    pub replica_id: i32,
    pub max_wait_ms: i32,
    pub min_bytes: i32,
    pub topics: Vec<FetchRequestTopic>,
}

impl FetchRequest {
    pub fn replica_id(self, replica_id: i32) -> Self {
        Self { replica_id, ..self }
    }

    pub fn max_wait_ms(self, max_wait_ms: i32) -> Self {
        Self {
            max_wait_ms,
            ..self
        }
    }

    pub fn min_bytes(self, min_bytes: i32) -> Self {
        Self { min_bytes, ..self }
    }

    pub fn topics(self, topics: impl IntoIterator<Item = FetchRequestTopic>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FetchRequestTopic {
    pub topic: String,
    pub partitions: Vec<FetchRequestPartition>,
}

impl FetchRequestTopic {
    pub fn topic(self, topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..self
        }
    }

    pub fn partitions(self, partitions: impl IntoIterator<Item = FetchRequestPartition>) -> Self {
        Self {
            partitions: partitions.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FetchRequestPartition {
    pub partition: i32,
    pub fetch_offset: i64,
    pub partition_max_bytes: i32,
}

impl FetchRequestPartition {
    pub fn partition(self, partition: i32) -> Self {
        Self { partition, ..self }
    }

    pub fn fetch_offset(self, fetch_offset: i64) -> Self {
        Self {
            fetch_offset,
            ..self
        }
    }

    pub fn partition_max_bytes(self, partition_max_bytes: i32) -> Self {
        Self {
            partition_max_bytes,
            ..self
        }
    }
}

static FETCH_REQUEST_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("replica_id", Kind::Int32),
        Field::new("max_wait_ms", Kind::Int32),
        Field::new("min_bytes", Kind::Int32),
        Field::new(
            "topics",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("topic", Kind::String),
                Field::new(
                    "partitions",
                    Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                        Field::new("partition", Kind::Int32),
                        Field::new("fetch_offset", Kind::Int64),
                        Field::new("partition_max_bytes", Kind::Int32),
                    ])))),
                ),
            ])))),
        ),
    ])
});

static FETCH_RESPONSE_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([Field::new(
        "responses",
        Kind::Array(Box::new(Kind::Scheme(Scheme::new([
            Field::new("topic", Kind::String),
            Field::new(
                "partitions",
                Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                    Field::new("partition_index", Kind::Int32),
                    Field::new("error_code", Kind::Int16),
                    Field::new("high_watermark", Kind::Int64),
                    Field::new("records", Kind::NullableBytes),
                ])))),
            ),
        ])))),
    )])
});

impl Request for FetchRequest {
    const KEY: i16 = 1;
    const MIN_VERSION: i16 = 0;
    const MAX_VERSION: i16 = 0;

    type Response = FetchResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &FETCH_REQUEST_V0
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::Int32(self.replica_id),
            Value::Int32(self.max_wait_ms),
            Value::Int32(self.min_bytes),
            Value::array(self.topics.into_iter().map(|topic| {
                Value::record([
                    Value::string(topic.topic),
                    Value::array(topic.partitions.into_iter().map(|partition| {
                        Value::record([
                            Value::Int32(partition.partition),
                            Value::Int64(partition.fetch_offset),
                            Value::Int32(partition.partition_max_bytes),
                        ])
                    })),
                ])
            })),
        ])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FetchResponse {
    pub responses: Vec<FetchResponseTopic>,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FetchResponseTopic {
    pub topic: String,
    pub partitions: Vec<FetchResponsePartition>,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FetchResponsePartition {
    pub partition_index: i32,
    pub error_code: i16,
    pub high_watermark: i64,

    /// an undecoded message set, possibly ending in a truncated trailing
    /// message
    pub records: Option<Bytes>,
}

impl Response for FetchResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &FETCH_RESPONSE_V0
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            responses: fields
                .array()?
                .into_iter()
                .map(|topic| {
                    let mut fields = topic.into_fields()?;

                    Ok(FetchResponseTopic {
                        topic: fields.string()?,
                        partitions: fields
                            .array()?
                            .into_iter()
                            .map(|partition| {
                                let mut fields = partition.into_fields()?;

                                Ok(FetchResponsePartition {
                                    partition_index: fields.int32()?,
                                    error_code: fields.int16()?,
                                    high_watermark: fields.int64()?,
                                    records: fields.nullable_bytes()?,
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::array(self.responses.into_iter().map(|topic| {
            Value::record([
                Value::string(topic.topic),
                Value::array(topic.partitions.into_iter().map(|partition| {
                    Value::record([
                        Value::Int32(partition.partition_index),
                        Value::Int16(partition.error_code),
                        Value::Int64(partition.high_watermark),
                        Value::nullable_bytes(partition.records),
                    ])
                })),
            ])
        }))])
    }
}
