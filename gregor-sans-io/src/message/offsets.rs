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

//! Offset APIs: committed offset fetch and commit, log offset listing.
//!
//! The `-1` committed offset is the wire convention for "nothing committed";
//! it is translated into an option at the client boundary rather than
//! carried through consumer state.

use std::sync::LazyLock;

use crate::{
    Request, Response, Result,
    scheme::{Field, Kind, Scheme, Value},
};

/// ListOffsets timestamp requesting the earliest offset of a partition.
pub const EARLIEST_TIMESTAMP: i64 = -2;

/// ListOffsets timestamp requesting the latest offset of a partition.
pub const LATEST_TIMESTAMP: i64 = -1;

/// A committed offset of `-1` means nothing is committed for the partition.
pub const UNKNOWN_OFFSET: i64 = -1;

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetFetchRequest {
    pub group_id: String,
    pub topics: Vec<OffsetFetchRequestTopic>,
}

impl OffsetFetchRequest {
    pub fn group_id(self, group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..self
        }
    }

    pub fn topics(self, topics: impl IntoIterator<Item = OffsetFetchRequestTopic>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetFetchRequestTopic {
    pub name: String,
    pub partition_indexes: Vec<i32>,
}

impl OffsetFetchRequestTopic {
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn partition_indexes(self, partition_indexes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            partition_indexes: partition_indexes.into_iter().collect(),
            ..self
        }
    }
}

static OFFSET_FETCH_REQUEST_V1: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("group_id", Kind::String),
        Field::new(
            "topics",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("name", Kind::String),
                Field::new("partition_indexes", Kind::Array(Box::new(Kind::Int32))),
            ])))),
        ),
    ])
});

static OFFSET_FETCH_RESPONSE_V1: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([Field::new(
        "topics",
        Kind::Array(Box::new(Kind::Scheme(Scheme::new([
            Field::new("name", Kind::String),
            Field::new(
                "partitions",
                Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                    Field::new("partition_index", Kind::Int32),
                    Field::new("committed_offset", Kind::Int64),
                    Field::new("metadata", Kind::NullableString),
                    Field::new("error_code", Kind::Int16),
                ])))),
            ),
        ])))),
    )])
});

impl Request for OffsetFetchRequest {
    const KEY: i16 = 9;
    const MIN_VERSION: i16 = 1;
    const MAX_VERSION: i16 = 1;

    type Response = OffsetFetchResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &OFFSET_FETCH_REQUEST_V1
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::string(self.group_id),
            Value::array(self.topics.into_iter().map(|topic| {
                Value::record([
                    Value::string(topic.name),
                    Value::array(topic.partition_indexes.into_iter().map(Value::Int32)),
                ])
            })),
        ])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetFetchResponse {
    pub topics: Vec<OffsetFetchResponseTopic>,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetFetchResponseTopic {
    pub name: String,
    pub partitions: Vec<OffsetFetchResponsePartition>,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetFetchResponsePartition {
    pub partition_index: i32,
    pub committed_offset: i64,
    pub metadata: Option<String>,
    pub error_code: i16,
}

impl Response for OffsetFetchResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &OFFSET_FETCH_RESPONSE_V1
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            topics: fields
                .array()?
                .into_iter()
                .map(|topic| {
                    let mut fields = topic.into_fields()?;

                    Ok(OffsetFetchResponseTopic {
                        name: fields.string()?,
                        partitions: fields
                            .array()?
                            .into_iter()
                            .map(|partition| {
                                let mut fields = partition.into_fields()?;

                                Ok(OffsetFetchResponsePartition {
                                    partition_index: fields.int32()?,
                                    committed_offset: fields.int64()?,
                                    metadata: fields.nullable_string()?,
                                    error_code: fields.int16()?,
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::array(self.topics.into_iter().map(|topic| {
            Value::record([
                Value::string(topic.name),
                Value::array(topic.partitions.into_iter().map(|partition| {
                    Value::record([
                        Value::Int32(partition.partition_index),
                        Value::Int64(partition.committed_offset),
                        Value::nullable_string(partition.metadata),
                        Value::Int16(partition.error_code),
                    ])
                })),
            ])
        }))])
    }
}

/// OffsetCommit diverges between the versions this client speaks: v1 carries
/// a per partition commit timestamp, v2 replaces it with a request level
/// retention time.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetCommitRequest {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,

    /// how long the broker keeps the commit, `-1` for the broker default;
    /// only encoded at v2
    pub retention_time_ms: i64,
    pub topics: Vec<OffsetCommitRequestTopic>,
}

impl OffsetCommitRequest {
    pub fn group_id(self, group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..self
        }
    }

    pub fn generation_id(self, generation_id: i32) -> Self {
        Self {
            generation_id,
            ..self
        }
    }

    pub fn member_id(self, member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..self
        }
    }

    pub fn retention_time_ms(self, retention_time_ms: i64) -> Self {
        Self {
            retention_time_ms,
            ..self
        }
    }

    pub fn topics(self, topics: impl IntoIterator<Item = OffsetCommitRequestTopic>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetCommitRequestTopic {
    pub name: String,
    pub partitions: Vec<OffsetCommitRequestPartition>,
}

impl OffsetCommitRequestTopic {
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn partitions(
        self,
        partitions: impl IntoIterator<Item = OffsetCommitRequestPartition>,
    ) -> Self {
        Self {
            partitions: partitions.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetCommitRequestPartition {
    pub partition_index: i32,
    pub committed_offset: i64,
    pub committed_metadata: Option<String>,
}

impl OffsetCommitRequestPartition {
    pub fn partition_index(self, partition_index: i32) -> Self {
        Self {
            partition_index,
            ..self
        }
    }

    pub fn committed_offset(self, committed_offset: i64) -> Self {
        Self {
            committed_offset,
            ..self
        }
    }
}

static OFFSET_COMMIT_REQUEST_V1: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("group_id", Kind::String),
        Field::new("generation_id", Kind::Int32),
        Field::new("member_id", Kind::String),
        Field::new(
            "topics",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("name", Kind::String),
                Field::new(
                    "partitions",
                    Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                        Field::new("partition_index", Kind::Int32),
                        Field::new("committed_offset", Kind::Int64),
                        Field::new("commit_timestamp", Kind::Int64),
                        Field::new("committed_metadata", Kind::NullableString),
                    ])))),
                ),
            ])))),
        ),
    ])
});

static OFFSET_COMMIT_REQUEST_V2: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("group_id", Kind::String),
        Field::new("generation_id", Kind::Int32),
        Field::new("member_id", Kind::String),
        Field::new("retention_time_ms", Kind::Int64),
        Field::new(
            "topics",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("name", Kind::String),
                Field::new(
                    "partitions",
                    Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                        Field::new("partition_index", Kind::Int32),
                        Field::new("committed_offset", Kind::Int64),
                        Field::new("committed_metadata", Kind::NullableString),
                    ])))),
                ),
            ])))),
        ),
    ])
});

static OFFSET_COMMIT_RESPONSE: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([Field::new(
        "topics",
        Kind::Array(Box::new(Kind::Scheme(Scheme::new([
            Field::new("name", Kind::String),
            Field::new(
                "partitions",
                Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                    Field::new("partition_index", Kind::Int32),
                    Field::new("error_code", Kind::Int16),
                ])))),
            ),
        ])))),
    )])
});

/// Commit timestamps are broker assigned; `-1` leaves the v1 field to the
/// broker clock.
const RETAIN_BROKER_TIMESTAMP: i64 = -1;

impl Request for OffsetCommitRequest {
    const KEY: i16 = 8;
    const MIN_VERSION: i16 = 1;
    const MAX_VERSION: i16 = 2;

    type Response = OffsetCommitResponse;

    fn scheme(api_version: i16) -> &'static Scheme {
        if api_version >= 2 {
            &OFFSET_COMMIT_REQUEST_V2
        } else {
            &OFFSET_COMMIT_REQUEST_V1
        }
    }

    fn into_value(self, api_version: i16) -> Value {
        let topics = Value::array(self.topics.into_iter().map(|topic| {
            Value::record([
                Value::string(topic.name),
                Value::array(topic.partitions.into_iter().map(|partition| {
                    if api_version >= 2 {
                        Value::record([
                            Value::Int32(partition.partition_index),
                            Value::Int64(partition.committed_offset),
                            Value::nullable_string(partition.committed_metadata),
                        ])
                    } else {
                        Value::record([
                            Value::Int32(partition.partition_index),
                            Value::Int64(partition.committed_offset),
                            Value::Int64(RETAIN_BROKER_TIMESTAMP),
                            Value::nullable_string(partition.committed_metadata),
                        ])
                    }
                })),
            ])
        }));

        if api_version >= 2 {
            Value::record([
                Value::string(self.group_id),
                Value::Int32(self.generation_id),
                Value::string(self.member_id),
                Value::Int64(self.retention_time_ms),
                topics,
            ])
        } else {
            Value::record([
                Value::string(self.group_id),
                Value::Int32(self.generation_id),
                Value::string(self.member_id),
                topics,
            ])
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetCommitResponse {
    pub topics: Vec<OffsetCommitResponseTopic>,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetCommitResponseTopic {
    pub name: String,
    pub partitions: Vec<OffsetCommitResponsePartition>,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetCommitResponsePartition {
    pub partition_index: i32,
    pub error_code: i16,
}

impl Response for OffsetCommitResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &OFFSET_COMMIT_RESPONSE
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            topics: fields
                .array()?
                .into_iter()
                .map(|topic| {
                    let mut fields = topic.into_fields()?;

                    Ok(OffsetCommitResponseTopic {
                        name: fields.string()?,
                        partitions: fields
                            .array()?
                            .into_iter()
                            .map(|partition| {
                                let mut fields = partition.into_fields()?;

                                Ok(OffsetCommitResponsePartition {
                                    partition_index: fields.int32()?,
                                    error_code: fields.int16()?,
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::array(self.topics.into_iter().map(|topic| {
            Value::record([
                Value::string(topic.name),
                Value::array(topic.partitions.into_iter().map(|partition| {
                    Value::record([
                        Value::Int32(partition.partition_index),
                        Value::Int16(partition.error_code),
                    ])
                })),
            ])
        }))])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ListOffsetsRequest {
    pub replica_id: i32,
    pub topics: Vec<ListOffsetsRequestTopic>,
}

impl ListOffsetsRequest {
    pub fn replica_id(self, replica_id: i32) -> Self {
        Self { replica_id, ..self }
    }

    pub fn topics(self, topics: impl IntoIterator<Item = ListOffsetsRequestTopic>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ListOffsetsRequestTopic {
    pub name: String,
    pub partitions: Vec<ListOffsetsRequestPartition>,
}

impl ListOffsetsRequestTopic {
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn partitions(
        self,
        partitions: impl IntoIterator<Item = ListOffsetsRequestPartition>,
    ) -> Self {
        Self {
            partitions: partitions.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ListOffsetsRequestPartition {
    pub partition_index: i32,
    pub timestamp: i64,
    pub max_num_offsets: i32,
}

impl ListOffsetsRequestPartition {
    pub fn partition_index(self, partition_index: i32) -> Self {
        Self {
            partition_index,
            ..self
        }
    }

    pub fn timestamp(self, timestamp: i64) -> Self {
        Self { timestamp, ..self }
    }

    pub fn max_num_offsets(self, max_num_offsets: i32) -> Self {
        Self {
            max_num_offsets,
            ..self
        }
    }
}

static LIST_OFFSETS_REQUEST_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("replica_id", Kind::Int32),
        Field::new(
            "topics",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("name", Kind::String),
                Field::new(
                    "partitions",
                    Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                        Field::new("partition_index", Kind::Int32),
                        Field::new("timestamp", Kind::Int64),
                        Field::new("max_num_offsets", Kind::Int32),
                    ])))),
                ),
            ])))),
        ),
    ])
});

static LIST_OFFSETS_RESPONSE_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([Field::new(
        "topics",
        Kind::Array(Box::new(Kind::Scheme(Scheme::new([
            Field::new("name", Kind::String),
            Field::new(
                "partitions",
                Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                    Field::new("partition_index", Kind::Int32),
                    Field::new("error_code", Kind::Int16),
                    Field::new("old_style_offsets", Kind::Array(Box::new(Kind::Int64))),
                ])))),
            ),
        ])))),
    )])
});

impl Request for ListOffsetsRequest {
    const KEY: i16 = 2;
    const MIN_VERSION: i16 = 0;
    const MAX_VERSION: i16 = 0;

    type Response = ListOffsetsResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &LIST_OFFSETS_REQUEST_V0
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::Int32(self.replica_id),
            Value::array(self.topics.into_iter().map(|topic| {
                Value::record([
                    Value::string(topic.name),
                    Value::array(topic.partitions.into_iter().map(|partition| {
                        Value::record([
                            Value::Int32(partition.partition_index),
                            Value::Int64(partition.timestamp),
                            Value::Int32(partition.max_num_offsets),
                        ])
                    })),
                ])
            })),
        ])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ListOffsetsResponse {
    pub topics: Vec<ListOffsetsResponseTopic>,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ListOffsetsResponseTopic {
    pub name: String,
    pub partitions: Vec<ListOffsetsResponsePartition>,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ListOffsetsResponsePartition {
    pub partition_index: i32,
    pub error_code: i16,

    /// offsets at or before the requested timestamp, most recent first
    pub old_style_offsets: Vec<i64>,
}

impl Response for ListOffsetsResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &LIST_OFFSETS_RESPONSE_V0
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            topics: fields
                .array()?
                .into_iter()
                .map(|topic| {
                    let mut fields = topic.into_fields()?;

                    Ok(ListOffsetsResponseTopic {
                        name: fields.string()?,
                        partitions: fields
                            .array()?
                            .into_iter()
                            .map(|partition| {
                                let mut fields = partition.into_fields()?;

                                Ok(ListOffsetsResponsePartition {
                                    partition_index: fields.int32()?,
                                    error_code: fields.int16()?,
                                    old_style_offsets: fields
                                        .array()?
                                        .into_iter()
                                        .map(|offset| {
                                            if let Value::Int64(offset) = offset {
                                                Ok(offset)
                                            } else {
                                                Err(crate::Error::UnexpectedType {
                                                    field: "old_style_offsets",
                                                    kind: "Int64",
                                                })
                                            }
                                        })
                                        .collect::<Result<Vec<_>>>()?,
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::array(self.topics.into_iter().map(|topic| {
            Value::record([
                Value::string(topic.name),
                Value::array(topic.partitions.into_iter().map(|partition| {
                    Value::record([
                        Value::Int32(partition.partition_index),
                        Value::Int16(partition.error_code),
                        Value::array(partition.old_style_offsets.into_iter().map(Value::Int64)),
                    ])
                })),
            ])
        }))])
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Buf as _, Bytes, BytesMut};

    use super::*;
    use crate::Error;

    #[test]
    fn offset_commit_version_divergence() -> Result<(), Error> {
        let request = || {
            OffsetCommitRequest::default()
                .group_id("example")
                .generation_id(7)
                .member_id("m1")
                .retention_time_ms(86_400_000)
                .topics([OffsetCommitRequestTopic::default().name("t").partitions([
                    OffsetCommitRequestPartition::default()
                        .partition_index(0)
                        .committed_offset(13),
                ])])
        };

        let mut v1 = BytesMut::new();
        OffsetCommitRequest::scheme(1).encode(&request().into_value(1), &mut v1)?;

        let mut v2 = BytesMut::new();
        OffsetCommitRequest::scheme(2).encode(&request().into_value(2), &mut v2)?;

        // v2 inserts the retention time after the member id and drops the
        // per partition timestamp
        assert_ne!(v1, v2);

        let mut fields = OffsetCommitRequest::scheme(2).read(&mut Bytes::from(v2))?;
        assert_eq!("example", fields.string()?);
        assert_eq!(7, fields.int32()?);
        assert_eq!("m1", fields.string()?);
        assert_eq!(86_400_000, fields.int64()?);

        let mut remaining = Bytes::from(v1);
        _ = OffsetCommitRequest::scheme(1).decode(&mut remaining)?;
        assert_eq!(0, remaining.remaining());

        Ok(())
    }

    #[test]
    fn offset_fetch_round_trip() -> Result<(), Error> {
        let response = OffsetFetchResponse {
            topics: vec![OffsetFetchResponseTopic {
                name: "t".into(),
                partitions: vec![
                    OffsetFetchResponsePartition {
                        partition_index: 0,
                        committed_offset: 42,
                        metadata: None,
                        error_code: 0,
                    },
                    OffsetFetchResponsePartition {
                        partition_index: 1,
                        committed_offset: UNKNOWN_OFFSET,
                        metadata: None,
                        error_code: 0,
                    },
                ],
            }],
        };

        let mut encoded = BytesMut::new();
        OffsetFetchResponse::scheme(1).encode(&response.clone().into_value(1), &mut encoded)?;

        let mut remaining = Bytes::from(encoded);
        let value = OffsetFetchResponse::scheme(1).decode(&mut remaining)?;
        assert_eq!(response, OffsetFetchResponse::from_value(value, 1)?);

        Ok(())
    }
}
