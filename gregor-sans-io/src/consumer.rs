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

//! The consumer group protocol payloads embedded in join and sync.
//!
//! A joining member offers its [`Subscription`] as the metadata of each
//! protocol it supports; the group leader answers sync with one serialized
//! [`MemberAssignment`] per member.

use std::sync::LazyLock;

use bytes::{Bytes, BytesMut};

use crate::{
    Error, Result,
    scheme::{Field, Kind, Scheme, Value},
};

pub mod assignor;

pub use assignor::{Assignor, GroupMember, RangeAssignor, RoundRobinAssignor};

/// The protocol type carried by consumer group members in join.
pub const CONSUMER: &str = "consumer";

/// The payload version written by this client.
pub const VERSION: i16 = 0;

static SUBSCRIPTION: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("version", Kind::Int16),
        Field::new("topics", Kind::Array(Box::new(Kind::String))),
        Field::new("user_data", Kind::NullableBytes),
    ])
});

static MEMBER_ASSIGNMENT: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("version", Kind::Int16),
        Field::new(
            "assigned_partitions",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("topic", Kind::String),
                Field::new("partitions", Kind::Array(Box::new(Kind::Int32))),
            ])))),
        ),
        Field::new("user_data", Kind::NullableBytes),
    ])
});

/// The topics a member wants to consume.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Subscription {
    pub version: i16,
    pub topics: Vec<String>,
    pub user_data: Option<Bytes>,
}

impl Subscription {
    pub fn version(self, version: i16) -> Self {
        Self { version, ..self }
    }

    pub fn topics(self, topics: impl IntoIterator<Item = String>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            ..self
        }
    }

    pub fn user_data(self, user_data: Option<Bytes>) -> Self {
        Self { user_data, ..self }
    }
}

impl TryFrom<Bytes> for Subscription {
    type Error = Error;

    fn try_from(value: Bytes) -> Result<Self, Self::Error> {
        let mut encoded = value;
        let mut fields = SUBSCRIPTION.read(&mut encoded)?;

        Ok(Self {
            version: fields.int16()?,
            topics: fields
                .array()?
                .into_iter()
                .map(|topic| {
                    if let Value::String(Some(topic)) = topic {
                        Ok(topic)
                    } else {
                        Err(Error::UnexpectedType {
                            field: "topics",
                            kind: "String",
                        })
                    }
                })
                .collect::<Result<Vec<_>>>()?,
            user_data: fields.nullable_bytes()?,
        })
    }
}

impl TryFrom<&Subscription> for Bytes {
    type Error = Error;

    fn try_from(value: &Subscription) -> Result<Self, Self::Error> {
        let mut encoded = BytesMut::new();

        SUBSCRIPTION
            .encode(
                &Value::record([
                    Value::Int16(value.version),
                    Value::array(value.topics.iter().map(Value::string)),
                    Value::nullable_bytes(value.user_data.clone()),
                ]),
                &mut encoded,
            )
            .and(Ok(Bytes::from(encoded)))
    }
}

/// The partitions of one topic within an assignment.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TopicPartition {
    pub topic: String,
    pub partitions: Vec<i32>,
}

impl TopicPartition {
    pub fn topic(self, topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..self
        }
    }

    pub fn partitions(self, partitions: impl IntoIterator<Item = i32>) -> Self {
        Self {
            partitions: partitions.into_iter().collect(),
            ..self
        }
    }
}

/// The partitions a member is given for one generation.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MemberAssignment {
    pub version: i16,
    pub assigned_partitions: Vec<TopicPartition>,
    pub user_data: Option<Bytes>,
}

impl MemberAssignment {
    pub fn version(self, version: i16) -> Self {
        Self { version, ..self }
    }

    pub fn assigned_partitions(
        self,
        assigned_partitions: impl IntoIterator<Item = TopicPartition>,
    ) -> Self {
        Self {
            assigned_partitions: assigned_partitions.into_iter().collect(),
            ..self
        }
    }

    pub fn user_data(self, user_data: Option<Bytes>) -> Self {
        Self { user_data, ..self }
    }
}

impl TryFrom<Bytes> for MemberAssignment {
    type Error = Error;

    fn try_from(value: Bytes) -> Result<Self, Self::Error> {
        let mut encoded = value;
        let mut fields = MEMBER_ASSIGNMENT.read(&mut encoded)?;

        Ok(Self {
            version: fields.int16()?,
            assigned_partitions: fields
                .array()?
                .into_iter()
                .map(|topic| {
                    let mut fields = topic.into_fields()?;

                    Ok(TopicPartition {
                        topic: fields.string()?,
                        partitions: fields
                            .array()?
                            .into_iter()
                            .map(|partition| {
                                if let Value::Int32(partition) = partition {
                                    Ok(partition)
                                } else {
                                    Err(Error::UnexpectedType {
                                        field: "partitions",
                                        kind: "Int32",
                                    })
                                }
                            })
                            .collect::<Result<Vec<_>>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            user_data: fields.nullable_bytes()?,
        })
    }
}

impl TryFrom<&MemberAssignment> for Bytes {
    type Error = Error;

    fn try_from(value: &MemberAssignment) -> Result<Self, Self::Error> {
        let mut encoded = BytesMut::new();

        MEMBER_ASSIGNMENT
            .encode(
                &Value::record([
                    Value::Int16(value.version),
                    Value::array(value.assigned_partitions.iter().map(|topic| {
                        Value::record([
                            Value::string(&topic.topic),
                            Value::array(topic.partitions.iter().copied().map(Value::Int32)),
                        ])
                    })),
                    Value::nullable_bytes(value.user_data.clone()),
                ]),
                &mut encoded,
            )
            .and(Ok(Bytes::from(encoded)))
    }
}
