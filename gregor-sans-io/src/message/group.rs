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

//! Group membership APIs: coordinator lookup, join, sync, heartbeat, leave.

use std::sync::LazyLock;

use bytes::Bytes;

use crate::{
    Request, Response, Result,
    scheme::{Field, Kind, Scheme, Value},
};

/// FindCoordinator locates the broker owning a group's membership and
/// committed offsets.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FindCoordinatorRequest {
    pub key: String,
}

impl FindCoordinatorRequest {
    pub fn key(self, key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

static FIND_COORDINATOR_REQUEST_V0: LazyLock<Scheme> =
    LazyLock::new(|| Scheme::new([Field::new("key", Kind::String)]));

static FIND_COORDINATOR_RESPONSE_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("error_code", Kind::Int16),
        Field::new("node_id", Kind::Int32),
        Field::new("host", Kind::String),
        Field::new("port", Kind::Int32),
    ])
});

impl Request for FindCoordinatorRequest {
    const KEY: i16 = 10;
    const MIN_VERSION: i16 = 0;
    const MAX_VERSION: i16 = 0;

    type Response = FindCoordinatorResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &FIND_COORDINATOR_REQUEST_V0
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::string(self.key)])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FindCoordinatorResponse {
    pub error_code: i16,
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

impl FindCoordinatorResponse {
    pub fn error_code(self, error_code: i16) -> Self {
        Self { error_code, ..self }
    }

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
}

impl Response for FindCoordinatorResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &FIND_COORDINATOR_RESPONSE_V0
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            error_code: fields.int16()?,
            node_id: fields.int32()?,
            host: fields.string()?,
            port: fields.int32()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::Int16(self.error_code),
            Value::Int32(self.node_id),
            Value::string(self.host),
            Value::Int32(self.port),
        ])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JoinGroupRequest {
    pub group_id: String,
    pub session_timeout_ms: i32,
    pub rebalance_timeout_ms: i32,
    pub member_id: String,
    pub protocol_type: String,
    pub protocols: Vec<JoinGroupRequestProtocol>,
}

impl JoinGroupRequest {
    pub fn group_id(self, group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..self
        }
    }

    pub fn session_timeout_ms(self, session_timeout_ms: i32) -> Self {
        Self {
            session_timeout_ms,
            ..self
        }
    }

    pub fn rebalance_timeout_ms(self, rebalance_timeout_ms: i32) -> Self {
        Self {
            rebalance_timeout_ms,
            ..self
        }
    }

    pub fn member_id(self, member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..self
        }
    }

    pub fn protocol_type(self, protocol_type: impl Into<String>) -> Self {
        Self {
            protocol_type: protocol_type.into(),
            ..self
        }
    }

    pub fn protocols(self, protocols: impl IntoIterator<Item = JoinGroupRequestProtocol>) -> Self {
        Self {
            protocols: protocols.into_iter().collect(),
            ..self
        }
    }
}

/// An assignment strategy offered by a joining member, named on the wire,
/// carrying its serialized subscription.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JoinGroupRequestProtocol {
    pub name: String,
    pub metadata: Bytes,
}

impl JoinGroupRequestProtocol {
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn metadata(self, metadata: Bytes) -> Self {
        Self { metadata, ..self }
    }
}

static JOIN_GROUP_REQUEST_V1: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("group_id", Kind::String),
        Field::new("session_timeout_ms", Kind::Int32),
        Field::new("rebalance_timeout_ms", Kind::Int32),
        Field::new("member_id", Kind::String),
        Field::new("protocol_type", Kind::String),
        Field::new(
            "protocols",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("name", Kind::String),
                Field::new("metadata", Kind::Bytes),
            ])))),
        ),
    ])
});

static JOIN_GROUP_RESPONSE_V1: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("error_code", Kind::Int16),
        Field::new("generation_id", Kind::Int32),
        Field::new("protocol_name", Kind::String),
        Field::new("leader", Kind::String),
        Field::new("member_id", Kind::String),
        Field::new(
            "members",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("member_id", Kind::String),
                Field::new("metadata", Kind::Bytes),
            ])))),
        ),
    ])
});

impl Request for JoinGroupRequest {
    const KEY: i16 = 11;
    const MIN_VERSION: i16 = 1;
    const MAX_VERSION: i16 = 1;

    type Response = JoinGroupResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &JOIN_GROUP_REQUEST_V1
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::string(self.group_id),
            Value::Int32(self.session_timeout_ms),
            Value::Int32(self.rebalance_timeout_ms),
            Value::string(self.member_id),
            Value::string(self.protocol_type),
            Value::array(self.protocols.into_iter().map(|protocol| {
                Value::record([
                    Value::string(protocol.name),
                    Value::bytes(protocol.metadata),
                ])
            })),
        ])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JoinGroupResponse {
    pub error_code: i16,
    pub generation_id: i32,
    pub protocol_name: String,
    pub leader: String,
    pub member_id: String,

    /// present only in the response given to the group leader
    pub members: Vec<JoinGroupResponseMember>,
}

impl JoinGroupResponse {
    pub fn error_code(self, error_code: i16) -> Self {
        Self { error_code, ..self }
    }

    pub fn generation_id(self, generation_id: i32) -> Self {
        Self {
            generation_id,
            ..self
        }
    }

    pub fn protocol_name(self, protocol_name: impl Into<String>) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            ..self
        }
    }

    pub fn leader(self, leader: impl Into<String>) -> Self {
        Self {
            leader: leader.into(),
            ..self
        }
    }

    pub fn member_id(self, member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..self
        }
    }

    pub fn members(self, members: impl IntoIterator<Item = JoinGroupResponseMember>) -> Self {
        Self {
            members: members.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JoinGroupResponseMember {
    pub member_id: String,
    pub metadata: Bytes,
}

impl JoinGroupResponseMember {
    pub fn member_id(self, member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..self
        }
    }

    pub fn metadata(self, metadata: Bytes) -> Self {
        Self { metadata, ..self }
    }
}

impl Response for JoinGroupResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &JOIN_GROUP_RESPONSE_V1
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            error_code: fields.int16()?,
            generation_id: fields.int32()?,
            protocol_name: fields.string()?,
            leader: fields.string()?,
            member_id: fields.string()?,
            members: fields
                .array()?
                .into_iter()
                .map(|member| {
                    let mut fields = member.into_fields()?;

                    Ok(JoinGroupResponseMember {
                        member_id: fields.string()?,
                        metadata: fields.bytes()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::Int16(self.error_code),
            Value::Int32(self.generation_id),
            Value::string(self.protocol_name),
            Value::string(self.leader),
            Value::string(self.member_id),
            Value::array(self.members.into_iter().map(|member| {
                Value::record([Value::string(member.member_id), Value::bytes(member.metadata)])
            })),
        ])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SyncGroupRequest {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,

    /// populated by the group leader with every member's assignment, empty
    /// from followers
    pub assignments: Vec<SyncGroupRequestAssignment>,
}

impl SyncGroupRequest {
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

    pub fn assignments(
        self,
        assignments: impl IntoIterator<Item = SyncGroupRequestAssignment>,
    ) -> Self {
        Self {
            assignments: assignments.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SyncGroupRequestAssignment {
    pub member_id: String,
    pub assignment: Bytes,
}

impl SyncGroupRequestAssignment {
    pub fn member_id(self, member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..self
        }
    }

    pub fn assignment(self, assignment: Bytes) -> Self {
        Self { assignment, ..self }
    }
}

static SYNC_GROUP_REQUEST_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("group_id", Kind::String),
        Field::new("generation_id", Kind::Int32),
        Field::new("member_id", Kind::String),
        Field::new(
            "assignments",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("member_id", Kind::String),
                Field::new("assignment", Kind::Bytes),
            ])))),
        ),
    ])
});

static SYNC_GROUP_RESPONSE_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("error_code", Kind::Int16),
        Field::new("assignment", Kind::Bytes),
    ])
});

impl Request for SyncGroupRequest {
    const KEY: i16 = 14;
    const MIN_VERSION: i16 = 0;
    const MAX_VERSION: i16 = 0;

    type Response = SyncGroupResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &SYNC_GROUP_REQUEST_V0
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::string(self.group_id),
            Value::Int32(self.generation_id),
            Value::string(self.member_id),
            Value::array(self.assignments.into_iter().map(|assignment| {
                Value::record([
                    Value::string(assignment.member_id),
                    Value::bytes(assignment.assignment),
                ])
            })),
        ])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SyncGroupResponse {
    pub error_code: i16,
    pub assignment: Bytes,
}

impl SyncGroupResponse {
    pub fn error_code(self, error_code: i16) -> Self {
        Self { error_code, ..self }
    }

    pub fn assignment(self, assignment: Bytes) -> Self {
        Self { assignment, ..self }
    }
}

impl Response for SyncGroupResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &SYNC_GROUP_RESPONSE_V0
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            error_code: fields.int16()?,
            assignment: fields.bytes()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::Int16(self.error_code), Value::bytes(self.assignment)])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HeartbeatRequest {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
}

impl HeartbeatRequest {
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
}

static HEARTBEAT_REQUEST_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("group_id", Kind::String),
        Field::new("generation_id", Kind::Int32),
        Field::new("member_id", Kind::String),
    ])
});

static ERROR_CODE_ONLY: LazyLock<Scheme> =
    LazyLock::new(|| Scheme::new([Field::new("error_code", Kind::Int16)]));

impl Request for HeartbeatRequest {
    const KEY: i16 = 12;
    const MIN_VERSION: i16 = 0;
    const MAX_VERSION: i16 = 0;

    type Response = HeartbeatResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &HEARTBEAT_REQUEST_V0
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::string(self.group_id),
            Value::Int32(self.generation_id),
            Value::string(self.member_id),
        ])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HeartbeatResponse {
    pub error_code: i16,
}

impl HeartbeatResponse {
    pub fn error_code(self, error_code: i16) -> Self {
        Self { error_code }
    }
}

impl Response for HeartbeatResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &ERROR_CODE_ONLY
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            error_code: fields.int16()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::Int16(self.error_code)])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LeaveGroupRequest {
    pub group_id: String,
    pub member_id: String,
}

impl LeaveGroupRequest {
    pub fn group_id(self, group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..self
        }
    }

    pub fn member_id(self, member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..self
        }
    }
}

static LEAVE_GROUP_REQUEST_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("group_id", Kind::String),
        Field::new("member_id", Kind::String),
    ])
});

impl Request for LeaveGroupRequest {
    const KEY: i16 = 13;
    const MIN_VERSION: i16 = 0;
    const MAX_VERSION: i16 = 0;

    type Response = LeaveGroupResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &LEAVE_GROUP_REQUEST_V0
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::string(self.group_id), Value::string(self.member_id)])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LeaveGroupResponse {
    pub error_code: i16,
}

impl LeaveGroupResponse {
    pub fn error_code(self, error_code: i16) -> Self {
        Self { error_code }
    }
}

impl Response for LeaveGroupResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &ERROR_CODE_ONLY
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            error_code: fields.int16()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([Value::Int16(self.error_code)])
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Buf as _, Bytes};

    use super::*;
    use crate::{Error, Frame, Header};

    #[test]
    fn join_group_request_frame() -> Result<(), Error> {
        let request = JoinGroupRequest::default()
            .group_id("example")
            .session_timeout_ms(10_000)
            .rebalance_timeout_ms(60_000)
            .member_id("")
            .protocol_type("consumer")
            .protocols([JoinGroupRequestProtocol::default()
                .name("range")
                .metadata(Bytes::from_static(&[0, 0]))]);

        let encoded = Frame::request(
            Header::Request {
                api_key: JoinGroupRequest::KEY,
                api_version: 1,
                correlation_id: 7,
                client_id: None,
            },
            &request.into_value(1),
            JoinGroupRequest::scheme(1),
        )?;

        let (header, body) = Frame::request_from_bytes(encoded)?;

        assert_eq!(
            Header::Request {
                api_key: 11,
                api_version: 1,
                correlation_id: 7,
                client_id: None,
            },
            header
        );

        let mut remaining = body;
        let decoded = JoinGroupRequest::scheme(1).decode(&mut remaining)?;
        assert_eq!(0, remaining.remaining());

        let mut fields = decoded.into_fields()?;
        assert_eq!("example", fields.string()?);
        assert_eq!(10_000, fields.int32()?);

        Ok(())
    }

    #[test]
    fn join_group_response_round_trip() -> Result<(), Error> {
        let response = JoinGroupResponse::default()
            .error_code(0)
            .generation_id(7)
            .protocol_name("range")
            .leader("m0")
            .member_id("m1")
            .members([
                JoinGroupResponseMember::default()
                    .member_id("m0")
                    .metadata(Bytes::from_static(&[0, 0, 0, 0])),
                JoinGroupResponseMember::default()
                    .member_id("m1")
                    .metadata(Bytes::from_static(&[0, 0, 0, 0])),
            ]);

        let encoded = Frame::response(
            33,
            &response.clone().into_value(1),
            JoinGroupResponse::scheme(1),
        )?;

        let (correlation_id, value) =
            Frame::response_from_bytes(encoded, JoinGroupResponse::scheme(1))?;

        assert_eq!(33, correlation_id);
        assert_eq!(response, JoinGroupResponse::from_value(value, 1)?);

        Ok(())
    }

    #[test]
    fn sync_group_response_round_trip() -> Result<(), Error> {
        let response = SyncGroupResponse::default()
            .error_code(0)
            .assignment(Bytes::from_static(&[0, 0, 0, 0, 0, 0]));

        let encoded = Frame::response(
            34,
            &response.clone().into_value(0),
            SyncGroupResponse::scheme(0),
        )?;

        let (_, value) = Frame::response_from_bytes(encoded, SyncGroupResponse::scheme(0))?;
        assert_eq!(response, SyncGroupResponse::from_value(value, 0)?);

        Ok(())
    }
}
