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

//! A Kafka protocol implementation that performs no I/O (it operates only on bytes)
//!
//! ## Design
//!
//! Each API message is described once by a [`scheme::Scheme`]: an ordered
//! list of named wire types. Requests encode by walking the scheme and a
//! [`scheme::Value`] together; responses decode the same way. The
//! [`Request`] and [`Response`] traits bind an API key and its supported
//! version range to the schemes and struct conversions, so the version
//! specific parts of the protocol stay in one place per message.
//!
//! Some useful starting points:
//!
//! - **Data structures** - [`Frame`], [`Header`], [`Request`] and [`Response`].
//! - **Group membership payloads** - [`consumer`].
//! - **Fetched messages** - [`record`].

pub mod consumer;
pub mod message;
pub mod record;
pub mod scheme;

pub use message::{
    ApiVersionsRequest, ApiVersionsResponse, EARLIEST_TIMESTAMP, FetchRequest, FetchResponse,
    FindCoordinatorRequest, FindCoordinatorResponse, HeartbeatRequest, HeartbeatResponse,
    JoinGroupRequest, JoinGroupResponse, LATEST_TIMESTAMP, LeaveGroupRequest, LeaveGroupResponse,
    ListOffsetsRequest, ListOffsetsResponse, MetadataRequest, MetadataResponse,
    OffsetCommitRequest, OffsetCommitResponse, OffsetFetchRequest, OffsetFetchResponse,
    SyncGroupRequest, SyncGroupResponse,
};

use std::{
    array::TryFromSliceError,
    fmt::{self, Display, Formatter},
    io, num, string,
    sync::{Arc, LazyLock},
};

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut, TryGetError};
use tracing::debug;

use crate::scheme::{Field, Kind, Scheme, Value};

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    Api(ErrorCode),
    CorruptCrc { expected: u32, computed: u32 },
    FromUtf8(#[from] string::FromUtf8Error),
    Io(Arc<io::Error>),
    LengthBeyondMaximum { field: &'static str, length: i32 },
    Message(String),
    NullField(&'static str),
    ResponseFrame,
    Truncated(&'static str),
    TryFromInt(#[from] num::TryFromIntError),
    TryFromSlice(#[from] TryFromSliceError),
    TryGet(Arc<TryGetError>),
    UnexpectedType { field: &'static str, kind: &'static str },
    UnknownApiErrorCode(i16),
    UnknownAssignor(String),
    UnknownCompressionType(i8),
    UnsupportedApiVersion { api_key: i16, api_version: i16 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Api(code) => write!(f, "{code}"),
            Error::Message(msg) => f.write_str(msg),
            error => write!(f, "{error:?}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<TryGetError> for Error {
    fn from(value: TryGetError) -> Self {
        Self::TryGet(Arc::new(value))
    }
}

/// Error codes a consumer can observe in API responses.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorCode {
    UnknownServerError,
    None,
    OffsetOutOfRange,
    CorruptMessage,
    UnknownTopicOrPartition,
    LeaderNotAvailable,
    NotLeaderOrFollower,
    RequestTimedOut,
    BrokerNotAvailable,
    MessageTooLarge,
    OffsetMetadataTooLarge,
    NetworkException,
    CoordinatorLoadInProgress,
    CoordinatorNotAvailable,
    NotCoordinator,
    InvalidTopicException,
    IllegalGeneration,
    InconsistentGroupProtocol,
    InvalidGroupId,
    UnknownMemberId,
    InvalidSessionTimeout,
    RebalanceInProgress,
    InvalidCommitOffsetSize,
    TopicAuthorizationFailed,
    GroupAuthorizationFailed,
    InvalidTimestamp,
    UnsupportedVersion,
    MemberIdRequired,
    GroupMaxSizeReached,
    FencedInstanceId,
    UnsupportedAssignor,
}

impl ErrorCode {
    /// transitional conditions that resolve by rediscovering the
    /// coordinator and rejoining the group
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LeaderNotAvailable
                | Self::NotLeaderOrFollower
                | Self::RequestTimedOut
                | Self::BrokerNotAvailable
                | Self::NetworkException
                | Self::CoordinatorLoadInProgress
                | Self::CoordinatorNotAvailable
                | Self::NotCoordinator
                | Self::IllegalGeneration
                | Self::UnknownMemberId
                | Self::RebalanceInProgress
        )
    }
}

impl TryFrom<i16> for ErrorCode {
    type Error = Error;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::UnknownServerError),
            0 => Ok(Self::None),
            1 => Ok(Self::OffsetOutOfRange),
            2 => Ok(Self::CorruptMessage),
            3 => Ok(Self::UnknownTopicOrPartition),
            5 => Ok(Self::LeaderNotAvailable),
            6 => Ok(Self::NotLeaderOrFollower),
            7 => Ok(Self::RequestTimedOut),
            8 => Ok(Self::BrokerNotAvailable),
            10 => Ok(Self::MessageTooLarge),
            12 => Ok(Self::OffsetMetadataTooLarge),
            13 => Ok(Self::NetworkException),
            14 => Ok(Self::CoordinatorLoadInProgress),
            15 => Ok(Self::CoordinatorNotAvailable),
            16 => Ok(Self::NotCoordinator),
            17 => Ok(Self::InvalidTopicException),
            22 => Ok(Self::IllegalGeneration),
            23 => Ok(Self::InconsistentGroupProtocol),
            24 => Ok(Self::InvalidGroupId),
            25 => Ok(Self::UnknownMemberId),
            26 => Ok(Self::InvalidSessionTimeout),
            27 => Ok(Self::RebalanceInProgress),
            28 => Ok(Self::InvalidCommitOffsetSize),
            29 => Ok(Self::TopicAuthorizationFailed),
            30 => Ok(Self::GroupAuthorizationFailed),
            32 => Ok(Self::InvalidTimestamp),
            35 => Ok(Self::UnsupportedVersion),
            79 => Ok(Self::MemberIdRequired),
            81 => Ok(Self::GroupMaxSizeReached),
            82 => Ok(Self::FencedInstanceId),
            112 => Ok(Self::UnsupportedAssignor),
            otherwise => Err(Error::UnknownApiErrorCode(otherwise)),
        }
    }
}

impl From<ErrorCode> for i16 {
    fn from(value: ErrorCode) -> Self {
        match value {
            ErrorCode::UnknownServerError => -1,
            ErrorCode::None => 0,
            ErrorCode::OffsetOutOfRange => 1,
            ErrorCode::CorruptMessage => 2,
            ErrorCode::UnknownTopicOrPartition => 3,
            ErrorCode::LeaderNotAvailable => 5,
            ErrorCode::NotLeaderOrFollower => 6,
            ErrorCode::RequestTimedOut => 7,
            ErrorCode::BrokerNotAvailable => 8,
            ErrorCode::MessageTooLarge => 10,
            ErrorCode::OffsetMetadataTooLarge => 12,
            ErrorCode::NetworkException => 13,
            ErrorCode::CoordinatorLoadInProgress => 14,
            ErrorCode::CoordinatorNotAvailable => 15,
            ErrorCode::NotCoordinator => 16,
            ErrorCode::InvalidTopicException => 17,
            ErrorCode::IllegalGeneration => 22,
            ErrorCode::InconsistentGroupProtocol => 23,
            ErrorCode::InvalidGroupId => 24,
            ErrorCode::UnknownMemberId => 25,
            ErrorCode::InvalidSessionTimeout => 26,
            ErrorCode::RebalanceInProgress => 27,
            ErrorCode::InvalidCommitOffsetSize => 28,
            ErrorCode::TopicAuthorizationFailed => 29,
            ErrorCode::GroupAuthorizationFailed => 30,
            ErrorCode::InvalidTimestamp => 32,
            ErrorCode::UnsupportedVersion => 35,
            ErrorCode::MemberIdRequired => 79,
            ErrorCode::GroupMaxSizeReached => 81,
            ErrorCode::FencedInstanceId => 82,
            ErrorCode::UnsupportedAssignor => 112,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::UnknownServerError => f.write_str(
                "The server experienced an unexpected error when processing the request.",
            ),
            ErrorCode::None => f.write_str("No error."),
            ErrorCode::OffsetOutOfRange => f.write_str(
                "The requested offset is not within the range of offsets maintained by the server.",
            ),
            ErrorCode::CorruptMessage => {
                f.write_str("This message has failed its CRC checksum or is otherwise corrupt.")
            }
            ErrorCode::UnknownTopicOrPartition => {
                f.write_str("This server does not host this topic-partition.")
            }
            ErrorCode::LeaderNotAvailable => f.write_str(
                "There is no leader for this topic-partition as we are in the middle of a \
                 leadership election.",
            ),
            ErrorCode::NotLeaderOrFollower => {
                f.write_str("The broker is not the current leader for this topic-partition.")
            }
            ErrorCode::RequestTimedOut => f.write_str("The request timed out."),
            ErrorCode::BrokerNotAvailable => f.write_str("The broker is not available."),
            ErrorCode::MessageTooLarge => f.write_str(
                "The request included a message larger than the max message size the server will \
                 accept.",
            ),
            ErrorCode::OffsetMetadataTooLarge => {
                f.write_str("The metadata field of the offset request was too large.")
            }
            ErrorCode::NetworkException => {
                f.write_str("The server disconnected before a response was received.")
            }
            ErrorCode::CoordinatorLoadInProgress => {
                f.write_str("The coordinator is loading and hence can't process requests.")
            }
            ErrorCode::CoordinatorNotAvailable => f.write_str("The coordinator is not available."),
            ErrorCode::NotCoordinator => f.write_str("This is not the correct coordinator."),
            ErrorCode::InvalidTopicException => {
                f.write_str("The request attempted to perform an operation on an invalid topic.")
            }
            ErrorCode::IllegalGeneration => {
                f.write_str("Specified group generation id is not valid.")
            }
            ErrorCode::InconsistentGroupProtocol => f.write_str(
                "The group member's supported protocols are incompatible with those of existing \
                 members.",
            ),
            ErrorCode::InvalidGroupId => f.write_str("The configured groupId is invalid."),
            ErrorCode::UnknownMemberId => {
                f.write_str("The coordinator is not aware of this member.")
            }
            ErrorCode::InvalidSessionTimeout => {
                f.write_str("The session timeout is not within the range allowed by the broker.")
            }
            ErrorCode::RebalanceInProgress => {
                f.write_str("The group is rebalancing, so a rejoin is needed.")
            }
            ErrorCode::InvalidCommitOffsetSize => {
                f.write_str("The committing offset data size is not valid.")
            }
            ErrorCode::TopicAuthorizationFailed => f.write_str("Topic authorization failed."),
            ErrorCode::GroupAuthorizationFailed => f.write_str("Group authorization failed."),
            ErrorCode::InvalidTimestamp => {
                f.write_str("The timestamp of the message is out of acceptable range.")
            }
            ErrorCode::UnsupportedVersion => f.write_str("The version of API is not supported."),
            ErrorCode::MemberIdRequired => f.write_str(
                "The group member needs to have a valid member id before actually entering a \
                 consumer group.",
            ),
            ErrorCode::GroupMaxSizeReached => {
                f.write_str("The consumer group has reached its max size.")
            }
            ErrorCode::FencedInstanceId => f.write_str(
                "The broker rejected this static consumer since another consumer with the same \
                 group.instance.id has registered with a different member.id.",
            ),
            ErrorCode::UnsupportedAssignor => f.write_str(
                "The assignor or its version range is not supported by the consumer group.",
            ),
        }
    }
}

/// All Kafka API requests implement this trait
pub trait Request: fmt::Debug + Send {
    const KEY: i16;
    const MIN_VERSION: i16;
    const MAX_VERSION: i16;

    type Response: Response;

    fn scheme(api_version: i16) -> &'static Scheme;

    fn into_value(self, api_version: i16) -> Value;
}

/// All Kafka API responses implement this trait
pub trait Response: fmt::Debug + Send + Sized {
    fn scheme(api_version: i16) -> &'static Scheme;

    fn from_value(value: Value, api_version: i16) -> Result<Self>;

    fn into_value(self, api_version: i16) -> Value;
}

/// when the error code of a response is other than [`ErrorCode::None`],
/// surface it as an [`Error::Api`]
pub fn error_code(encoded: i16) -> Result<()> {
    match ErrorCode::try_from(encoded)? {
        ErrorCode::None => Ok(()),
        code => Err(Error::Api(code)),
    }
}

/// A Kafka API request or response header.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Header {
    /// An API request header.
    Request {
        api_key: i16,
        api_version: i16,
        correlation_id: i32,
        client_id: Option<String>,
    },

    /// An API response header.
    Response { correlation_id: i32 },
}

static REQUEST_HEADER: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("api_key", Kind::Int16),
        Field::new("api_version", Kind::Int16),
        Field::new("correlation_id", Kind::Int32),
        Field::new("client_id", Kind::NullableString),
    ])
});

impl Header {
    fn encode(&self, encoded: &mut BytesMut) -> Result<()> {
        match self {
            Self::Request {
                api_key,
                api_version,
                correlation_id,
                client_id,
            } => REQUEST_HEADER.encode(
                &Value::record([
                    Value::Int16(*api_key),
                    Value::Int16(*api_version),
                    Value::Int32(*correlation_id),
                    Value::nullable_string(client_id.clone()),
                ]),
                encoded,
            ),

            Self::Response { correlation_id } => {
                encoded.put_i32(*correlation_id);
                Ok(())
            }
        }
    }
}

/// Frames beyond this are treated as corrupt rather than read.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// A Kafka API frame prefixed with its length, followed by a header and the
/// message body.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Frame;

impl Frame {
    /// serialize an API request into a frame of bytes
    pub fn request(header: Header, body: &Value, scheme: &Scheme) -> Result<Bytes> {
        if let Header::Response { .. } = header {
            return Err(Error::ResponseFrame);
        }

        let mut encoded = BytesMut::new();
        encoded.put_i32(0);
        header.encode(&mut encoded)?;
        scheme.encode(body, &mut encoded)?;

        let size = i32::try_from(encoded.len() - 4)?;
        encoded[0..4].copy_from_slice(&size.to_be_bytes());

        Ok(Bytes::from(encoded)).inspect(|encoded| debug!(len = encoded.len()))
    }

    /// serialize an API response into a frame of bytes
    pub fn response(correlation_id: i32, body: &Value, scheme: &Scheme) -> Result<Bytes> {
        let mut encoded = BytesMut::new();
        encoded.put_i32(0);
        Header::Response { correlation_id }.encode(&mut encoded)?;
        scheme.encode(body, &mut encoded)?;

        let size = i32::try_from(encoded.len() - 4)?;
        encoded[0..4].copy_from_slice(&size.to_be_bytes());

        Ok(Bytes::from(encoded))
    }

    /// deserialize a frame of bytes into the correlation id and body of an
    /// API response
    pub fn response_from_bytes(mut encoded: Bytes, scheme: &Scheme) -> Result<(i32, Value)> {
        let size = encoded.try_get_i32()?;

        if size < 0 || size as usize > MAX_FRAME_LENGTH {
            return Err(Error::LengthBeyondMaximum {
                field: "frame",
                length: size,
            });
        }

        let correlation_id = encoded.try_get_i32()?;
        let body = scheme.decode(&mut encoded)?;

        Ok((correlation_id, body)).inspect(|(correlation_id, _)| debug!(correlation_id))
    }

    /// deserialize a frame of bytes into an API request header and the
    /// undecoded body remaining
    pub fn request_from_bytes(mut encoded: Bytes) -> Result<(Header, Bytes)> {
        _ = encoded.try_get_i32()?;

        let mut fields = REQUEST_HEADER.read(&mut encoded)?;

        Ok((
            Header::Request {
                api_key: fields.int16()?,
                api_version: fields.int16()?,
                correlation_id: fields.int32()?,
                client_id: fields.nullable_string()?,
            },
            encoded,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_round_trip() -> Result<()> {
        let scheme = Scheme::new([Field::new("group_id", Kind::String)]);
        let body = Value::record([Value::string("test-consumer-group")]);

        let encoded = Frame::request(
            Header::Request {
                api_key: 10,
                api_version: 0,
                correlation_id: 16,
                client_id: Some("console-consumer".into()),
            },
            &body,
            &scheme,
        )?;

        assert_eq!(
            i32::try_from(encoded.len())? - 4,
            i32::from_be_bytes(encoded[0..4].try_into().map_err(Error::from)?)
        );

        let (header, mut remaining) = Frame::request_from_bytes(encoded)?;

        assert_eq!(
            Header::Request {
                api_key: 10,
                api_version: 0,
                correlation_id: 16,
                client_id: Some("console-consumer".into()),
            },
            header
        );

        assert_eq!(body, scheme.decode(&mut remaining)?);

        Ok(())
    }

    #[test]
    fn response_frame_round_trip() -> Result<()> {
        let scheme = Scheme::new([Field::new("error_code", Kind::Int16)]);
        let body = Value::record([Value::Int16(0)]);

        let encoded = Frame::response(298, &body, &scheme)?;
        let (correlation_id, decoded) = Frame::response_from_bytes(encoded, &scheme)?;

        assert_eq!(298, correlation_id);
        assert_eq!(body, decoded);

        Ok(())
    }

    #[test]
    fn error_code_round_trip() -> Result<()> {
        for code in [
            ErrorCode::None,
            ErrorCode::OffsetOutOfRange,
            ErrorCode::UnknownTopicOrPartition,
            ErrorCode::NotCoordinator,
            ErrorCode::IllegalGeneration,
            ErrorCode::UnknownMemberId,
            ErrorCode::RebalanceInProgress,
            ErrorCode::MemberIdRequired,
        ] {
            assert_eq!(code, ErrorCode::try_from(i16::from(code))?);
        }

        assert!(matches!(
            ErrorCode::try_from(i16::MAX),
            Err(Error::UnknownApiErrorCode(i16::MAX))
        ));

        Ok(())
    }

    #[test]
    fn retriable_codes() {
        assert!(ErrorCode::NotCoordinator.is_retriable());
        assert!(ErrorCode::RebalanceInProgress.is_retriable());
        assert!(ErrorCode::IllegalGeneration.is_retriable());
        assert!(!ErrorCode::OffsetOutOfRange.is_retriable());
        assert!(!ErrorCode::UnknownTopicOrPartition.is_retriable());
    }
}
