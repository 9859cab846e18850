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

//! Message sets returned by fetch.
//!
//! A fetch response carries each partition's messages as an undelimited run
//! of `offset, size, message` entries. The run may end mid message when the
//! partition hit its byte budget; the truncated tail is dropped and picked
//! up by the next fetch.

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use crc_fast::{CrcAlgorithm, Digest};
use tracing::debug;

use crate::{Error, Result};

const MAGIC_V0: i8 = 0;
const MAGIC_V1: i8 = 1;

const COMPRESSION_MASK: i8 = 0x07;

/// One message of a partition's log.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Record {
    pub offset: i64,
    pub timestamp: Option<i64>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl Record {
    pub fn offset(self, offset: i64) -> Self {
        Self { offset, ..self }
    }

    pub fn timestamp(self, timestamp: Option<i64>) -> Self {
        Self { timestamp, ..self }
    }

    pub fn key(self, key: Option<Bytes>) -> Self {
        Self { key, ..self }
    }

    pub fn value(self, value: Option<Bytes>) -> Self {
        Self { value, ..self }
    }
}

/// A contiguous run of records returned by a single fetch for one partition.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RecordBatch {
    pub records: Vec<Record>,
}

impl RecordBatch {
    pub fn records(self, records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// the offset of the final record in this batch
    pub fn last_offset(&self) -> Option<i64> {
        self.records.last().map(|record| record.offset)
    }
}

impl TryFrom<Bytes> for RecordBatch {
    type Error = Error;

    fn try_from(mut encoded: Bytes) -> Result<Self, Self::Error> {
        let mut records = Vec::new();

        while encoded.remaining() >= 12 {
            let offset = encoded.try_get_i64()?;
            let size = encoded.try_get_i32()?;

            if size < 0 {
                return Err(Error::LengthBeyondMaximum {
                    field: "message_size",
                    length: size,
                });
            }

            if encoded.remaining() < size as usize {
                debug!(truncated = encoded.remaining(), size);
                break;
            }

            let mut message = encoded.split_to(size as usize);
            records.push(record(offset, &mut message)?);
        }

        Ok(Self { records })
    }
}

fn record(offset: i64, message: &mut Bytes) -> Result<Record> {
    let expected = encoded_u32(message.try_get_i32()?);
    let computed = checksum(&message[..]);

    if expected != computed {
        return Err(Error::CorruptCrc { expected, computed });
    }

    let magic = message.try_get_i8()?;
    let attributes = message.try_get_i8()?;

    if attributes & COMPRESSION_MASK != 0 {
        return Err(Error::UnknownCompressionType(attributes & COMPRESSION_MASK));
    }

    let timestamp = if magic >= MAGIC_V1 {
        Some(message.try_get_i64()?)
    } else {
        None
    };

    Ok(Record {
        offset,
        timestamp,
        key: nullable(message, "key")?,
        value: nullable(message, "value")?,
    })
}

fn nullable(message: &mut Bytes, field: &'static str) -> Result<Option<Bytes>> {
    let length = message.try_get_i32()?;

    if length == -1 {
        Ok(None)
    } else if length < 0 || length as usize > crate::scheme::MAX_LENGTH {
        Err(Error::LengthBeyondMaximum { field, length })
    } else if message.remaining() < length as usize {
        Err(Error::Truncated(field))
    } else {
        Ok(Some(message.split_to(length as usize)))
    }
}

impl TryFrom<&RecordBatch> for Bytes {
    type Error = Error;

    fn try_from(batch: &RecordBatch) -> Result<Self, Self::Error> {
        let mut encoded = BytesMut::new();

        for record in &batch.records {
            let mut message = BytesMut::new();

            message.put_i8(if record.timestamp.is_some() {
                MAGIC_V1
            } else {
                MAGIC_V0
            });
            message.put_i8(0);

            if let Some(timestamp) = record.timestamp {
                message.put_i64(timestamp);
            }

            for part in [&record.key, &record.value] {
                if let Some(part) = part {
                    encoded_length(part).map(|length| {
                        message.put_i32(length);
                        message.put_slice(&part[..]);
                    })?;
                } else {
                    message.put_i32(-1);
                }
            }

            encoded.put_i64(record.offset);
            encoded.put_i32(i32::try_from(message.len() + 4)?);
            encoded.put_i32(checksum(&message[..]) as i32);
            encoded.put_slice(&message[..]);
        }

        Ok(Bytes::from(encoded))
    }
}

fn encoded_length(part: &Bytes) -> Result<i32> {
    i32::try_from(part.len()).map_err(Into::into)
}

fn encoded_u32(encoded: i32) -> u32 {
    u32::from_be_bytes(encoded.to_be_bytes())
}

fn checksum(message: &[u8]) -> u32 {
    let mut digest = Digest::new(CrcAlgorithm::Crc32IsoHdlc);
    digest.update(message);
    digest.finalize() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(offsets: impl IntoIterator<Item = i64>) -> RecordBatch {
        RecordBatch::default().records(offsets.into_iter().map(|offset| {
            Record::default()
                .offset(offset)
                .timestamp(Some(1_721_999_616_000 + offset))
                .value(Some(Bytes::from(offset.to_string())))
        }))
    }

    #[test]
    fn round_trip() -> Result<()> {
        let expected = batch([11, 12, 13]);

        let encoded = Bytes::try_from(&expected)?;
        let decoded = RecordBatch::try_from(encoded)?;

        assert_eq!(expected, decoded);
        assert_eq!(Some(13), decoded.last_offset());

        Ok(())
    }

    #[test]
    fn magic_v0_without_timestamp() -> Result<()> {
        let expected = RecordBatch::default().records([Record::default()
            .offset(42)
            .key(Some(Bytes::from_static(b"k")))
            .value(None)]);

        let decoded = RecordBatch::try_from(Bytes::try_from(&expected)?)?;
        assert_eq!(expected, decoded);

        Ok(())
    }

    #[test]
    fn truncated_tail_is_dropped() -> Result<()> {
        let encoded = Bytes::try_from(&batch([11, 12]))?;

        let decoded = RecordBatch::try_from(encoded.slice(0..encoded.len() - 5))?;
        assert_eq!(batch([11]), decoded);

        Ok(())
    }

    #[test]
    fn corrupt_crc() -> Result<()> {
        let encoded = Bytes::try_from(&batch([11]))?;

        let mut corrupted = encoded.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;

        assert!(matches!(
            RecordBatch::try_from(Bytes::from(corrupted)),
            Err(Error::CorruptCrc { .. })
        ));

        Ok(())
    }

    #[test]
    fn compressed_message_is_rejected() -> Result<()> {
        let encoded = Bytes::try_from(&batch([11]))?;
        let mut corrupted = encoded.to_vec();

        // attributes trail the magic byte within the message
        let attributes = 8 + 4 + 4 + 1;
        corrupted[attributes] = 2;

        // fix the checksum so the compression bits are what is rejected
        let fixed = checksum(&corrupted[8 + 4 + 4..]);
        corrupted[8 + 4..8 + 4 + 4].copy_from_slice(&fixed.to_be_bytes());

        assert!(matches!(
            RecordBatch::try_from(Bytes::from(corrupted)),
            Err(Error::UnknownCompressionType(2))
        ));

        Ok(())
    }
}
