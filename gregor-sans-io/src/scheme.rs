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

//! Declarative wire schemes.
//!
//! A [`Scheme`] is an ordered list of named, typed fields describing one
//! request or response payload at one API version. Encoding walks the scheme
//! and a [`Value`] in lockstep, so a payload described once encodes and
//! decodes from the same declaration. Version specific differences stay
//! local to the scheme declaring them.

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};

use crate::{Error, Result};

/// Decoded lengths and counts beyond this are treated as corrupt input
/// rather than allocated.
pub const MAX_LENGTH: usize = 1024 * 1024;

/// A wire type.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
    Int8,
    Int16,
    Int32,
    Int64,
    String,
    NullableString,
    Bytes,
    NullableBytes,
    Array(Box<Kind>),
    NullableArray(Box<Kind>),
    Scheme(Scheme),
}

/// A named field within a [`Scheme`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Field {
    name: &'static str,
    kind: Kind,
}

impl Field {
    pub fn new(name: &'static str, kind: Kind) -> Self {
        Self { name, kind }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// An ordered sequence of named fields.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Scheme(Vec<Field>);

impl Scheme {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        Self(fields.into_iter().collect())
    }

    /// encode a struct value against this scheme
    ///
    /// Identical inputs always produce identical bytes. The value shape is
    /// checked field by field, failing with [`Error::UnexpectedType`] on a
    /// mismatch and [`Error::NullField`] when a null reaches a field whose
    /// kind has no null representation.
    pub fn encode(&self, value: &Value, encoded: &mut BytesMut) -> Result<()> {
        let Value::Struct(ref values) = *value else {
            return Err(Error::UnexpectedType {
                field: "struct",
                kind: "Struct",
            });
        };

        if values.len() != self.0.len() {
            return Err(Error::Message(format!(
                "scheme with {} fields given {} values",
                self.0.len(),
                values.len()
            )));
        }

        self.0
            .iter()
            .zip(values)
            .try_for_each(|(field, value)| encode(field.name, &field.kind, value, encoded))
    }

    /// decode one struct value against this scheme
    pub fn decode(&self, encoded: &mut Bytes) -> Result<Value> {
        self.0
            .iter()
            .map(|field| decode(field.name, &field.kind, encoded))
            .collect::<Result<Vec<_>>>()
            .map(Value::Struct)
    }

    /// decode, yielding a [`Fields`] cursor over the field values
    pub fn read(&self, encoded: &mut Bytes) -> Result<Fields> {
        self.decode(encoded).and_then(Value::into_fields)
    }
}

/// A structured wire value.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    String(Option<String>),
    Bytes(Option<Bytes>),
    Array(Option<Vec<Value>>),
    Struct(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(Some(s.into()))
    }

    pub fn nullable_string(s: Option<String>) -> Self {
        Self::String(s)
    }

    pub fn bytes(b: impl Into<Bytes>) -> Self {
        Self::Bytes(Some(b.into()))
    }

    pub fn nullable_bytes(b: Option<Bytes>) -> Self {
        Self::Bytes(b)
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Array(Some(items.into_iter().collect()))
    }

    pub fn record(fields: impl IntoIterator<Item = Value>) -> Self {
        Self::Struct(fields.into_iter().collect())
    }

    pub fn into_fields(self) -> Result<Fields> {
        if let Self::Struct(values) = self {
            Ok(Fields(values.into_iter()))
        } else {
            Err(Error::UnexpectedType {
                field: "struct",
                kind: "Struct",
            })
        }
    }
}

fn encode(name: &'static str, kind: &Kind, value: &Value, encoded: &mut BytesMut) -> Result<()> {
    match (kind, value) {
        (Kind::Int8, Value::Int8(i)) => {
            encoded.put_i8(*i);
            Ok(())
        }

        (Kind::Int16, Value::Int16(i)) => {
            encoded.put_i16(*i);
            Ok(())
        }

        (Kind::Int32, Value::Int32(i)) => {
            encoded.put_i32(*i);
            Ok(())
        }

        (Kind::Int64, Value::Int64(i)) => {
            encoded.put_i64(*i);
            Ok(())
        }

        (Kind::String, Value::String(Some(s))) | (Kind::NullableString, Value::String(Some(s))) => {
            i16::try_from(s.len()).map_err(Error::from).map(|length| {
                encoded.put_i16(length);
                encoded.put_slice(s.as_bytes());
            })
        }

        (Kind::NullableString, Value::String(None)) => {
            encoded.put_i16(-1);
            Ok(())
        }

        (Kind::Bytes, Value::Bytes(Some(b))) | (Kind::NullableBytes, Value::Bytes(Some(b))) => {
            i32::try_from(b.len()).map_err(Error::from).map(|length| {
                encoded.put_i32(length);
                encoded.put_slice(&b[..]);
            })
        }

        (Kind::NullableBytes, Value::Bytes(None)) => {
            encoded.put_i32(-1);
            Ok(())
        }

        (Kind::Array(element), Value::Array(Some(items)))
        | (Kind::NullableArray(element), Value::Array(Some(items))) => i32::try_from(items.len())
            .map_err(Error::from)
            .and_then(|count| {
                encoded.put_i32(count);
                items
                    .iter()
                    .try_for_each(|item| encode(name, element, item, encoded))
            }),

        (Kind::NullableArray(_), Value::Array(None)) => {
            encoded.put_i32(-1);
            Ok(())
        }

        (Kind::Scheme(scheme), value @ Value::Struct(_)) => scheme.encode(value, encoded),

        (Kind::String, Value::String(None))
        | (Kind::Bytes, Value::Bytes(None))
        | (Kind::Array(_), Value::Array(None)) => Err(Error::NullField(name)),

        (kind, _) => Err(Error::UnexpectedType {
            field: name,
            kind: kind_name(kind),
        }),
    }
}

fn decode(name: &'static str, kind: &Kind, encoded: &mut Bytes) -> Result<Value> {
    match kind {
        Kind::Int8 => encoded.try_get_i8().map(Value::Int8).map_err(Into::into),
        Kind::Int16 => encoded.try_get_i16().map(Value::Int16).map_err(Into::into),
        Kind::Int32 => encoded.try_get_i32().map(Value::Int32).map_err(Into::into),
        Kind::Int64 => encoded.try_get_i64().map(Value::Int64).map_err(Into::into),

        Kind::String | Kind::NullableString => {
            let length = encoded.try_get_i16()?;

            if length == -1 {
                if matches!(kind, Kind::String) {
                    Err(Error::NullField(name))
                } else {
                    Ok(Value::String(None))
                }
            } else {
                take(name, encoded, length as i32)
                    .and_then(|taken| String::from_utf8(taken.into()).map_err(Into::into))
                    .map(Value::string)
            }
        }

        Kind::Bytes | Kind::NullableBytes => {
            let length = encoded.try_get_i32()?;

            if length == -1 {
                if matches!(kind, Kind::Bytes) {
                    Err(Error::NullField(name))
                } else {
                    Ok(Value::Bytes(None))
                }
            } else {
                take(name, encoded, length).map(Value::bytes)
            }
        }

        Kind::Array(element) | Kind::NullableArray(element) => {
            let count = encoded.try_get_i32()?;

            if count == -1 {
                if matches!(kind, Kind::Array(_)) {
                    Err(Error::NullField(name))
                } else {
                    Ok(Value::Array(None))
                }
            } else if count < 0 || count as usize > MAX_LENGTH {
                Err(Error::LengthBeyondMaximum {
                    field: name,
                    length: count,
                })
            } else {
                (0..count)
                    .map(|_| decode(name, element, encoded))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::array)
            }
        }

        Kind::Scheme(scheme) => scheme.decode(encoded),
    }
}

fn take(name: &'static str, encoded: &mut Bytes, length: i32) -> Result<Bytes> {
    if length < 0 || length as usize > MAX_LENGTH {
        Err(Error::LengthBeyondMaximum {
            field: name,
            length,
        })
    } else if encoded.remaining() < length as usize {
        Err(Error::Truncated(name))
    } else {
        Ok(encoded.split_to(length as usize))
    }
}

fn kind_name(kind: &Kind) -> &'static str {
    match kind {
        Kind::Int8 => "Int8",
        Kind::Int16 => "Int16",
        Kind::Int32 => "Int32",
        Kind::Int64 => "Int64",
        Kind::String => "String",
        Kind::NullableString => "NullableString",
        Kind::Bytes => "Bytes",
        Kind::NullableBytes => "NullableBytes",
        Kind::Array(_) => "Array",
        Kind::NullableArray(_) => "NullableArray",
        Kind::Scheme(_) => "Scheme",
    }
}

/// Ordered, typed access to the field values of a decoded struct.
#[derive(Debug)]
pub struct Fields(std::vec::IntoIter<Value>);

impl Fields {
    fn next(&mut self, kind: &'static str) -> Result<Value> {
        self.0.next().ok_or(Error::UnexpectedType {
            field: "exhausted",
            kind,
        })
    }

    pub fn int8(&mut self) -> Result<i8> {
        if let Value::Int8(i) = self.next("Int8")? {
            Ok(i)
        } else {
            Err(Error::UnexpectedType {
                field: "int8",
                kind: "Int8",
            })
        }
    }

    pub fn int16(&mut self) -> Result<i16> {
        if let Value::Int16(i) = self.next("Int16")? {
            Ok(i)
        } else {
            Err(Error::UnexpectedType {
                field: "int16",
                kind: "Int16",
            })
        }
    }

    pub fn int32(&mut self) -> Result<i32> {
        if let Value::Int32(i) = self.next("Int32")? {
            Ok(i)
        } else {
            Err(Error::UnexpectedType {
                field: "int32",
                kind: "Int32",
            })
        }
    }

    pub fn int64(&mut self) -> Result<i64> {
        if let Value::Int64(i) = self.next("Int64")? {
            Ok(i)
        } else {
            Err(Error::UnexpectedType {
                field: "int64",
                kind: "Int64",
            })
        }
    }

    pub fn string(&mut self) -> Result<String> {
        self.nullable_string()
            .and_then(|s| s.ok_or(Error::NullField("string")))
    }

    pub fn nullable_string(&mut self) -> Result<Option<String>> {
        if let Value::String(s) = self.next("String")? {
            Ok(s)
        } else {
            Err(Error::UnexpectedType {
                field: "string",
                kind: "String",
            })
        }
    }

    pub fn bytes(&mut self) -> Result<Bytes> {
        self.nullable_bytes()
            .and_then(|b| b.ok_or(Error::NullField("bytes")))
    }

    pub fn nullable_bytes(&mut self) -> Result<Option<Bytes>> {
        if let Value::Bytes(b) = self.next("Bytes")? {
            Ok(b)
        } else {
            Err(Error::UnexpectedType {
                field: "bytes",
                kind: "Bytes",
            })
        }
    }

    pub fn array(&mut self) -> Result<Vec<Value>> {
        self.nullable_array()
            .and_then(|items| items.ok_or(Error::NullField("array")))
    }

    pub fn nullable_array(&mut self) -> Result<Option<Vec<Value>>> {
        if let Value::Array(items) = self.next("Array")? {
            Ok(items)
        } else {
            Err(Error::UnexpectedType {
                field: "array",
                kind: "Array",
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> Scheme {
        Scheme::new([
            Field::new("generation", Kind::Int32),
            Field::new("member", Kind::String),
            Field::new("rack", Kind::NullableString),
            Field::new("metadata", Kind::NullableBytes),
            Field::new(
                "partitions",
                Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                    Field::new("topic", Kind::String),
                    Field::new("indexes", Kind::Array(Box::new(Kind::Int32))),
                ])))),
            ),
        ])
    }

    fn value() -> Value {
        Value::record([
            Value::Int32(11),
            Value::string("m-abc"),
            Value::String(None),
            Value::nullable_bytes(None),
            Value::array([Value::record([
                Value::string("t0"),
                Value::array([Value::Int32(0), Value::Int32(1)]),
            ])]),
        ])
    }

    #[test]
    fn round_trip() -> Result<()> {
        let scheme = scheme();

        let mut encoded = BytesMut::new();
        scheme.encode(&value(), &mut encoded)?;

        let mut remaining = Bytes::from(encoded.clone());
        assert_eq!(value(), scheme.decode(&mut remaining)?);
        assert_eq!(0, remaining.remaining());

        let mut identical = BytesMut::new();
        scheme.encode(&value(), &mut identical)?;
        assert_eq!(encoded, identical);

        Ok(())
    }

    #[test]
    fn known_bytes() -> Result<()> {
        let scheme = Scheme::new([
            Field::new("version", Kind::Int16),
            Field::new("topics", Kind::Array(Box::new(Kind::String))),
            Field::new("user_data", Kind::NullableBytes),
        ]);

        let mut encoded = BytesMut::new();
        scheme.encode(
            &Value::record([
                Value::Int16(0),
                Value::array([Value::string("abc")]),
                Value::nullable_bytes(None),
            ]),
            &mut encoded,
        )?;

        assert_eq!(
            vec![0, 0, 0, 0, 0, 1, 0, 3, 97, 98, 99, 255, 255, 255, 255],
            encoded.to_vec()
        );

        Ok(())
    }

    #[test]
    fn truncated_input() -> Result<()> {
        let scheme = scheme();

        let mut encoded = BytesMut::new();
        scheme.encode(&value(), &mut encoded)?;

        for split in 0..encoded.len() - 1 {
            let mut short = Bytes::copy_from_slice(&encoded[..split]);
            assert!(scheme.decode(&mut short).is_err(), "length: {split}");
        }

        Ok(())
    }

    #[test]
    fn null_in_non_nullable_field() {
        let scheme = Scheme::new([Field::new("member", Kind::String)]);

        let mut encoded = Bytes::from_static(&[255, 255]);
        assert!(matches!(
            scheme.decode(&mut encoded),
            Err(Error::NullField("member"))
        ));

        let mut encoded = BytesMut::new();
        assert!(matches!(
            scheme.encode(&Value::record([Value::String(None)]), &mut encoded),
            Err(Error::NullField("member"))
        ));
    }

    #[test]
    fn length_beyond_maximum() {
        let scheme = Scheme::new([Field::new("indexes", Kind::Array(Box::new(Kind::Int32)))]);

        let mut encoded = Bytes::from_static(&[255, 255, 255, 254]);
        assert!(matches!(
            scheme.decode(&mut encoded),
            Err(Error::LengthBeyondMaximum { .. })
        ));

        let mut encoded = Bytes::from_static(&[127, 255, 255, 255]);
        assert!(matches!(
            scheme.decode(&mut encoded),
            Err(Error::LengthBeyondMaximum {
                field: "indexes",
                length: i32::MAX
            })
        ));
    }

    #[test]
    fn nullable_array() -> Result<()> {
        let scheme = Scheme::new([Field::new(
            "topics",
            Kind::NullableArray(Box::new(Kind::String)),
        )]);

        let mut encoded = BytesMut::new();
        scheme.encode(&Value::record([Value::Array(None)]), &mut encoded)?;
        assert_eq!(vec![255, 255, 255, 255], encoded.to_vec());

        let mut remaining = Bytes::from(encoded);
        assert_eq!(
            Value::record([Value::Array(None)]),
            scheme.decode(&mut remaining)?
        );

        Ok(())
    }

    #[test]
    fn mismatched_value() {
        let scheme = Scheme::new([Field::new("generation", Kind::Int32)]);

        let mut encoded = BytesMut::new();
        assert!(matches!(
            scheme.encode(&Value::record([Value::Int16(11)]), &mut encoded),
            Err(Error::UnexpectedType {
                field: "generation",
                ..
            })
        ));
    }
}
