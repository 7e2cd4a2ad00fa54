//! Binary variable documents.
//!
//! Variables are stored as MessagePack. A document is a map from variable
//! name to encoded value, and collections are arrays. The readers in this
//! module walk the self-describing headers and hand out slices of the
//! original buffer, so nothing is decoded unless a caller asks for it.

use rmp::Marker;
use serde::Serialize;

use crate::error::CodecError;

mod array;

pub use array::{array_length, nil_array, replace_array_element, ArrayElements};

/// Encoded `nil`
pub const NIL: &[u8] = &[0xc0];

/// Encoded empty document
pub const EMPTY_DOCUMENT: &[u8] = &[0x80];

/// Owned copy of the encoded `nil` value
#[inline]
pub fn nil() -> Vec<u8> {
    NIL.to_vec()
}

/// Encode any serializable value
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    rmp_serde::to_vec(value).map_err(encode_error)
}

/// Encode a JSON value
#[inline]
pub fn encode_json(value: &serde_json::Value) -> Result<Vec<u8>, CodecError> {
    encode(value)
}

/// Decode a single encoded value into JSON
pub fn decode_json(bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
    rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Length in bytes of the first encoded value in `buf`
pub fn value_length(buf: &[u8]) -> Result<usize, CodecError> {
    value_end(buf, 0)
}

/// Whether `bytes` is exactly one encoded `nil`
#[inline]
pub fn is_nil(bytes: &[u8]) -> bool {
    bytes == NIL
}

/// Write a document from `(name, encoded value)` pairs, in iteration order.
pub fn write_document<I, K, V>(entries: I) -> Result<Vec<u8>, CodecError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    let entries: Vec<(K, V)> = entries.into_iter().collect();
    let len = u32::try_from(entries.len()).map_err(encode_error)?;

    let mut buf = Vec::with_capacity(16 * entries.len() + 5);
    rmp::encode::write_map_len(&mut buf, len).map_err(encode_error)?;
    for (name, value) in &entries {
        rmp::encode::write_str(&mut buf, name.as_ref()).map_err(encode_error)?;
        buf.extend_from_slice(value.as_ref());
    }
    Ok(buf)
}

/// Lazy iterator over the `(name, encoded value)` entries of a document
pub struct DocumentEntries<'a> {
    buf: &'a [u8],
    offset: usize,
    remaining: usize,
}

impl<'a> DocumentEntries<'a> {
    /// Start reading the document in `buf`
    pub fn new(buf: &'a [u8]) -> Result<Self, CodecError> {
        let head = read_head(buf, 0)?;
        let entries = match head.kind {
            Kind::Map(children) => children / 2,
            _ => {
                return Err(CodecError::UnexpectedMarker {
                    expected: "map",
                    marker: buf[0],
                    offset: 0,
                })
            }
        };
        Ok(Self {
            buf,
            offset: head.len,
            remaining: entries,
        })
    }

    /// Number of entries not yet read
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn read_entry(&mut self) -> Result<(&'a str, &'a [u8]), CodecError> {
        let key_offset = self.offset;
        let head = read_head(self.buf, key_offset)?;
        let key_len = match head.kind {
            Kind::Str(len) => len,
            _ => {
                return Err(CodecError::UnexpectedMarker {
                    expected: "string key",
                    marker: self.buf[key_offset],
                    offset: key_offset,
                })
            }
        };
        let key_start = key_offset + head.len;
        let value_start = checked_end(self.buf, key_start, key_len)?;
        let key = std::str::from_utf8(&self.buf[key_start..value_start])
            .map_err(|_| CodecError::InvalidUtf8(key_start))?;

        let value_end = value_end(self.buf, value_start)?;
        self.offset = value_end;
        Ok((key, &self.buf[value_start..value_end]))
    }
}

impl<'a> Iterator for DocumentEntries<'a> {
    type Item = Result<(&'a str, &'a [u8]), CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.read_entry() {
            Ok(entry) => {
                self.remaining -= 1;
                Some(Ok(entry))
            }
            Err(err) => {
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

/// Shape of an encoded value as told by its header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    /// Opaque payload of the given byte length (numbers, binaries, extensions)
    Scalar(usize),
    /// UTF-8 string of the given byte length
    Str(usize),
    /// Array with the given number of elements
    Array(usize),
    /// Map with the given number of child values (keys plus values)
    Map(usize),
}

/// Header of an encoded value
#[derive(Debug, Clone, Copy)]
pub(crate) struct Head {
    /// Bytes taken by the marker and any length/type prefix
    pub len: usize,
    pub kind: Kind,
}

impl Head {
    fn scalar(len: usize, payload: usize) -> Self {
        Self {
            len,
            kind: Kind::Scalar(payload),
        }
    }
}

pub(crate) fn read_head(buf: &[u8], offset: usize) -> Result<Head, CodecError> {
    let marker = *buf.get(offset).ok_or(CodecError::Truncated { offset })?;

    let head = match Marker::from_u8(marker) {
        Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
            Head::scalar(1, 0)
        }
        Marker::U8 | Marker::I8 => Head::scalar(1, 1),
        Marker::U16 | Marker::I16 => Head::scalar(1, 2),
        Marker::U32 | Marker::I32 | Marker::F32 => Head::scalar(1, 4),
        Marker::U64 | Marker::I64 | Marker::F64 => Head::scalar(1, 8),
        Marker::FixStr(len) => Head {
            len: 1,
            kind: Kind::Str(len as usize),
        },
        Marker::Str8 => Head {
            len: 2,
            kind: Kind::Str(read_length(buf, offset + 1, 1)?),
        },
        Marker::Str16 => Head {
            len: 3,
            kind: Kind::Str(read_length(buf, offset + 1, 2)?),
        },
        Marker::Str32 => Head {
            len: 5,
            kind: Kind::Str(read_length(buf, offset + 1, 4)?),
        },
        Marker::Bin8 => Head::scalar(2, read_length(buf, offset + 1, 1)?),
        Marker::Bin16 => Head::scalar(3, read_length(buf, offset + 1, 2)?),
        Marker::Bin32 => Head::scalar(5, read_length(buf, offset + 1, 4)?),
        Marker::FixArray(len) => Head {
            len: 1,
            kind: Kind::Array(len as usize),
        },
        Marker::Array16 => Head {
            len: 3,
            kind: Kind::Array(read_length(buf, offset + 1, 2)?),
        },
        Marker::Array32 => Head {
            len: 5,
            kind: Kind::Array(read_length(buf, offset + 1, 4)?),
        },
        Marker::FixMap(len) => Head {
            len: 1,
            kind: Kind::Map(len as usize * 2),
        },
        Marker::Map16 => Head {
            len: 3,
            kind: Kind::Map(read_length(buf, offset + 1, 2)?.saturating_mul(2)),
        },
        Marker::Map32 => Head {
            len: 5,
            kind: Kind::Map(read_length(buf, offset + 1, 4)?.saturating_mul(2)),
        },
        // marker + type byte, then a fixed payload
        Marker::FixExt1 => Head::scalar(2, 1),
        Marker::FixExt2 => Head::scalar(2, 2),
        Marker::FixExt4 => Head::scalar(2, 4),
        Marker::FixExt8 => Head::scalar(2, 8),
        Marker::FixExt16 => Head::scalar(2, 16),
        // marker + length + type byte
        Marker::Ext8 => Head::scalar(3, read_length(buf, offset + 1, 1)?),
        Marker::Ext16 => Head::scalar(4, read_length(buf, offset + 1, 2)?),
        Marker::Ext32 => Head::scalar(6, read_length(buf, offset + 1, 4)?),
        Marker::Reserved => return Err(CodecError::ReservedMarker(offset)),
    };
    Ok(head)
}

/// Offset just past the value starting at `offset`.
pub(crate) fn value_end(buf: &[u8], offset: usize) -> Result<usize, CodecError> {
    let mut position = offset;
    let mut pending: usize = 1;

    while pending > 0 {
        let head = read_head(buf, position)?;
        position = checked_end(buf, position, head.len)?;
        pending -= 1;
        match head.kind {
            Kind::Scalar(len) | Kind::Str(len) => position = checked_end(buf, position, len)?,
            Kind::Array(children) | Kind::Map(children) => {
                pending = pending.saturating_add(children)
            }
        }
    }
    Ok(position)
}

fn read_length(buf: &[u8], offset: usize, width: usize) -> Result<usize, CodecError> {
    let end = checked_end(buf, offset, width)?;
    Ok(buf[offset..end]
        .iter()
        .fold(0usize, |acc, byte| (acc << 8) | *byte as usize))
}

fn checked_end(buf: &[u8], offset: usize, len: usize) -> Result<usize, CodecError> {
    match offset.checked_add(len) {
        Some(end) if end <= buf.len() => Ok(end),
        _ => Err(CodecError::Truncated { offset: buf.len() }),
    }
}

fn encode_error(err: impl std::fmt::Display) -> CodecError {
    CodecError::Encode(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let value = json!({"items": [1, "two", {"three": 3.5}], "flag": true, "none": null});
        let bytes = encode_json(&value).unwrap();
        assert_eq!(value_length(&bytes).unwrap(), bytes.len());
        assert_eq!(decode_json(&bytes).unwrap(), value);
    }

    #[test]
    fn test_write_and_read_document() {
        let items = encode_json(&json!([10, 20, 30])).unwrap();
        let counter = encode(&2u32).unwrap();
        let document = write_document([("items", items.as_slice()), ("loopCounter", counter.as_slice())])
            .unwrap();

        let entries: Vec<_> = DocumentEntries::new(&document)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "items");
        assert_eq!(entries[0].1, items.as_slice());
        assert_eq!(entries[1].0, "loopCounter");
        assert_eq!(decode_json(entries[1].1).unwrap(), json!(2));

        assert_eq!(
            decode_json(&document).unwrap(),
            json!({"items": [10, 20, 30], "loopCounter": 2})
        );
    }

    #[test]
    fn test_document_entries_count_down() {
        let document = encode_json(&json!({"a": 1, "b": [2], "c": null})).unwrap();
        let mut entries = DocumentEntries::new(&document).unwrap();
        assert_eq!(entries.remaining(), 3);
        assert_eq!(entries.size_hint(), (0, Some(3)));

        let (name, _) = entries.next().unwrap().unwrap();
        assert_eq!(name, "a");
        assert_eq!(entries.remaining(), 2);
        entries.by_ref().for_each(drop);
        assert_eq!(entries.remaining(), 0);
    }

    #[test]
    fn test_empty_document() {
        let document = write_document(Vec::<(&str, &[u8])>::new()).unwrap();
        assert_eq!(document, EMPTY_DOCUMENT);
        assert_eq!(DocumentEntries::new(&document).unwrap().count(), 0);
    }

    #[test]
    fn test_document_rejects_non_map() {
        let bytes = encode_json(&json!([1, 2])).unwrap();
        assert!(matches!(
            DocumentEntries::new(&bytes),
            Err(CodecError::UnexpectedMarker { expected: "map", .. })
        ));
    }

    #[test]
    fn test_value_length_skips_nested_values() {
        let long_string = "x".repeat(300);
        let value = json!({"a": [1, [2, [3, long_string]], {"b": -70000}], "c": 1.25});
        let mut bytes = encode_json(&value).unwrap();
        let len = bytes.len();
        bytes.extend_from_slice(NIL);
        assert_eq!(value_length(&bytes).unwrap(), len);
    }

    #[test]
    fn test_truncated_value() {
        let bytes = encode_json(&json!(["abcdef", 1])).unwrap();
        let cut = &bytes[..bytes.len() - 2];
        assert!(matches!(value_length(cut), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_reserved_marker() {
        assert_eq!(value_length(&[0xc1]), Err(CodecError::ReservedMarker(0)));
    }

    #[test]
    fn test_nil() {
        assert!(is_nil(&nil()));
        assert_eq!(decode_json(NIL).unwrap(), json!(null));
    }
}
