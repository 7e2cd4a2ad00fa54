use super::{encode_error, read_head, value_end, value_length, Kind};
use crate::error::CodecError;

/// Encode an array of `len` nils
pub fn nil_array(len: usize) -> Result<Vec<u8>, CodecError> {
    let header_len = u32::try_from(len).map_err(encode_error)?;
    let mut buf = Vec::with_capacity(len + 5);
    rmp::encode::write_array_len(&mut buf, header_len).map_err(encode_error)?;
    for _ in 0..len {
        rmp::encode::write_nil(&mut buf).map_err(encode_error)?;
    }
    Ok(buf)
}

/// Number of elements of the encoded array in `buf`
pub fn array_length(buf: &[u8]) -> Result<usize, CodecError> {
    array_header(buf).map(|(len, _)| len)
}

fn array_header(buf: &[u8]) -> Result<(usize, usize), CodecError> {
    let head = read_head(buf, 0)?;
    match head.kind {
        Kind::Array(len) => Ok((len, head.len)),
        _ => Err(CodecError::UnexpectedMarker {
            expected: "array",
            marker: buf[0],
            offset: 0,
        }),
    }
}

/// Lazy iterator over the encoded elements of an array
pub struct ArrayElements<'a> {
    buf: &'a [u8],
    offset: usize,
    remaining: usize,
}

impl<'a> ArrayElements<'a> {
    /// Start reading the array in `buf`
    pub fn new(buf: &'a [u8]) -> Result<Self, CodecError> {
        let (len, header_len) = array_header(buf)?;
        Ok(Self {
            buf,
            offset: header_len,
            remaining: len,
        })
    }

    /// Number of elements not yet read
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<'a> Iterator for ArrayElements<'a> {
    type Item = Result<&'a [u8], CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match value_end(self.buf, self.offset) {
            Ok(end) => {
                let element = &self.buf[self.offset..end];
                self.offset = end;
                self.remaining -= 1;
                Some(Ok(element))
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

/// Replace the element at `index` (0-based) of an encoded array.
///
/// Only the bytes of the target slot change: everything before and after it
/// is copied verbatim, so the other elements keep their exact encoding.
/// `value` must hold exactly one encoded value.
pub fn replace_array_element(
    array: &[u8],
    index: usize,
    value: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let (len, header_len) = array_header(array)?;
    if index >= len {
        return Err(CodecError::IndexOutOfBounds { index, len });
    }
    if value_length(value)? != value.len() {
        return Err(CodecError::Decode(format!(
            "replacement for index {} holds more than one value",
            index
        )));
    }

    let mut start = header_len;
    for _ in 0..index {
        start = value_end(array, start)?;
    }
    let end = value_end(array, start)?;

    let mut patched = Vec::with_capacity(array.len() - (end - start) + value.len());
    patched.extend_from_slice(&array[..start]);
    patched.extend_from_slice(value);
    patched.extend_from_slice(&array[end..]);
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{decode_json, encode_json, NIL};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_nil_array() {
        let array = nil_array(3).unwrap();
        assert_eq!(array_length(&array).unwrap(), 3);
        assert_eq!(decode_json(&array).unwrap(), json!([null, null, null]));
        assert_eq!(decode_json(&nil_array(0).unwrap()).unwrap(), json!([]));
    }

    #[test]
    fn test_nil_array_beyond_fixarray() {
        let array = nil_array(20).unwrap();
        assert_eq!(array_length(&array).unwrap(), 20);
        assert_eq!(ArrayElements::new(&array).unwrap().count(), 20);
    }

    #[test]
    fn test_array_elements() {
        let array = encode_json(&json!(["a", {"b": [1, 2]}, null])).unwrap();
        let elements: Vec<_> = ArrayElements::new(&array)
            .unwrap()
            .map(|e| decode_json(e.unwrap()).unwrap())
            .collect();
        assert_eq!(elements, vec![json!("a"), json!({"b": [1, 2]}), json!(null)]);
    }

    #[test]
    fn test_array_elements_count_down() {
        let array = encode_json(&json!([1, 2, 3])).unwrap();
        let mut elements = ArrayElements::new(&array).unwrap();
        assert_eq!(elements.remaining(), 3);
        assert_eq!(elements.size_hint(), (0, Some(3)));

        elements.next().unwrap().unwrap();
        assert_eq!(elements.remaining(), 2);
        assert_eq!(elements.by_ref().count(), 2);
        assert_eq!(elements.remaining(), 0);
        assert!(elements.next().is_none());
    }

    #[test]
    fn test_array_elements_stop_after_malformed_element() {
        // Header claims two elements but the buffer ends after the first
        let truncated = [0x92, 0x01];
        let mut elements = ArrayElements::new(&truncated).unwrap();
        assert!(elements.next().unwrap().is_ok());
        assert!(elements.next().unwrap().is_err());
        assert_eq!(elements.remaining(), 0);
        assert!(elements.next().is_none());
    }

    #[test]
    fn test_array_elements_rejects_map() {
        let map = encode_json(&json!({"a": 1})).unwrap();
        assert!(ArrayElements::new(&map).is_err());
    }

    #[test]
    fn test_replace_fills_slots_in_any_order() {
        let mut array = nil_array(3).unwrap();
        for (index, value) in [(2, json!(3)), (0, json!(1)), (1, json!(2))] {
            array = replace_array_element(&array, index, &encode_json(&value).unwrap()).unwrap();
        }
        assert_eq!(decode_json(&array).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_replace_with_larger_value() {
        let array = nil_array(2).unwrap();
        let value = encode_json(&json!({"nested": ["x", "y"]})).unwrap();
        let patched = replace_array_element(&array, 0, &value).unwrap();
        assert_eq!(
            decode_json(&patched).unwrap(),
            json!([{"nested": ["x", "y"]}, null])
        );
    }

    #[test]
    fn test_replace_out_of_bounds() {
        let array = nil_array(2).unwrap();
        assert_eq!(
            replace_array_element(&array, 2, NIL),
            Err(CodecError::IndexOutOfBounds { index: 2, len: 2 })
        );
    }

    #[test]
    fn test_replace_rejects_multiple_values() {
        let array = nil_array(1).unwrap();
        let two_values = [0xc0, 0xc0];
        assert!(replace_array_element(&array, 0, &two_values).is_err());
    }

    #[test]
    fn test_replace_in_truncated_array() {
        let array = encode_json(&json!([1, "abc"])).unwrap();
        let cut = &array[..array.len() - 1];
        assert!(matches!(
            replace_array_element(cut, 1, NIL),
            Err(CodecError::Truncated { .. })
        ));
    }

    fn arb_element() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            Just(json!(null)),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z]{0,40}".prop_map(|s| json!(s)),
            prop::collection::vec(any::<u16>(), 0..5).prop_map(|v| json!(v)),
        ]
    }

    proptest! {
        /// Splicing one slot leaves every other slot byte-for-byte intact.
        #[test]
        fn replace_preserves_other_elements(
            elements in prop::collection::vec(arb_element(), 1..24),
            replacement in arb_element(),
            index_seed in any::<usize>(),
        ) {
            let index = index_seed % elements.len();
            let array = encode_json(&serde_json::Value::Array(elements.clone())).unwrap();
            let value = encode_json(&replacement).unwrap();

            let patched = replace_array_element(&array, index, &value).unwrap();

            let before: Vec<&[u8]> = ArrayElements::new(&array).unwrap().map(|e| e.unwrap()).collect();
            let after: Vec<&[u8]> = ArrayElements::new(&patched).unwrap().map(|e| e.unwrap()).collect();
            prop_assert_eq!(before.len(), after.len());
            for (i, (old, new)) in before.iter().zip(after.iter()).enumerate() {
                if i == index {
                    prop_assert_eq!(*new, value.as_slice());
                } else {
                    prop_assert_eq!(old, new);
                }
            }
        }
    }
}
