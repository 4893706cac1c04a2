//! Generic bencode values.
//!
//! Typed structures like [`crate::metainfo::MetaInfo`] decode straight from
//! bencode with `bendy`. [`Value`] is for the cases where the exact bytes
//! matter, like hashing the `info` dictionary of a torrent: decoding is
//! strict, so `encode(decode(b)) == b` for every accepted buffer.
use std::collections::BTreeMap;

use bendy::{
    decoding::{Decoder, Object},
    encoding::{self, SingleItemEncoder, ToBencode},
};

use crate::error::Error;

/// Maximum nesting of lists and dictionaries.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Keys are kept in byte order, which is the order they must have on the
    /// wire.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Value of `key` if this is a dictionary that has it.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        match self {
            Value::Dict(d) => d.get(key),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Bytes(value.as_bytes().to_vec())
    }
}

impl ToBencode for Value {
    const MAX_DEPTH: usize = MAX_DEPTH;

    fn encode(
        &self,
        encoder: SingleItemEncoder,
    ) -> Result<(), encoding::Error> {
        match self {
            Value::Integer(n) => encoder.emit_int(*n),
            Value::Bytes(b) => encoder.emit_bytes(b),
            Value::List(list) => encoder.emit_list(|e| {
                for v in list {
                    e.emit(v)?;
                }
                Ok(())
            }),
            Value::Dict(dict) => encoder.emit_dict(|mut e| {
                for (k, v) in dict {
                    e.emit_pair(k, v)?;
                }
                Ok(())
            }),
        }
    }
}

/// Decode exactly one value from `bytes`. Truncated input, malformed or
/// non canonical integers, unsorted or repeated dictionary keys and bytes
/// after the value are all errors.
pub fn decode(bytes: &[u8]) -> Result<Value, Error> {
    let mut decoder = Decoder::new(bytes).with_max_depth(MAX_DEPTH);

    let value = match decoder.next_object()? {
        Some(object) => from_object(object)?,
        None => return Err(Error::BencodeEmpty),
    };

    let trailing = !matches!(decoder.next_object(), Ok(None));
    if trailing {
        return Err(Error::BencodeTrailingBytes);
    }

    Ok(value)
}

/// Encode `value` in its canonical form.
pub fn encode(value: &Value) -> Result<Vec<u8>, Error> {
    Ok(value.to_bencode()?)
}

fn from_object(object: Object) -> Result<Value, Error> {
    match object {
        Object::Integer(s) => {
            let n: i64 = s.parse().map_err(|_| {
                Error::BencodeDecode(format!("invalid integer `{s}`"))
            })?;
            // rejects leading zeros, `-0` and a leading `+`
            if n.to_string() != s {
                return Err(Error::BencodeDecode(format!(
                    "non canonical integer `{s}`"
                )));
            }
            Ok(Value::Integer(n))
        }
        Object::Bytes(b) => Ok(Value::Bytes(b.to_vec())),
        Object::List(mut list) => {
            let mut values = Vec::new();
            while let Some(object) = list.next_object()? {
                values.push(from_object(object)?);
            }
            Ok(Value::List(values))
        }
        Object::Dict(mut dict) => {
            let mut map = BTreeMap::new();
            let mut last: Option<Vec<u8>> = None;

            while let Some((key, object)) = dict.next_pair()? {
                if last.as_deref().is_some_and(|last| last >= key) {
                    return Err(Error::BencodeDecode(format!(
                        "dictionary key `{}` is out of order",
                        String::from_utf8_lossy(key)
                    )));
                }
                last = Some(key.to_vec());
                map.insert(key.to_vec(), from_object(object)?);
            }
            Ok(Value::Dict(map))
        }
    }
}
