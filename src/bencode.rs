//! # Bencode Codec
//!
//! Bencoding is the serialization format used by BitTorrent for torrent
//! files and tracker responses. It knows four kinds of values:
//!
//! - **Byte strings**: `<length>:<bytes>`, e.g. `4:spam`
//! - **Integers**: `i<digits>e`, e.g. `i42e`, `i-5e`
//! - **Lists**: `l<values>e`, e.g. `l4:spami42ee`
//! - **Dictionaries**: `d<key><value>...e`, keys are byte strings
//!
//! ## Byte strings are bytes
//!
//! Byte strings carry arbitrary binary data. The `pieces` field of a
//! torrent and the `peers` field of a tracker response are raw bytes that
//! would be corrupted by any textual interpretation, so [`Value::Bytes`]
//! stores `Vec<u8>` and UTF-8 conversion is left to callers.
//!
//! ## Canonical encoding
//!
//! Dictionaries are stored in a `BTreeMap` keyed by raw bytes, so
//! [`encode`] always emits keys in ascending lexicographic byte order and
//! the same logical value always encodes to the same bytes.
//!
//! ## Raw spans
//!
//! The info hash of a torrent is the SHA-1 of the `info` value exactly as
//! it appeared on disk. Re-encoding only reproduces those bytes when the
//! source was canonically encoded, so [`dict_entry_raw`] exposes the
//! original byte span of a dictionary entry instead.

use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Arbitrary bytes, length-prefixed on the wire.
    Bytes(Vec<u8>),
    /// Signed integer.
    Integer(i64),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Dictionary with byte-string keys, kept sorted for canonical output.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Returns the raw bytes if this value is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the value as UTF-8 text if it is a valid byte string.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Returns the integer if this value is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the underlying map if this value is a dictionary.
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up `key` if this value is a dictionary.
    pub fn lookup(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|entries| entries.get(key))
    }
}

/// Decodes exactly one bencoded value from `data`.
///
/// Trailing bytes after the value are rejected, since both torrent files
/// and tracker responses consist of a single top-level value.
pub fn decode(data: &[u8]) -> Result<Value> {
    let mut decoder = Decoder::new(data);
    let value = decoder.parse_value()?;
    if decoder.pos != data.len() {
        bail!("trailing data after bencoded value");
    }
    Ok(value)
}

/// Encodes `value` into its canonical bencoded form.
///
/// Encoding is deterministic: dictionary keys are emitted in ascending
/// byte order, so equal values always produce byte-identical output.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Bytes(bytes) => {
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(bytes);
        }
        Value::Integer(n) => {
            out.push(b'i');
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(b'e');
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(entries) => {
            out.push(b'd');
            // BTreeMap iteration order is ascending key order
            for (key, entry) in entries {
                out.extend_from_slice(key.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(key);
                encode_into(entry, out);
            }
            out.push(b'e');
        }
    }
}

/// Returns the raw byte span of the value stored under `key` in the
/// top-level dictionary encoded in `data`, or `None` if the key is absent.
///
/// The returned slice is the value exactly as it appears in `data`, which
/// makes it suitable for digest computation without any canonicalization
/// assumption about the source.
pub fn dict_entry_raw<'a>(data: &'a [u8], key: &[u8]) -> Result<Option<&'a [u8]>> {
    let mut decoder = Decoder::new(data);
    if decoder.peek()? != b'd' {
        bail!("top-level value is not a dictionary");
    }
    decoder.pos += 1;

    while decoder.peek()? != b'e' {
        let entry_key = decoder.parse_key()?;
        let start = decoder.pos;
        decoder.parse_value()?;
        if entry_key == key {
            return Ok(Some(&data[start..decoder.pos]));
        }
    }
    Ok(None)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Decoder<'a> {
        Decoder { data, pos: 0 }
    }

    fn peek(&self) -> Result<u8> {
        match self.data.get(self.pos) {
            Some(byte) => Ok(*byte),
            None => Err(anyhow!("unexpected end of input")),
        }
    }

    fn parse_value(&mut self) -> Result<Value> {
        match self.peek()? {
            b'i' => self.parse_integer(),
            b'l' => self.parse_list(),
            b'd' => self.parse_dict(),
            b'0'..=b'9' => Ok(Value::Bytes(self.parse_string()?)),
            byte => Err(anyhow!("invalid leading byte {:#04x}", byte)),
        }
    }

    fn parse_integer(&mut self) -> Result<Value> {
        self.pos += 1; // 'i'
        let start = self.pos;
        if self.peek()? == b'-' {
            self.pos += 1;
        }
        while self.peek()? != b'e' {
            if !self.data[self.pos].is_ascii_digit() {
                bail!("invalid byte in integer literal");
            }
            self.pos += 1;
        }
        let literal = &self.data[start..self.pos];
        self.pos += 1; // 'e'

        let digits = literal.strip_prefix(b"-").unwrap_or(literal);
        if digits.is_empty() {
            bail!("empty integer literal");
        }
        if digits.len() > 1 && digits[0] == b'0' {
            bail!("integer literal has a leading zero");
        }
        if literal == b"-0" {
            bail!("negative zero is not a valid integer");
        }

        // The literal is known-ASCII here, only the range can still fail.
        let text = std::str::from_utf8(literal)
            .map_err(|_| anyhow!("invalid byte in integer literal"))?;
        let value = text
            .parse::<i64>()
            .map_err(|_| anyhow!("integer literal out of range: {}", text))?;
        Ok(Value::Integer(value))
    }

    fn parse_string(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        while self.peek()? != b':' {
            if !self.data[self.pos].is_ascii_digit() {
                bail!("invalid byte in string length");
            }
            self.pos += 1;
        }
        let digits = &self.data[start..self.pos];
        self.pos += 1; // ':'

        let text = std::str::from_utf8(digits)
            .map_err(|_| anyhow!("invalid byte in string length"))?;
        let length = text
            .parse::<usize>()
            .map_err(|_| anyhow!("string length out of range: {}", text))?;
        if length > self.data.len() - self.pos {
            bail!("string payload is truncated");
        }

        let bytes = self.data[self.pos..self.pos + length].to_vec();
        self.pos += length;
        Ok(bytes)
    }

    fn parse_key(&mut self) -> Result<Vec<u8>> {
        if !self.peek()?.is_ascii_digit() {
            bail!("dictionary key is not a byte string");
        }
        self.parse_string()
    }

    fn parse_list(&mut self) -> Result<Value> {
        self.pos += 1; // 'l'
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.parse_value()?);
        }
        self.pos += 1; // 'e'
        Ok(Value::List(items))
    }

    fn parse_dict(&mut self) -> Result<Value> {
        self.pos += 1; // 'd'
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            let key = self.parse_key()?;
            let value = self.parse_value()?;
            entries.insert(key, value);
        }
        self.pos += 1; // 'e'
        Ok(Value::Dict(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(text: &str) -> Value {
        Value::Bytes(text.as_bytes().to_vec())
    }

    fn dict(entries: Vec<(&str, Value)>) -> Value {
        Value::Dict(
            entries
                .into_iter()
                .map(|(key, value)| (key.as_bytes().to_vec(), value))
                .collect(),
        )
    }

    #[test]
    fn encode_strings() {
        assert_eq!(encode(&bytes("test")), b"4:test");
        assert_eq!(encode(&bytes("")), b"0:");
        assert_eq!(encode(&bytes("hello world")), b"11:hello world");
        assert_eq!(
            encode(&bytes("BitTorrent protocol")),
            b"19:BitTorrent protocol"
        );
    }

    #[test]
    fn encode_integers() {
        assert_eq!(encode(&Value::Integer(100)), b"i100e");
        assert_eq!(encode(&Value::Integer(0)), b"i0e");
        assert_eq!(encode(&Value::Integer(-5)), b"i-5e");
        assert_eq!(encode(&Value::Integer(42)), b"i42e");
    }

    #[test]
    fn encode_lists() {
        assert_eq!(
            encode(&Value::List(vec![bytes("Test"), bytes("Data")])),
            b"l4:Test4:Datae"
        );
        assert_eq!(encode(&Value::List(vec![])), b"le");
        assert_eq!(
            encode(&Value::List(vec![Value::Integer(42), bytes("test")])),
            b"li42e4:teste"
        );
    }

    #[test]
    fn encode_dict_sorts_keys() {
        let value = dict(vec![
            ("site", bytes("example.com")),
            ("Status", bytes("Good")),
        ]);
        // "Status" (0x53...) sorts before "site" (0x73...)
        assert_eq!(encode(&value), b"d6:Status4:Good4:site11:example.come");

        assert_eq!(encode(&dict(vec![])), b"de");
    }

    #[test]
    fn encode_nested_dict() {
        let value = dict(vec![(
            "Test Data",
            dict(vec![
                ("Status", bytes("Good")),
                ("site", bytes("example.com")),
            ]),
        )]);
        assert_eq!(
            encode(&value),
            b"d9:Test Datad6:Status4:Good4:site11:example.comee".as_slice()
        );
    }

    #[test]
    fn decode_strings() {
        assert_eq!(decode(b"4:test").unwrap(), bytes("test"));
        assert_eq!(decode(b"0:").unwrap(), bytes(""));
        assert_eq!(decode(b"11:hello world").unwrap(), bytes("hello world"));
    }

    #[test]
    fn decode_integers() {
        assert_eq!(decode(b"i100e").unwrap(), Value::Integer(100));
        assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
        assert_eq!(decode(b"i-5e").unwrap(), Value::Integer(-5));
        assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    }

    #[test]
    fn decode_binary_bytes_survive() {
        let input = b"6:\x00\x01\xfe\xff\x80\x7f";
        let value = decode(input).unwrap();
        assert_eq!(
            value.as_bytes().unwrap(),
            &[0x00, 0x01, 0xfe, 0xff, 0x80, 0x7f]
        );
    }

    #[test]
    fn decode_list() {
        let value = decode(b"l4:spam4:eggsi22ee").unwrap();
        assert_eq!(
            value,
            Value::List(vec![bytes("spam"), bytes("eggs"), Value::Integer(22)])
        );
    }

    #[test]
    fn decode_dict() {
        let value = decode(b"d6:Status4:Good4:site11:example.come").unwrap();
        assert_eq!(value.lookup(b"Status"), Some(&bytes("Good")));
        assert_eq!(value.lookup(b"site"), Some(&bytes("example.com")));
        assert_eq!(value.lookup(b"missing"), None);
    }

    #[test]
    fn decode_errors() {
        let invalid: [&[u8]; 12] = [
            b"",       // empty input
            b"i",      // incomplete integer
            b"i42",    // integer missing its terminator
            b"5:abc",  // string shorter than its length
            b"l",      // incomplete list
            b"d",      // incomplete dict
            b"d1:a",   // dict missing a value
            b"x",      // invalid leading byte
            b"i12x3e", // junk inside an integer
            b"di1e2:abe", // non-string dict key
            b"-5e",    // bare sign
            b"4:teste", // trailing data
        ];
        for input in invalid {
            assert!(decode(input).is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn decode_rejects_malformed_integers() {
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"i03e").is_err());
        assert!(decode(b"i00e").is_err());
        assert!(decode(b"i-00e").is_err());
        assert!(decode(b"ie").is_err());
        assert!(decode(b"i-e").is_err());
        assert!(decode(b"i+5e").is_err());
    }

    #[test]
    fn round_trip_values() {
        let cases = vec![
            bytes("hello world"),
            Value::Integer(42),
            Value::Integer(-9000),
            Value::List(vec![bytes("test"), Value::Integer(123), bytes("another")]),
            dict(vec![
                ("key1", bytes("value1")),
                ("key2", Value::Integer(456)),
                ("key3", Value::List(vec![bytes("nested"), bytes("list")])),
            ]),
        ];
        for original in cases {
            let encoded = encode(&original);
            assert_eq!(decode(&encoded).unwrap(), original);
        }
    }

    #[test]
    fn round_trip_canonical_bytes() {
        let canonical: [&[u8]; 4] = [
            b"d6:Status4:Good4:site11:example.come",
            b"li1ei2ei3ee",
            b"d4:infod6:lengthi4e4:name1:a6:pieces3:xyzee",
            b"i-42e",
        ];
        for input in canonical {
            let value = decode(input).unwrap();
            assert_eq!(encode(&value), input);
        }
    }

    #[test]
    fn raw_span_matches_source_bytes() {
        let data = b"d8:announce3:url4:infod6:lengthi42e4:name4:teste3:zzzi1ee";
        let span = dict_entry_raw(data, b"info").unwrap().unwrap();
        assert_eq!(span, b"d6:lengthi42e4:name4:teste");

        assert_eq!(dict_entry_raw(data, b"announce").unwrap().unwrap(), b"3:url");
        assert_eq!(dict_entry_raw(data, b"absent").unwrap(), None);
    }

    #[test]
    fn raw_span_preserves_non_canonical_order() {
        // Keys out of order: a canonical re-encode would not reproduce
        // these bytes, the span must.
        let data = b"d4:infod4:name1:a6:lengthi7eee";
        let span = dict_entry_raw(data, b"info").unwrap().unwrap();
        assert_eq!(span, b"d4:name1:a6:lengthi7ee");
    }

    #[test]
    fn raw_span_rejects_non_dict() {
        assert!(dict_entry_raw(b"le", b"info").is_err());
        assert!(dict_entry_raw(b"i42e", b"info").is_err());
    }
}
