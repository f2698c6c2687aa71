//! Incremental MessagePack decoder.
//!
//! Bytes arrive from the link in arbitrary chunks. [`FrameDecoder`] keeps every
//! byte it has not yet turned into a value and re-attempts extraction from the
//! buffer head on each feed, so the sequence of decoded values depends only on
//! the concatenated stream, never on where the chunk boundaries fell.
//!
//! A failed extraction (reserved tag, bad UTF-8, absurd length or entry count,
//! runaway nesting) is reported and the single head byte is dropped so that the
//! next attempt starts one byte further on. Values that are merely truncated are
//! left in place until the rest arrives.
//!
//! Records are always string-keyed maps, so a top-level array header or a
//! top-level map whose first key is not a string is treated as garbage too.
//! Otherwise a stray container byte would swallow the records that follow it
//! as its elements.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use super::error::DecodeError;
use super::value::Value;

/// Bounds applied while decoding untrusted input.
///
/// Without them a single garbage header such as `0xdf ff ff ff ff` would make
/// the decoder wait for four billion map entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderLimits {
    /// Maximum declared byte length of a string, binary or extension.
    pub max_length: usize,
    /// Maximum declared entry count of an array or map.
    pub max_entries: usize,
    /// Maximum container nesting depth.
    pub max_depth: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_length: 64 * 1024,
            max_entries: 256,
            max_depth: 32,
        }
    }
}

/// Running counters kept by the decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    /// Bytes handed to [`FrameDecoder::feed`].
    pub bytes_fed: u64,
    /// Values successfully extracted.
    pub values: u64,
    /// Failed extraction attempts.
    pub errors: u64,
    /// Bytes dropped while resynchronizing after errors.
    pub discarded_bytes: u64,
}

/// Stateful, resumable decoder for a stream of back-to-back MessagePack values.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    limits: DecoderLimits,
    /// Stream offset of `buffer[0]`.
    consumed: u64,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Create a decoder with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with custom limits.
    pub fn with_limits(limits: DecoderLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Append `chunk` to the buffer and extract every complete value now available.
    ///
    /// Results come back in stream order. An `Err` entry marks a failed extraction
    /// attempt; the values after it were decoded once the offending byte was dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Value, DecodeError>> {
        self.buffer.extend_from_slice(chunk);
        self.stats.bytes_fed += chunk.len() as u64;

        let mut out = Vec::new();
        while let Some(result) = self.next_value() {
            out.push(result);
        }
        out
    }

    /// Make one extraction attempt at the buffer head.
    ///
    /// Returns `None` when the buffer is empty or holds only a partial value.
    pub fn next_value(&mut self) -> Option<Result<Value, DecodeError>> {
        if self.buffer.is_empty() {
            return None;
        }

        let attempt = {
            let mut cursor = Cursor::new(&self.buffer, self.consumed, self.limits);
            cursor.value(0).map(|value| (value, cursor.pos))
        };

        match attempt {
            Ok((value, used)) => {
                self.advance(used);
                self.stats.values += 1;
                Some(Ok(value))
            }
            Err(Fault::Incomplete) => None,
            Err(Fault::Invalid(err)) => {
                self.advance(1);
                self.stats.errors += 1;
                self.stats.discarded_bytes += 1;
                Some(Err(err))
            }
        }
    }

    /// Bytes currently held waiting for the rest of a value.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decoder counters since creation or the last [`reset`](Self::reset).
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drop all buffered bytes and counters.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.consumed = 0;
        self.stats = DecoderStats::default();
    }

    fn advance(&mut self, n: usize) {
        self.buffer.advance(n);
        self.consumed += n as u64;
    }
}

enum Fault {
    Incomplete,
    Invalid(DecodeError),
}

type Step<T> = Result<T, Fault>;

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: u64,
    limits: DecoderLimits,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], base: u64, limits: DecoderLimits) -> Self {
        Self {
            bytes,
            pos: 0,
            base,
            limits,
        }
    }

    fn offset(&self, at: usize) -> u64 {
        self.base + at as u64
    }

    fn take(&mut self, n: usize) -> Step<&'a [u8]> {
        if self.bytes.len() - self.pos < n {
            return Err(Fault::Incomplete);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Step<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Step<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Step<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Step<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Step<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn checked_len(&self, len: u64, at: usize) -> Step<usize> {
        let limit = self.limits.max_length;
        match usize::try_from(len) {
            Ok(n) if n <= limit => Ok(n),
            _ => Err(Fault::Invalid(DecodeError::LengthLimit {
                offset: self.offset(at),
                len,
                limit,
            })),
        }
    }

    fn checked_entries(&self, len: u64, at: usize) -> Step<usize> {
        let limit = self.limits.max_entries;
        match usize::try_from(len) {
            Ok(n) if n <= limit => Ok(n),
            _ => Err(Fault::Invalid(DecodeError::EntryLimit {
                offset: self.offset(at),
                len,
                limit,
            })),
        }
    }

    fn peek(&self) -> Step<u8> {
        self.bytes.get(self.pos).copied().ok_or(Fault::Incomplete)
    }

    fn value(&mut self, depth: usize) -> Step<Value> {
        let at = self.pos;
        let tag = self.u8()?;
        let value = match tag {
            0x00..=0x7f => Value::Int(i64::from(tag)),
            0x80..=0x8f => self.map(u64::from(tag & 0x0f), at, depth)?,
            0x90..=0x9f => self.seq(u64::from(tag & 0x0f), at, depth)?,
            0xa0..=0xbf => self.str(u64::from(tag & 0x1f), at)?,
            0xc0 => Value::Nil,
            0xc1 => {
                return Err(Fault::Invalid(DecodeError::ReservedTag {
                    offset: self.offset(at),
                }))
            }
            0xc2 => Value::Bool(false),
            0xc3 => Value::Bool(true),
            0xc4 => {
                let len = u64::from(self.u8()?);
                self.bin(len, at)?
            }
            0xc5 => {
                let len = u64::from(self.u16()?);
                self.bin(len, at)?
            }
            0xc6 => {
                let len = u64::from(self.u32()?);
                self.bin(len, at)?
            }
            0xc7 => {
                let len = u64::from(self.u8()?);
                self.ext(len, at)?
            }
            0xc8 => {
                let len = u64::from(self.u16()?);
                self.ext(len, at)?
            }
            0xc9 => {
                let len = u64::from(self.u32()?);
                self.ext(len, at)?
            }
            0xca => Value::Float(f64::from(f32::from_bits(self.u32()?))),
            0xcb => Value::Float(f64::from_bits(self.u64()?)),
            0xcc => Value::Int(i64::from(self.u8()?)),
            0xcd => Value::Int(i64::from(self.u16()?)),
            0xce => Value::Int(i64::from(self.u32()?)),
            0xcf => {
                let n = self.u64()?;
                i64::try_from(n).map_or(Value::UInt(n), Value::Int)
            }
            0xd0 => Value::Int(i64::from(i8::from_be_bytes(self.array()?))),
            0xd1 => Value::Int(i64::from(i16::from_be_bytes(self.array()?))),
            0xd2 => Value::Int(i64::from(i32::from_be_bytes(self.array()?))),
            0xd3 => Value::Int(i64::from_be_bytes(self.array()?)),
            0xd4 => self.ext(1, at)?,
            0xd5 => self.ext(2, at)?,
            0xd6 => self.ext(4, at)?,
            0xd7 => self.ext(8, at)?,
            0xd8 => self.ext(16, at)?,
            0xd9 => {
                let len = u64::from(self.u8()?);
                self.str(len, at)?
            }
            0xda => {
                let len = u64::from(self.u16()?);
                self.str(len, at)?
            }
            0xdb => {
                let len = u64::from(self.u32()?);
                self.str(len, at)?
            }
            0xdc => {
                let len = u64::from(self.u16()?);
                self.seq(len, at, depth)?
            }
            0xdd => {
                let len = u64::from(self.u32()?);
                self.seq(len, at, depth)?
            }
            0xde => {
                let len = u64::from(self.u16()?);
                self.map(len, at, depth)?
            }
            0xdf => {
                let len = u64::from(self.u32()?);
                self.map(len, at, depth)?
            }
            0xe0..=0xff => Value::Int(i64::from(tag as i8)),
        };
        Ok(value)
    }

    fn str(&mut self, len: u64, at: usize) -> Step<Value> {
        let len = self.checked_len(len, at)?;
        let raw = self.take(len)?;
        match std::str::from_utf8(raw) {
            Ok(s) => Ok(Value::Str(s.to_string())),
            Err(_) => Err(Fault::Invalid(DecodeError::InvalidUtf8 {
                offset: self.offset(at),
            })),
        }
    }

    fn bin(&mut self, len: u64, at: usize) -> Step<Value> {
        let len = self.checked_len(len, at)?;
        Ok(Value::Bin(self.take(len)?.to_vec()))
    }

    fn ext(&mut self, len: u64, at: usize) -> Step<Value> {
        let len = self.checked_len(len, at)?;
        let kind = i8::from_be_bytes(self.array()?);
        Ok(Value::Ext(kind, self.take(len)?.to_vec()))
    }

    fn enter(&self, depth: usize, at: usize) -> Step<()> {
        if depth >= self.limits.max_depth {
            return Err(Fault::Invalid(DecodeError::DepthLimit {
                offset: self.offset(at),
                limit: self.limits.max_depth,
            }));
        }
        Ok(())
    }

    fn seq(&mut self, len: u64, at: usize, depth: usize) -> Step<Value> {
        if depth == 0 {
            return Err(Fault::Invalid(DecodeError::UnexpectedArray {
                offset: self.offset(at),
            }));
        }
        let len = self.checked_entries(len, at)?;
        self.enter(depth, at)?;
        // Each element takes at least one byte; don't trust the header for capacity.
        let mut items = Vec::with_capacity(len.min(self.bytes.len() - self.pos));
        for _ in 0..len {
            items.push(self.value(depth + 1)?);
        }
        Ok(Value::Array(items))
    }

    fn map(&mut self, len: u64, at: usize, depth: usize) -> Step<Value> {
        let len = self.checked_entries(len, at)?;
        self.enter(depth, at)?;
        let mut entries = Vec::with_capacity(len.min((self.bytes.len() - self.pos) / 2));
        for _ in 0..len {
            if depth == 0 && !is_str_tag(self.peek()?) {
                return Err(Fault::Invalid(DecodeError::NonStringKey {
                    offset: self.offset(at),
                }));
            }
            let key = self.value(depth + 1)?;
            let value = self.value(depth + 1)?;
            entries.push((key, value));
        }
        Ok(Value::Map(entries))
    }
}

fn is_str_tag(tag: u8) -> bool {
    matches!(tag, 0xa0..=0xbf | 0xd9..=0xdb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoder::to_vec;

    fn record(t: i64, v: f64, i: f64) -> Value {
        Value::Map(vec![
            (Value::from("t"), Value::Int(t)),
            (Value::from("v"), Value::Float(v)),
            (Value::from("i"), Value::Float(i)),
        ])
    }

    fn ok_values(results: Vec<Result<Value, DecodeError>>) -> Vec<Value> {
        results.into_iter().filter_map(Result::ok).collect()
    }

    #[test]
    fn test_empty_feed_yields_nothing() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&[]).is_empty());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decodes_back_to_back_maps() {
        let mut stream = to_vec(&record(1, 3.7, 0.5));
        stream.extend(to_vec(&record(2, 3.6, 0.6)));

        let mut decoder = FrameDecoder::new();
        let values = ok_values(decoder.feed(&stream));
        assert_eq!(values, vec![record(1, 3.7, 0.5), record(2, 3.6, 0.6)]);
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.stats().values, 2);
    }

    #[test]
    fn test_partial_value_is_retained() {
        let bytes = to_vec(&record(10, 4.0, 1.25));
        let (head, tail) = bytes.split_at(bytes.len() - 3);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(head).is_empty());
        assert_eq!(decoder.buffered(), head.len());

        let values = ok_values(decoder.feed(tail));
        assert_eq!(values, vec![record(10, 4.0, 1.25)]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_every_split_point_gives_same_values() {
        let mut stream = Vec::new();
        for n in 0..4 {
            stream.extend(to_vec(&record(n * 1000, 3.0 + n as f64, 0.1 * n as f64)));
        }
        let whole = ok_values(FrameDecoder::new().feed(&stream));
        assert_eq!(whole.len(), 4);

        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut values = ok_values(decoder.feed(&stream[..split]));
            values.extend(ok_values(decoder.feed(&stream[split..])));
            assert_eq!(values, whole, "split at {split}");
        }
    }

    #[test]
    fn test_reserved_tag_is_reported_and_skipped() {
        let mut stream = vec![0xc1];
        stream.extend(to_vec(&record(5, 1.0, 2.0)));

        let mut decoder = FrameDecoder::new();
        let results = decoder.feed(&stream);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(DecodeError::ReservedTag { offset: 0 }));
        assert_eq!(results[1], Ok(record(5, 1.0, 2.0)));
        assert_eq!(decoder.stats().discarded_bytes, 1);
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        // fixstr of length 2 holding a lone continuation byte
        let mut decoder = FrameDecoder::new();
        let results = decoder.feed(&[0xa2, 0x80, 0x41]);
        assert_eq!(results[0], Err(DecodeError::InvalidUtf8 { offset: 0 }));
        assert_eq!(decoder.stats().errors, 1);
    }

    #[test]
    fn test_truncated_string_waits_for_more() {
        let mut decoder = FrameDecoder::new();
        // str8 declaring 5 bytes with only 2 present
        assert!(decoder.feed(&[0xd9, 0x05, b'h', b'e']).is_empty());
        let results = decoder.feed(b"llo");
        assert_eq!(results, vec![Ok(Value::from("hello"))]);
    }

    #[test]
    fn test_huge_declared_length_is_rejected() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.feed(&[0xdb, 0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(
            results[0],
            Err(DecodeError::LengthLimit { offset: 0, .. })
        ));
    }

    #[test]
    fn test_entry_count_has_its_own_limit() {
        let mut decoder = FrameDecoder::new();
        // map16 declaring 4096 entries
        let results = decoder.feed(&[0xde, 0x10, 0x00]);
        assert_eq!(
            results[0],
            Err(DecodeError::EntryLimit {
                offset: 0,
                len: 4096,
                limit: 256
            })
        );
        assert_eq!(decoder.stats().discarded_bytes, 1);
    }

    #[test]
    fn test_stray_array_header_does_not_swallow_records() {
        for garbage in [&[0x9f][..], &[0xdc, 0xff, 0x00][..], &[0xdd, 0, 0, 0, 3][..]] {
            let mut stream = to_vec(&record(1, 1.0, 1.0));
            stream.extend_from_slice(garbage);
            for n in 2..=20 {
                stream.extend(to_vec(&record(n, 1.0, 1.0)));
            }

            let mut decoder = FrameDecoder::new();
            let results = decoder.feed(&stream);
            let maps: Vec<_> = ok_values(results.clone())
                .into_iter()
                .filter(|v| matches!(v, Value::Map(_)))
                .collect();
            assert_eq!(maps.len(), 20, "garbage {garbage:02x?}");
            assert_eq!(maps[19], record(20, 1.0, 1.0));
            assert!(matches!(
                results[1],
                Err(DecodeError::UnexpectedArray { .. })
            ));
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn test_stray_map_header_does_not_swallow_records() {
        let mut stream = to_vec(&record(1, 1.0, 1.0));
        stream.push(0x82);
        stream.extend(to_vec(&record(2, 1.0, 1.0)));
        stream.extend(to_vec(&record(3, 1.0, 1.0)));

        let mut decoder = FrameDecoder::new();
        let results = decoder.feed(&stream);
        let offset = to_vec(&record(1, 1.0, 1.0)).len() as u64;
        assert_eq!(
            results,
            vec![
                Ok(record(1, 1.0, 1.0)),
                Err(DecodeError::NonStringKey { offset }),
                Ok(record(2, 1.0, 1.0)),
                Ok(record(3, 1.0, 1.0)),
            ]
        );
    }

    #[test]
    fn test_nested_arrays_inside_records_are_fine() {
        let value = Value::Map(vec![(
            Value::from("samples"),
            Value::Array(vec![Value::Int(1), Value::Array(vec![])]),
        )]);
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&to_vec(&value)), vec![Ok(value)]);
    }

    #[test]
    fn test_depth_limit() {
        let limits = DecoderLimits {
            max_depth: 2,
            ..DecoderLimits::default()
        };
        let mut decoder = FrameDecoder::with_limits(limits);
        // {"a": [[]]} nests three containers deep
        let results = decoder.feed(&[0x81, 0xa1, b'a', 0x91, 0x90]);
        assert!(matches!(
            results[0],
            Err(DecodeError::DepthLimit { offset: 4, limit: 2 })
        ));
    }

    #[test]
    fn test_scalar_encodings() {
        let mut decoder = FrameDecoder::new();
        let bytes = [
            0xc0, // nil
            0xc3, // true
            0xff, // -1
            0xcc, 0xc8, // 200
            0xd1, 0xfc, 0x18, // -1000
            0xca, 0x3f, 0xc0, 0x00, 0x00, // 1.5f32
            0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // u64::MAX
        ];
        let values = ok_values(decoder.feed(&bytes));
        assert_eq!(
            values,
            vec![
                Value::Nil,
                Value::Bool(true),
                Value::Int(-1),
                Value::Int(200),
                Value::Int(-1000),
                Value::Float(1.5),
                Value::UInt(u64::MAX),
            ]
        );
    }

    #[test]
    fn test_error_offsets_track_stream_position() {
        let mut decoder = FrameDecoder::new();
        let first = to_vec(&record(1, 1.0, 1.0));
        decoder.feed(&first);
        let results = decoder.feed(&[0xc1]);
        assert_eq!(
            results,
            vec![Err(DecodeError::ReservedTag {
                offset: first.len() as u64
            })]
        );
    }

    #[test]
    fn test_reset_clears_buffer() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x83, 0xa1]);
        assert_eq!(decoder.buffered(), 2);
        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.stats(), DecoderStats::default());
    }
}
