//! MessagePack stream decoder error type.

use thiserror::Error;

/// Reasons the bytes at the head of the decoder buffer cannot be a value.
///
/// Offsets count bytes from the start of the stream fed into the decoder.
/// Running out of input is not an error; the decoder simply waits for more.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The never-used type tag `0xc1`.
    #[error("reserved type tag 0xc1 at offset {offset}")]
    ReservedTag {
        /// Stream offset of the tag byte.
        offset: u64,
    },
    /// A string payload that is not UTF-8.
    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 {
        /// Stream offset of the string header.
        offset: u64,
    },
    /// A declared length larger than the decoder accepts.
    #[error("declared length {len} exceeds limit {limit} at offset {offset}")]
    LengthLimit {
        /// Stream offset of the header declaring the length.
        offset: u64,
        /// Declared length.
        len: u64,
        /// Configured maximum.
        limit: usize,
    },
    /// A container declaring more entries than the decoder accepts.
    #[error("declared {len} entries exceeds limit {limit} at offset {offset}")]
    EntryLimit {
        /// Stream offset of the container header.
        offset: u64,
        /// Declared entry count.
        len: u64,
        /// Configured maximum.
        limit: usize,
    },
    /// An array where a record must start.
    #[error("array header at offset {offset} cannot start a record")]
    UnexpectedArray {
        /// Stream offset of the array header.
        offset: u64,
    },
    /// A top-level map whose key is not a string.
    #[error("map at offset {offset} has a non-string key")]
    NonStringKey {
        /// Stream offset of the map header.
        offset: u64,
    },
    /// Containers nested deeper than the decoder accepts.
    #[error("nesting depth exceeds limit {limit} at offset {offset}")]
    DepthLimit {
        /// Stream offset of the container header.
        offset: u64,
        /// Configured maximum.
        limit: usize,
    },
}
