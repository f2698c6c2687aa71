//! MessagePack wire format.
//!
//! The device writes back-to-back MessagePack maps with no outer framing; value
//! boundaries are discovered from the encoding itself. [`FrameDecoder`] turns
//! an arbitrarily chunked byte stream into [`Value`]s.

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod value;

pub use decoder::{DecoderLimits, DecoderStats, FrameDecoder};
pub use encoder::{encode, to_vec};
pub use error::DecodeError;
pub use value::Value;
