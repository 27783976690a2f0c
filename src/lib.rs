#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), no_std)]
// this crate is intended for use in both hosted and embedded contexts. No allocations or other conveniences

pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod wire;

pub use crc::{xmodem_step, CrcFn};
pub use decoder::{BufferSink, DecodeSink, Decoder, DecoderStats};
pub use encoder::{Encoder, EncoderStats};
pub use error::{DecodeError, DecodeEvent, EncodeError};
pub use wire::{ControlByte, ESCAPED_ESCAPE, ESCAPED_FRAME, ESCAPE_MARKER, FRAME_MARKER};
