//! Error and status taxonomy shared by the encoder and decoder.
//!
//! Each enum carries a `code()` accessor mapping back to the original numeric status constants,
//! for callers bridging to logs or wire-level diagnostics that predate this crate.

/// Failure modes returned by [`crate::encoder::Encoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive] // new failure modes may be added later
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// The output buffer has no room for the next byte; the frame in progress is abandoned.
    BufferTooSmall,
    /// `new_frame` was called with `frame_is_ack` or `frame_is_encrypted` set; neither mode is
    /// implemented.
    UnsupportedMode,
}

impl EncodeError {
    /// The original C implementation's numeric status code for this failure.
    pub fn code(&self) -> i8 {
        match self {
            EncodeError::BufferTooSmall => -1,
            EncodeError::UnsupportedMode => -4,
        }
    }
}

// std::error::Error isn't available in no_std; nothing here needs Display either.

/// Failure modes returned by [`crate::decoder::Decoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive] // new failure modes may be added later
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The control byte's `frame_valid` bit was not set.
    InvalidFrame,
    /// The closing delimiter arrived but the reconstructed CRC did not match.
    BadCrc,
    /// An `ESCAPE_MARKER` was followed by a byte other than `ESCAPED_FRAME`/`ESCAPED_ESCAPE`.
    InvalidEscape,
    /// The sink has no room for the next payload byte; the frame in progress is abandoned.
    BufferTooSmall,
    /// The frame claimed `frame_is_ack` or `frame_is_encrypted`, neither of which is implemented,
    /// or the decoder reached an unreachable internal state.
    CrcEngineFailure,
    /// `decode_buffer` exhausted its input without completing a frame.
    NoFrameCompleted,
}

impl DecodeError {
    /// The original C implementation's numeric status code for this failure.
    pub fn code(&self) -> i8 {
        match self {
            DecodeError::InvalidFrame => -6,
            DecodeError::BadCrc => -5,
            DecodeError::InvalidEscape => -4, // shares the generic ERROR slot
            DecodeError::BufferTooSmall => -1,
            DecodeError::CrcEngineFailure => -2,
            DecodeError::NoFrameCompleted => -4,
        }
    }
}

/// A successful outcome of feeding one byte to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeEvent {
    /// Mid-frame; no frame has completed yet.
    Continuing,
    /// A good frame was just delivered to the sink.
    Complete,
}

impl DecodeEvent {
    pub fn code(&self) -> i8 {
        match self {
            DecodeEvent::Continuing => 0,
            DecodeEvent::Complete => 1,
        }
    }
}
