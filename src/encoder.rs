//! Frames one payload at a time into a caller-owned output buffer.

use byteorder::{BigEndian, ByteOrder};

use crate::crc::CrcFn;
use crate::error::EncodeError;
use crate::wire::{
    ControlByte, ESCAPED_ESCAPE, ESCAPED_FRAME, ESCAPE_MARKER, FRAME_MARKER, INITIAL_CRC_VALUE,
};

/// Counters observable between calls, reset only by [`Encoder::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderStats {
    pub encoded_frame_cnt: u32,
    pub crc_calc_callback_cnt: u32,
    pub sequence_number: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Finalized,
    BufferTooSmall,
}

/// Encodes payloads into stuffed, CRC-protected, delimited frames.
///
/// An `Encoder` borrows its output buffer and CRC function for its entire lifetime and is meant
/// to be reused across many frames: call [`Encoder::new_frame`], feed payload bytes with
/// [`Encoder::add_byte`] or [`Encoder::add_buffer`], then [`Encoder::finalize`] to close the
/// frame. `Encoder` performs no allocation and never blocks.
pub struct Encoder<'b> {
    buffer: &'b mut [u8],
    write_index: usize,
    crc_fn: CrcFn,
    running_crc: u16,
    control: ControlByte,
    state: State,
    stats: EncoderStats,
}

impl<'b> Encoder<'b> {
    /// Borrows `buffer` and `crc_fn` for the encoder's lifetime. The minimum usable buffer size
    /// is zero (an encoder with no room to write will fail the first byte it's asked to emit, not
    /// at construction).
    pub fn init(buffer: &'b mut [u8], crc_fn: CrcFn) -> Self {
        Encoder {
            buffer,
            write_index: 0,
            crc_fn,
            running_crc: INITIAL_CRC_VALUE,
            control: ControlByte::new(),
            state: State::Finalized,
            stats: EncoderStats::default(),
        }
    }

    /// Stats accumulated since `init`.
    pub fn stats(&self) -> EncoderStats {
        self.stats
    }

    /// The control byte staged for the next call to [`Encoder::new_frame`]; mutate it via
    /// [`Encoder::control_mut`] before starting a frame.
    pub fn control(&self) -> ControlByte {
        self.control
    }

    /// Mutable access to the control byte staged for the next frame.
    pub fn control_mut(&mut self) -> &mut ControlByte {
        &mut self.control
    }

    /// Bytes written so far for the current (or just-finalized) frame.
    pub fn frame_bytes(&self) -> &[u8] {
        &self.buffer[..self.write_index]
    }

    fn write_raw(&mut self, byte: u8) -> Result<(), EncodeError> {
        if self.write_index < self.buffer.len() {
            self.buffer[self.write_index] = byte;
            self.write_index += 1;
            Ok(())
        } else {
            self.state = State::BufferTooSmall;
            Err(EncodeError::BufferTooSmall)
        }
    }

    fn write_stuffed(&mut self, byte: u8) -> Result<(), EncodeError> {
        match byte {
            FRAME_MARKER => {
                self.write_raw(ESCAPE_MARKER)?;
                self.write_raw(ESCAPED_FRAME)
            }
            ESCAPE_MARKER => {
                self.write_raw(ESCAPE_MARKER)?;
                self.write_raw(ESCAPED_ESCAPE)
            }
            _ => self.write_raw(byte),
        }
    }

    /// Begins a new frame, discarding any in-progress one. Writes the opening delimiter, the
    /// staged control byte and the current sequence number (both through the stuffing/CRC path),
    /// and advances the sequence counter. Fails without writing anything if the staged control
    /// byte requests an unimplemented mode (ACK or encryption).
    pub fn new_frame(&mut self) -> Result<(), EncodeError> {
        if self.control.is_ack() || self.control.is_encrypted() {
            self.state = State::BufferTooSmall; // matches CRC_ENGINE_FAILURE-style rejection
            return Err(EncodeError::UnsupportedMode);
        }
        self.write_index = 0;
        self.running_crc = INITIAL_CRC_VALUE;
        self.state = State::Ready;
        self.control = ControlByte(self.control.0 | ControlByte::FRAME_VALID);

        self.write_raw(FRAME_MARKER)?;
        self.fold_and_write(self.control.0)?;
        let seq = self.stats.sequence_number;
        self.fold_and_write(seq)?;
        self.stats.sequence_number = seq.wrapping_add(1);
        Ok(())
    }

    fn fold_and_write(&mut self, byte: u8) -> Result<(), EncodeError> {
        self.running_crc = (self.crc_fn)(self.running_crc, &[byte]);
        self.stats.crc_calc_callback_cnt += 1;
        self.write_stuffed(byte)
    }

    /// Folds one payload byte into the running CRC and emits it (stuffed) to the output buffer.
    /// Rejects without writing if the encoder is already in an error state.
    pub fn add_byte(&mut self, byte: u8) -> Result<(), EncodeError> {
        if self.state == State::BufferTooSmall {
            return Err(EncodeError::BufferTooSmall);
        }
        self.fold_and_write(byte)
    }

    /// Folds each byte of `bytes` via [`Encoder::add_byte`], stopping at the first error, then
    /// calls [`Encoder::finalize`] if every byte was accepted.
    pub fn add_buffer(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        for &byte in bytes {
            self.add_byte(byte)?;
        }
        self.finalize()
    }

    /// Appends the CRC (big-endian, stuffed) and the closing delimiter. Idempotent: calling this
    /// again after a successful finalize is a no-op.
    pub fn finalize(&mut self) -> Result<(), EncodeError> {
        if self.state == State::Finalized {
            return Ok(());
        }
        if self.state == State::BufferTooSmall {
            return Err(EncodeError::BufferTooSmall);
        }
        let mut crc_bytes = [0u8; 2];
        BigEndian::write_u16(&mut crc_bytes, self.running_crc);
        self.write_stuffed(crc_bytes[0])?;
        self.write_stuffed(crc_bytes[1])?;
        self.write_raw(FRAME_MARKER)?;
        self.state = State::Finalized;
        self.stats.encoded_frame_cnt += 1;
        Ok(())
    }
}
