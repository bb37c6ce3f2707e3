//! Stream shapes: the (sample rate, channel count) pair every buffer stage is
//! described by.

use core::fmt;

use crate::error::{Error, Result};

/// Audio is exchanged in 10 ms chunks.
pub const CHUNKS_PER_SECOND: u32 = 100;

/// Width of one frequency band in Hz when a buffer is split.
pub const BAND_WIDTH_HZ: u32 = 16_000;

/// Maximum number of bands a buffer is ever split into.
pub const MAX_BANDS: usize = 3;

/// Sample rate and channel count of one buffer stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamShape {
    /// Sample rate in Hz (e.g. 16000, 44100, 48000)
    pub sample_rate: u32,
    /// Number of channels
    pub channels: usize,
}

impl Default for StreamShape {
    fn default() -> Self {
        Self::mono(48_000)
    }
}

impl StreamShape {
    pub const fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub const fn mono(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1)
    }

    pub const fn stereo(sample_rate: u32) -> Self {
        Self::new(sample_rate, 2)
    }

    /// Number of frames in one 10 ms chunk at this rate.
    #[inline]
    pub const fn frames_per_chunk(&self) -> usize {
        (self.sample_rate / CHUNKS_PER_SECOND) as usize
    }

    /// Total samples (all channels) in one chunk.
    #[inline]
    pub const fn samples_per_chunk(&self) -> usize {
        self.frames_per_chunk().saturating_mul(self.channels)
    }

    /// Number of frequency bands a chunk at this rate is split into.
    #[inline]
    pub const fn num_bands(&self) -> usize {
        num_bands_for_rate(self.sample_rate)
    }

    /// Check that a buffer of this shape can exist.
    ///
    /// Zero channels and zero-frame chunks are rejected outright, as are rates
    /// that do not divide into whole 10 ms chunks.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::ZeroChannels { shape: *self });
        }
        if self.frames_per_chunk() == 0 {
            return Err(Error::ZeroFrames { shape: *self });
        }
        if self.sample_rate % CHUNKS_PER_SECOND != 0 {
            return Err(Error::InvalidSampleRate { shape: *self });
        }
        Ok(())
    }
}

impl fmt::Display for StreamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz x {}ch", self.sample_rate, self.channels)
    }
}

/// Bands per chunk for a sample rate: whole multiples of [`BAND_WIDTH_HZ`]
/// up to [`MAX_BANDS`] split into that many bands (32 kHz in two, 48 kHz in
/// three), everything else stays full-band.
pub const fn num_bands_for_rate(sample_rate: u32) -> usize {
    if sample_rate % BAND_WIDTH_HZ != 0 {
        return 1;
    }
    match (sample_rate / BAND_WIDTH_HZ) as usize {
        bands @ 2..=MAX_BANDS => bands,
        _ => 1,
    }
}
