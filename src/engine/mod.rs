//! Echo cancellation engines
//!
//! The session drives an engine through four calls and never looks inside
//! it. Implement [`EchoCanceller`] to plug in any canceller; the crate ships
//! [`NlmsEchoCanceller`] as a reference implementation.

mod nlms;

pub use nlms::{NlmsConfig, NlmsEchoCanceller};

use crate::buffer::SampleBuffer;
use crate::error::Result;
use crate::shape::StreamShape;

/// Construction parameters of an engine. Fixed for the engine's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub render_channels: usize,
    pub capture_channels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(48_000, 1, 1)
    }
}

impl EngineConfig {
    pub fn new(sample_rate: u32, render_channels: usize, capture_channels: usize) -> Self {
        Self {
            sample_rate,
            render_channels,
            capture_channels,
        }
    }

    /// Shape the render processing stage must have.
    #[inline]
    pub fn render_shape(&self) -> StreamShape {
        StreamShape::new(self.sample_rate, self.render_channels)
    }

    /// Shape the capture processing stage must have.
    #[inline]
    pub fn capture_shape(&self) -> StreamShape {
        StreamShape::new(self.sample_rate, self.capture_channels)
    }
}

/// An acoustic echo canceller.
///
/// Per 10 ms frame the caller feeds the render frame to
/// [`analyze_render`](Self::analyze_render), then the matching capture frame to
/// [`analyze_capture`](Self::analyze_capture) and
/// [`process_capture`](Self::process_capture). Reordering these calls does not
/// crash anything, it just cancels the wrong echo.
///
/// When [`uses_split_bands`](Self::uses_split_bands) returns `true`, buffers
/// passed to `analyze_render` and `process_capture` are split into frequency
/// bands; `analyze_capture` always sees full-band audio.
pub trait EchoCanceller: Send {
    /// Build an engine for `config`.
    fn create(config: EngineConfig) -> Result<Self>
    where
        Self: Sized;

    /// Parameters the engine was built with
    fn config(&self) -> EngineConfig;

    /// Feed one render frame (the echo reference).
    fn analyze_render(&mut self, render: &SampleBuffer);

    /// Inspect one capture frame before cancellation.
    fn analyze_capture(&mut self, capture: &SampleBuffer);

    /// Remove echo from one capture frame in place.
    ///
    /// `level_change` reports that the capture gain changed since the last
    /// call.
    fn process_capture(&mut self, capture: &mut SampleBuffer, level_change: bool);

    /// Report the known render-to-capture delay. Applied on the next analyze
    /// call.
    fn set_audio_buffer_delay(&mut self, delay_ms: i32);

    /// Whether render and capture buffers are handed over split into bands
    fn uses_split_bands(&self) -> bool {
        true
    }
}
