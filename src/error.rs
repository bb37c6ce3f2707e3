//! Error types for the buffer pipeline and session protocol.

use thiserror::Error;

use crate::pipeline::{Direction, Stage};
use crate::shape::StreamShape;

/// Error type for aec-pipeline operations.
///
/// Every variant except [`Error::OutOfOrder`] is a configuration or resource
/// error: it is raised eagerly when a buffer, pipeline or session is set up,
/// never in the middle of a frame period.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid shape {shape}: sample rate must be a non-zero multiple of 100 Hz")]
    InvalidSampleRate { shape: StreamShape },

    #[error("Invalid shape {shape}: a buffer needs at least one channel")]
    ZeroChannels { shape: StreamShape },

    #[error("Invalid shape {shape}: a 10 ms chunk at this rate holds zero frames")]
    ZeroFrames { shape: StreamShape },

    #[error("Cannot mix {from} channels into {to} channels")]
    UnsupportedChannelMix { from: usize, to: usize },

    #[error("Shape mismatch: buffer expects {expected}, got {actual}")]
    ShapeMismatch {
        expected: StreamShape,
        actual: StreamShape,
    },

    #[error("Channel {channel} holds {actual} samples, expected at least {expected}")]
    ShortChannel {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelCount { expected: usize, actual: usize },

    #[error("{frames} frames cannot be split into {bands} equal bands")]
    IndivisibleBands { frames: usize, bands: usize },

    #[error("Buffer is already split into frequency bands")]
    AlreadySplit,

    #[error("Buffer is not split into frequency bands")]
    NotSplit,

    #[error("Failed to allocate {samples} samples")]
    Allocation { samples: usize },

    #[error("Unsupported engine sample rate: {0} Hz")]
    UnsupportedEngineRate(u32),

    #[error("{direction} processing stage {actual} does not match engine shape {expected}")]
    EngineShapeMismatch {
        direction: Direction,
        expected: StreamShape,
        actual: StreamShape,
    },

    #[error("{0} pipeline is not configured")]
    NotConfigured(Direction),

    #[error("{direction} pipeline has no {stage} stage")]
    MissingStage { direction: Direction, stage: Stage },

    #[error("Out-of-order call: {call} after {after}")]
    OutOfOrder {
        call: &'static str,
        after: &'static str,
    },

    #[error("Ragged input: channel {channel} holds {actual} samples, channel 0 holds {expected}")]
    RaggedInput {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
