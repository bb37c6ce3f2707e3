//! aec-pipeline - buffers and calling protocol for acoustic echo cancellation
//!
//! An echo canceller wants audio in 10 ms frames, at its own sample rate and
//! channel count, and it wants the render (speaker) frame before the capture
//! (microphone) frame that contains its echo. This crate does that plumbing:
//!
//! - [`SampleBuffer`] holds one frame and converts between shapes and
//!   frequency-band layouts
//! - [`StreamPipeline`] chains an optional input stage, the processing stage
//!   and an optional output stage for one direction
//! - [`CancellationSession`] owns an engine and both pipelines and sequences
//!   the per-frame calls
//! - [`StreamCanceller`] accepts blocks of any size on top of a session
//!
//! Engines plug in through [`engine::EchoCanceller`]; the crate ships a
//! subband NLMS canceller as the default.
//!
//! ```
//! use aec_pipeline::{CancellationSession, Direction, PipelineConfig, SessionConfig, StreamShape};
//!
//! // engine at 48 kHz, stereo render, mono capture; the caller runs at 44.1 kHz
//! let mut session: CancellationSession = CancellationSession::new(SessionConfig::new(48_000, 2, 1))?;
//! let caller = StreamShape::stereo(44_100);
//! session.configure_render(PipelineConfig::direct(StreamShape::stereo(48_000)).with_input(caller))?;
//! session.configure_capture(PipelineConfig::staged(caller, StreamShape::mono(48_000), caller))?;
//!
//! session.process_render_frame()?;
//! session.process_capture_frame(false)?;
//! assert_eq!(session.readable(Direction::Capture)?.num_frames(), 441);
//! # Ok::<(), aec_pipeline::Error>(())
//! ```
//!
//! The `capi` feature exports a C function surface over the same session.

mod buffer;
pub mod engine;
mod error;
mod pipeline;
mod session;
mod shape;
mod streaming;

#[cfg(feature = "capi")]
pub mod ffi;

pub use buffer::{BandLayout, BandSplitter, ChannelMix, ChannelsMut, ChannelsRef, ChunkResampler, SampleBuffer};
pub use error::{Error, Result};
pub use pipeline::{Direction, PipelineConfig, Stage, StreamPipeline};
pub use session::{CancellationSession, SessionConfig, SessionState};
pub use shape::{num_bands_for_rate, StreamShape, BAND_WIDTH_HZ, CHUNKS_PER_SECOND, MAX_BANDS};
pub use streaming::{Frame, StreamCanceller};
