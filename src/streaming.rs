//! Block-size independent front-end
//!
//! Audio callbacks rarely deliver exactly 10 ms at a time. [`StreamCanceller`]
//! accepts blocks of any length, buffers the remainder, and runs the session
//! protocol once per complete frame.

use tracing::debug;

use crate::buffer::ChannelsRef;
use crate::engine::{EchoCanceller, NlmsEchoCanceller};
use crate::error::{Error, Result};
use crate::pipeline::{Direction, PipelineConfig, Stage};
use crate::session::{CancellationSession, SessionConfig};
use crate::shape::StreamShape;

/// One processed 10 ms frame, channel-major.
pub type Frame = Vec<Vec<f32>>;

/// How far the caller's audio has filled the current input frame.
#[derive(Debug, Default)]
struct Fill {
    shape: Option<StreamShape>,
    pos: usize,
}

/// Runs a [`CancellationSession`] on arbitrarily sized blocks.
///
/// Render audio goes to [`analyze`](Self::analyze), capture audio to
/// [`process`](Self::process). Either may arrive at any rate and channel
/// count; the input stages are reconfigured whenever those change, dropping
/// whatever partial frame was buffered.
///
/// ```
/// use aec_pipeline::StreamCanceller;
///
/// let mut canceller: StreamCanceller = StreamCanceller::new(16_000, 1, 1)?;
/// let block = vec![vec![0.0f32; 250]];
///
/// canceller.analyze(&block, 16_000)?;
/// let frames = canceller.process(&block, 16_000)?;
/// // 250 samples make one 160-sample frame, 90 wait for the next call
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0][0].len(), 160);
/// # Ok::<(), aec_pipeline::Error>(())
/// ```
pub struct StreamCanceller<E: EchoCanceller = NlmsEchoCanceller> {
    session: CancellationSession<E>,
    render: Fill,
    capture: Fill,
}

impl<E: EchoCanceller> StreamCanceller<E> {
    pub fn new(sample_rate: u32, render_channels: usize, capture_channels: usize) -> Result<Self> {
        Self::with_config(SessionConfig::new(sample_rate, render_channels, capture_channels))
    }

    pub fn with_config(config: SessionConfig) -> Result<Self> {
        Self::with_session(CancellationSession::new(config)?)
    }

    /// Drive an existing session. Its pipelines are reconfigured with input
    /// stages at the engine shapes.
    pub fn with_session(session: CancellationSession<E>) -> Result<Self> {
        let mut canceller = Self {
            session,
            render: Fill::default(),
            capture: Fill::default(),
        };
        let render = canceller.session.engine_shape(Direction::Render);
        let capture = canceller.session.engine_shape(Direction::Capture);
        canceller.reconfigure(Direction::Render, render)?;
        canceller.reconfigure(Direction::Capture, capture)?;
        Ok(canceller)
    }

    pub fn session(&self) -> &CancellationSession<E> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CancellationSession<E> {
        &mut self.session
    }

    pub fn into_session(self) -> CancellationSession<E> {
        self.session
    }

    /// Frames per channel in one render input frame.
    pub fn render_frame_size(&self) -> usize {
        self.render
            .shape
            .map_or(0, |shape| shape.frames_per_chunk())
    }

    /// Frames per channel in one capture input frame.
    pub fn capture_frame_size(&self) -> usize {
        self.capture
            .shape
            .map_or(0, |shape| shape.frames_per_chunk())
    }

    pub fn set_delay(&mut self, delay_ms: i32) {
        self.session.set_delay(delay_ms);
    }

    /// Feed render audio. Every completed frame is analyzed immediately.
    pub fn analyze<C>(&mut self, data: &C, sample_rate: u32) -> Result<()>
    where
        C: ChannelsRef + ?Sized,
    {
        self.accept(Direction::Render, data, sample_rate)?;

        let mut offset = 0;
        while let Some(consumed) = self.fill(Direction::Render, data, offset)? {
            offset += consumed;
            self.session.process_render_frame()?;
        }
        Ok(())
    }

    /// Feed capture audio and collect every frame that could be completed,
    /// at the rate and channel count of `data`. May return nothing, or more
    /// than one frame.
    pub fn process<C>(&mut self, data: &C, sample_rate: u32) -> Result<Vec<Frame>>
    where
        C: ChannelsRef + ?Sized,
    {
        self.accept(Direction::Capture, data, sample_rate)?;

        let mut frames = Vec::new();
        let mut offset = 0;
        while let Some(consumed) = self.fill(Direction::Capture, data, offset)? {
            offset += consumed;
            self.session.process_capture_frame(false)?;

            let output = self.session.buffer(Direction::Capture, Stage::Output)?;
            frames.push(output.channels().map(<[f32]>::to_vec).collect());
        }
        Ok(frames)
    }

    fn state_mut(&mut self, direction: Direction) -> &mut Fill {
        match direction {
            Direction::Render => &mut self.render,
            Direction::Capture => &mut self.capture,
        }
    }

    /// Check `data` and reconfigure the input stage if its shape changed.
    fn accept<C>(&mut self, direction: Direction, data: &C, sample_rate: u32) -> Result<()>
    where
        C: ChannelsRef + ?Sized,
    {
        let shape = StreamShape::new(sample_rate, data.num_channels());
        shape.validate()?;

        let expected = data.channel(0).len();
        for channel in 1..data.num_channels() {
            let actual = data.channel(channel).len();
            if actual != expected {
                return Err(Error::RaggedInput {
                    channel,
                    expected,
                    actual,
                });
            }
        }

        if self.state_mut(direction).shape != Some(shape) {
            debug!(%direction, %shape, "input shape changed, reconfiguring");
            self.reconfigure(direction, shape)?;
        }
        Ok(())
    }

    fn reconfigure(&mut self, direction: Direction, shape: StreamShape) -> Result<()> {
        let processing = self.session.engine_shape(direction);
        let config = match direction {
            Direction::Render => PipelineConfig::direct(processing).with_input(shape),
            Direction::Capture => PipelineConfig::staged(shape, processing, shape),
        };

        let fill = self.state_mut(direction);
        fill.shape = None;
        fill.pos = 0;

        self.session.configure(direction, config)?;
        self.state_mut(direction).shape = Some(shape);
        Ok(())
    }

    /// Copy as much of `data[offset..]` as fits into the input stage.
    ///
    /// Returns the number of frames consumed if that completed the stage,
    /// `None` once `data` is exhausted without completing it.
    fn fill<C>(&mut self, direction: Direction, data: &C, offset: usize) -> Result<Option<usize>>
    where
        C: ChannelsRef + ?Sized,
    {
        let pos = self.state_mut(direction).pos;
        let input = self.session.buffer_mut(direction, Stage::Input)?;
        let frame_len = input.num_frames();

        let available = data.channel(0).len() - offset;
        let count = available.min(frame_len - pos);
        for ch in 0..data.num_channels() {
            input.channel_mut(ch)[pos..pos + count]
                .copy_from_slice(&data.channel(ch)[offset..offset + count]);
        }

        let pos = pos + count;
        if pos == frame_len {
            self.state_mut(direction).pos = 0;
            Ok(Some(count))
        } else {
            self.state_mut(direction).pos = pos;
            Ok(None)
        }
    }
}
