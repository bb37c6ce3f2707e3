//! Cancellation sessions
//!
//! A [`CancellationSession`] owns one engine and the render and capture
//! pipelines feeding it, and sequences the per-frame protocol.

use tracing::{debug, info, warn};

use crate::buffer::{BandLayout, SampleBuffer};
use crate::engine::{EchoCanceller, EngineConfig, NlmsEchoCanceller};
use crate::error::{Error, Result};
use crate::pipeline::{Direction, PipelineConfig, Stage, StreamPipeline};
use crate::shape::StreamShape;

/// Parameters of a [`CancellationSession`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Engine construction parameters; fixed for the session's lifetime
    pub engine: EngineConfig,
    /// Reject out-of-order protocol calls instead of logging them
    pub strict_ordering: bool,
}

impl SessionConfig {
    pub fn new(sample_rate: u32, render_channels: usize, capture_channels: usize) -> Self {
        Self {
            engine: EngineConfig::new(sample_rate, render_channels, capture_channels),
            strict_ordering: false,
        }
    }

    pub fn with_strict_ordering(mut self, strict: bool) -> Self {
        self.strict_ordering = strict;
        self
    }
}

/// Lifecycle of a session.
///
/// There is no destroyed state: [`CancellationSession::destroy`] consumes the
/// session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// The engine exists but the capture pipeline has no buffers
    Created,
    /// The capture pipeline (and possibly the render pipeline) is allocated
    Configured,
    /// At least one protocol call went through since the last configure
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Call {
    AnalyzeRender,
    AnalyzeCapture,
    ProcessCapture,
}

impl Call {
    fn name(self) -> &'static str {
        match self {
            Call::AnalyzeRender => "analyze_render",
            Call::AnalyzeCapture => "analyze_capture",
            Call::ProcessCapture => "process_capture",
        }
    }
}

/// An echo cancellation engine together with the buffers that feed it.
///
/// Per 10 ms frame period the caller:
///
/// 1. writes render audio into [`writable`](Self::writable)`(Direction::Render)`,
/// 2. calls [`stage_in`](Self::stage_in) for the render pipeline if it has an
///    input stage,
/// 3. calls [`analyze_render`](Self::analyze_render),
/// 4. writes capture audio and stages it in the same way,
/// 5. calls [`analyze_capture`](Self::analyze_capture) then
///    [`process_capture`](Self::process_capture),
/// 6. stages the capture pipeline out and reads
///    [`readable`](Self::readable)`(Direction::Capture)`.
///
/// [`process_render_frame`](Self::process_render_frame) and
/// [`process_capture_frame`](Self::process_capture_frame) bundle these steps.
///
/// # Ordering
///
/// `analyze_render` must precede the `analyze_capture`/`process_capture` pair
/// that removes its echo. Breaking this order does not fail; it just cancels
/// the wrong echo. By default violations are only logged. With
/// [`SessionConfig::strict_ordering`] they are rejected with
/// [`Error::OutOfOrder`] and the engine is not called.
///
/// # Example
///
/// ```
/// use aec_pipeline::{CancellationSession, Direction, PipelineConfig, SessionConfig, StreamShape};
///
/// let mut session: CancellationSession = CancellationSession::new(SessionConfig::new(48_000, 1, 1))?;
/// let shape = StreamShape::mono(48_000);
/// session.configure_render(PipelineConfig::direct(shape))?;
/// session.configure_capture(PipelineConfig::direct(shape))?;
///
/// session.writable(Direction::Render)?.channel_mut(0).fill(0.1);
/// session.process_render_frame()?;
///
/// session.writable(Direction::Capture)?.channel_mut(0).fill(0.05);
/// session.process_capture_frame(false)?;
/// let cleaned = session.readable(Direction::Capture)?.channel(0);
/// assert_eq!(cleaned.len(), 480);
/// # Ok::<(), aec_pipeline::Error>(())
/// ```
pub struct CancellationSession<E: EchoCanceller = NlmsEchoCanceller> {
    config: SessionConfig,
    engine: E,
    render: StreamPipeline,
    capture: StreamPipeline,
    state: SessionState,
    last_call: Option<Call>,
    delay_ms: Option<i32>,
}

impl<E: EchoCanceller> CancellationSession<E> {
    /// Build the engine and an unconfigured session around it.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let engine = E::create(config.engine)?;
        Ok(Self::assemble(config, engine))
    }

    /// Wrap an engine that has already been built.
    pub fn with_engine(engine: E, strict_ordering: bool) -> Self {
        let config = SessionConfig {
            engine: engine.config(),
            strict_ordering,
        };
        Self::assemble(config, engine)
    }

    fn assemble(config: SessionConfig, engine: E) -> Self {
        info!(
            sample_rate = config.engine.sample_rate,
            render_channels = config.engine.render_channels,
            capture_channels = config.engine.capture_channels,
            strict_ordering = config.strict_ordering,
            "created cancellation session"
        );
        Self {
            config,
            engine,
            render: StreamPipeline::new(Direction::Render),
            capture: StreamPipeline::new(Direction::Capture),
            state: SessionState::Created,
            last_call: None,
            delay_ms: None,
        }
    }

    #[inline]
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// The last delay passed to [`set_delay`](Self::set_delay).
    pub fn delay_ms(&self) -> Option<i32> {
        self.delay_ms
    }

    /// The processing shape the engine expects for `direction`.
    pub fn engine_shape(&self, direction: Direction) -> StreamShape {
        match direction {
            Direction::Render => self.config.engine.render_shape(),
            Direction::Capture => self.config.engine.capture_shape(),
        }
    }

    pub fn pipeline(&self, direction: Direction) -> &StreamPipeline {
        match direction {
            Direction::Render => &self.render,
            Direction::Capture => &self.capture,
        }
    }

    pub fn pipeline_mut(&mut self, direction: Direction) -> &mut StreamPipeline {
        match direction {
            Direction::Render => &mut self.render,
            Direction::Capture => &mut self.capture,
        }
    }

    /// (Re)allocate the buffers of one direction.
    ///
    /// The processing shape must equal the engine's shape for `direction`.
    /// On any failure the pipeline is left unconfigured.
    pub fn configure(&mut self, direction: Direction, config: PipelineConfig) -> Result<()> {
        let expected = self.engine_shape(direction);
        let result = if config.processing != expected {
            self.pipeline_mut(direction).release();
            Err(Error::EngineShapeMismatch {
                direction,
                expected,
                actual: config.processing,
            })
        } else {
            self.pipeline_mut(direction).configure(config)
        };

        if let Err(err) = &result {
            warn!(%direction, %err, "pipeline configuration failed");
        }

        self.state = if self.capture.is_configured() {
            SessionState::Configured
        } else {
            SessionState::Created
        };
        self.last_call = None;
        result
    }

    pub fn configure_render(&mut self, config: PipelineConfig) -> Result<()> {
        self.configure(Direction::Render, config)
    }

    pub fn configure_capture(&mut self, config: PipelineConfig) -> Result<()> {
        self.configure(Direction::Capture, config)
    }

    /// Copy one direction's input stage into its processing stage.
    pub fn stage_in(&mut self, direction: Direction) -> Result<()> {
        self.pipeline_mut(direction).stage_in()
    }

    /// Copy one direction's processing stage into its output stage.
    pub fn stage_out(&mut self, direction: Direction) -> Result<()> {
        self.pipeline_mut(direction).stage_out()
    }

    pub fn buffer(&self, direction: Direction, stage: Stage) -> Result<&SampleBuffer> {
        self.pipeline(direction).buffer(stage)
    }

    pub fn buffer_mut(&mut self, direction: Direction, stage: Stage) -> Result<&mut SampleBuffer> {
        self.pipeline_mut(direction).buffer_mut(stage)
    }

    /// The buffer the caller fills for `direction`.
    pub fn writable(&mut self, direction: Direction) -> Result<&mut SampleBuffer> {
        self.pipeline_mut(direction).writable()
    }

    /// The buffer the caller reads for `direction`.
    pub fn readable(&self, direction: Direction) -> Result<&SampleBuffer> {
        self.pipeline(direction).readable()
    }

    /// Report the render-to-capture delay. Takes effect on the next analyze
    /// call.
    pub fn set_delay(&mut self, delay_ms: i32) {
        debug!(delay_ms, "setting audio buffer delay");
        self.delay_ms = Some(delay_ms);
        self.engine.set_audio_buffer_delay(delay_ms);
    }

    /// Feed the render processing buffer to the engine.
    pub fn analyze_render(&mut self) -> Result<()> {
        self.check_order(Call::AnalyzeRender)?;

        let split = self.engine.uses_split_bands();
        let buffer = self.render.processing_mut()?;
        let split_here = split && buffer.layout() == BandLayout::FullBand;
        if split_here {
            buffer.split_into_frequency_bands()?;
        }
        self.engine.analyze_render(buffer);
        if split_here {
            buffer.merge_frequency_bands()?;
        }

        self.completed(Call::AnalyzeRender);
        Ok(())
    }

    /// Let the engine inspect the capture processing buffer.
    pub fn analyze_capture(&mut self) -> Result<()> {
        self.check_order(Call::AnalyzeCapture)?;

        let buffer = self.capture.processing()?;
        if buffer.layout() == BandLayout::Split {
            return Err(Error::AlreadySplit);
        }
        self.engine.analyze_capture(buffer);

        self.completed(Call::AnalyzeCapture);
        Ok(())
    }

    /// Remove echo from the capture processing buffer in place.
    ///
    /// `level_change` tells the engine the capture gain changed since the
    /// previous call.
    pub fn process_capture(&mut self, level_change: bool) -> Result<()> {
        self.check_order(Call::ProcessCapture)?;

        let split = self.engine.uses_split_bands();
        let buffer = self.capture.processing_mut()?;
        let split_here = split && buffer.layout() == BandLayout::FullBand;
        if split_here {
            buffer.split_into_frequency_bands()?;
        }
        self.engine.process_capture(buffer, level_change);
        if split_here {
            buffer.merge_frequency_bands()?;
        }

        self.completed(Call::ProcessCapture);
        Ok(())
    }

    /// Stage in (if needed) and analyze one render frame.
    pub fn process_render_frame(&mut self) -> Result<()> {
        self.render.stage_in_if_present()?;
        self.analyze_render()
    }

    /// Stage in, analyze, cancel and stage out one capture frame.
    pub fn process_capture_frame(&mut self, level_change: bool) -> Result<()> {
        self.capture.stage_in_if_present()?;
        self.analyze_capture()?;
        self.process_capture(level_change)?;
        self.capture.stage_out_if_present()
    }

    /// Release the engine and all buffers.
    pub fn destroy(self) {
        debug!("destroying cancellation session");
    }

    fn check_order(&self, call: Call) -> Result<()> {
        let direction = match call {
            Call::AnalyzeRender => Direction::Render,
            Call::AnalyzeCapture | Call::ProcessCapture => Direction::Capture,
        };
        if !self.pipeline(direction).is_configured() {
            return Err(Error::NotConfigured(direction));
        }

        let in_order = match (call, self.last_call) {
            (Call::AnalyzeRender, None | Some(Call::ProcessCapture)) => true,
            (Call::AnalyzeCapture, Some(Call::AnalyzeRender)) => true,
            // Capture-only sessions have no render step to wait for
            (Call::AnalyzeCapture, None | Some(Call::ProcessCapture)) => {
                !self.render.is_configured()
            }
            (Call::ProcessCapture, Some(Call::AnalyzeCapture)) => true,
            _ => false,
        };
        if in_order {
            return Ok(());
        }

        let after = self.last_call.map_or("configure", Call::name);
        if self.config.strict_ordering {
            warn!(call = call.name(), after, "rejected out-of-order call");
            Err(Error::OutOfOrder {
                call: call.name(),
                after,
            })
        } else {
            debug!(call = call.name(), after, "out-of-order call");
            Ok(())
        }
    }

    fn completed(&mut self, call: Call) {
        self.last_call = Some(call);
        self.state = SessionState::Ready;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every engine call; optionally refuses split buffers.
    struct Recorder {
        config: EngineConfig,
        calls: Vec<String>,
        split: bool,
    }

    impl EchoCanceller for Recorder {
        fn create(config: EngineConfig) -> Result<Self> {
            Ok(Self {
                config,
                calls: Vec::new(),
                split: true,
            })
        }

        fn config(&self) -> EngineConfig {
            self.config
        }

        fn analyze_render(&mut self, render: &SampleBuffer) {
            self.calls.push(format!("render {:?}", render.layout()));
        }

        fn analyze_capture(&mut self, capture: &SampleBuffer) {
            self.calls.push(format!("capture {:?}", capture.layout()));
        }

        fn process_capture(&mut self, capture: &mut SampleBuffer, level_change: bool) {
            self.calls
                .push(format!("process {:?} {level_change}", capture.layout()));
        }

        fn set_audio_buffer_delay(&mut self, delay_ms: i32) {
            self.calls.push(format!("delay {delay_ms}"));
        }

        fn uses_split_bands(&self) -> bool {
            self.split
        }
    }

    fn session(strict: bool) -> CancellationSession<Recorder> {
        let config = SessionConfig::new(48_000, 2, 1).with_strict_ordering(strict);
        let mut session = CancellationSession::<Recorder>::new(config).unwrap();
        session
            .configure_render(PipelineConfig::direct(StreamShape::stereo(48_000)))
            .unwrap();
        session
            .configure_capture(PipelineConfig::direct(StreamShape::mono(48_000)))
            .unwrap();
        session
    }

    #[test]
    fn states_follow_configuration() {
        let mut session =
            CancellationSession::<Recorder>::new(SessionConfig::new(16_000, 1, 1)).unwrap();
        assert_eq!(session.state(), SessionState::Created);

        session
            .configure_render(PipelineConfig::direct(StreamShape::mono(16_000)))
            .unwrap();
        assert_eq!(session.state(), SessionState::Created);

        session
            .configure_capture(PipelineConfig::direct(StreamShape::mono(16_000)))
            .unwrap();
        assert_eq!(session.state(), SessionState::Configured);

        session.analyze_render().unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        session
            .configure_capture(PipelineConfig::direct(StreamShape::mono(16_000)))
            .unwrap();
        assert_eq!(session.state(), SessionState::Configured);
    }

    #[test]
    fn engine_shape_mismatch_leaves_pipeline_unconfigured() {
        let mut session =
            CancellationSession::<Recorder>::new(SessionConfig::new(48_000, 2, 1)).unwrap();
        let err = session
            .configure_capture(PipelineConfig::direct(StreamShape::stereo(48_000)))
            .unwrap_err();
        assert_eq!(
            err,
            Error::EngineShapeMismatch {
                direction: Direction::Capture,
                expected: StreamShape::mono(48_000),
                actual: StreamShape::stereo(48_000),
            }
        );
        assert!(!session.pipeline(Direction::Capture).is_configured());
        assert_eq!(session.state(), SessionState::Created);
    }

    #[test]
    fn engine_sees_split_bands_where_expected() {
        let mut session = session(false);
        session.set_delay(12);
        session.process_render_frame().unwrap();
        session.process_capture_frame(true).unwrap();

        assert_eq!(
            session.engine().calls,
            [
                "delay 12",
                "render Split",
                "capture FullBand",
                "process Split true"
            ]
        );
        assert_eq!(
            session.readable(Direction::Capture).unwrap().layout(),
            BandLayout::FullBand
        );
        assert_eq!(session.delay_ms(), Some(12));
    }

    #[test]
    fn full_band_engines_are_not_split() {
        let mut session = session(false);
        session.engine_mut().split = false;
        session.analyze_render().unwrap();
        session.analyze_capture().unwrap();
        session.process_capture(false).unwrap();
        assert_eq!(
            session.engine().calls,
            ["render FullBand", "capture FullBand", "process FullBand false"]
        );
    }

    #[test]
    fn lenient_mode_forwards_out_of_order_calls() {
        let mut session = session(false);
        session.process_capture(false).unwrap();
        session.analyze_capture().unwrap();
        assert_eq!(session.engine().calls.len(), 2);
    }

    #[test]
    fn strict_mode_rejects_out_of_order_calls() {
        let mut session = session(true);
        assert_eq!(
            session.process_capture(false),
            Err(Error::OutOfOrder {
                call: "process_capture",
                after: "configure",
            })
        );
        assert_eq!(
            session.analyze_capture(),
            Err(Error::OutOfOrder {
                call: "analyze_capture",
                after: "configure",
            })
        );
        assert!(session.engine().calls.is_empty());

        session.analyze_render().unwrap();
        assert_eq!(
            session.analyze_render(),
            Err(Error::OutOfOrder {
                call: "analyze_render",
                after: "analyze_render",
            })
        );
        session.analyze_capture().unwrap();
        session.process_capture(false).unwrap();
        session.analyze_render().unwrap();
        assert_eq!(session.engine().calls.len(), 4);
    }

    #[test]
    fn capture_only_sessions_skip_render() {
        let config = SessionConfig::new(16_000, 1, 1).with_strict_ordering(true);
        let mut session = CancellationSession::<Recorder>::new(config).unwrap();
        session
            .configure_capture(PipelineConfig::direct(StreamShape::mono(16_000)))
            .unwrap();

        session.process_capture_frame(false).unwrap();
        session.process_capture_frame(false).unwrap();
        assert_eq!(
            session.analyze_render(),
            Err(Error::NotConfigured(Direction::Render))
        );
    }

    #[test]
    fn caller_split_buffers_are_left_split() {
        let mut session = session(false);
        session
            .buffer_mut(Direction::Render, Stage::Processing)
            .unwrap()
            .split_into_frequency_bands()
            .unwrap();
        session.analyze_render().unwrap();
        assert_eq!(
            session
                .buffer(Direction::Render, Stage::Processing)
                .unwrap()
                .layout(),
            BandLayout::Split
        );
    }

    #[test]
    fn default_engine_session() {
        let mut session = CancellationSession::<NlmsEchoCanceller>::new(SessionConfig::new(
            32_000, 1, 1,
        ))
        .unwrap();
        session
            .configure_capture(PipelineConfig::direct(StreamShape::mono(32_000)))
            .unwrap();
        session.process_capture_frame(false).unwrap();
        session.destroy();
    }
}
