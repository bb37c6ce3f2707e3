use std::sync::{Arc, Mutex};

use aec_pipeline::engine::{EchoCanceller, EngineConfig};
use aec_pipeline::{
    BandLayout, CancellationSession, Direction, Error, PipelineConfig, Result, SampleBuffer,
    SessionConfig, StreamShape,
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Render { bands: usize, layout: BandLayout },
    Capture { layout: BandLayout, peak: f32 },
    Process { layout: BandLayout, level_change: bool },
    Delay(i32),
}

/// Records the calls it receives and halves the capture signal.
struct FakeEngine {
    config: EngineConfig,
    events: Arc<Mutex<Vec<Event>>>,
}

impl FakeEngine {
    fn with_log(config: EngineConfig) -> (Self, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let engine = Self {
            config,
            events: events.clone(),
        };
        (engine, events)
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl EchoCanceller for FakeEngine {
    fn create(config: EngineConfig) -> Result<Self> {
        Ok(Self::with_log(config).0)
    }

    fn config(&self) -> EngineConfig {
        self.config
    }

    fn analyze_render(&mut self, render: &SampleBuffer) {
        self.push(Event::Render {
            bands: render.num_bands(),
            layout: render.layout(),
        });
    }

    fn analyze_capture(&mut self, capture: &SampleBuffer) {
        let peak = capture
            .channels()
            .flatten()
            .fold(0.0f32, |peak, s| peak.max(s.abs()));
        self.push(Event::Capture {
            layout: capture.layout(),
            peak,
        });
    }

    fn process_capture(&mut self, capture: &mut SampleBuffer, level_change: bool) {
        self.push(Event::Process {
            layout: capture.layout(),
            level_change,
        });
        for ch in 0..capture.num_channels() {
            for band in 0..capture.num_bands() {
                capture
                    .split_band_mut(ch, band)
                    .iter_mut()
                    .for_each(|s| *s *= 0.5);
            }
        }
    }

    fn set_audio_buffer_delay(&mut self, delay_ms: i32) {
        self.push(Event::Delay(delay_ms));
    }
}

fn configured(strict: bool) -> (CancellationSession<FakeEngine>, Arc<Mutex<Vec<Event>>>) {
    let (engine, events) = FakeEngine::with_log(EngineConfig::new(48_000, 2, 1));
    let mut session = CancellationSession::with_engine(engine, strict);
    session
        .configure_render(PipelineConfig::direct(StreamShape::stereo(48_000)))
        .unwrap();
    session
        .configure_capture(PipelineConfig::direct(StreamShape::mono(48_000)))
        .unwrap();
    (session, events)
}

#[test]
fn engine_receives_calls_in_protocol_order() {
    let (mut session, events) = configured(true);

    session.set_delay(40);
    for frame in 0..2 {
        session
            .writable(Direction::Render)
            .unwrap()
            .channel_mut(1)
            .fill(0.2);
        session.process_render_frame().unwrap();

        session
            .writable(Direction::Capture)
            .unwrap()
            .channel_mut(0)
            .fill(0.8);
        session.process_capture_frame(frame == 1).unwrap();
    }

    let capture = Event::Capture {
        layout: BandLayout::FullBand,
        peak: 0.8,
    };
    let render = Event::Render {
        bands: 3,
        layout: BandLayout::Split,
    };
    assert_eq!(
        *events.lock().unwrap(),
        [
            Event::Delay(40),
            render.clone(),
            capture.clone(),
            Event::Process {
                layout: BandLayout::Split,
                level_change: false
            },
            render,
            capture,
            Event::Process {
                layout: BandLayout::Split,
                level_change: true
            },
        ]
    );
}

#[test]
fn processed_capture_is_merged_back() {
    let (mut session, _) = configured(false);
    session
        .writable(Direction::Capture)
        .unwrap()
        .channel_mut(0)
        .fill(0.8);
    session.analyze_capture().unwrap();
    session.process_capture(false).unwrap();

    let output = session.readable(Direction::Capture).unwrap();
    assert_eq!(output.layout(), BandLayout::FullBand);
    for s in output.channel(0) {
        approx::assert_abs_diff_eq!(*s, 0.4, epsilon = 1e-5);
    }
}

#[test]
fn strict_ordering_rejects_capture_before_render() {
    let (mut session, events) = configured(true);

    assert_eq!(
        session.process_capture_frame(false),
        Err(Error::OutOfOrder {
            call: "analyze_capture",
            after: "configure",
        })
    );
    assert!(events.lock().unwrap().is_empty());

    session.process_render_frame().unwrap();
    session.process_capture_frame(false).unwrap();
    assert_eq!(events.lock().unwrap().len(), 3);
}

#[test]
fn lenient_ordering_forwards_everything() {
    let (mut session, events) = configured(false);

    session.process_capture_frame(false).unwrap();
    session.analyze_render().unwrap();
    session.analyze_render().unwrap();
    assert_eq!(events.lock().unwrap().len(), 4);
}

#[test]
fn processing_shape_must_match_engine() {
    let (mut session, _) = configured(false);
    assert_eq!(
        session.configure_render(PipelineConfig::direct(StreamShape::stereo(16_000))),
        Err(Error::EngineShapeMismatch {
            direction: Direction::Render,
            expected: StreamShape::stereo(48_000),
            actual: StreamShape::stereo(16_000),
        })
    );
    assert!(!session.pipeline(Direction::Render).is_configured());
    assert_eq!(
        session.analyze_render(),
        Err(Error::NotConfigured(Direction::Render))
    );
}

#[test]
fn direct_pipelines_have_no_stage_transitions() {
    let (mut session, _) = configured(false);
    assert!(matches!(
        session.stage_in(Direction::Capture),
        Err(Error::MissingStage { .. })
    ));
    assert!(matches!(
        session.stage_out(Direction::Render),
        Err(Error::MissingStage { .. })
    ));
    // the bundled frame helpers skip missing stages
    session.process_render_frame().unwrap();
    session.process_capture_frame(false).unwrap();
}
