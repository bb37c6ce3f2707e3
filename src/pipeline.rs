//! Stream pipelines
//!
//! A [`StreamPipeline`] owns the buffers of one direction (render or
//! capture). The processing stage is always present and matches the engine;
//! the input and output stages are optional and only exist when the caller's
//! audio is at a different rate or channel count.
//!
//! ```text
//!   input stage ──stage_in──▶ processing stage ──stage_out──▶ output stage
//!   (caller rate)             (engine rate)                   (caller rate)
//! ```

use core::fmt;

use tracing::debug;

use crate::buffer::SampleBuffer;
use crate::error::{Error, Result};
use crate::shape::StreamShape;

/// Which stream a pipeline carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Audio about to be played; the echo reference
    Render,
    /// Microphone audio that may contain echo
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Render => f.write_str("render"),
            Direction::Capture => f.write_str("capture"),
        }
    }
}

/// One of the three buffer slots of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Input,
    Processing,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Input => f.write_str("input"),
            Stage::Processing => f.write_str("processing"),
            Stage::Output => f.write_str("output"),
        }
    }
}

/// Shapes of the three stages of a pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Shape the caller writes; `None` writes the processing stage directly
    pub input: Option<StreamShape>,
    /// Shape the engine works at
    pub processing: StreamShape,
    /// Shape the caller reads; `None` reads the processing stage directly
    pub output: Option<StreamShape>,
}

impl PipelineConfig {
    /// Processing stage only. The caller guarantees audio already matches the
    /// engine shape.
    pub fn direct(processing: StreamShape) -> Self {
        Self {
            input: None,
            processing,
            output: None,
        }
    }

    /// All three stages.
    pub fn staged(input: StreamShape, processing: StreamShape, output: StreamShape) -> Self {
        Self {
            input: Some(input),
            processing,
            output: Some(output),
        }
    }

    pub fn with_input(mut self, input: StreamShape) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: StreamShape) -> Self {
        self.output = Some(output);
        self
    }
}

/// The buffers of one configuration epoch.
#[derive(Debug)]
struct Stages {
    config: PipelineConfig,
    input: Option<SampleBuffer>,
    processing: SampleBuffer,
    output: Option<SampleBuffer>,
}

impl Stages {
    fn allocate(config: PipelineConfig) -> Result<Self> {
        let input_shape = config.input.unwrap_or(config.processing);
        let output_shape = config.output.unwrap_or(config.processing);

        let input = config.input.map(SampleBuffer::with_shape).transpose()?;
        let processing = SampleBuffer::new(input_shape, config.processing, output_shape)?;
        let output = config.output.map(SampleBuffer::with_shape).transpose()?;

        Ok(Self {
            config,
            input,
            processing,
            output,
        })
    }
}

/// The staged buffers of one stream direction.
#[derive(Debug)]
pub struct StreamPipeline {
    direction: Direction,
    stages: Option<Stages>,
    /// Incremented on every successful configure
    epoch: u64,
}

impl StreamPipeline {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            stages: None,
            epoch: 0,
        }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn is_configured(&self) -> bool {
        self.stages.is_some()
    }

    /// Number of successful configurations so far. Buffers handed out in an
    /// earlier epoch no longer exist.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn config(&self) -> Option<PipelineConfig> {
        self.stages.as_ref().map(|stages| stages.config)
    }

    /// Allocate fresh buffers for `config`, releasing any previous ones.
    ///
    /// On failure the pipeline is left unconfigured; nothing from the previous
    /// configuration stays usable.
    pub fn configure(&mut self, config: PipelineConfig) -> Result<()> {
        self.stages = None;
        let stages = Stages::allocate(config)?;

        self.stages = Some(stages);
        self.epoch += 1;

        debug!(
            direction = %self.direction,
            processing = %config.processing,
            input = ?config.input,
            output = ?config.output,
            epoch = self.epoch,
            "configured pipeline"
        );
        Ok(())
    }

    /// Drop all buffers.
    pub fn release(&mut self) {
        self.stages = None;
    }

    fn stages(&self) -> Result<&Stages> {
        self.stages
            .as_ref()
            .ok_or(Error::NotConfigured(self.direction))
    }

    fn stages_mut(&mut self) -> Result<&mut Stages> {
        self.stages
            .as_mut()
            .ok_or(Error::NotConfigured(self.direction))
    }

    fn missing(&self, stage: Stage) -> Error {
        Error::MissingStage {
            direction: self.direction,
            stage,
        }
    }

    /// Copy the input stage into the processing stage.
    pub fn stage_in(&mut self) -> Result<()> {
        let direction = self.direction;
        let stages = self.stages_mut()?;
        let input = stages.input.as_ref().ok_or(Error::MissingStage {
            direction,
            stage: Stage::Input,
        })?;
        stages.processing.copy_from(input, input.shape())
    }

    /// Copy the processing stage into the output stage.
    pub fn stage_out(&mut self) -> Result<()> {
        let direction = self.direction;
        let stages = self.stages_mut()?;
        let output = stages.output.as_mut().ok_or(Error::MissingStage {
            direction,
            stage: Stage::Output,
        })?;
        let shape = output.shape();
        stages.processing.copy_to(shape, output)
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        match (&self.stages, stage) {
            (None, _) => false,
            (Some(_), Stage::Processing) => true,
            (Some(stages), Stage::Input) => stages.input.is_some(),
            (Some(stages), Stage::Output) => stages.output.is_some(),
        }
    }

    pub fn buffer(&self, stage: Stage) -> Result<&SampleBuffer> {
        let stages = self.stages()?;
        match stage {
            Stage::Input => stages.input.as_ref(),
            Stage::Processing => Some(&stages.processing),
            Stage::Output => stages.output.as_ref(),
        }
        .ok_or_else(|| self.missing(stage))
    }

    pub fn buffer_mut(&mut self, stage: Stage) -> Result<&mut SampleBuffer> {
        let direction = self.direction;
        let stages = self.stages_mut()?;
        match stage {
            Stage::Input => stages.input.as_mut(),
            Stage::Processing => Some(&mut stages.processing),
            Stage::Output => stages.output.as_mut(),
        }
        .ok_or(Error::MissingStage { direction, stage })
    }

    pub fn processing(&self) -> Result<&SampleBuffer> {
        self.buffer(Stage::Processing)
    }

    pub fn processing_mut(&mut self) -> Result<&mut SampleBuffer> {
        self.buffer_mut(Stage::Processing)
    }

    /// The buffer the caller writes: the input stage if present, otherwise the
    /// processing stage.
    pub fn writable(&mut self) -> Result<&mut SampleBuffer> {
        let stages = self.stages_mut()?;
        Ok(match stages.input.as_mut() {
            Some(input) => input,
            None => &mut stages.processing,
        })
    }

    /// The buffer the caller reads: the output stage if present, otherwise
    /// the processing stage.
    pub fn readable(&self) -> Result<&SampleBuffer> {
        let stages = self.stages()?;
        Ok(stages.output.as_ref().unwrap_or(&stages.processing))
    }

    /// Run `stage_in` if an input stage exists.
    pub(crate) fn stage_in_if_present(&mut self) -> Result<()> {
        if self.has_stage(Stage::Input) {
            self.stage_in()?;
        }
        Ok(())
    }

    /// Run `stage_out` if an output stage exists.
    pub(crate) fn stage_out_if_present(&mut self) -> Result<()> {
        if self.has_stage(Stage::Output) {
            self.stage_out()?;
        }
        Ok(())
    }
}
