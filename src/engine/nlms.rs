//! Subband NLMS echo canceller
//!
//! A normalized least-mean-squares adaptive filter per capture channel and
//! frequency band. The render reference is the per-band average of all render
//! channels, kept in a history long enough to cover the largest supported
//! delay plus the filter length.

use dasp_ring_buffer::Fixed;
use tracing::{debug, trace, warn};

use crate::buffer::{downmix_into, zeroed, SampleBuffer};
use crate::engine::{EchoCanceller, EngineConfig};
use crate::error::{Error, Result};
use crate::shape::{num_bands_for_rate, StreamShape};

/// Tuning for [`NlmsEchoCanceller`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NlmsConfig {
    /// Echo tail covered by the adaptive filter
    pub filter_length_ms: u32,
    /// Adaptation step (0.0 - 2.0; larger converges faster but noisier)
    pub step_size: f32,
    /// Added to the reference energy to keep the update bounded in silence
    pub regularization: f32,
    /// Largest delay accepted by `set_audio_buffer_delay`
    pub max_delay_ms: u32,
}

impl Default for NlmsConfig {
    fn default() -> Self {
        Self {
            filter_length_ms: 20,
            step_size: 0.5,
            regularization: 1e-5,
            max_delay_ms: 500,
        }
    }
}

impl NlmsConfig {
    /// Longest accepted echo tail.
    pub const MAX_FILTER_LENGTH_MS: u32 = 1_000;
    /// Longest accepted render delay.
    pub const MAX_DELAY_MS: u32 = 10_000;

    pub fn with_filter_length_ms(mut self, ms: u32) -> Self {
        self.filter_length_ms = ms;
        self
    }

    pub fn with_step_size(mut self, step_size: f32) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u32) -> Self {
        self.max_delay_ms = ms;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.filter_length_ms == 0 {
            return Err(Error::InvalidConfig("filter length must be non-zero".into()));
        }
        if self.filter_length_ms > Self::MAX_FILTER_LENGTH_MS {
            return Err(Error::InvalidConfig(format!(
                "filter length {} ms above {} ms",
                self.filter_length_ms,
                Self::MAX_FILTER_LENGTH_MS
            )));
        }
        if self.max_delay_ms > Self::MAX_DELAY_MS {
            return Err(Error::InvalidConfig(format!(
                "max delay {} ms above {} ms",
                self.max_delay_ms,
                Self::MAX_DELAY_MS
            )));
        }
        if !(self.step_size > 0.0 && self.step_size < 2.0) {
            return Err(Error::InvalidConfig(format!(
                "step size {} outside (0, 2)",
                self.step_size
            )));
        }
        if !(self.regularization > 0.0) {
            return Err(Error::InvalidConfig("regularization must be positive".into()));
        }
        Ok(())
    }
}

/// Reference echo canceller built on subband NLMS filters.
pub struct NlmsEchoCanceller {
    config: EngineConfig,
    nlms: NlmsConfig,

    num_bands: usize,
    frames_per_band: usize,
    /// Band samples per millisecond
    band_rate_khz: usize,
    taps: usize,
    max_delay: usize,

    /// Downmixed render reference, one history per band
    history: Vec<Fixed<Vec<f32>>>,
    /// Filter taps per `capture channel * num_bands + band`, oldest tap first
    filters: Vec<Vec<f32>>,
    /// Reference samples covering one frame plus the filter length
    window: Vec<f32>,
    reference: Vec<f32>,

    delay: usize,
    delay_ms: i32,
    pending_delay_ms: Option<i32>,
    capture_saturated: bool,
}

impl NlmsEchoCanceller {
    /// Supported engine sample rates.
    pub const SAMPLE_RATES: [u32; 3] = [16_000, 32_000, 48_000];

    pub fn new(config: EngineConfig, nlms: NlmsConfig) -> Result<Self> {
        if !Self::SAMPLE_RATES.contains(&config.sample_rate) {
            return Err(Error::UnsupportedEngineRate(config.sample_rate));
        }
        config.render_shape().validate()?;
        config.capture_shape().validate()?;
        nlms.validate()?;

        let num_bands = num_bands_for_rate(config.sample_rate);
        let frames_per_band = StreamShape::mono(config.sample_rate).frames_per_chunk() / num_bands;
        let band_rate_khz = config.sample_rate as usize / num_bands / 1000;
        let taps = nlms.filter_length_ms as usize * band_rate_khz;
        let max_delay = nlms.max_delay_ms as usize * band_rate_khz;
        let history_len = frames_per_band + max_delay + taps;

        let mut history = Vec::with_capacity(num_bands);
        for _ in 0..num_bands {
            history.push(Fixed::from(zeroed(history_len)?));
        }

        let num_filters = config
            .capture_channels
            .checked_mul(num_bands)
            .ok_or(Error::Allocation { samples: usize::MAX })?;
        let mut filters = Vec::new();
        filters
            .try_reserve_exact(num_filters)
            .map_err(|_| Error::Allocation {
                samples: num_filters.saturating_mul(taps),
            })?;
        for _ in 0..num_filters {
            filters.push(zeroed(taps)?);
        }

        debug!(
            sample_rate = config.sample_rate,
            render_channels = config.render_channels,
            capture_channels = config.capture_channels,
            num_bands,
            taps,
            "created NLMS echo canceller"
        );

        Ok(Self {
            config,
            nlms,
            num_bands,
            frames_per_band,
            band_rate_khz,
            taps,
            max_delay,
            history,
            filters,
            window: zeroed(frames_per_band + taps - 1)?,
            reference: zeroed(frames_per_band)?,
            delay: 0,
            delay_ms: 0,
            pending_delay_ms: None,
            capture_saturated: false,
        })
    }

    #[inline]
    pub fn nlms_config(&self) -> NlmsConfig {
        self.nlms
    }

    /// Number of filter taps per band.
    #[inline]
    pub fn taps(&self) -> usize {
        self.taps
    }

    /// The delay currently used to align the render reference.
    #[inline]
    pub fn delay_ms(&self) -> i32 {
        self.delay_ms
    }

    /// Whether the last analyzed capture frame clipped.
    #[inline]
    pub fn capture_saturated(&self) -> bool {
        self.capture_saturated
    }

    /// Forget everything learned so far.
    pub fn reset(&mut self) {
        for history in &mut self.history {
            history.iter_mut().for_each(|s| *s = 0.0);
        }
        for filter in &mut self.filters {
            filter.iter_mut().for_each(|w| *w = 0.0);
        }
        self.capture_saturated = false;
    }

    fn apply_pending_delay(&mut self) {
        let Some(requested) = self.pending_delay_ms.take() else {
            return;
        };

        let max = i32::try_from(self.nlms.max_delay_ms).unwrap_or(i32::MAX);
        let delay_ms = requested.clamp(0, max);
        if delay_ms != requested {
            warn!(requested, applied = delay_ms, "delay outside 0..={max} ms, clamped");
        }

        self.delay_ms = delay_ms;
        self.delay = (delay_ms as usize * self.band_rate_khz).min(self.max_delay);
        debug!(delay_ms, delay_samples = self.delay, "applied render delay");
    }

    /// Copy the reference samples needed for the current frame out of the
    /// ring history into `window`.
    fn fill_window(&mut self, band: usize) {
        let history = &self.history[band];
        let start = history.len() - (self.frames_per_band + self.delay + self.taps - 1);
        for (j, sample) in self.window.iter_mut().enumerate() {
            *sample = *history.get(start + j);
        }
    }
}

impl EchoCanceller for NlmsEchoCanceller {
    fn create(config: EngineConfig) -> Result<Self> {
        Self::new(config, NlmsConfig::default())
    }

    fn config(&self) -> EngineConfig {
        self.config
    }

    fn analyze_render(&mut self, render: &SampleBuffer) {
        debug_assert_eq!(render.num_channels(), self.config.render_channels);
        debug_assert_eq!(render.num_bands(), self.num_bands);
        self.apply_pending_delay();

        let channels = render.num_channels();
        for band in 0..self.num_bands {
            downmix_into(
                (0..channels).map(|ch| render.split_band(ch, band)),
                &mut self.reference,
            );
            let history = &mut self.history[band];
            for &sample in &self.reference {
                history.push(sample);
            }
        }
    }

    fn analyze_capture(&mut self, capture: &SampleBuffer) {
        debug_assert_eq!(capture.num_channels(), self.config.capture_channels);
        self.apply_pending_delay();

        self.capture_saturated = capture
            .channels()
            .any(|channel| channel.iter().any(|s| s.abs() >= 1.0));
        if self.capture_saturated {
            debug!("capture saturated, adaptation paused for this frame");
        }
    }

    fn process_capture(&mut self, capture: &mut SampleBuffer, level_change: bool) {
        debug_assert_eq!(capture.num_channels(), self.config.capture_channels);
        debug_assert_eq!(capture.num_frames_per_band(), self.frames_per_band);

        let adapt = !level_change && !self.capture_saturated;
        if level_change {
            trace!("capture level changed, adaptation paused for this frame");
        }

        let taps = self.taps;
        let step_size = self.nlms.step_size;
        let regularization = self.nlms.regularization;

        for band in 0..self.num_bands {
            self.fill_window(band);

            for ch in 0..self.config.capture_channels {
                let filter = &mut self.filters[ch * self.num_bands + band];
                let samples = capture.split_band_mut(ch, band);

                for (n, sample) in samples.iter_mut().enumerate() {
                    let x = &self.window[n..n + taps];

                    let mut estimate = 0.0f32;
                    let mut energy = 0.0f32;
                    for (&w, &xi) in filter.iter().zip(x) {
                        estimate += w * xi;
                        energy += xi * xi;
                    }

                    let error = *sample - estimate;
                    if adapt {
                        let gain = step_size * error / (energy + regularization);
                        for (w, &xi) in filter.iter_mut().zip(x) {
                            *w += gain * xi;
                        }
                    }
                    *sample = error;
                }
            }
        }
    }

    fn set_audio_buffer_delay(&mut self, delay_ms: i32) {
        self.pending_delay_ms = Some(delay_ms);
    }
}
