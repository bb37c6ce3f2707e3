//! Chunk resampler
//!
//! Converts one 10 ms chunk at the source rate into one 10 ms chunk at the
//! target rate. Because both sides always cover the same 10 ms, the ratio
//! between input and output lengths is exact and no fractional position has
//! to be carried between chunks; only the last input sample is kept so the
//! interpolation is continuous across chunk boundaries.

use core::f64::consts::PI;

use dasp_interpolate::linear::Linear;
use dasp_interpolate::Interpolator;

/// Anti-alias cutoff as a fraction of the target rate.
const CUTOFF: f64 = 0.45;

/// Q of the two sections of a 4th order Butterworth low-pass.
const BUTTERWORTH_Q: [f64; 2] = [0.541_196_1, 1.306_563];

/// One biquad low-pass section, transposed direct form II.
#[derive(Clone, Debug)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// `cutoff` is relative to the sample rate the section runs at.
    fn low_pass(cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        let b1 = (1.0 - cos) / a0;
        Self {
            b0: b1 / 2.0,
            b1,
            b2: b1 / 2.0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Streaming linear-interpolation resampler for a single channel.
///
/// Uses linear interpolation for simplicity. The output lags the input by one
/// source sample. When downsampling, the input first goes through a 4th order
/// Butterworth low-pass at 0.45 times the target rate so content above the
/// target Nyquist frequency is attenuated instead of folding back; the filter
/// passes DC unchanged but adds a few samples of group delay.
#[derive(Clone, Debug)]
pub struct ChunkResampler {
    in_frames: usize,
    out_frames: usize,
    /// Source samples advanced per output sample
    step: f64,
    /// Last sample of the previous chunk
    last: f32,
    /// Empty unless downsampling
    anti_alias: Vec<Biquad>,
    filtered: Vec<f32>,
}

impl ChunkResampler {
    pub fn new(in_frames: usize, out_frames: usize) -> Self {
        let (anti_alias, filtered) = if out_frames < in_frames {
            let cutoff = CUTOFF * out_frames as f64 / in_frames as f64;
            let sections = BUTTERWORTH_Q
                .iter()
                .map(|&q| Biquad::low_pass(cutoff, q))
                .collect();
            (sections, vec![0.0; in_frames])
        } else {
            (Vec::new(), Vec::new())
        };

        Self {
            in_frames,
            out_frames,
            step: in_frames as f64 / out_frames as f64,
            last: 0.0,
            anti_alias,
            filtered,
        }
    }

    /// Resample exactly `in_frames` samples into exactly `out_frames` samples.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let mut input = &input[..self.in_frames];
        let output = &mut output[..self.out_frames];

        if !self.anti_alias.is_empty() {
            for (dst, &x) in self.filtered.iter_mut().zip(input) {
                let y = self
                    .anti_alias
                    .iter_mut()
                    .fold(x as f64, |acc, section| section.process(acc));
                *dst = y as f32;
            }
            input = &self.filtered;
        }

        // Position 0 is the carried sample, position k is input[k - 1].
        for (i, out_sample) in output.iter_mut().enumerate() {
            let position = i as f64 * self.step;
            let left = position.floor() as usize;
            let t = position - left as f64;

            let prev = if left == 0 { self.last } else { input[left - 1] };
            let curr = input[left.min(self.in_frames - 1)];
            *out_sample = Linear::new(prev, curr).interpolate(t);
        }

        self.last = input[self.in_frames - 1];
    }

    pub fn reset(&mut self) {
        self.last = 0.0;
        self.anti_alias.iter_mut().for_each(Biquad::reset);
    }
}
