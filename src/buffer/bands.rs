//! Frequency band splitting
//!
//! Each run of `num_bands` consecutive samples is projected onto an
//! orthonormal cosine basis: band 0 receives the (scaled) block mean, higher
//! bands receive progressively higher-frequency components. Each band is
//! therefore decimated by `num_bands`. The basis is orthonormal, so merging
//! is the transpose and `merge(split(x))` reproduces `x` up to rounding.

use core::f64::consts::PI;

use crate::shape::MAX_BANDS;

/// Analysis/synthesis filter bank for a fixed band count.
#[derive(Clone, Debug)]
pub struct BandSplitter {
    num_bands: usize,
    /// Row-major `num_bands x num_bands` basis, row = band
    basis: [[f32; MAX_BANDS]; MAX_BANDS],
}

impl BandSplitter {
    pub fn new(num_bands: usize) -> Self {
        debug_assert!((1..=MAX_BANDS).contains(&num_bands));

        let mut basis = [[0.0f32; MAX_BANDS]; MAX_BANDS];
        let n = num_bands as f64;
        for (band, row) in basis.iter_mut().take(num_bands).enumerate() {
            let scale = if band == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            for (j, coeff) in row.iter_mut().take(num_bands).enumerate() {
                *coeff = (scale * (PI * (j as f64 + 0.5) * band as f64 / n).cos()) as f32;
            }
        }

        Self { num_bands, basis }
    }

    #[inline]
    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    /// Split one full-band channel into `bands`, laid out band after band,
    /// each `input.len() / num_bands` samples long.
    pub fn split(&self, input: &[f32], bands: &mut [f32]) {
        let nb = self.num_bands;
        let per_band = input.len() / nb;

        for (n, block) in input.chunks_exact(nb).enumerate() {
            for band in 0..nb {
                let row = &self.basis[band];
                let value: f32 = block.iter().zip(row).map(|(&x, &c)| x * c).sum();
                bands[band * per_band + n] = value;
            }
        }
    }

    /// Inverse of [`split`](Self::split).
    pub fn merge(&self, bands: &[f32], output: &mut [f32]) {
        let nb = self.num_bands;
        let per_band = output.len() / nb;

        for (n, block) in output.chunks_exact_mut(nb).enumerate() {
            for (j, sample) in block.iter_mut().enumerate() {
                *sample = (0..nb)
                    .map(|band| bands[band * per_band + n] * self.basis[band][j])
                    .sum();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn signal(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| ((i as f32) * 0.37).sin() * 0.8 + ((i * 7 % 13) as f32 - 6.0) * 0.01)
            .collect()
    }

    #[test]
    fn merge_inverts_split() {
        for (num_bands, frames) in [(1, 160), (2, 320), (3, 480)] {
            let splitter = BandSplitter::new(num_bands);
            let input = signal(frames);
            let mut bands = vec![0.0f32; frames];
            let mut output = vec![0.0f32; frames];

            splitter.split(&input, &mut bands);
            splitter.merge(&bands, &mut output);

            for (a, b) in input.iter().zip(&output) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn dc_lands_in_lowest_band() {
        let splitter = BandSplitter::new(3);
        let input = vec![0.25f32; 480];
        let mut bands = vec![0.0f32; 480];
        splitter.split(&input, &mut bands);

        for &s in &bands[..160] {
            assert_abs_diff_eq!(s, 0.25 * 3f32.sqrt(), epsilon = 1e-5);
        }
        for &s in &bands[160..] {
            assert_abs_diff_eq!(s, 0.0, epsilon = 1e-5);
        }
    }
}
