//! Sample buffers
//!
//! A [`SampleBuffer`] stores one 10 ms chunk of channel-major `f32` audio at
//! its *processing* shape, and remembers two more shapes: the shape it is
//! filled from ([`copy_from`](SampleBuffer::copy_from)) and the shape it is
//! emitted at ([`copy_to`](SampleBuffer::copy_to)). Copies between shapes
//! resample and remix channels; copies between identical shapes are exact.
//!
//! The buffer can also be split into frequency bands in place. Split-band
//! data lives next to the full-band data; [`merge_frequency_bands`] writes it
//! back.
//!
//! [`merge_frequency_bands`]: SampleBuffer::merge_frequency_bands

mod bands;
mod mix;
mod resampler;

pub use bands::BandSplitter;
pub use mix::ChannelMix;
pub use resampler::ChunkResampler;

pub(crate) use mix::downmix_into;

use crate::error::{Error, Result};
use crate::shape::StreamShape;

/// Which representation of the samples is current.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BandLayout {
    /// Channel data is current
    FullBand,
    /// Split-band data is current; channel data is stale until merged
    Split,
}

/// Read access to a set of equally sized channels.
pub trait ChannelsRef {
    fn num_channels(&self) -> usize;
    fn channel(&self, ch: usize) -> &[f32];
}

/// Write access to a set of equally sized channels.
pub trait ChannelsMut {
    fn num_channels(&self) -> usize;
    fn channel_mut(&mut self, ch: usize) -> &mut [f32];
}

impl<S: AsRef<[f32]>> ChannelsRef for [S] {
    fn num_channels(&self) -> usize {
        self.len()
    }

    fn channel(&self, ch: usize) -> &[f32] {
        self[ch].as_ref()
    }
}

impl<S: AsRef<[f32]>, const N: usize> ChannelsRef for [S; N] {
    fn num_channels(&self) -> usize {
        N
    }

    fn channel(&self, ch: usize) -> &[f32] {
        self[ch].as_ref()
    }
}

impl<S: AsRef<[f32]>> ChannelsRef for Vec<S> {
    fn num_channels(&self) -> usize {
        self.len()
    }

    fn channel(&self, ch: usize) -> &[f32] {
        self[ch].as_ref()
    }
}

impl<D: AsMut<[f32]>> ChannelsMut for [D] {
    fn num_channels(&self) -> usize {
        self.len()
    }

    fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        self[ch].as_mut()
    }
}

impl<D: AsMut<[f32]>, const N: usize> ChannelsMut for [D; N] {
    fn num_channels(&self) -> usize {
        N
    }

    fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        self[ch].as_mut()
    }
}

impl<D: AsMut<[f32]>> ChannelsMut for Vec<D> {
    fn num_channels(&self) -> usize {
        self.len()
    }

    fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        self[ch].as_mut()
    }
}

/// Allocate `len` zeroed samples, reporting allocation failure instead of
/// aborting.
pub(crate) fn zeroed(len: usize) -> Result<Vec<f32>> {
    let mut samples = Vec::new();
    samples
        .try_reserve_exact(len)
        .map_err(|_| Error::Allocation { samples: len })?;
    samples.resize(len, 0.0);
    Ok(samples)
}

fn resamplers(count: usize, in_frames: usize, out_frames: usize) -> Result<Vec<ChunkResampler>> {
    let mut resamplers = Vec::new();
    resamplers
        .try_reserve_exact(count)
        .map_err(|_| Error::Allocation { samples: count })?;
    resamplers.resize(count, ChunkResampler::new(in_frames, out_frames));
    Ok(resamplers)
}

/// Copy or resample one channel.
fn adapt_channel(resampler: Option<&mut ChunkResampler>, src: &[f32], dst: &mut [f32]) {
    match resampler {
        Some(resampler) => resampler.process(src, dst),
        None => {
            let frames = dst.len();
            dst.copy_from_slice(&src[..frames]);
        }
    }
}

/// One 10 ms chunk of multi-channel audio with fixed input, processing and
/// output shapes.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    input_shape: StreamShape,
    shape: StreamShape,
    output_shape: StreamShape,

    num_frames: usize,
    data: Vec<f32>,

    splitter: BandSplitter,
    split_data: Vec<f32>,
    layout: BandLayout,

    input_mix: ChannelMix,
    output_mix: ChannelMix,
    /// Empty when the input rate equals the processing rate
    input_resamplers: Vec<ChunkResampler>,
    /// Empty when the output rate equals the processing rate
    output_resamplers: Vec<ChunkResampler>,
    scratch: Vec<f32>,
}

impl SampleBuffer {
    /// Create a buffer that is filled at `input`, stores and processes audio
    /// at `processing`, and is emitted at `output`.
    ///
    /// Fails if any shape is empty or invalid, or if the channel counts cannot
    /// be mixed into each other.
    pub fn new(input: StreamShape, processing: StreamShape, output: StreamShape) -> Result<Self> {
        input.validate()?;
        processing.validate()?;
        output.validate()?;

        let input_mix = ChannelMix::between(input.channels, processing.channels)?;
        let output_mix = ChannelMix::between(processing.channels, output.channels)?;

        let num_frames = processing.frames_per_chunk();
        let num_bands = processing.num_bands();
        if num_frames % num_bands != 0 {
            return Err(Error::IndivisibleBands {
                frames: num_frames,
                bands: num_bands,
            });
        }

        let len = num_frames
            .checked_mul(processing.channels)
            .ok_or(Error::Allocation { samples: usize::MAX })?;
        let data = zeroed(len)?;
        let split_data = if num_bands > 1 { zeroed(len)? } else { Vec::new() };

        let in_frames = input.frames_per_chunk();
        let out_frames = output.frames_per_chunk();
        let scratch = zeroed(in_frames.max(num_frames).max(out_frames))?;

        let input_resamplers = if input.sample_rate != processing.sample_rate {
            let count = match input_mix {
                ChannelMix::Direct => processing.channels,
                ChannelMix::Downmix | ChannelMix::Upmix => 1,
            };
            resamplers(count, in_frames, num_frames)?
        } else {
            Vec::new()
        };

        let output_resamplers = if output.sample_rate != processing.sample_rate {
            let count = match output_mix {
                ChannelMix::Direct => processing.channels,
                ChannelMix::Downmix | ChannelMix::Upmix => 1,
            };
            resamplers(count, num_frames, out_frames)?
        } else {
            Vec::new()
        };

        Ok(Self {
            input_shape: input,
            shape: processing,
            output_shape: output,
            num_frames,
            data,
            splitter: BandSplitter::new(num_bands),
            split_data,
            layout: BandLayout::FullBand,
            input_mix,
            output_mix,
            input_resamplers,
            output_resamplers,
            scratch,
        })
    }

    /// A buffer whose input, processing and output shapes are all `shape`.
    pub fn with_shape(shape: StreamShape) -> Result<Self> {
        Self::new(shape, shape, shape)
    }

    #[inline]
    pub fn shape(&self) -> StreamShape {
        self.shape
    }

    #[inline]
    pub fn input_shape(&self) -> StreamShape {
        self.input_shape
    }

    #[inline]
    pub fn output_shape(&self) -> StreamShape {
        self.output_shape
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.shape.sample_rate
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.shape.channels
    }

    /// Frames per channel; fixed for the lifetime of the buffer.
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    #[inline]
    pub fn num_bands(&self) -> usize {
        self.splitter.num_bands()
    }

    #[inline]
    pub fn num_frames_per_band(&self) -> usize {
        self.num_frames / self.num_bands()
    }

    #[inline]
    pub fn layout(&self) -> BandLayout {
        self.layout
    }

    /// Full-band samples of one channel.
    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.num_frames;
        &self.data[start..start + self.num_frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.num_frames;
        &mut self.data[start..start + self.num_frames]
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.num_frames)
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.data.chunks_exact_mut(self.num_frames)
    }

    /// Raw start pointers of every channel, for handing out to C callers.
    ///
    /// All pointers derive from the backing allocation itself rather than
    /// from channel slices, so they stay usable across later calls that
    /// borrow the buffer. They are invalidated when the buffer is dropped.
    pub(crate) fn channel_ptrs(&mut self) -> impl Iterator<Item = *mut f32> {
        let base = self.data.as_mut_ptr();
        let frames = self.num_frames;
        (0..self.num_channels()).map(move |ch| base.wrapping_add(ch * frames))
    }

    /// Samples of one band of one channel. With a single band this is the
    /// channel itself.
    pub fn split_band(&self, ch: usize, band: usize) -> &[f32] {
        if self.num_bands() == 1 {
            return self.channel(ch);
        }
        let per_band = self.num_frames_per_band();
        let start = ch * self.num_frames + band * per_band;
        &self.split_data[start..start + per_band]
    }

    pub fn split_band_mut(&mut self, ch: usize, band: usize) -> &mut [f32] {
        if self.num_bands() == 1 {
            return self.channel_mut(ch);
        }
        let per_band = self.num_frames_per_band();
        let start = ch * self.num_frames + band * per_band;
        &mut self.split_data[start..start + per_band]
    }

    /// Zero all samples and forget resampler history.
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|s| *s = 0.0);
        self.split_data.iter_mut().for_each(|s| *s = 0.0);
        self.layout = BandLayout::FullBand;
        self.input_resamplers.iter_mut().for_each(ChunkResampler::reset);
        self.output_resamplers.iter_mut().for_each(ChunkResampler::reset);
    }

    /// Fill this buffer from `src`, which must hold one chunk at the buffer's
    /// input shape. Resamples and mixes channels as needed; the previous
    /// contents are fully replaced.
    pub fn copy_from<C>(&mut self, src: &C, shape: StreamShape) -> Result<()>
    where
        C: ChannelsRef + ?Sized,
    {
        if shape != self.input_shape {
            return Err(Error::ShapeMismatch {
                expected: self.input_shape,
                actual: shape,
            });
        }
        if src.num_channels() != shape.channels {
            return Err(Error::ChannelCount {
                expected: shape.channels,
                actual: src.num_channels(),
            });
        }
        let in_frames = shape.frames_per_chunk();
        for ch in 0..shape.channels {
            let actual = src.channel(ch).len();
            if actual < in_frames {
                return Err(Error::ShortChannel {
                    channel: ch,
                    expected: in_frames,
                    actual,
                });
            }
        }

        let frames = self.num_frames;
        match self.input_mix {
            ChannelMix::Direct => {
                for (ch, dst) in self.data.chunks_exact_mut(frames).enumerate() {
                    adapt_channel(self.input_resamplers.get_mut(ch), src.channel(ch), dst);
                }
            }
            ChannelMix::Downmix => {
                let mixed = &mut self.scratch[..in_frames];
                mix::downmix_into((0..shape.channels).map(|ch| src.channel(ch)), mixed);
                adapt_channel(self.input_resamplers.first_mut(), mixed, &mut self.data[..frames]);
            }
            ChannelMix::Upmix => {
                let (first, rest) = self.data.split_at_mut(frames);
                adapt_channel(self.input_resamplers.first_mut(), src.channel(0), first);
                for dst in rest.chunks_exact_mut(frames) {
                    dst.copy_from_slice(first);
                }
            }
        }

        self.layout = BandLayout::FullBand;
        Ok(())
    }

    /// Emit this buffer's full-band contents into `dst` at the buffer's output
    /// shape, resampling and mixing channels as needed.
    pub fn copy_to<C>(&mut self, shape: StreamShape, dst: &mut C) -> Result<()>
    where
        C: ChannelsMut + ?Sized,
    {
        if self.layout == BandLayout::Split {
            return Err(Error::AlreadySplit);
        }
        if shape != self.output_shape {
            return Err(Error::ShapeMismatch {
                expected: self.output_shape,
                actual: shape,
            });
        }
        if dst.num_channels() != shape.channels {
            return Err(Error::ChannelCount {
                expected: shape.channels,
                actual: dst.num_channels(),
            });
        }
        let out_frames = shape.frames_per_chunk();
        for ch in 0..shape.channels {
            let actual = dst.channel_mut(ch).len();
            if actual < out_frames {
                return Err(Error::ShortChannel {
                    channel: ch,
                    expected: out_frames,
                    actual,
                });
            }
        }

        let frames = self.num_frames;
        match self.output_mix {
            ChannelMix::Direct => {
                for (ch, src) in self.data.chunks_exact(frames).enumerate() {
                    let out = &mut dst.channel_mut(ch)[..out_frames];
                    adapt_channel(self.output_resamplers.get_mut(ch), src, out);
                }
            }
            ChannelMix::Downmix => {
                let mixed = &mut self.scratch[..frames];
                mix::downmix_into(self.data.chunks_exact(frames), mixed);
                let out = &mut dst.channel_mut(0)[..out_frames];
                adapt_channel(self.output_resamplers.first_mut(), mixed, out);
            }
            ChannelMix::Upmix => {
                let resampled = &mut self.scratch[..out_frames];
                adapt_channel(self.output_resamplers.first_mut(), &self.data[..frames], resampled);
                for ch in 0..shape.channels {
                    dst.channel_mut(ch)[..out_frames].copy_from_slice(resampled);
                }
            }
        }

        Ok(())
    }

    /// Split every channel into frequency bands.
    ///
    /// Must be paired with [`merge_frequency_bands`](Self::merge_frequency_bands);
    /// splitting twice in a row is rejected.
    pub fn split_into_frequency_bands(&mut self) -> Result<()> {
        if self.layout == BandLayout::Split {
            return Err(Error::AlreadySplit);
        }
        if self.num_bands() > 1 {
            let frames = self.num_frames;
            for (full, split) in self
                .data
                .chunks_exact(frames)
                .zip(self.split_data.chunks_exact_mut(frames))
            {
                self.splitter.split(full, split);
            }
        }
        self.layout = BandLayout::Split;
        Ok(())
    }

    /// Merge split-band data back into the full-band channels.
    pub fn merge_frequency_bands(&mut self) -> Result<()> {
        if self.layout == BandLayout::FullBand {
            return Err(Error::NotSplit);
        }
        if self.num_bands() > 1 {
            let frames = self.num_frames;
            for (full, split) in self
                .data
                .chunks_exact_mut(frames)
                .zip(self.split_data.chunks_exact(frames))
            {
                self.splitter.merge(split, full);
            }
        }
        self.layout = BandLayout::FullBand;
        Ok(())
    }
}

impl ChannelsRef for SampleBuffer {
    fn num_channels(&self) -> usize {
        self.shape.channels
    }

    fn channel(&self, ch: usize) -> &[f32] {
        SampleBuffer::channel(self, ch)
    }
}

impl ChannelsMut for SampleBuffer {
    fn num_channels(&self) -> usize {
        self.shape.channels
    }

    fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        SampleBuffer::channel_mut(self, ch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fill(buffer: &mut SampleBuffer) {
        for (ch, channel) in buffer.channels_mut().enumerate() {
            for (i, s) in channel.iter_mut().enumerate() {
                *s = ((i as f32 * 0.05) + ch as f32).sin() * 0.5;
            }
        }
    }

    #[test]
    fn rejects_empty_shapes() {
        let ok = StreamShape::mono(48_000);
        assert!(matches!(
            SampleBuffer::new(ok, StreamShape::new(48_000, 0), ok),
            Err(Error::ZeroChannels { .. })
        ));
        assert!(matches!(
            SampleBuffer::new(StreamShape::new(0, 1), ok, ok),
            Err(Error::ZeroFrames { .. })
        ));
        assert!(matches!(
            SampleBuffer::new(ok, ok, StreamShape::new(48_000, 0)),
            Err(Error::ZeroChannels { .. })
        ));
    }

    #[test]
    fn oversized_shapes_fail_to_allocate() {
        assert!(matches!(
            SampleBuffer::with_shape(StreamShape::new(48_000, usize::MAX / 100)),
            Err(Error::Allocation { .. })
        ));
        assert!(matches!(
            SampleBuffer::with_shape(StreamShape::new(48_000, 1 << 40)),
            Err(Error::Allocation { .. })
        ));
    }

    #[test]
    fn channel_pointers_address_channel_data() {
        let mut buffer = SampleBuffer::with_shape(StreamShape::new(16_000, 3)).unwrap();
        let pointers: Vec<*mut f32> = buffer.channel_ptrs().collect();
        assert_eq!(pointers.len(), 3);

        fill(&mut buffer);
        for (ch, &ptr) in pointers.iter().enumerate() {
            assert_eq!(ptr.cast_const(), buffer.channel(ch).as_ptr());
            unsafe { ptr.add(159).write(ch as f32) };
        }
        for ch in 0..3 {
            assert_eq!(buffer.channel(ch)[159], ch as f32);
        }
    }

    #[test]
    fn rejects_unmixable_channels() {
        let result = SampleBuffer::new(
            StreamShape::new(48_000, 3),
            StreamShape::new(48_000, 2),
            StreamShape::new(48_000, 2),
        );
        assert_eq!(
            result.err(),
            Some(Error::UnsupportedChannelMix { from: 3, to: 2 })
        );
    }

    #[test]
    fn same_shape_copy_is_exact() {
        let shape = StreamShape::stereo(48_000);
        let mut src = SampleBuffer::with_shape(shape).unwrap();
        fill(&mut src);
        let mut dst = SampleBuffer::with_shape(shape).unwrap();

        dst.copy_from(&src, shape).unwrap();
        for ch in 0..2 {
            assert_eq!(src.channel(ch), dst.channel(ch));
        }

        let mut out = vec![vec![0.0f32; 480]; 2];
        dst.copy_to(shape, &mut out).unwrap();
        assert_eq!(out[0], src.channel(0));
        assert_eq!(out[1], src.channel(1));
    }

    #[test]
    fn copy_checks_shape() {
        let mut buffer = SampleBuffer::new(
            StreamShape::mono(44_100),
            StreamShape::mono(48_000),
            StreamShape::mono(44_100),
        )
        .unwrap();
        let input = vec![vec![0.0f32; 480]];
        assert!(matches!(
            buffer.copy_from(&input, StreamShape::mono(48_000)),
            Err(Error::ShapeMismatch { .. })
        ));

        let short = vec![vec![0.0f32; 100]];
        assert_eq!(
            buffer.copy_from(&short, StreamShape::mono(44_100)),
            Err(Error::ShortChannel {
                channel: 0,
                expected: 441,
                actual: 100
            })
        );
    }

    #[test]
    fn resampling_preserves_chunk_length() {
        let mut buffer = SampleBuffer::new(
            StreamShape::stereo(44_100),
            StreamShape::stereo(48_000),
            StreamShape::stereo(16_000),
        )
        .unwrap();
        assert_eq!(buffer.num_frames(), 480);

        let input = vec![vec![0.25f32; 441]; 2];
        buffer.copy_from(&input, StreamShape::stereo(44_100)).unwrap();
        buffer.copy_from(&input, StreamShape::stereo(44_100)).unwrap();
        for &s in buffer.channel(1) {
            assert_abs_diff_eq!(s, 0.25, epsilon = 1e-6);
        }

        let mut out = vec![vec![0.0f32; 160]; 2];
        buffer.copy_to(StreamShape::stereo(16_000), &mut out).unwrap();
        buffer.copy_to(StreamShape::stereo(16_000), &mut out).unwrap();
        for &s in &out[0] {
            assert_abs_diff_eq!(s, 0.25, epsilon = 1e-5);
        }
    }

    #[test]
    fn downmix_and_upmix() {
        let mut buffer = SampleBuffer::new(
            StreamShape::stereo(16_000),
            StreamShape::mono(16_000),
            StreamShape::stereo(16_000),
        )
        .unwrap();

        let input = [vec![1.0f32; 160], vec![0.0f32; 160]];
        buffer.copy_from(&input, StreamShape::stereo(16_000)).unwrap();
        assert!(buffer.channel(0).iter().all(|&s| s == 0.5));

        let mut out = [vec![0.0f32; 160], vec![0.0f32; 160]];
        buffer.copy_to(StreamShape::stereo(16_000), &mut out).unwrap();
        assert!(out.iter().flatten().all(|&s| s == 0.5));
    }

    #[test]
    fn split_merge_round_trip() {
        for rate in [16_000, 32_000, 48_000] {
            let mut buffer = SampleBuffer::with_shape(StreamShape::stereo(rate)).unwrap();
            fill(&mut buffer);
            let original = buffer.clone();

            buffer.split_into_frequency_bands().unwrap();
            assert_eq!(buffer.layout(), BandLayout::Split);
            assert_eq!(buffer.split_band(1, 0).len(), 160);
            buffer.merge_frequency_bands().unwrap();

            for ch in 0..2 {
                for (a, b) in original.channel(ch).iter().zip(buffer.channel(ch)) {
                    assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn split_state_is_guarded() {
        let mut buffer = SampleBuffer::with_shape(StreamShape::mono(48_000)).unwrap();
        assert_eq!(buffer.merge_frequency_bands(), Err(Error::NotSplit));
        buffer.split_into_frequency_bands().unwrap();
        assert_eq!(buffer.split_into_frequency_bands(), Err(Error::AlreadySplit));

        let mut out = vec![vec![0.0f32; 480]];
        assert_eq!(
            buffer.copy_to(StreamShape::mono(48_000), &mut out),
            Err(Error::AlreadySplit)
        );
    }

    #[test]
    fn band_edits_survive_merge() {
        let mut buffer = SampleBuffer::with_shape(StreamShape::mono(48_000)).unwrap();
        fill(&mut buffer);
        buffer.split_into_frequency_bands().unwrap();
        for band in 0..3 {
            buffer.split_band_mut(0, band).iter_mut().for_each(|s| *s = 0.0);
        }
        buffer.merge_frequency_bands().unwrap();
        assert!(buffer.channel(0).iter().all(|&s| s.abs() < 1e-7));
    }
}
