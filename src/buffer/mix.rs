//! Channel count adaptation between buffer stages.

use crate::error::{Error, Result};

/// How channels are mapped when copying between two channel counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMix {
    /// Same channel count, channel `n` maps to channel `n`
    Direct,
    /// Many channels averaged into one
    Downmix,
    /// One channel duplicated into many
    Upmix,
}

impl ChannelMix {
    /// Pick the mapping from `from` channels to `to` channels.
    ///
    /// Only identity, N-to-mono and mono-to-N are supported; anything else
    /// would need a mixing matrix and is rejected.
    pub fn between(from: usize, to: usize) -> Result<Self> {
        match (from, to) {
            (f, t) if f == t => Ok(ChannelMix::Direct),
            (_, 1) => Ok(ChannelMix::Downmix),
            (1, _) => Ok(ChannelMix::Upmix),
            _ => Err(Error::UnsupportedChannelMix { from, to }),
        }
    }
}

/// Average all `sources` into `dest`, sample by sample.
pub fn downmix_into<'a>(sources: impl IntoIterator<Item = &'a [f32]>, dest: &mut [f32]) {
    dest.iter_mut().for_each(|s| *s = 0.0);
    let mut count = 0usize;
    for source in sources {
        for (d, &s) in dest.iter_mut().zip(source) {
            *d += s;
        }
        count += 1;
    }
    if count > 1 {
        let scale = 1.0 / count as f32;
        dest.iter_mut().for_each(|s| *s *= scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_mapping() {
        assert_eq!(ChannelMix::between(2, 2), Ok(ChannelMix::Direct));
        assert_eq!(ChannelMix::between(6, 1), Ok(ChannelMix::Downmix));
        assert_eq!(ChannelMix::between(1, 2), Ok(ChannelMix::Upmix));
        assert_eq!(
            ChannelMix::between(3, 2),
            Err(Error::UnsupportedChannelMix { from: 3, to: 2 })
        );
    }

    #[test]
    fn downmix_averages() {
        let left = [1.0f32, 0.0, -1.0];
        let right = [0.0f32, 0.5, -1.0];
        let mut mono = [9.0f32; 3];
        downmix_into([&left[..], &right[..]], &mut mono);
        assert_eq!(mono, [0.5, 0.25, -1.0]);
    }
}
