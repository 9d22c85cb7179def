// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversion of decoded frames to the layout requested by the mixer.

use strophe_core::audio::AudioBuffer;
use strophe_core::errors::{unsupported_error, Error, Result};

/// How the source channels are laid out in an output frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    /// Output channel `c` carries source channel `c % source_channels`.
    Repeat,
    /// The single output channel carries the mean of all source channels.
    Downmix,
}

impl ChannelMode {
    pub fn new(source: usize, requested: usize) -> Result<Self> {
        if requested == 0 || source == 0 {
            unsupported_error("output must have at least one channel")
        }
        else if requested % source == 0 {
            Ok(ChannelMode::Repeat)
        }
        else if requested == 1 {
            Ok(ChannelMode::Downmix)
        }
        else {
            unsupported_error("output channels must be a multiple of the stream channels")
        }
    }
}

/// Gets the number of output frames emitted per source frame at the requested rate.
pub fn rate_factor(stream: u32, requested: u32) -> Result<usize> {
    if stream == 0 || requested == 0 || requested % stream != 0 {
        return Err(Error::UnsupportedSampleRate { stream, requested });
    }

    Ok((requested / stream) as usize)
}

/// Writes source frame `frame` of `buf` into the interleaved output frame `dst`.
pub fn write_frame(buf: &AudioBuffer, frame: usize, mode: ChannelMode, dst: &mut [f32]) {
    let n_planes = buf.num_planes();

    match mode {
        ChannelMode::Repeat => {
            for (c, sample) in dst.iter_mut().enumerate() {
                *sample = buf.chan(c % n_planes)[frame];
            }
        }
        ChannelMode::Downmix => {
            let sum: f32 = (0..n_planes).map(|ch| buf.chan(ch)[frame]).sum();
            dst[0] = sum / n_planes as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use strophe_core::audio::{AudioBuffer, AudioSpec, Channels, Position};
    use strophe_core::errors::Error;

    use super::*;

    fn stereo_buf() -> AudioBuffer {
        let channels = Channels::Positioned(Position::FRONT_LEFT | Position::FRONT_RIGHT);
        let mut buf = AudioBuffer::new(AudioSpec::new(22_050, channels), 4);
        buf.render_reserved(2);
        buf.chan_mut(0).copy_from_slice(&[0.5, 0.25]);
        buf.chan_mut(1).copy_from_slice(&[-0.5, 0.75]);
        buf
    }

    #[test]
    fn verify_channel_mode() {
        assert_eq!(ChannelMode::new(2, 2).unwrap(), ChannelMode::Repeat);
        assert_eq!(ChannelMode::new(2, 4).unwrap(), ChannelMode::Repeat);
        assert_eq!(ChannelMode::new(1, 1).unwrap(), ChannelMode::Repeat);
        assert_eq!(ChannelMode::new(2, 1).unwrap(), ChannelMode::Downmix);
        assert!(matches!(ChannelMode::new(2, 3), Err(Error::FeatureNotSupported(_))));
        assert!(matches!(ChannelMode::new(2, 0), Err(Error::FeatureNotSupported(_))));
    }

    #[test]
    fn verify_rate_factor() {
        assert_eq!(rate_factor(22_050, 22_050).unwrap(), 1);
        assert_eq!(rate_factor(22_050, 44_100).unwrap(), 2);
        assert!(matches!(
            rate_factor(22_050, 48_000),
            Err(Error::UnsupportedSampleRate { stream: 22_050, requested: 48_000 })
        ));
        assert!(rate_factor(22_050, 0).is_err());
    }

    #[test]
    fn verify_write_frame() {
        let buf = stereo_buf();

        let mut out = [0.0; 4];
        write_frame(&buf, 1, ChannelMode::Repeat, &mut out);
        assert_eq!(out, [0.25, 0.75, 0.25, 0.75]);

        let mut out = [0.0; 1];
        write_frame(&buf, 0, ChannelMode::Downmix, &mut out);
        assert_eq!(out, [0.0]);
        write_frame(&buf, 1, ChannelMode::Downmix, &mut out);
        assert_eq!(out, [0.5]);
    }
}
