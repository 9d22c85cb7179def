// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `audio` module provides planar floating-point audio buffers and channel descriptions.

use bitflags::bitflags;
use smallvec::SmallVec;

bitflags! {
    /// A bitmask representing positional audio channels.
    ///
    /// The positions are identical to those of the channel mask in Microsoft's
    /// `WAVEFORMATEXTENSIBLE` structure. Planes of a positioned buffer are stored in bit order.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Position: u32 {
        /// Front-left (left) channel.
        const FRONT_LEFT          = 1 << 0;
        /// Front-right (right) channel.
        const FRONT_RIGHT         = 1 << 1;
        /// Front-center (center) or the Mono channel.
        const FRONT_CENTER        = 1 << 2;
        /// Low-frequency effects (LFE) channel.
        const LFE1                = 1 << 3;
        /// Rear-left channel.
        const REAR_LEFT           = 1 << 4;
        /// Rear-right channel.
        const REAR_RIGHT          = 1 << 5;
        /// Front left-of-center channel.
        const FRONT_LEFT_CENTER   = 1 << 6;
        /// Front right-of-center channel.
        const FRONT_RIGHT_CENTER  = 1 << 7;
        /// Rear-center channel.
        const REAR_CENTER         = 1 << 8;
        /// Side-left channel.
        const SIDE_LEFT           = 1 << 9;
        /// Side-right channel.
        const SIDE_RIGHT          = 1 << 10;
    }
}

/// A description of the channels of an audio stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Channels {
    /// Channels are assigned explict speaker positions.
    Positioned(Position),
    /// Channels `0..count` are discrete and independent channels.
    Discrete(u16),
    /// No channels.
    #[default]
    None,
}

impl Channels {
    /// Get the total number of channels.
    pub fn count(&self) -> usize {
        match self {
            Channels::Positioned(positions) => positions.bits().count_ones() as usize,
            Channels::Discrete(count) => usize::from(*count),
            Channels::None => 0,
        }
    }
}

impl std::fmt::Display for Channels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channels::Positioned(positions) => {
                let mut first = true;
                for (name, _) in positions.iter_names() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", name)?;
                    first = false;
                }
                Ok(())
            }
            Channels::Discrete(count) => write!(f, "{} discrete", count),
            Channels::None => write!(f, "none"),
        }
    }
}

/// A specification defining the core characteristics of some audio.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioSpec {
    rate: u32,
    channels: Channels,
}

impl AudioSpec {
    /// Create an audio specification from a sample rate in Hertz (Hz) and set of channels.
    pub fn new(rate: u32, channels: Channels) -> Self {
        AudioSpec { rate, channels }
    }

    /// Get the sample rate in Hz.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Get the channels.
    pub fn channels(&self) -> &Channels {
        &self.channels
    }
}

/// A planar buffer of 32-bit floating-point audio.
///
/// The buffer never allocates after instantiation.
#[derive(Clone, Default)]
pub struct AudioBuffer {
    spec: AudioSpec,
    planes: SmallVec<[Vec<f32>; 2]>,
    num_frames: usize,
    capacity: usize,
}

impl AudioBuffer {
    /// Instantiate a new `AudioBuffer` with room for `capacity` frames.
    pub fn new(spec: AudioSpec, capacity: usize) -> Self {
        let num_channels = spec.channels().count();

        let mut planes = SmallVec::<[Vec<f32>; 2]>::with_capacity(num_channels);
        planes.resize_with(num_channels, || vec![0.0; capacity]);

        AudioBuffer { spec, planes, num_frames: 0, capacity }
    }

    /// Gets the signal specification of the buffer.
    pub fn spec(&self) -> &AudioSpec {
        &self.spec
    }

    /// Gets the number of channels (planes).
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Gets the maximum number of frames the buffer can store.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Gets the number of frames in the buffer.
    pub fn frames(&self) -> usize {
        self.num_frames
    }

    /// Returns `true` if the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.num_frames == 0
    }

    /// Clears all audio frames.
    pub fn clear(&mut self) {
        self.num_frames = 0;
    }

    /// Commits `num_frames` frames without initializing them. The caller is expected to overwrite
    /// them through `chan_mut`.
    ///
    /// # Panics
    ///
    /// Panics if the capacity would be exceeded.
    pub fn render_reserved(&mut self, num_frames: usize) {
        assert!(self.num_frames + num_frames <= self.capacity, "capacity will be exceeded");
        self.num_frames += num_frames;
    }

    /// Renders `num_frames` frames of silence.
    ///
    /// # Panics
    ///
    /// Panics if the capacity would be exceeded.
    pub fn render_silence(&mut self, num_frames: usize) {
        assert!(self.num_frames + num_frames <= self.capacity, "capacity will be exceeded");

        for plane in &mut self.planes {
            plane[self.num_frames..self.num_frames + num_frames].fill(0.0);
        }

        self.num_frames += num_frames;
    }

    /// Gets an immutable reference to the written frames of plane `ch`.
    pub fn chan(&self, ch: usize) -> &[f32] {
        &self.planes[ch][..self.num_frames]
    }

    /// Gets a mutable reference to the written frames of plane `ch`.
    pub fn chan_mut(&mut self, ch: usize) -> &mut [f32] {
        &mut self.planes[ch][..self.num_frames]
    }

    /// Shifts the contents of the buffer back by `shift` frames. The leading frames are dropped.
    pub fn shift(&mut self, shift: usize) {
        if shift >= self.num_frames {
            self.clear();
        }
        else if shift > 0 {
            for plane in &mut self.planes {
                plane.copy_within(shift..self.num_frames, 0);
            }
            self.num_frames -= shift;
        }
    }

    /// Truncates the buffer to `num_frames` frames. Does nothing if the buffer is shorter.
    pub fn truncate(&mut self, num_frames: usize) {
        if num_frames < self.num_frames {
            self.num_frames = num_frames;
        }
    }

    /// Trims frames from the start and end of the buffer.
    pub fn trim(&mut self, start: usize, end: usize) {
        // Trimming the end first reduces the number of frames shifted.
        self.truncate(self.num_frames.saturating_sub(end));
        self.shift(start);
    }

    /// Applies `f` to every written sample of every plane.
    pub fn transform<F: Fn(f32) -> f32>(&mut self, f: F) {
        let n = self.num_frames;
        for plane in &mut self.planes {
            for sample in &mut plane[..n] {
                *sample = f(*sample);
            }
        }
    }

    /// Copies frames `src_offset..src_offset + frames` into `dst` in interleaved order. `dst`
    /// must hold at least `frames * num_planes()` samples.
    pub fn copy_interleaved(&self, src_offset: usize, frames: usize, dst: &mut [f32]) {
        let n_planes = self.planes.len();

        assert!(src_offset + frames <= self.num_frames, "source range out of bounds");
        assert!(dst.len() >= frames * n_planes, "destination too small");

        for (ch, plane) in self.planes.iter().enumerate() {
            let src = &plane[src_offset..src_offset + frames];

            for (frame, &sample) in dst.chunks_exact_mut(n_planes).zip(src) {
                frame[ch] = sample;
            }
        }
    }
}
