// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use strophe_core::dsp::mdct::Imdct;

use super::residue::ResidueScratch;
use super::window::Windows;

pub struct Dsp {
    /// DSP channels (at most 16).
    pub channels: Vec<DspChannel>,
    /// Residue scratch-pad.
    pub residue_scratch: ResidueScratch,
    /// IMDCT for short-blocks.
    pub imdct_short: Imdct,
    /// IMDCT for long-blocks.
    pub imdct_long: Imdct,
    /// Windows for overlap-add.
    pub windows: Windows,
    /// The size of the previous block, if there is overlap history.
    pub prev_block_size: Option<usize>,
}

impl Dsp {
    pub fn new(n_channels: usize, blocksize0: usize, blocksize1: usize) -> Self {
        Dsp {
            channels: (0..n_channels).map(|_| DspChannel::new(blocksize1)).collect(),
            residue_scratch: Default::default(),
            imdct_short: Imdct::new(blocksize0 >> 1),
            imdct_long: Imdct::new(blocksize1 >> 1),
            windows: Windows::new(blocksize0, blocksize1),
            prev_block_size: None,
        }
    }

    /// The number of frames a block of size `n` produces, given the current overlap history.
    pub fn output_len(&self, n: usize) -> usize {
        match self.prev_block_size {
            Some(prev_n) => (prev_n + n) / 4,
            None => 0,
        }
    }

    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }

        self.prev_block_size = None;
    }
}

pub struct DspChannel {
    /// The channel floor buffer. Holds the spectrum after the dot product.
    pub floor: Vec<f32>,
    /// The channel residue buffer.
    pub residue: Vec<f32>,
    /// The channel has no audio energy in the current block.
    pub do_not_decode: bool,
    /// IMDCT output of the current block.
    imdct_out: Vec<f32>,
    /// Right half of the previous block, unwindowed.
    overlap: Vec<f32>,
}

impl DspChannel {
    pub fn new(blocksize1: usize) -> Self {
        DspChannel {
            floor: vec![0.0; blocksize1 >> 1],
            residue: vec![0.0; blocksize1 >> 1],
            do_not_decode: false,
            imdct_out: vec![0.0; blocksize1],
            overlap: vec![0.0; blocksize1 >> 1],
        }
    }

    /// Transforms the spectrum in `floor` of a block of size `n`, overlap-adds it with the previous
    /// block of size `prev_n`, and writes the `(prev_n + n) / 4` finished samples to `buf`.
    pub fn synth(
        &mut self,
        n: usize,
        prev_n: Option<usize>,
        windows: &Windows,
        imdct: &mut Imdct,
        buf: &mut [f32],
    ) {
        let n2 = n >> 1;
        let n4 = n >> 2;

        imdct.imdct(&self.floor[..n2], &mut self.imdct_out[..n]);

        if let Some(prev_n) = prev_n {
            let lap = min(prev_n, n) >> 1;
            let slope = windows.slope(lap);

            // The previous block's samples before its falling slope are unaffected by this block.
            let prev_flat = (prev_n >> 2) - (lap >> 1);
            let cur_start = n4 - (lap >> 1);

            debug_assert_eq!(buf.len(), (prev_n + n) >> 2);

            let (head, rest) = buf.split_at_mut(prev_flat);
            let (mid, tail) = rest.split_at_mut(lap);

            head.copy_from_slice(&self.overlap[..prev_flat]);

            let prev = &self.overlap[prev_flat..prev_flat + lap];
            let cur = &self.imdct_out[cur_start..cur_start + lap];

            for (i, ((o, &p), &c)) in mid.iter_mut().zip(prev).zip(cur).enumerate() {
                *o = p * slope[lap - 1 - i] + c * slope[i];
            }

            // This block's samples after its rising slope up to its centre.
            tail.copy_from_slice(&self.imdct_out[n4 + (lap >> 1)..n2]);

            for s in buf.iter_mut() {
                *s = s.clamp(-1.0, 1.0);
            }
        }

        self.overlap[..n2].copy_from_slice(&self.imdct_out[n2..n]);
    }

    pub fn reset(&mut self) {
        self.overlap.fill(0.0);
    }
}
