// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64::consts;

/// Generates the rising slope of the Vorbis window for an overlap of `len` samples.
fn generate_win_curve(len: usize) -> Vec<f32> {
    let denom = len as f64;

    let mut slope = vec![0.0; len];

    for (i, s) in slope.iter_mut().enumerate() {
        let num = i as f64 + 0.5;
        let frac = consts::FRAC_PI_2 * (num / denom);
        *s = (consts::FRAC_PI_2 * frac.sin().powi(2)).sin() as f32
    }

    slope
}

pub struct Windows {
    /// Slope for an overlap with a short block.
    short: Vec<f32>,
    /// Slope for an overlap between two long blocks.
    long: Vec<f32>,
}

impl Windows {
    pub fn new(blocksize0: usize, blocksize1: usize) -> Self {
        let short = generate_win_curve(blocksize0 / 2);
        let long = generate_win_curve(blocksize1 / 2);
        Windows { short, long }
    }

    /// Gets the rising slope for an overlap of `lap` samples. The overlap of two adjacent blocks is
    /// half the smaller block, so `lap` is half of one of the two block sizes.
    pub fn slope(&self, lap: usize) -> &[f32] {
        if lap == self.short.len() {
            &self.short
        }
        else {
            debug_assert_eq!(lap, self.long.len());
            &self.long
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Windows;

    #[test]
    fn verify_power_complementary() {
        let windows = Windows::new(256, 2048);

        for lap in [128, 1024] {
            let slope = windows.slope(lap);
            assert_eq!(slope.len(), lap);

            for i in 0..lap {
                let sum = slope[i] * slope[i] + slope[lap - 1 - i] * slope[lap - 1 - i];
                assert!((sum - 1.0).abs() < 1e-5);
            }

            assert!(slope.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
