// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `mdct` module implements the Inverse Modified Discrete Cosine Transform (IMDCT).
//!
//! The transform is computed directly with a split-radix butterfly network rather than in terms
//! of an FFT. The network consists of a pre-rotation, a cascade of butterfly stages of
//! decreasing stride, a closed-form 16-point kernel, a bit-reversal permutation, and a
//! post-rotation that also unfolds the half-length result into the full output block.

use std::f64::consts::PI;

/// The Inverse Modified Discrete Transform (IMDCT).
///
/// Given `n` spectral coefficients `X[k]`, the `2n` outputs are
/// `y[i] = scale * sum(X[k] * cos(PI / (4n) * (2i + 1 + n) * (2k + 1)))`.
pub struct Imdct {
    /// Block length (2x the number of spectral coefficients).
    n: usize,
    /// log2 of the block length.
    ld: u32,
    /// Pre-rotation and butterfly twiddles, `n/2` values.
    a: Box<[f32]>,
    /// Post-rotation twiddles, `n/2` values. Carries the output scale.
    b: Box<[f32]>,
    /// Step 7 twiddles, `n/4` values.
    c: Box<[f32]>,
    /// Bit-reversal permutation, `n/8` values.
    bitrev: Box<[u16]>,
    /// Working buffers, `n/2` values each.
    u: Box<[f32]>,
    v: Box<[f32]>,
}

impl Imdct {
    /// Instantiate a N-point IMDCT with no scaling.
    ///
    /// The value of `n` is the number of spectral samples and must be a power-of-2 in the range
    /// 32 to 4096 inclusive.
    pub fn new(n: usize) -> Self {
        Imdct::new_scaled(n, 1.0)
    }

    /// Instantiate a N-point IMDCT with scaling.
    ///
    /// The value of `n` is the number of spectral samples and must be a power-of-2 in the range
    /// 32 to 4096 inclusive.
    pub fn new_scaled(n: usize, scale: f64) -> Self {
        assert!(n.is_power_of_two(), "n must be a power of two");
        assert!(n >= 32 && n <= 4096, "n must be between 32 and 4096");

        // Work in terms of the block length.
        let n = n << 1;
        let n2 = n >> 1;
        let n4 = n >> 2;
        let n8 = n >> 3;

        let mut a = vec![0f32; n2];
        let mut b = vec![0f32; n2];
        let mut c = vec![0f32; n4];

        for k in 0..n4 {
            let theta_a = (4 * k) as f64 * PI / n as f64;
            a[2 * k] = theta_a.cos() as f32;
            a[2 * k + 1] = -theta_a.sin() as f32;

            let theta_b = (2 * k + 1) as f64 * PI / n as f64 / 2.0;
            b[2 * k] = (theta_b.cos() * 0.5 * scale) as f32;
            b[2 * k + 1] = (theta_b.sin() * 0.5 * scale) as f32;
        }

        for k in 0..n8 {
            let theta_c = (2 * (2 * k + 1)) as f64 * PI / n as f64;
            c[2 * k] = theta_c.cos() as f32;
            c[2 * k + 1] = -theta_c.sin() as f32;
        }

        let ld = n.trailing_zeros();

        let bitrev = (0..n8)
            .map(|i| (((i as u32).reverse_bits() >> (32 - ld + 3)) << 2) as u16)
            .collect::<Vec<u16>>();

        Imdct {
            n,
            ld,
            a: a.into_boxed_slice(),
            b: b.into_boxed_slice(),
            c: c.into_boxed_slice(),
            bitrev: bitrev.into_boxed_slice(),
            u: vec![0f32; n2].into_boxed_slice(),
            v: vec![0f32; n2].into_boxed_slice(),
        }
    }

    /// Performs the IMDCT.
    ///
    /// The length of `spec` must equal `n`, and the length of `out` must equal `2n`.
    pub fn imdct(&mut self, spec: &[f32], out: &mut [f32]) {
        let n = self.n;
        let n2 = n >> 1;
        let n4 = n >> 2;

        assert_eq!(spec.len(), n2, "spectrum length must equal n");
        assert_eq!(out.len(), n, "output length must equal 2n");

        let a = &self.a[..];
        let u = &mut self.u[..];
        let v = &mut self.v[..];

        // Step 0/1: pre-rotation of the even coefficients from the front of the spectrum and the
        // odd coefficients from the back, written into `v` back-to-front.
        {
            let half = n2 >> 2;

            for t in 0..half {
                let d = n2 - 2 - 2 * t;
                let e = 4 * t;
                let k = 2 * t;
                v[d + 1] = spec[e] * a[k] - spec[e + 2] * a[k + 1];
                v[d] = spec[e] * a[k + 1] + spec[e + 2] * a[k];
            }

            for t in 0..half {
                let d = n2 - 2 - 2 * (half + t);
                let e = n2 - 3 - 4 * t;
                let k = 2 * (half + t);
                v[d + 1] = -spec[e + 2] * a[k] + spec[e] * a[k + 1];
                v[d] = -spec[e + 2] * a[k + 1] - spec[e] * a[k];
            }
        }

        // Step 2: first butterfly stage, combining the two halves of `v` into `u`.
        for t in 0..(n2 >> 3) {
            let k = n2 - 8 - 8 * t;
            let e0 = n4 + 4 * t;
            let e1 = 4 * t;

            let v41 = v[e0 + 1] - v[e1 + 1];
            let v40 = v[e0] - v[e1];
            u[e0 + 1] = v[e0 + 1] + v[e1 + 1];
            u[e0] = v[e0] + v[e1];
            u[e1 + 1] = v41 * a[k + 4] - v40 * a[k + 5];
            u[e1] = v40 * a[k + 4] + v41 * a[k + 5];

            let v41 = v[e0 + 3] - v[e1 + 3];
            let v40 = v[e0 + 2] - v[e1 + 2];
            u[e0 + 3] = v[e0 + 3] + v[e1 + 3];
            u[e0 + 2] = v[e0 + 2] + v[e1 + 2];
            u[e1 + 3] = v41 * a[k] - v40 * a[k + 1];
            u[e1 + 2] = v40 * a[k] + v41 * a[k + 1];
        }

        // Step 3: butterfly cascade. Early stages iterate over twiddles in the inner loop, later
        // stages have few enough twiddles that they are hoisted out of the loop.
        let ld = self.ld as usize;

        for l in 0..ld.saturating_sub(6) {
            let k0 = n >> (l + 2);
            let k0_2 = k0 >> 1;
            let lim = 1 << (l + 1);
            let k1 = 1 << (l + 3);

            if l < 2 || l < ((ld - 3) >> 1) {
                for i in 0..lim {
                    step3_inner_r_loop(n >> (l + 4), u, n2 - 1 - k0 * i, k0_2, a, k1);
                }
            }
            else {
                for r in 0..(n >> (l + 6)) {
                    step3_inner_s_loop(lim, u, n2 - 1 - 8 * r, k0_2, &a[r * 4 * k1..], k1, k0);
                }
            }
        }

        step3_inner_s_loop_ld654(n >> 5, u, n2 - 1, a, n);

        // Steps 4, 5, and 6: bit-reversal permutation from `u` into `v`.
        for t in 0..(n4 >> 2) {
            let d0 = n4 - 4 - 4 * t;
            let d1 = n2 - 4 - 4 * t;

            let k4 = usize::from(self.bitrev[2 * t]);
            v[d1 + 3] = u[k4];
            v[d1 + 2] = u[k4 + 1];
            v[d0 + 3] = u[k4 + 2];
            v[d0 + 2] = u[k4 + 3];

            let k4 = usize::from(self.bitrev[2 * t + 1]);
            v[d1 + 1] = u[k4];
            v[d1] = u[k4 + 1];
            v[d0 + 1] = u[k4 + 2];
            v[d0] = u[k4 + 3];
        }

        // Step 7: twiddle the bit-reversed result from both ends towards the middle.
        let c = &self.c[..];

        for t in 0..(n2 >> 3) {
            let d = 4 * t;
            let e = n2 - 4 - 4 * t;
            let k = 4 * t;

            let a02 = v[d] - v[e + 2];
            let a11 = v[d + 1] + v[e + 3];
            let b0 = c[k + 1] * a02 + c[k] * a11;
            let b1 = c[k + 1] * a11 - c[k] * a02;
            let b2 = v[d] + v[e + 2];
            let b3 = v[d + 1] - v[e + 3];
            v[d] = b2 + b0;
            v[d + 1] = b3 + b1;
            v[e + 2] = b2 - b0;
            v[e + 3] = b1 - b3;

            let a02 = v[d + 2] - v[e];
            let a11 = v[d + 3] + v[e + 1];
            let b0 = c[k + 3] * a02 + c[k + 2] * a11;
            let b1 = c[k + 3] * a11 - c[k + 2] * a02;
            let b2 = v[d + 2] + v[e];
            let b3 = v[d + 3] - v[e + 1];
            v[d + 2] = b2 + b0;
            v[d + 3] = b3 + b1;
            v[e] = b2 - b0;
            v[e + 1] = b1 - b3;
        }

        // Step 8: post-rotation. Each rotated pair is written to four places in the output using
        // the symmetries of the IMDCT.
        let b = &self.b[..];

        for t in 0..(n2 >> 3) {
            let e = n2 - 8 - 8 * t;
            let d0 = 4 * t;
            let d1 = n2 - 4 - 4 * t;
            let d2 = n2 + 4 * t;
            let d3 = n - 4 - 4 * t;

            let p3 = v[e + 6] * b[e + 7] - v[e + 7] * b[e + 6];
            let p2 = -v[e + 6] * b[e + 6] - v[e + 7] * b[e + 7];
            out[d0] = p3;
            out[d1 + 3] = -p3;
            out[d2] = p2;
            out[d3 + 3] = p2;

            let p1 = v[e + 4] * b[e + 5] - v[e + 5] * b[e + 4];
            let p0 = -v[e + 4] * b[e + 4] - v[e + 5] * b[e + 5];
            out[d0 + 1] = p1;
            out[d1 + 2] = -p1;
            out[d2 + 1] = p0;
            out[d3 + 2] = p0;

            let p3 = v[e + 2] * b[e + 3] - v[e + 3] * b[e + 2];
            let p2 = -v[e + 2] * b[e + 2] - v[e + 3] * b[e + 3];
            out[d0 + 2] = p3;
            out[d1 + 1] = -p3;
            out[d2 + 2] = p2;
            out[d3 + 1] = p2;

            let p1 = v[e] * b[e + 1] - v[e + 1] * b[e];
            let p0 = -v[e] * b[e] - v[e + 1] * b[e + 1];
            out[d0 + 3] = p1;
            out[d1] = -p1;
            out[d2 + 3] = p0;
            out[d3] = p0;
        }
    }
}

/// Butterflies `count / 4` groups of four complex pairs. `d0` indexes the top of the upper
/// half-span and `k_off` is the distance to the lower half-span. The twiddle index advances by `k1`
/// for every pair.
#[inline(always)]
fn step3_inner_r_loop(count: usize, e: &mut [f32], d0: usize, k_off: usize, a: &[f32], k1: usize) {
    let mut k = 0;

    for t in 0..(count >> 2) {
        let e0 = d0 - 8 * t;
        let e2 = e0 - k_off;

        for j in 0..4 {
            let i0 = e0 - 2 * j;
            let i2 = e2 - 2 * j;

            let k00 = e[i0] - e[i2];
            let k01 = e[i0 - 1] - e[i2 - 1];
            e[i0] += e[i2];
            e[i0 - 1] += e[i2 - 1];
            e[i2] = k00 * a[k] - k01 * a[k + 1];
            e[i2 - 1] = k01 * a[k] + k00 * a[k + 1];

            k += k1;
        }
    }
}

/// Like `step3_inner_r_loop`, but the four twiddles are fixed and taken from `a` at a stride of
/// `k1`, and successive groups are `k0` apart.
#[inline(always)]
fn step3_inner_s_loop(
    count: usize,
    e: &mut [f32],
    d0: usize,
    k_off: usize,
    a: &[f32],
    k1: usize,
    k0: usize,
) {
    let w = [
        (a[0], a[1]),
        (a[k1], a[k1 + 1]),
        (a[2 * k1], a[2 * k1 + 1]),
        (a[3 * k1], a[3 * k1 + 1]),
    ];

    for t in 0..count {
        let e0 = d0 - k0 * t;
        let e2 = e0 - k_off;

        for (j, &(w0, w1)) in w.iter().enumerate() {
            let i0 = e0 - 2 * j;
            let i2 = e2 - 2 * j;

            let k00 = e[i0] - e[i2];
            let k11 = e[i0 - 1] - e[i2 - 1];
            e[i0] += e[i2];
            e[i0 - 1] += e[i2 - 1];
            e[i2] = k00 * w0 - k11 * w1;
            e[i2 - 1] = k11 * w0 + k00 * w1;
        }
    }
}

/// Final butterfly stages for 16-point groups, computed in closed form.
#[inline(always)]
fn step3_inner_s_loop_ld654(count: usize, e: &mut [f32], d0: usize, a: &[f32], n: usize) {
    let a2 = a[n >> 3];

    for t in 0..count {
        let z = d0 - 16 * t;

        let k00 = e[z] - e[z - 8];
        let k11 = e[z - 1] - e[z - 9];
        let l00 = e[z - 2] - e[z - 10];
        let l11 = e[z - 3] - e[z - 11];
        e[z] += e[z - 8];
        e[z - 1] += e[z - 9];
        e[z - 2] += e[z - 10];
        e[z - 3] += e[z - 11];
        e[z - 8] = k00;
        e[z - 9] = k11;
        e[z - 10] = (l00 + l11) * a2;
        e[z - 11] = (l11 - l00) * a2;

        let k00 = e[z - 4] - e[z - 12];
        let k11 = e[z - 5] - e[z - 13];
        let l00 = e[z - 6] - e[z - 14];
        let l11 = e[z - 7] - e[z - 15];
        e[z - 4] += e[z - 12];
        e[z - 5] += e[z - 13];
        e[z - 6] += e[z - 14];
        e[z - 7] += e[z - 15];
        e[z - 12] = k11;
        e[z - 13] = -k00;
        e[z - 14] = (l11 - l00) * a2;
        e[z - 15] = (l00 + l11) * -a2;

        iter_54(&mut e[z - 7..=z]);
        iter_54(&mut e[z - 15..=z - 8]);
    }
}

/// 8-point kernel on `z[0..8]`, indexed from the top.
#[inline(always)]
fn iter_54(z: &mut [f32]) {
    let k00 = z[7] - z[3];
    let y0 = z[7] + z[3];
    let y2 = z[5] + z[1];
    let k22 = z[5] - z[1];

    z[7] = y0 + y2;
    z[5] = y0 - y2;

    let k33 = z[4] - z[0];

    z[3] = k00 + k33;
    z[1] = k00 - k33;

    let k11 = z[6] - z[2];
    let y1 = z[6] + z[2];
    let y3 = z[4] + z[0];

    z[6] = y1 + y3;
    z[4] = y1 - y3;
    z[2] = k11 - k22;
    z[0] = k11 + k22;
}
