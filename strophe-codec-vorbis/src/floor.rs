// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use hashbrown::HashSet;

use strophe_core::errors::{setup_error, Error, Result};
use strophe_core::io::ReadBitsRtl;

use super::codebook::Codebook;
use super::common::*;

/// As defined in section 10.1 of the Vorbis I specification.
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
const FLOOR1_INVERSE_DB_TABLE: [f32; 256] = [
    1.0649863e-07, 1.1341951e-07, 1.2079015e-07, 1.2863978e-07,
    1.3699951e-07, 1.4590251e-07, 1.5538408e-07, 1.6548181e-07,
    1.7623575e-07, 1.8768855e-07, 1.9988561e-07, 2.1287530e-07,
    2.2670913e-07, 2.4144197e-07, 2.5713223e-07, 2.7384213e-07,
    2.9163793e-07, 3.1059021e-07, 3.3077411e-07, 3.5226968e-07,
    3.7516214e-07, 3.9954229e-07, 4.2550680e-07, 4.5315863e-07,
    4.8260743e-07, 5.1396998e-07, 5.4737065e-07, 5.8294187e-07,
    6.2082472e-07, 6.6116941e-07, 7.0413592e-07, 7.4989464e-07,
    7.9862701e-07, 8.5052630e-07, 9.0579828e-07, 9.6466216e-07,
    1.0273513e-06, 1.0941144e-06, 1.1652161e-06, 1.2409384e-06,
    1.3215816e-06, 1.4074654e-06, 1.4989305e-06, 1.5963394e-06,
    1.7000785e-06, 1.8105592e-06, 1.9282195e-06, 2.0535261e-06,
    2.1869758e-06, 2.3290978e-06, 2.4804557e-06, 2.6416497e-06,
    2.8133190e-06, 2.9961443e-06, 3.1908506e-06, 3.3982101e-06,
    3.6190449e-06, 3.8542308e-06, 4.1047004e-06, 4.3714470e-06,
    4.6555282e-06, 4.9580707e-06, 5.2802740e-06, 5.6234160e-06,
    5.9888572e-06, 6.3780469e-06, 6.7925283e-06, 7.2339451e-06,
    7.7040476e-06, 8.2047000e-06, 8.7378876e-06, 9.3057248e-06,
    9.9104632e-06, 1.0554501e-05, 1.1240392e-05, 1.1970856e-05,
    1.2748789e-05, 1.3577278e-05, 1.4459606e-05, 1.5399272e-05,
    1.6400004e-05, 1.7465768e-05, 1.8600792e-05, 1.9809576e-05,
    2.1096914e-05, 2.2467911e-05, 2.3928002e-05, 2.5482978e-05,
    2.7139006e-05, 2.8902651e-05, 3.0780908e-05, 3.2781225e-05,
    3.4911534e-05, 3.7180282e-05, 3.9596466e-05, 4.2169667e-05,
    4.4910090e-05, 4.7828601e-05, 5.0936773e-05, 5.4246931e-05,
    5.7772202e-05, 6.1526565e-05, 6.5524908e-05, 6.9783085e-05,
    7.4317983e-05, 7.9147585e-05, 8.4291040e-05, 8.9768747e-05,
    9.5602426e-05, 0.00010181521, 0.00010843174, 0.00011547824,
    0.00012298267, 0.00013097477, 0.00013948625, 0.00014855085,
    0.00015820453, 0.00016848555, 0.00017943469, 0.00019109536,
    0.00020351382, 0.00021673929, 0.00023082423, 0.00024582449,
    0.00026179955, 0.00027881276, 0.00029693158, 0.00031622787,
    0.00033677814, 0.00035866388, 0.00038197188, 0.00040679456,
    0.00043323036, 0.00046138411, 0.00049136745, 0.00052329927,
    0.00055730621, 0.00059352311, 0.00063209358, 0.00067317058,
    0.00071691700, 0.00076350630, 0.00081312324, 0.00086596457,
    0.00092223983, 0.00098217216, 0.0010459992,  0.0011139742,
    0.0011863665,  0.0012634633,  0.0013455702,  0.0014330129,
    0.0015261382,  0.0016253153,  0.0017309374,  0.0018434235,
    0.0019632195,  0.0020908006,  0.0022266726,  0.0023713743,
    0.0025254795,  0.0026895994,  0.0028643847,  0.0030505286,
    0.0032487691,  0.0034598925,  0.0036847358,  0.0039241906,
    0.0041792066,  0.0044507950,  0.0047400328,  0.0050480668,
    0.0053761186,  0.0057254891,  0.0060975636,  0.0064938176,
    0.0069158225,  0.0073652516,  0.0078438871,  0.0083536271,
    0.0088964928,  0.009474637,   0.010090352,   0.010746080,
    0.011444421,   0.012188144,   0.012980198,   0.013823725,
    0.014722068,   0.015678791,   0.016697687,   0.017782797,
    0.018938423,   0.020169149,   0.021479854,   0.022875735,
    0.024362330,   0.025945531,   0.027631618,   0.029427276,
    0.031339626,   0.033376252,   0.035545228,   0.037855157,
    0.040315199,   0.042935108,   0.045725273,   0.048696758,
    0.051861348,   0.055231591,   0.058820850,   0.062643361,
    0.066714279,   0.071049749,   0.075666962,   0.080584227,
    0.085821044,   0.091398179,   0.097337747,   0.10366330,
    0.11039993,    0.11757434,    0.12521498,    0.13335215,
    0.14201813,    0.15124727,    0.16107617,    0.17154380,
    0.18269168,    0.19456402,    0.20720788,    0.22067342,
    0.23501402,    0.25028656,    0.26655159,    0.28387361,
    0.30232132,    0.32196786,    0.34289114,    0.36517414,
    0.38890521,    0.41417847,    0.44109412,    0.46975890,
    0.50028648,    0.53279791,    0.56742212,    0.60429640,
    0.64356699,    0.68538959,    0.72993007,    0.77736504,
    0.82788260,    0.88168307,    0.9389798,     1.0,
];

/// The maximum number of x values, including the two implicit end points.
const FLOOR1_MAX_X_LIST_LEN: usize = 65;

/// Evaluates a bitstream read. If the packet ends, the floor is left marked unused and the
/// enclosing function returns successfully.
macro_rules! try_or_unused {
    ($expr:expr) => {
        match $expr.map_err(Error::from) {
            Ok(val) => val,
            Err(Error::UnexpectedEnd) => return Ok(()),
            Err(err) => return Err(err),
        }
    };
}

#[derive(Debug, Default)]
struct Floor1Class {
    /// Main codebook index.
    mainbook: u8,
    /// Class dimensions.
    dimensions: u8,
    /// Number of sub-classes expressed as a power-of-2 exponent (2 ^ subclass_bits).
    subclass_bits: u8,
    /// Codebook index for each sub-class.
    subbooks: [u8; 8],
    /// Bitset marking if a sub-class codebook is used or not.
    is_subbook_used: u8,
}

#[derive(Debug)]
struct Floor1Setup {
    /// Class index (0..16) of each partition, at most 31 partitions.
    partition_classes: Vec<u8>,
    classes: [Floor1Class; 16],
    /// Floor multiplier, 1..=4.
    multiplier: u8,
    x_list: Vec<u32>,
    /// Indices into `x_list` in ascending x order.
    sort_order: Vec<u8>,
    /// The low and high neighbour of each x value.
    neighbors: Vec<(usize, usize)>,
}

/// A floor type 1 configuration and the floor values of the channel last read with it.
#[derive(Debug)]
pub struct Floor1 {
    setup: Floor1Setup,
    is_unused: bool,
    floor_y: Vec<u32>,
    final_y: Vec<i32>,
    step2_flag: Vec<bool>,
}

impl Floor1 {
    pub fn try_read<B: ReadBitsRtl>(bs: &mut B, num_codebooks: usize) -> Result<Self> {
        let setup = read_setup(bs, num_codebooks)?;

        let x_list_len = setup.x_list.len();

        Ok(Floor1 {
            setup,
            is_unused: true,
            floor_y: vec![0; x_list_len],
            final_y: vec![0; x_list_len],
            step2_flag: vec![false; x_list_len],
        })
    }

    /// Reads the floor values of one channel. If the channel has no floor in this packet, or the
    /// packet ends within the floor, the floor is marked unused.
    pub fn read_channel<B: ReadBitsRtl>(
        &mut self,
        bs: &mut B,
        codebooks: &[Codebook],
    ) -> Result<()> {
        // Assume the floor is unused until it is decoded successfully.
        self.is_unused = true;

        let is_used = try_or_unused!(bs.read_bool());

        if !is_used {
            return Ok(());
        }

        let range = get_range(self.setup.multiplier);
        let range_bits = ilog(range - 1);

        self.floor_y[0] = try_or_unused!(bs.read_bits_leq32(range_bits));
        self.floor_y[1] = try_or_unused!(bs.read_bits_leq32(range_bits));

        let mut offset = 2;

        for &class_idx in &self.setup.partition_classes {
            let class = &self.setup.classes[usize::from(class_idx)];

            let cdim = usize::from(class.dimensions);
            let cbits = u32::from(class.subclass_bits);
            let csub = (1 << cbits) - 1;

            let mut cval = 0;

            if cbits > 0 {
                let mainbook = &codebooks[usize::from(class.mainbook)];
                cval = try_or_unused!(mainbook.read_scalar(bs));
            }

            for floor_y in self.floor_y[offset..offset + cdim].iter_mut() {
                let subclass = cval & csub;

                cval >>= cbits;

                *floor_y = if class.is_subbook_used & (1 << subclass) != 0 {
                    let subbook = &codebooks[usize::from(class.subbooks[subclass as usize])];
                    try_or_unused!(subbook.read_scalar(bs))
                }
                else {
                    0
                };
            }

            offset += cdim;
        }

        self.is_unused = false;

        Ok(())
    }

    pub fn is_unused(&self) -> bool {
        self.is_unused
    }

    /// Renders the curve of the last read channel into `floor[..n2]`.
    pub fn synthesis(&mut self, n2: usize, floor: &mut [f32]) {
        debug_assert!(!self.is_unused);
        self.amplitude_value_synthesis();
        self.curve_synthesis(n2, floor);
    }

    /// Section 7.2.4, step 1. Unwraps the floor values predicted from each point's neighbours.
    fn amplitude_value_synthesis(&mut self) {
        let range = get_range(self.setup.multiplier) as i32;
        let x_list = &self.setup.x_list;

        self.step2_flag[0] = true;
        self.step2_flag[1] = true;

        self.final_y[0] = self.floor_y[0] as i32;
        self.final_y[1] = self.floor_y[1] as i32;

        for i in 2..x_list.len() {
            let (low, high) = self.setup.neighbors[i];

            let predicted = render_point(
                x_list[low],
                self.final_y[low],
                x_list[high],
                self.final_y[high],
                x_list[i],
            );

            let val = self.floor_y[i] as i32;
            let highroom = range - predicted;
            let lowroom = predicted;

            if val != 0 {
                let room = 2 * min(highroom, lowroom);

                self.step2_flag[low] = true;
                self.step2_flag[high] = true;
                self.step2_flag[i] = true;

                self.final_y[i] = if val >= room {
                    if highroom > lowroom {
                        val - lowroom + predicted
                    }
                    else {
                        predicted - val + highroom - 1
                    }
                }
                else if val & 1 == 1 {
                    predicted - ((val + 1) / 2)
                }
                else {
                    predicted + (val / 2)
                };
            }
            else {
                self.step2_flag[i] = false;
                self.final_y[i] = predicted;
            }
        }
    }

    /// Section 7.2.4, step 2. Draws line segments between the used points in ascending x order.
    fn curve_synthesis(&self, n2: usize, floor: &mut [f32]) {
        let multiplier = i32::from(self.setup.multiplier);
        let x_list = &self.setup.x_list;

        let scaled_y = |i: usize| (self.final_y[i] * multiplier).clamp(0, 255);

        let mut lx = 0;
        let mut ly = scaled_y(usize::from(self.setup.sort_order[0]));
        let mut hx = 0;
        let mut hy = ly;

        for i in self.setup.sort_order[1..].iter().map(|&i| usize::from(i)) {
            if self.step2_flag[i] {
                hx = x_list[i];
                hy = scaled_y(i);

                render_line(lx, ly, hx, hy, n2, floor);

                lx = hx;
                ly = hy;
            }
        }

        if (hx as usize) < n2 {
            render_line(hx, hy, n2 as u32, hy, n2, floor);
        }
    }
}

fn read_setup<B: ReadBitsRtl>(bs: &mut B, num_codebooks: usize) -> Result<Floor1Setup> {
    let num_partitions = bs.read_bits_leq32(5)? as usize;

    let mut partition_classes = Vec::with_capacity(num_partitions);

    for _ in 0..num_partitions {
        partition_classes.push(bs.read_bits_leq32(4)? as u8);
    }

    let mut classes: [Floor1Class; 16] = Default::default();

    if let Some(&max_class) = partition_classes.iter().max() {
        for class in classes[..=usize::from(max_class)].iter_mut() {
            class.dimensions = bs.read_bits_leq32(3)? as u8 + 1;
            class.subclass_bits = bs.read_bits_leq32(2)? as u8;

            if class.subclass_bits != 0 {
                let mainbook = bs.read_bits_leq32(8)? as u8;

                if usize::from(mainbook) >= num_codebooks {
                    return setup_error("vorbis: floor1, invalid codebook for class");
                }

                class.mainbook = mainbook;
            }

            let num_subclasses = 1 << class.subclass_bits;

            for (i, book) in class.subbooks[..num_subclasses].iter_mut().enumerate() {
                // A stored book number of 0 marks an unused sub-class. Otherwise, the book number
                // is offset by one.
                let stored = bs.read_bits_leq32(8)? as usize;

                if stored > 0 {
                    if stored - 1 >= num_codebooks {
                        return setup_error("vorbis: floor1, invalid codebook for subclass");
                    }

                    *book = (stored - 1) as u8;
                    class.is_subbook_used |= 1 << i;
                }
            }
        }
    }

    let multiplier = bs.read_bits_leq32(2)? as u8 + 1;

    let rangebits = bs.read_bits_leq32(4)?;

    let mut x_list = vec![0, 1 << rangebits];
    let mut unique = HashSet::new();

    unique.insert(0);
    unique.insert(1 << rangebits);

    for &class_idx in &partition_classes {
        let class = &classes[usize::from(class_idx)];

        if x_list.len() + usize::from(class.dimensions) > FLOOR1_MAX_X_LIST_LEN {
            return setup_error("vorbis: floor1, x_list too long");
        }

        for _ in 0..class.dimensions {
            let x = bs.read_bits_leq32(rangebits)?;

            if !unique.insert(x) {
                return setup_error("vorbis: floor1, x_list is not unique");
            }

            x_list.push(x);
        }
    }

    let neighbors = (0..x_list.len()).map(|i| find_neighbors(&x_list, i)).collect();

    let mut sort_order: Vec<u8> = (0..x_list.len() as u8).collect();
    sort_order.sort_by_key(|&i| x_list[usize::from(i)]);

    Ok(Floor1Setup { partition_classes, classes, multiplier, x_list, sort_order, neighbors })
}

#[inline(always)]
fn get_range(multiplier: u8) -> u32 {
    match multiplier {
        1 => 256,
        2 => 128,
        3 => 86,
        _ => 64,
    }
}

/// Sections 9.2.4 and 9.2.5. Finds, among the values preceding position `x`, the position of the
/// greatest value less than `v[x]` and of the least value greater than `v[x]`.
fn find_neighbors(v: &[u32], x: usize) -> (usize, usize) {
    let bound = v[x];

    let mut low: Option<(usize, u32)> = None;
    let mut high: Option<(usize, u32)> = None;

    for (i, &xv) in v[..x].iter().enumerate() {
        if xv < bound && low.map_or(true, |(_, lv)| xv > lv) {
            low = Some((i, xv));
        }
        if xv > bound && high.map_or(true, |(_, hv)| xv < hv) {
            high = Some((i, xv));
        }
    }

    (low.map_or(0, |(i, _)| i), high.map_or(0, |(i, _)| i))
}

#[inline(always)]
fn render_point(x0: u32, y0: i32, x1: u32, y1: i32, x: u32) -> i32 {
    let dy = i64::from(y1) - i64::from(y0);
    let adx = i64::from(x1 - x0);
    let err = dy.abs() * i64::from(x - x0);
    let off = err / adx;
    let y = if dy < 0 { i64::from(y0) - off } else { i64::from(y0) + off };
    y as i32
}

/// Section 9.2.7. Draws a line from `(x0, y0)` up to, but excluding, `x1`. Points at or beyond `n`
/// are not drawn.
fn render_line(x0: u32, y0: i32, x1: u32, y1: i32, n: usize, v: &mut [f32]) {
    if x0 as usize >= n {
        return;
    }

    let dy = y1 - y0;
    let adx = (x1 - x0) as i32;

    let base = dy / adx;
    let sy = if dy < 0 { base - 1 } else { base + 1 };
    let ady = dy.abs() - base.abs() * adx;

    let mut y = y0;
    let mut err = 0;

    v[x0 as usize] = FLOOR1_INVERSE_DB_TABLE[y as usize];

    let x_end = min(n, x1 as usize);

    for v in v[x0 as usize + 1..x_end].iter_mut() {
        err += ady;

        y += if err >= adx {
            err -= adx;
            sy
        }
        else {
            base
        };

        *v = FLOOR1_INVERSE_DB_TABLE[y as usize];
    }
}
