// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// As defined in section 9.2.1 of the Vorbis I specification.
///
/// The `ilog` function returns the position number (1 through n) of the highest set bit in the
/// two's complement integer value `x`.
#[inline(always)]
pub fn ilog(x: u32) -> u32 {
    32 - x.leading_zeros()
}

/// A set of audio channel indices. Streams carry at most 16 channels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelSet(u32);

impl ChannelSet {
    #[inline(always)]
    pub fn set(&mut self, ch: usize) {
        debug_assert!(ch < 32);
        self.0 |= 1 << ch;
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates over the channel indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;

        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let ch = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(ch)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{ilog, ChannelSet};

    /// Packs values least-significant bit first, as the Vorbis bitstream does.
    #[derive(Default)]
    pub struct BitWriter {
        pub buf: Vec<u8>,
        bit: u32,
    }

    impl BitWriter {
        pub fn write(&mut self, value: u32, width: u32) {
            for i in 0..width {
                if self.bit == 0 {
                    self.buf.push(0);
                }
                let last = self.buf.len() - 1;
                self.buf[last] |= (((value >> i) & 1) as u8) << self.bit;
                self.bit = (self.bit + 1) % 8;
            }
        }

        pub fn write_bool(&mut self, value: bool) {
            self.write(u32::from(value), 1);
        }
    }

    #[test]
    fn verify_ilog() {
        assert_eq!(ilog(0), 0);
        assert_eq!(ilog(1), 1);
        assert_eq!(ilog(2), 2);
        assert_eq!(ilog(3), 2);
        assert_eq!(ilog(4), 3);
        assert_eq!(ilog(7), 3);
        assert_eq!(ilog(u32::MAX), 32);
    }

    #[test]
    fn verify_channel_set() {
        let mut set = ChannelSet::default();
        assert_eq!(set.count(), 0);
        assert_eq!(set.iter().next(), None);

        set.set(0);
        set.set(3);
        set.set(15);
        set.set(3);

        assert_eq!(set.count(), 3);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 3, 15]);
    }
}
