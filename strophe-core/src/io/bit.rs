// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;
use std::io;

#[inline(always)]
fn end_of_bitstream_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of bitstream"))
}

/// Returns `true` if the I/O error was caused by reading past the end of a bitstream or buffer.
#[inline(always)]
pub fn is_end_of_bitstream(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
}

mod private {
    use std::io;

    pub trait FetchBitsRtl {
        /// Discard any remaining bits in the source and fetch new bits.
        fn fetch_bits(&mut self) -> io::Result<()>;

        /// Fetch new bits, and append them after the remaining bits.
        fn fetch_bits_partial(&mut self) -> io::Result<()>;

        /// Get all the bits in the source.
        fn get_bits(&self) -> u64;

        /// Get the number of bits left in the source.
        fn num_bits_left(&self) -> u32;

        /// Consume `num` bits from the source.
        fn consume_bits(&mut self, num: u32);
    }
}

/// A `FiniteBitStream` is a bit stream that has a known length in bits.
pub trait FiniteBitStream {
    /// Gets the number of bits left unread.
    fn bits_left(&self) -> u64;
}

/// `ReadBitsRtl` reads bits from least-significant to most-significant.
pub trait ReadBitsRtl: private::FetchBitsRtl {
    /// Ignores the specified number of bits from the stream or returns an error.
    #[inline(always)]
    fn ignore_bits(&mut self, mut num_bits: u32) -> io::Result<()> {
        if num_bits <= self.num_bits_left() {
            self.consume_bits(num_bits);
        }
        else {
            while num_bits > self.num_bits_left() {
                num_bits -= self.num_bits_left();
                self.fetch_bits()?;
            }

            if num_bits > 0 {
                // Shift out in two parts to prevent panicing when num_bits == 64.
                self.consume_bits(num_bits - 1);
                self.consume_bits(1);
            }
        }

        Ok(())
    }

    /// Read a single bit as a boolean value or returns an error.
    #[inline(always)]
    fn read_bool(&mut self) -> io::Result<bool> {
        if self.num_bits_left() < 1 {
            self.fetch_bits()?;
        }

        let bit = (self.get_bits() & 1) == 1;

        self.consume_bits(1);
        Ok(bit)
    }

    /// Read a single bit or returns an error.
    #[inline(always)]
    fn read_bit(&mut self) -> io::Result<u32> {
        Ok(u32::from(self.read_bool()?))
    }

    /// Reads up to 32-bits or returns an error.
    #[inline(always)]
    fn read_bits_leq32(&mut self, bit_width: u32) -> io::Result<u32> {
        debug_assert!(bit_width <= u32::BITS);

        let mut bits = self.get_bits();
        let mut bits_needed = bit_width;

        while bits_needed > self.num_bits_left() {
            bits_needed -= self.num_bits_left();

            self.fetch_bits()?;

            bits |= self.get_bits() << (bit_width - bits_needed);
        }

        self.consume_bits(bits_needed);

        // Since bit_width is <= 32, this shift will never panic.
        let mask = !(!0 << bit_width);

        Ok((bits & mask) as u32)
    }

    /// Peeks at up to 32-bits without consuming them. Returns the bits, zero-padded past the end
    /// of the stream, and the number of bits that are actually available.
    #[inline(always)]
    fn peek_bits_leq32(&mut self, bit_width: u32) -> (u32, u32) {
        debug_assert!(bit_width <= u32::BITS);

        if self.num_bits_left() < bit_width {
            // A partial fetch only fails once the source is exhausted. In that case the cache
            // already holds every remaining bit.
            self.fetch_bits_partial().ok();
        }

        let mask = !(!0u64 << bit_width);

        ((self.get_bits() & mask) as u32, min(bit_width, self.num_bits_left()))
    }
}

/// `BitReaderRtl` reads bits from least-significant to most-significant from any `&[u8]`.
///
/// Stated another way, if N-bits are read from a `BitReaderRtl` then bit 0, the first bit read,
/// is the least-significant bit, and bit N-1, the last bit read, is the most-significant. This is
/// the bit order of Vorbis packets.
pub struct BitReaderRtl<'a> {
    buf: &'a [u8],
    bits: u64,
    n_bits_left: u32,
}

impl<'a> BitReaderRtl<'a> {
    /// Instantiate a new `BitReaderRtl` with the given buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        BitReaderRtl { buf, bits: 0, n_bits_left: 0 }
    }
}

impl private::FetchBitsRtl for BitReaderRtl<'_> {
    fn fetch_bits_partial(&mut self) -> io::Result<()> {
        let mut buf = [0u8; std::mem::size_of::<u64>()];

        let read_len = min(self.buf.len(), (u64::BITS - self.n_bits_left) as usize >> 3);

        if read_len == 0 {
            return end_of_bitstream_error();
        }

        buf[..read_len].copy_from_slice(&self.buf[..read_len]);

        self.buf = &self.buf[read_len..];

        self.bits |= u64::from_le_bytes(buf) << self.n_bits_left;
        self.n_bits_left += (read_len as u32) << 3;

        Ok(())
    }

    fn fetch_bits(&mut self) -> io::Result<()> {
        let mut buf = [0u8; std::mem::size_of::<u64>()];

        let read_len = min(self.buf.len(), std::mem::size_of::<u64>());

        if read_len == 0 {
            return end_of_bitstream_error();
        }

        buf[..read_len].copy_from_slice(&self.buf[..read_len]);

        self.buf = &self.buf[read_len..];

        self.bits = u64::from_le_bytes(buf);
        self.n_bits_left = (read_len as u32) << 3;

        Ok(())
    }

    #[inline(always)]
    fn get_bits(&self) -> u64 {
        self.bits
    }

    #[inline(always)]
    fn num_bits_left(&self) -> u32 {
        self.n_bits_left
    }

    #[inline(always)]
    fn consume_bits(&mut self, num: u32) {
        self.n_bits_left -= num;
        self.bits >>= num;
    }
}

impl ReadBitsRtl for BitReaderRtl<'_> {}

impl FiniteBitStream for BitReaderRtl<'_> {
    fn bits_left(&self) -> u64 {
        (8 * self.buf.len() as u64) + u64::from(self.n_bits_left)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::{BitReaderRtl, FiniteBitStream, ReadBitsRtl};

    /// Packs values LSB-first, the inverse of `BitReaderRtl`.
    struct BitWriterRtl {
        buf: Vec<u8>,
        n_bits: u32,
    }

    impl BitWriterRtl {
        fn new() -> Self {
            BitWriterRtl { buf: Vec::new(), n_bits: 0 }
        }

        fn write(&mut self, value: u32, width: u32) {
            for i in 0..width {
                if self.n_bits % 8 == 0 {
                    self.buf.push(0);
                }
                let bit = ((value >> i) & 1) as u8;
                let last = self.buf.len() - 1;
                self.buf[last] |= bit << (self.n_bits % 8);
                self.n_bits += 1;
            }
        }
    }

    #[test]
    fn verify_bitreaderrtl_read_bool() {
        let mut bs = BitReaderRtl::new(&[0b1010_1010]);

        for i in 0..8 {
            assert_eq!(bs.read_bool().unwrap(), i % 2 == 1);
        }

        assert!(bs.read_bool().is_err());
    }

    #[test]
    fn verify_bitreaderrtl_read_bits_leq32() {
        let mut bs = BitReaderRtl::new(&[0b1010_0101, 0b0111_1110, 0b1101_0011]);

        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b0101);
        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b1010);
        assert_eq!(bs.read_bits_leq32(13).unwrap(), 0b1_0011_0111_1110);
        assert_eq!(bs.read_bits_leq32(3).unwrap(), 0b110);
        assert_eq!(bs.bits_left(), 0);

        let mut bs = BitReaderRtl::new(&[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(bs.read_bits_leq32(0).unwrap(), 0);

        // Crosses the 64-bit cache boundary.
        let mut bs = BitReaderRtl::new(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(8).unwrap(), 0x01);

        let mut bs = BitReaderRtl::new(&[0xff]);
        assert!(bs.read_bits_leq32(9).is_err());
    }

    #[test]
    fn verify_bitreaderrtl_peek() {
        let mut bs = BitReaderRtl::new(&[0b1100_0101, 0b0000_0011]);

        assert_eq!(bs.peek_bits_leq32(4), (0b0101, 4));
        bs.ignore_bits(3).unwrap();
        assert_eq!(bs.peek_bits_leq32(32), (0b0111_1000, 13));
        bs.ignore_bits(13).unwrap();
        assert_eq!(bs.peek_bits_leq32(10), (0, 0));
    }

    #[test]
    fn verify_bitreaderrtl_round_trip() {
        let mut rng = SmallRng::seed_from_u64(0x5eed_0b17);

        let mut values = Vec::new();
        let mut writer = BitWriterRtl::new();

        for _ in 0..4096 {
            let width = rng.random_range(1..=24u32);
            let value = rng.random::<u32>() & ((1 << width) - 1);
            writer.write(value, width);
            values.push((value, width));
        }

        let mut bs = BitReaderRtl::new(&writer.buf);

        for &(value, width) in &values {
            assert_eq!(bs.read_bits_leq32(width).unwrap(), value);
        }

        assert!(bs.bits_left() < 8);
    }
}
