// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use once_cell::sync::Lazy;

use crate::io::Monitor;

const CRC32_POLY: u32 = 0x04c1_1db7;

/// Most-significant-bit first lookup table for polynomial `0x04c11db7`.
static CRC32_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];

    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = (i as u32) << 24;

        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ CRC32_POLY } else { crc << 1 };
        }

        *entry = crc;
    }

    table
});

/// `Crc32` implements the non-reflected CRC-32 with polynomial `0x04c11db7` and no final XOR.
///
/// Ogg pages use this code with an initial state of 0.
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// Instantiate a `Crc32` instance with an initial state.
    pub fn new(state: u32) -> Crc32 {
        Crc32 { state }
    }

    /// Returns the computed CRC.
    pub fn crc(&self) -> u32 {
        self.state
    }
}

impl Monitor for Crc32 {
    #[inline(always)]
    fn process_byte(&mut self, byte: u8) {
        let table = &*CRC32_TABLE;
        self.state = (self.state << 8) ^ table[((self.state >> 24) as u8 ^ byte) as usize];
    }

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        let table = &*CRC32_TABLE;

        for &byte in buf {
            self.state = (self.state << 8) ^ table[((self.state >> 24) as u8 ^ byte) as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Crc32;
    use crate::io::Monitor;

    #[test]
    fn verify_crc32() {
        let mut crc = Crc32::new(0);
        crc.process_buf_bytes(b"123456789");
        assert_eq!(crc.crc(), 0x89a1_897f);

        // Byte-at-a-time and buffered processing agree.
        let mut crc = Crc32::new(0);
        for &byte in b"OggS" {
            crc.process_byte(byte);
        }
        assert_eq!(crc.crc(), 0x5fb0_a94f);

        let mut crc = Crc32::new(0);
        crc.process_quad_bytes(*b"OggS");
        assert_eq!(crc.crc(), 0x5fb0_a94f);
    }
}
