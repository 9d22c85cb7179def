// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builders for synthetic Ogg Vorbis files.

#![allow(dead_code)]

use std::io::Cursor;

use strophe::core::checksum::Crc32;
use strophe::core::codecs::DecoderOptions;
use strophe::core::formats::FormatOptions;
use strophe::core::io::{MediaSourceStream, Monitor};
use strophe::format::PageFlags;
use strophe::VorbisStream;

pub const SERIAL: u32 = 0x5354_5250;

/// Both block sizes are 256, so every audio packet after the first yields 128 frames.
pub const BLOCK_SIZES: u8 = 0x88;
pub const FRAMES_PER_PACKET: u64 = 128;

/// Writes values LSB-first.
#[derive(Default)]
pub struct BitWriter {
    pub buf: Vec<u8>,
    bit: usize,
}

impl BitWriter {
    pub fn write(&mut self, value: u32, width: u32) {
        for i in 0..width {
            if self.bit % 8 == 0 {
                self.buf.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.buf.len() - 1;
                self.buf[last] |= 1 << (self.bit % 8);
            }
            self.bit += 1;
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write(u32::from(value), 1);
    }
}

pub fn ident_packet(channels: u8, rate: u32) -> Vec<u8> {
    ident_packet_with(channels, rate, BLOCK_SIZES)
}

pub fn ident_packet_with(channels: u8, rate: u32, block_sizes: u8) -> Vec<u8> {
    let mut buf = vec![1];
    buf.extend_from_slice(b"vorbis");
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.push(channels);
    buf.extend_from_slice(&rate.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.extend_from_slice(&48_000i32.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.push(block_sizes);
    buf.push(1);
    buf
}

pub fn comment_packet(vendor: &str, comments: &[&str]) -> Vec<u8> {
    let mut buf = vec![3];
    buf.extend_from_slice(b"vorbis");
    buf.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    buf.extend_from_slice(vendor.as_bytes());
    buf.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for comment in comments {
        buf.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        buf.extend_from_slice(comment.as_bytes());
    }
    buf.push(1);
    buf
}

/// A setup header with one two-entry codebook, one floor 1 without partitions, one residue
/// without books, one mapping and three short-block modes.
pub fn setup_packet() -> Vec<u8> {
    let mut bw = BitWriter::default();

    for &b in &[5u8, b'v', b'o', b'r', b'b', b'i', b's'] {
        bw.write(u32::from(b), 8);
    }

    // Codebooks: sync, 1 dimension, 2 entries, unordered, not sparse, lengths 1 and 1, no lookup.
    bw.write(0, 8);
    bw.write(0x564342, 24);
    bw.write(1, 16);
    bw.write(2, 24);
    bw.write_bool(false);
    bw.write_bool(false);
    bw.write(0, 5);
    bw.write(0, 5);
    bw.write(0, 4);

    // Time domain transforms.
    bw.write(0, 6);
    bw.write(0, 16);

    // Floors: type 1, no partitions, multiplier 1, 8 range bits.
    bw.write(0, 6);
    bw.write(1, 16);
    bw.write(0, 5);
    bw.write(0, 2);
    bw.write(8, 4);

    // Residues: type 1 over 0..128 in partitions of 32, one unused class.
    bw.write(0, 6);
    bw.write(1, 16);
    bw.write(0, 24);
    bw.write(128, 24);
    bw.write(31, 24);
    bw.write(0, 6);
    bw.write(0, 8);
    bw.write(0, 3);
    bw.write_bool(false);

    // Mappings: type 0, one submap, no coupling.
    bw.write(0, 6);
    bw.write(0, 16);
    bw.write_bool(false);
    bw.write_bool(false);
    bw.write(0, 2);
    bw.write(0, 8);
    bw.write(0, 8);
    bw.write(0, 8);

    // Modes: three short-block modes, so mode number 3 is invalid.
    bw.write(2, 6);
    for _ in 0..3 {
        bw.write_bool(false);
        bw.write(0, 16);
        bw.write(0, 16);
        bw.write(0, 8);
    }

    // Framing.
    bw.write_bool(true);

    bw.buf
}

/// An audio packet in which every channel's floor is unused, padded to `len` bytes.
pub fn silent_packet(len: usize) -> Vec<u8> {
    vec![0; len.max(1)]
}

/// Builds a single Ogg page. Every packet is complete.
pub fn build_page(flags: PageFlags, granule: u64, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
    let mut segments = Vec::new();
    let mut body = Vec::new();

    for packet in packets {
        let mut len = packet.len();
        while len >= 255 {
            segments.push(255u8);
            len -= 255;
        }
        segments.push(len as u8);
        body.extend_from_slice(packet);
    }

    let mut page = Vec::new();
    page.extend_from_slice(b"OggS");
    page.push(0);
    page.push(flags.bits());
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&SERIAL.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0; 4]);
    page.push(segments.len() as u8);
    page.extend_from_slice(&segments);
    page.extend_from_slice(&body);

    let mut crc = Crc32::new(0);
    crc.process_buf_bytes(&page);
    page[22..26].copy_from_slice(&crc.crc().to_le_bytes());

    page
}

/// Overwrites byte `offset` of the body of the page at `page` and updates the page checksum.
pub fn patch_page_body(data: &mut [u8], page: usize, offset: usize, value: u8) {
    let n_segments = usize::from(data[page + 26]);
    let body_start = page + 27 + n_segments;
    let body_len: usize = data[page + 27..body_start].iter().map(|&len| usize::from(len)).sum();

    data[body_start + offset] = value;

    let page_buf = &mut data[page..body_start + body_len];
    page_buf[22..26].fill(0);

    let mut crc = Crc32::new(0);
    crc.process_buf_bytes(page_buf);
    page_buf[22..26].copy_from_slice(&crc.crc().to_le_bytes());
}

/// A synthetic stream.
pub struct Fixture {
    pub data: Vec<u8>,
    /// The byte offset of each audio page.
    pub audio_pages: Vec<usize>,
    /// The granule position of each audio page.
    pub granules: Vec<u64>,
    /// The number of frames the stream decodes to.
    pub frames: u64,
}

/// Builds a silent 8 kHz stream of `pages` audio pages, each carrying `packets_per_page` audio
/// packets of `packet_len` bytes. The final granule position is `final_granule` when set.
pub fn silent_stream(
    channels: u8,
    pages: u32,
    packets_per_page: u32,
    packet_len: usize,
    final_granule: Option<u64>,
) -> Fixture {
    let mut data = Vec::new();

    data.extend(build_page(PageFlags::FIRST, 0, 0, &[&ident_packet(channels, 8_000)[..]]));
    let comment = comment_packet("strophe test", &["TITLE=Silence", "ARTIST=Nobody"]);
    data.extend(build_page(PageFlags::empty(), 0, 1, &[&comment[..], &setup_packet()[..]]));

    let packet = silent_packet(packet_len);

    let mut audio_pages = Vec::new();
    let mut granules = Vec::new();
    let mut n_packets = 0u64;
    let mut frames = 0;

    for i in 0..pages {
        let is_last = i + 1 == pages;

        n_packets += u64::from(packets_per_page);

        // The first packet primes the decoder.
        let mut granule = (n_packets - 1) * FRAMES_PER_PACKET;

        if is_last {
            if let Some(final_granule) = final_granule {
                granule = final_granule;
            }
            frames = granule;
        }

        let flags = if is_last { PageFlags::LAST } else { PageFlags::empty() };

        let packets: Vec<&[u8]> = (0..packets_per_page).map(|_| &packet[..]).collect();

        audio_pages.push(data.len());
        granules.push(granule);
        data.extend(build_page(flags, granule, i + 2, &packets));
    }

    Fixture { data, audio_pages, granules, frames }
}

/// Short blocks of 128 and long blocks of 512 samples.
pub const TONE_BLOCK_SIZES: u8 = 0x97;
pub const TONE_SHORT: u64 = 128;
pub const TONE_LONG: u64 = 512;

/// The block pattern of a tone stream: two long blocks, then three short ones.
pub fn tone_block_is_long(packet: u64) -> bool {
    packet % 5 < 2
}

/// The frames the audio packet at `packet` decodes to.
pub fn tone_block_frames(packet: u64) -> u64 {
    let size = |i| if tone_block_is_long(i) { TONE_LONG } else { TONE_SHORT };

    match packet {
        0 => 0,
        _ => (size(packet - 1) + size(packet)) / 4,
    }
}

/// A linear congruential generator for repeatable packet contents.
pub struct Lcg(u32);

impl Lcg {
    pub fn new(seed: u32) -> Self {
        Lcg(seed)
    }

    pub fn below(&mut self, modulus: u32) -> u32 {
        self.0 = self.0.wrapping_mul(1664525).wrapping_add(1013904223);
        (self.0 >> 8) % modulus
    }
}

/// Writes the codeword of `entry` in a codebook whose entries all have length `len`. Such
/// codebooks assign each entry its own number as codeword, read most-significant bit first.
fn write_codeword(bw: &mut BitWriter, entry: u32, len: u32) {
    for i in (0..len).rev() {
        bw.write((entry >> i) & 1, 1);
    }
}

/// Writes a codebook whose `entries` entries all have codewords of `len` bits.
fn write_flat_codebook(bw: &mut BitWriter, dimensions: u16, entries: u32, len: u32) {
    bw.write(0x564342, 24);
    bw.write(u32::from(dimensions), 16);
    bw.write(entries, 24);
    bw.write_bool(false);
    bw.write_bool(false);
    for _ in 0..entries {
        bw.write(len - 1, 5);
    }
}

/// A mono setup header that codes real audio.
///
/// Codebook 0 has four scalar entries. Codebook 1 has 16 two-dimensional entries over the values
/// -1.5, -0.5, 0.5 and 1.5. The floor has one point at x = 64 between the end points at 0 and
/// 256, read with codebook 0. The residue is format 1 over bins 0..64 in partitions of 16. Its
/// classbook is codebook 0, class 0 is unused and class 1 reads codebook 1 in the first pass.
/// Mode 0 codes short blocks and mode 1 long blocks.
pub fn tone_setup_packet() -> Vec<u8> {
    let mut bw = BitWriter::default();

    for &b in &[5u8, b'v', b'o', b'r', b'b', b'i', b's'] {
        bw.write(u32::from(b), 8);
    }

    // Codebooks.
    bw.write(1, 8);

    write_flat_codebook(&mut bw, 1, 4, 2);
    bw.write(0, 4);

    write_flat_codebook(&mut bw, 2, 16, 4);
    // Lookup type 1: minimum -1.5, delta 1.0, 2-bit multiplicands 0..4, no sequence.
    bw.write(1, 4);
    bw.write(0x8000_0000 | (787 << 21) | 3, 32);
    bw.write((788 << 21) | 1, 32);
    bw.write(1, 4);
    bw.write_bool(false);
    for mult in 0..4 {
        bw.write(mult, 2);
    }

    // Time domain transforms.
    bw.write(0, 6);
    bw.write(0, 16);

    // Floors: type 1, one partition of class 0.
    bw.write(0, 6);
    bw.write(1, 16);
    bw.write(1, 5);
    bw.write(0, 4);
    // Class 0: one dimension, no subclasses, subbook 0 stored as 1.
    bw.write(0, 3);
    bw.write(0, 2);
    bw.write(1, 8);
    // Multiplier 1, 8 range bits, x = 64.
    bw.write(0, 2);
    bw.write(8, 4);
    bw.write(64, 8);

    // Residues: type 1 over 0..64 in partitions of 16, two classes from classbook 0.
    bw.write(0, 6);
    bw.write(1, 16);
    bw.write(0, 24);
    bw.write(64, 24);
    bw.write(15, 24);
    bw.write(1, 6);
    bw.write(0, 8);
    bw.write(0, 3);
    bw.write_bool(false);
    bw.write(1, 3);
    bw.write_bool(false);
    bw.write(1, 8);

    // Mappings: type 0, one submap, no coupling.
    bw.write(0, 6);
    bw.write(0, 16);
    bw.write_bool(false);
    bw.write_bool(false);
    bw.write(0, 2);
    bw.write(0, 8);
    bw.write(0, 8);
    bw.write(0, 8);

    // Modes: short then long.
    bw.write(1, 6);
    for long in [false, true] {
        bw.write_bool(long);
        bw.write(0, 16);
        bw.write(0, 16);
        bw.write(0, 8);
    }

    // Framing.
    bw.write_bool(true);

    bw.buf
}

/// An audio packet for `tone_setup_packet` with a used floor and at least one coded residue
/// partition, padded with zeros to `len` bytes.
pub fn tone_packet(long: bool, lcg: &mut Lcg, len: usize) -> Vec<u8> {
    let mut bw = BitWriter::default();

    bw.write_bool(false);
    bw.write_bool(long);
    if long {
        bw.write(0b11, 2);
    }

    // Floor.
    bw.write_bool(true);
    bw.write(160 + lcg.below(48), 8);
    bw.write(160 + lcg.below(48), 8);
    write_codeword(&mut bw, lcg.below(4), 2);

    // Residue: a classword per partition, then the partition's vectors if it is coded.
    for partition in 0..4 {
        let coded = partition == 0 || lcg.below(2) == 1;
        write_codeword(&mut bw, 2 * lcg.below(2) + u32::from(coded), 2);

        if coded {
            for _ in 0..8 {
                write_codeword(&mut bw, lcg.below(16), 4);
            }
        }
    }

    let mut packet = bw.buf;
    assert!(packet.len() <= len);
    packet.resize(len, 0);
    packet
}

/// Builds an 8 kHz mono stream of `pages` audio pages of `packets_per_page` tone packets, each
/// padded to 200 bytes. The last page trims 37 frames of padding.
pub fn tone_stream(pages: u32, packets_per_page: u32) -> Fixture {
    let mut data = Vec::new();

    let ident = ident_packet_with(1, 8_000, TONE_BLOCK_SIZES);
    data.extend(build_page(PageFlags::FIRST, 0, 0, &[&ident[..]]));
    let comment = comment_packet("strophe test", &["TITLE=Tone"]);
    data.extend(build_page(PageFlags::empty(), 0, 1, &[&comment[..], &tone_setup_packet()[..]]));

    let mut lcg = Lcg::new(0x5eed_0001);

    let mut audio_pages = Vec::new();
    let mut granules = Vec::new();
    let mut granule = 0;
    let mut n_packets = 0u64;

    for i in 0..pages {
        let packets: Vec<Vec<u8>> = (0..u64::from(packets_per_page))
            .map(|j| tone_packet(tone_block_is_long(n_packets + j), &mut lcg, 200))
            .collect();

        for _ in 0..packets_per_page {
            granule += tone_block_frames(n_packets);
            n_packets += 1;
        }

        let is_last = i + 1 == pages;

        if is_last {
            granule -= 37;
        }

        let flags = if is_last { PageFlags::LAST } else { PageFlags::empty() };
        let packets: Vec<&[u8]> = packets.iter().map(|packet| &packet[..]).collect();

        audio_pages.push(data.len());
        granules.push(granule);
        data.extend(build_page(flags, granule, i + 2, &packets));
    }

    Fixture { data, audio_pages, granules, frames: granule }
}

pub fn open_with(data: Vec<u8>, fmt_opts: FormatOptions) -> VorbisStream {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
    VorbisStream::try_new(mss, &fmt_opts, &DecoderOptions::default()).unwrap()
}

pub fn open(data: Vec<u8>) -> VorbisStream {
    open_with(data, FormatOptions::default())
}
