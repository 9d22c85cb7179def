// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Strophe crates. Please see the workspace Cargo.toml
// for their justification.
#![allow(clippy::comparison_chain)]
#![allow(clippy::excessive_precision)]
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]
// Disable to better express the specification.
#![allow(clippy::collapsible_else_if)]

use log::debug;
use smallvec::SmallVec;

use strophe_core::audio::{AudioBuffer, AudioSpec, Channels, Position};
use strophe_core::codecs::DecoderOptions;
use strophe_core::errors::{decode_error, setup_error, unsupported_error, Result};
use strophe_core::io::{BitReaderRtl, BufReader, FiniteBitStream, ReadBitsRtl};
use strophe_core::packet::Packet;

mod codebook;
mod common;
mod dsp;
mod floor;
mod header;
mod residue;
mod window;

use codebook::Codebook;
use common::*;
use dsp::Dsp;
use floor::Floor1;
use header::*;
use residue::Residue;

pub use header::{read_comment_header, read_ident_header};
pub use header::{Comments, IdentHeader, StandardTagKey, Tag, VORBIS_MAX_CHANNELS};

/// Vorbis decoder.
pub struct VorbisDecoder {
    /// Decoder options.
    opts: DecoderOptions,
    /// Identification header.
    ident: IdentHeader,
    /// Codebooks (max. 256).
    codebooks: Vec<Codebook>,
    /// Floors (max. 64).
    floors: Vec<Floor1>,
    /// Residues (max. 64).
    residues: Vec<Residue>,
    /// Modes (max. 64).
    modes: Vec<Mode>,
    /// Mappings (max. 64).
    mappings: Vec<Mapping>,
    /// DSP.
    dsp: Dsp,
    /// Output buffer.
    buf: AudioBuffer,
}

impl VorbisDecoder {
    /// Instantiates a decoder from the identification and setup header packets.
    pub fn try_new(ident: &[u8], setup: &[u8], opts: &DecoderOptions) -> Result<Self> {
        let ident = read_ident_header(ident)?;

        let setup = read_setup(setup, &ident)?;

        let dsp = Dsp::new(usize::from(ident.n_channels), ident.blocksize0(), ident.blocksize1());

        let spec = AudioSpec::new(ident.sample_rate, vorbis_channels(ident.n_channels));

        // The longest output is produced by two consecutive long blocks.
        let buf = AudioBuffer::new(spec, ident.blocksize1() >> 1);

        Ok(VorbisDecoder {
            opts: *opts,
            ident,
            codebooks: setup.codebooks,
            floors: setup.floors,
            residues: setup.residues,
            modes: setup.modes,
            mappings: setup.mappings,
            dsp,
            buf,
        })
    }

    pub fn ident(&self) -> &IdentHeader {
        &self.ident
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.opts
    }

    /// Gets the audio specification of decoded buffers.
    pub fn spec(&self) -> &AudioSpec {
        self.buf.spec()
    }

    /// Clears the overlap history. The next audio packet only primes the decoder.
    pub fn reset(&mut self) {
        self.dsp.reset();
        self.buf.clear();
    }

    /// Gets the buffer returned by the last call to `decode` or `conceal`.
    pub fn last_decoded(&self) -> &AudioBuffer {
        &self.buf
    }

    /// Decodes an audio packet. The first audio packet after instantiation or a reset produces no
    /// frames. Non-audio and empty packets are skipped and produce no frames.
    pub fn decode(&mut self, packet: &Packet) -> Result<&AudioBuffer> {
        self.buf.clear();

        if let Err(err) = self.decode_inner(packet) {
            self.buf.clear();
            return Err(err);
        }

        Ok(&self.buf)
    }

    /// Produces silence in place of a packet that could not be decoded. The duration follows the
    /// block size coded in the packet, if readable, so the stream timeline is kept. The overlap
    /// history is discarded.
    pub fn conceal(&mut self, packet: &Packet) -> &AudioBuffer {
        let n = self
            .packet_block_size(packet)
            .or(self.dsp.prev_block_size)
            .unwrap_or_else(|| self.ident.blocksize0());

        let len = self.dsp.output_len(n);

        self.buf.clear();
        self.buf.render_silence(len);

        for channel in &mut self.dsp.channels {
            channel.reset();
        }

        self.dsp.prev_block_size = Some(n);

        &self.buf
    }

    /// Reads the block size of an audio packet from its mode number.
    fn packet_block_size(&self, packet: &Packet) -> Option<usize> {
        let mut bs = BitReaderRtl::new(packet.buf());

        if bs.read_bool().ok()? {
            return None;
        }

        let mode_bits = ilog(self.modes.len() as u32 - 1);
        let mode = self.modes.get(bs.read_bits_leq32(mode_bits).ok()? as usize)?;

        Some(if mode.block_flag { self.ident.blocksize1() } else { self.ident.blocksize0() })
    }

    fn decode_inner(&mut self, packet: &Packet) -> Result<()> {
        if packet.buf().is_empty() {
            debug!("vorbis: skipping empty packet");
            return Ok(());
        }

        let mut bs = BitReaderRtl::new(packet.buf());

        // Section 4.3.1 - Packet Type, Mode, and Window Decode

        // First bit must be 0 to indicate audio packet.
        if bs.read_bool()? {
            debug!("vorbis: skipping non-audio packet");
            return Ok(());
        }

        let num_modes = self.modes.len() - 1;

        let mode_number = bs.read_bits_leq32(ilog(num_modes as u32))? as usize;

        if mode_number >= self.modes.len() {
            return decode_error("vorbis: invalid packet mode number");
        }

        let mode = &self.modes[mode_number];
        let mapping = &self.mappings[usize::from(mode.mapping)];

        let n = if mode.block_flag {
            // The window shape follows the actual neighbouring block sizes, not these flags.
            let _prev_window_flag = bs.read_bool()?;
            let _next_window_flag = bs.read_bool()?;

            self.ident.blocksize1()
        }
        else {
            self.ident.blocksize0()
        };

        let n2 = n >> 1;

        // Section 4.3.2 - Floor Curve Decode

        for (&submap_num, ch) in mapping.multiplex.iter().zip(&mut self.dsp.channels) {
            let submap = &mapping.submaps[usize::from(submap_num)];
            let floor = &mut self.floors[usize::from(submap.floor)];

            floor.read_channel(&mut bs, &self.codebooks)?;

            ch.do_not_decode = floor.is_unused();

            if !ch.do_not_decode {
                // Many channels may share a floor, so render the curve before the next channel
                // overwrites the floor values.
                floor.synthesis(n2, &mut ch.floor);
            }
            else {
                ch.floor[..n2].fill(0.0);
            }
        }

        // Section 4.3.3 - Non-zero Vector Propagate

        for couple in &mapping.couplings {
            let magnitude = usize::from(couple.magnitude_ch);
            let angle = usize::from(couple.angle_ch);

            if self.dsp.channels[magnitude].do_not_decode
                != self.dsp.channels[angle].do_not_decode
            {
                self.dsp.channels[magnitude].do_not_decode = false;
                self.dsp.channels[angle].do_not_decode = false;
            }
        }

        // Section 4.3.4 - Residue Decode

        for (submap_idx, submap) in mapping.submaps.iter().enumerate() {
            let mut residue_channels = ChannelSet::default();

            for (ch, &ch_submap_idx) in mapping.multiplex.iter().enumerate() {
                if submap_idx == usize::from(ch_submap_idx) {
                    residue_channels.set(ch);
                }
            }

            self.residues[usize::from(submap.residue)].read_residue(
                &mut bs,
                n2,
                &self.codebooks,
                residue_channels,
                &mut self.dsp.residue_scratch,
                &mut self.dsp.channels,
            )?;
        }

        // Section 4.3.5 - Inverse Coupling

        for couple in mapping.couplings.iter().rev() {
            let magnitude_idx = usize::from(couple.magnitude_ch);
            let angle_idx = usize::from(couple.angle_ch);

            let (magnitude_ch, angle_ch) = if magnitude_idx < angle_idx {
                let (a, b) = self.dsp.channels.split_at_mut(angle_idx);
                (&mut a[magnitude_idx], &mut b[0])
            }
            else {
                let (a, b) = self.dsp.channels.split_at_mut(magnitude_idx);
                (&mut b[0], &mut a[angle_idx])
            };

            inverse_coupling(&mut magnitude_ch.residue[..n2], &mut angle_ch.residue[..n2]);
        }

        // Section 4.3.6 - Dot Product

        for channel in self.dsp.channels.iter_mut() {
            // The floor of a do-not-decode channel is all zeros, and so is the product.
            if channel.do_not_decode {
                continue;
            }

            for (f, &r) in channel.floor[..n2].iter_mut().zip(&channel.residue[..n2]) {
                *f *= r;
            }
        }

        // Sections 4.3.7 and 4.3.8 - Inverse MDCT, Overlap-add, and Output

        let render_len = self.dsp.output_len(n);
        self.buf.render_reserved(render_len);

        let imdct =
            if mode.block_flag { &mut self.dsp.imdct_long } else { &mut self.dsp.imdct_short };

        for (i, channel) in self.dsp.channels.iter_mut().enumerate() {
            channel.synth(
                n,
                self.dsp.prev_block_size,
                &self.dsp.windows,
                imdct,
                self.buf.chan_mut(map_vorbis_channel(self.ident.n_channels, i)),
            );
        }

        self.dsp.prev_block_size = Some(n);

        Ok(())
    }
}

/// Section 4.3.5. Recovers a channel pair from its magnitude and angle vectors.
fn inverse_coupling(magnitude: &mut [f32], angle: &mut [f32]) {
    for (m, a) in magnitude.iter_mut().zip(angle) {
        let (new_m, new_a) = if *m > 0.0 {
            if *a > 0.0 {
                (*m, *m - *a)
            }
            else {
                (*m + *a, *m)
            }
        }
        else {
            if *a > 0.0 {
                (*m, *m + *a)
            }
            else {
                (*m - *a, *m)
            }
        };

        *m = new_m;
        *a = new_a;
    }
}

struct Setup {
    codebooks: Vec<Codebook>,
    floors: Vec<Floor1>,
    residues: Vec<Residue>,
    mappings: Vec<Mapping>,
    modes: Vec<Mode>,
}

fn read_setup(buf: &[u8], ident: &IdentHeader) -> Result<Setup> {
    let mut reader = BufReader::new(buf);

    truncated(read_header_preamble(&mut reader, VORBIS_PACKET_TYPE_SETUP))?;

    // The remainder of the setup header packet is read bitwise.
    let mut bs = BitReaderRtl::new(reader.read_buf_bytes_available_ref());

    truncated(read_setup_inner(&mut bs, ident))
}

fn read_setup_inner(bs: &mut BitReaderRtl<'_>, ident: &IdentHeader) -> Result<Setup> {
    let codebooks = read_codebooks(bs)?;

    read_time_domain_transforms(bs)?;

    let floors = read_floors(bs, codebooks.len())?;
    let residues = read_residues(bs, &codebooks)?;
    let mappings = read_mappings(bs, ident.n_channels, floors.len(), residues.len())?;
    let modes = read_modes(bs, mappings.len())?;

    if !bs.read_bool()? {
        return setup_error("vorbis: setup header framing flag unset");
    }

    if bs.bits_left() > 7 {
        debug!("vorbis: leftover bits in setup header");
    }

    Ok(Setup { codebooks, floors, residues, mappings, modes })
}

fn read_codebooks(bs: &mut BitReaderRtl<'_>) -> Result<Vec<Codebook>> {
    let count = bs.read_bits_leq32(8)? + 1;
    (0..count).map(|_| Codebook::read(bs)).collect()
}

fn read_time_domain_transforms(bs: &mut BitReaderRtl<'_>) -> Result<()> {
    let count = bs.read_bits_leq32(6)? + 1;

    for _ in 0..count {
        // All these values are placeholders and must be 0.
        if bs.read_bits_leq32(16)? != 0 {
            return setup_error("vorbis: invalid time domain tranform");
        }
    }

    Ok(())
}

fn read_floors(bs: &mut BitReaderRtl<'_>, num_codebooks: usize) -> Result<Vec<Floor1>> {
    let count = bs.read_bits_leq32(6)? + 1;
    (0..count).map(|_| read_floor(bs, num_codebooks)).collect()
}

fn read_floor(bs: &mut BitReaderRtl<'_>, num_codebooks: usize) -> Result<Floor1> {
    let floor_type = bs.read_bits_leq32(16)?;

    match floor_type {
        0 => unsupported_error("vorbis: floor type 0"),
        1 => Floor1::try_read(bs, num_codebooks),
        _ => setup_error("vorbis: invalid floor type"),
    }
}

fn read_residues(bs: &mut BitReaderRtl<'_>, codebooks: &[Codebook]) -> Result<Vec<Residue>> {
    let count = bs.read_bits_leq32(6)? + 1;
    (0..count).map(|_| read_residue(bs, codebooks)).collect()
}

fn read_residue(bs: &mut BitReaderRtl<'_>, codebooks: &[Codebook]) -> Result<Residue> {
    let residue_type = bs.read_bits_leq32(16)? as u16;

    match residue_type {
        0..=2 => Residue::try_read(bs, residue_type, codebooks),
        _ => setup_error("vorbis: invalid residue type"),
    }
}

fn read_mappings(
    bs: &mut BitReaderRtl<'_>,
    audio_channels: u8,
    num_floors: usize,
    num_residues: usize,
) -> Result<Vec<Mapping>> {
    let count = bs.read_bits_leq32(6)? + 1;
    (0..count).map(|_| read_mapping(bs, audio_channels, num_floors, num_residues)).collect()
}

fn read_mapping(
    bs: &mut BitReaderRtl<'_>,
    audio_channels: u8,
    num_floors: usize,
    num_residues: usize,
) -> Result<Mapping> {
    let mapping_type = bs.read_bits_leq32(16)?;

    match mapping_type {
        0 => read_mapping_type0(bs, audio_channels, num_floors, num_residues),
        _ => setup_error("vorbis: invalid mapping type"),
    }
}

fn read_modes(bs: &mut BitReaderRtl<'_>, num_mappings: usize) -> Result<Vec<Mode>> {
    let count = bs.read_bits_leq32(6)? + 1;
    (0..count).map(|_| read_mode(bs, num_mappings)).collect()
}

#[derive(Debug)]
struct ChannelCouple {
    magnitude_ch: u8,
    angle_ch: u8,
}

#[derive(Debug)]
struct SubMap {
    floor: u8,
    residue: u8,
}

#[derive(Debug)]
struct Mapping {
    couplings: SmallVec<[ChannelCouple; 4]>,
    multiplex: SmallVec<[u8; 8]>,
    submaps: SmallVec<[SubMap; 2]>,
}

fn read_mapping_type0(
    bs: &mut BitReaderRtl<'_>,
    audio_channels: u8,
    num_floors: usize,
    num_residues: usize,
) -> Result<Mapping> {
    let num_submaps = if bs.read_bool()? { bs.read_bits_leq32(4)? as u8 + 1 } else { 1 };

    let mut couplings = SmallVec::new();

    if bs.read_bool()? {
        let coupling_steps = bs.read_bits_leq32(8)? as u16 + 1;

        let max_ch = audio_channels - 1;

        // The number of bits to read for the magnitude and angle channel numbers.
        let coupling_bits = ilog(u32::from(max_ch));

        for _ in 0..coupling_steps {
            let magnitude_ch = bs.read_bits_leq32(coupling_bits)? as u8;
            let angle_ch = bs.read_bits_leq32(coupling_bits)? as u8;

            if magnitude_ch == angle_ch || magnitude_ch > max_ch || angle_ch > max_ch {
                return setup_error("vorbis: invalid channel coupling");
            }

            couplings.push(ChannelCouple { magnitude_ch, angle_ch });
        }
    }

    if bs.read_bits_leq32(2)? != 0 {
        return setup_error("vorbis: reserved mapping bits non-zero");
    }

    let mut multiplex = SmallVec::with_capacity(usize::from(audio_channels));

    // Channels all use submap 0 unless there are many submaps.
    if num_submaps > 1 {
        for _ in 0..audio_channels {
            let mux = bs.read_bits_leq32(4)? as u8;

            if mux >= num_submaps {
                return setup_error("vorbis: invalid channel multiplex");
            }

            multiplex.push(mux);
        }
    }
    else {
        multiplex.resize(usize::from(audio_channels), 0);
    }

    let mut submaps = SmallVec::with_capacity(usize::from(num_submaps));

    for _ in 0..num_submaps {
        // Unused time configuration placeholder.
        let _ = bs.read_bits_leq32(8)?;

        let floor = bs.read_bits_leq32(8)? as u8;

        if usize::from(floor) >= num_floors {
            return setup_error("vorbis: invalid floor for mapping");
        }

        let residue = bs.read_bits_leq32(8)? as u8;

        if usize::from(residue) >= num_residues {
            return setup_error("vorbis: invalid residue for mapping");
        }

        submaps.push(SubMap { floor, residue });
    }

    Ok(Mapping { couplings, multiplex, submaps })
}

#[derive(Debug)]
struct Mode {
    block_flag: bool,
    mapping: u8,
}

fn read_mode(bs: &mut BitReaderRtl<'_>, num_mappings: usize) -> Result<Mode> {
    let block_flag = bs.read_bool()?;
    let window_type = bs.read_bits_leq32(16)? as u16;
    let transform_type = bs.read_bits_leq32(16)? as u16;
    let mapping = bs.read_bits_leq32(8)? as u8;

    // Only window type 0 is allowed in Vorbis 1 (section 4.2.4).
    if window_type != 0 {
        return setup_error("vorbis: invalid window type for mode");
    }

    // Only transform type 0 is allowed in Vorbis 1 (section 4.2.4).
    if transform_type != 0 {
        return setup_error("vorbis: invalid transform type for mode");
    }

    if usize::from(mapping) >= num_mappings {
        return setup_error("vorbis: invalid mode mapping");
    }

    Ok(Mode { block_flag, mapping })
}

/// The channels of a Vorbis stream, as defined in section 4.3.9 of the Vorbis I specification.
fn vorbis_channels(num_channels: u8) -> Channels {
    let positions = match num_channels {
        1 => Position::FRONT_CENTER,
        2 => Position::FRONT_LEFT | Position::FRONT_RIGHT,
        3 => Position::FRONT_LEFT | Position::FRONT_CENTER | Position::FRONT_RIGHT,
        4 => {
            Position::FRONT_LEFT
                | Position::FRONT_RIGHT
                | Position::REAR_LEFT
                | Position::REAR_RIGHT
        }
        5 => {
            Position::FRONT_LEFT
                | Position::FRONT_CENTER
                | Position::FRONT_RIGHT
                | Position::REAR_LEFT
                | Position::REAR_RIGHT
        }
        6 => {
            Position::FRONT_LEFT
                | Position::FRONT_CENTER
                | Position::FRONT_RIGHT
                | Position::REAR_LEFT
                | Position::REAR_RIGHT
                | Position::LFE1
        }
        7 => {
            Position::FRONT_LEFT
                | Position::FRONT_CENTER
                | Position::FRONT_RIGHT
                | Position::SIDE_LEFT
                | Position::SIDE_RIGHT
                | Position::REAR_CENTER
                | Position::LFE1
        }
        8 => {
            Position::FRONT_LEFT
                | Position::FRONT_CENTER
                | Position::FRONT_RIGHT
                | Position::SIDE_LEFT
                | Position::SIDE_RIGHT
                | Position::REAR_LEFT
                | Position::REAR_RIGHT
                | Position::LFE1
        }
        _ => return Channels::Discrete(u16::from(num_channels)),
    };

    Channels::Positioned(positions)
}

/// Map a Vorbis channel index to an audio buffer plane index given the channel map implied by
/// the total number of channels. Planes are ordered by position bit.
///
/// See channel map as defined in section 4.3.9 of the Vorbis I specification.
fn map_vorbis_channel(num_channels: u8, ch: usize) -> usize {
    debug_assert!(ch < usize::from(num_channels));

    let mapped_ch: u8 = match num_channels {
        1 => [0][ch],                      // FC
        2 => [0, 1][ch],                   // FL, FR
        3 => [0, 2, 1][ch],                // FL, FC, FR
        4 => [0, 1, 2, 3][ch],             // FL, FR, RL, RR
        5 => [0, 2, 1, 3, 4][ch],          // FL, FC, FR, RL, RR
        6 => [0, 2, 1, 4, 5, 3][ch],       // FL, FC, FR, RL, RR, LFE
        7 => [0, 2, 1, 5, 6, 4, 3][ch],    // FL, FC, FR, SL, SR, RC, LFE
        8 => [0, 2, 1, 6, 7, 4, 5, 3][ch], // FL, FC, FR, SL, SR, RL, RR, LFE
        _ => return ch,
    };

    usize::from(mapped_ch)
}
