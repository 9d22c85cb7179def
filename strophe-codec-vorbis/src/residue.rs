// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use strophe_core::errors::{setup_error, Error, Result};
use strophe_core::io::ReadBitsRtl;

use super::codebook::Codebook;
use super::common::*;
use super::dsp::DspChannel;

#[derive(Debug, Default)]
struct ResidueVqClass {
    books: [u8; 8],
    is_used: u8,
}

impl ResidueVqClass {
    #[inline(always)]
    fn is_used(&self, pass: usize) -> bool {
        debug_assert!(pass < 8);
        self.is_used & (1 << pass) != 0
    }
}

#[derive(Debug)]
struct ResidueSetup {
    /// The residue format, 0..=2.
    residue_type: u16,
    residue_begin: u32,
    residue_end: u32,
    /// Partition size, at most 2^24.
    partition_size: u32,
    /// Number of classifications, at most 64.
    classifications: u8,
    /// Codebook for reading partition classifications.
    classbook: u8,
    /// Codebooks for each classification and pass.
    vq_classes: Vec<ResidueVqClass>,
}

/// A working area shared by all residues of a stream.
#[derive(Default)]
pub struct ResidueScratch {
    /// Partition classifications.
    part_classes: Vec<u8>,
    /// Interleaved format 2 residue vector.
    buf: Vec<f32>,
}

impl ResidueScratch {
    #[inline(always)]
    fn reserve_part_classes(&mut self, len: usize) {
        if self.part_classes.len() < len {
            self.part_classes.resize(len, 0);
        }
    }

    #[inline(always)]
    fn reserve_buf(&mut self, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0.0);
        }
    }
}

#[derive(Debug)]
pub struct Residue {
    setup: ResidueSetup,
}

impl Residue {
    pub fn try_read<B: ReadBitsRtl>(
        bs: &mut B,
        residue_type: u16,
        codebooks: &[Codebook],
    ) -> Result<Self> {
        let residue_begin = bs.read_bits_leq32(24)?;
        let residue_end = bs.read_bits_leq32(24)?;
        let partition_size = bs.read_bits_leq32(24)? + 1;
        let classifications = bs.read_bits_leq32(6)? as u8 + 1;
        let classbook = bs.read_bits_leq32(8)? as u8;

        if residue_end < residue_begin {
            return setup_error("vorbis: invalid residue begin and end");
        }

        let class_book = match codebooks.get(usize::from(classbook)) {
            Some(class_book) => class_book,
            None => return setup_error("vorbis: invalid residue classbook"),
        };

        // Every classword must be a codebook entry.
        let mut class_words = 1u64;

        for _ in 0..class_book.dimensions() {
            class_words *= u64::from(classifications);

            if class_words > u64::from(class_book.entries()) {
                return setup_error("vorbis: residue classbook has too few entries");
            }
        }

        let mut vq_classes = Vec::with_capacity(usize::from(classifications));

        for _ in 0..classifications {
            let low_bits = bs.read_bits_leq32(3)? as u8;
            let high_bits = if bs.read_bool()? { bs.read_bits_leq32(5)? as u8 } else { 0 };

            vq_classes.push(ResidueVqClass { is_used: (high_bits << 3) | low_bits, books: [0; 8] });
        }

        for vq_class in &mut vq_classes {
            for pass in 0..8 {
                if !vq_class.is_used(pass) {
                    continue;
                }

                let book = bs.read_bits_leq32(8)? as usize;

                let codebook = match codebooks.get(book) {
                    Some(codebook) => codebook,
                    None => return setup_error("vorbis: invalid codebook for residue"),
                };

                if !codebook.has_vq() {
                    return setup_error("vorbis: residue codebook has no vq table");
                }

                vq_class.books[pass] = book as u8;
            }
        }

        let setup = ResidueSetup {
            residue_type,
            residue_begin,
            residue_end,
            partition_size,
            classifications,
            classbook,
            vq_classes,
        };

        Ok(Residue { setup })
    }

    /// Decodes the residue vectors of the channels in `residue_channels` into the residue buffers
    /// of `channels`. The packet may legally end part way through the residue.
    pub fn read_residue<B: ReadBitsRtl>(
        &self,
        bs: &mut B,
        n2: usize,
        codebooks: &[Codebook],
        residue_channels: ChannelSet,
        scratch: &mut ResidueScratch,
        channels: &mut [DspChannel],
    ) -> Result<()> {
        if residue_channels.count() == 0 {
            return Ok(());
        }

        match self.read_residue_inner(bs, n2, codebooks, residue_channels, scratch, channels) {
            Ok(_) | Err(Error::UnexpectedEnd) => (),
            Err(err) => return Err(err),
        }

        if self.setup.residue_type == 2 {
            // Format 2 residue vectors were decoded interleaved, de-interleave them into the
            // channel buffers.
            let stride = residue_channels.count();

            for (i, ch) in residue_channels.iter().enumerate() {
                let interleaved = scratch.buf[..n2 * stride].chunks_exact(stride).map(|c| c[i]);

                for (o, s) in channels[ch].residue[..n2].iter_mut().zip(interleaved) {
                    *o = s;
                }
            }
        }

        Ok(())
    }

    fn read_residue_inner<B: ReadBitsRtl>(
        &self,
        bs: &mut B,
        n2: usize,
        codebooks: &[Codebook],
        residue_channels: ChannelSet,
        scratch: &mut ResidueScratch,
        channels: &mut [DspChannel],
    ) -> Result<()> {
        let is_fmt2 = self.setup.residue_type == 2;

        let class_book = &codebooks[usize::from(self.setup.classbook)];

        // The length of the residue vector of one channel (formats 0 and 1), or all channels
        // interleaved (format 2).
        let actual_size = if is_fmt2 { n2 * residue_channels.count() } else { n2 };

        let begin = min(self.setup.residue_begin as usize, actual_size);
        let end = min(self.setup.residue_end as usize, actual_size);

        let part_size = self.setup.partition_size as usize;
        let parts_per_classword = usize::from(class_book.dimensions());
        let parts_to_read = (end - begin) / part_size;

        // Room for every classword of a channel, including the unused tail of the final one.
        let class_stride = parts_to_read.div_ceil(parts_per_classword) * parts_per_classword;

        if is_fmt2 {
            scratch.reserve_part_classes(class_stride);
            scratch.reserve_buf(actual_size);
            scratch.buf[..actual_size].fill(0.0);
        }
        else {
            scratch.reserve_part_classes(class_stride * residue_channels.count());

            for ch in residue_channels.iter() {
                channels[ch].residue[..n2].fill(0.0);
            }
        }

        // If every channel is marked do-not-decode then there is nothing to read.
        if residue_channels.iter().all(|ch| channels[ch].do_not_decode) {
            return Ok(());
        }

        let classifications = u32::from(self.setup.classifications);

        for pass in 0..8 {
            for p_start in (0..parts_to_read).step_by(parts_per_classword) {
                // Classifications are only coded in the first pass.
                if pass == 0 {
                    if is_fmt2 {
                        let code = class_book.read_scalar(bs)?;

                        decode_classes(
                            code,
                            classifications,
                            &mut scratch.part_classes[p_start..p_start + parts_per_classword],
                        );
                    }
                    else {
                        for (i, ch) in residue_channels.iter().enumerate() {
                            if channels[ch].do_not_decode {
                                continue;
                            }

                            let code = class_book.read_scalar(bs)?;

                            let start = i * class_stride + p_start;

                            decode_classes(
                                code,
                                classifications,
                                &mut scratch.part_classes[start..start + parts_per_classword],
                            );
                        }
                    }
                }

                let p_end = min(parts_to_read, p_start + parts_per_classword);

                for p in p_start..p_end {
                    let offset = begin + part_size * p;

                    if is_fmt2 {
                        let vq_class = &self.setup.vq_classes[usize::from(scratch.part_classes[p])];

                        if vq_class.is_used(pass) {
                            let book = &codebooks[usize::from(vq_class.books[pass])];

                            // Format 2 is format 1 over the interleaved vector.
                            read_partition_format1(
                                bs,
                                book,
                                &mut scratch.buf[offset..offset + part_size],
                            )?;
                        }

                        continue;
                    }

                    for (i, ch) in residue_channels.iter().enumerate() {
                        let channel = &mut channels[ch];

                        if channel.do_not_decode {
                            continue;
                        }

                        let class = scratch.part_classes[i * class_stride + p];
                        let vq_class = &self.setup.vq_classes[usize::from(class)];

                        if !vq_class.is_used(pass) {
                            continue;
                        }

                        let book = &codebooks[usize::from(vq_class.books[pass])];
                        let out = &mut channel.residue[offset..offset + part_size];

                        if self.setup.residue_type == 0 {
                            read_partition_format0(bs, book, out)?;
                        }
                        else {
                            read_partition_format1(bs, book, out)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Splits a classword into one classification per partition, first partition in the most
/// significant digit.
fn decode_classes(mut val: u32, classifications: u32, out: &mut [u8]) {
    for out in out.iter_mut().rev() {
        *out = (val % classifications) as u8;
        val /= classifications;
    }
}

/// Format 0 interleaves each vector across the partition with a stride of
/// `partition size / dimensions`. Samples past `stride * dimensions` are left untouched.
fn read_partition_format0<B: ReadBitsRtl>(
    bs: &mut B,
    codebook: &Codebook,
    out: &mut [f32],
) -> Result<()> {
    let step = out.len() / usize::from(codebook.dimensions());

    for i in 0..step {
        let vq = codebook.read_vq(bs)?;

        for (o, &v) in out[i..].iter_mut().step_by(step).zip(vq) {
            *o += v;
        }
    }

    Ok(())
}

/// Format 1 places vectors consecutively. The last vector is truncated if the partition size is
/// not a multiple of the dimensions.
#[inline(always)]
fn read_partition_format1<B: ReadBitsRtl>(
    bs: &mut B,
    codebook: &Codebook,
    out: &mut [f32],
) -> Result<()> {
    for out in out.chunks_mut(usize::from(codebook.dimensions())) {
        let vq = codebook.read_vq(bs)?;

        for (o, &v) in out.iter_mut().zip(vq) {
            *o += v;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use strophe_core::errors::Error;
    use strophe_core::io::BitReaderRtl;

    use super::{decode_classes, Residue, ResidueScratch};
    use crate::codebook::tests::{write_scalar_codebook, write_vq1_codebook};
    use crate::codebook::Codebook;
    use crate::common::tests::BitWriter;
    use crate::common::ChannelSet;
    use crate::dsp::DspChannel;

    /// A one-bit classbook, and a 2-dimensional VQ book whose entry `e` decodes to
    /// `[V[e % 2], V[e / 2]]` with `V = [1.0, 2.0]`.
    fn codebooks() -> Vec<Codebook> {
        let mut bw = BitWriter::default();
        write_scalar_codebook(&mut bw, 1, &[1, 1]);
        write_vq1_codebook(&mut bw, 2, &[2, 2, 2, 2], &[0, 2]);

        let mut bs = BitReaderRtl::new(&bw.buf);
        vec![Codebook::read(&mut bs).unwrap(), Codebook::read(&mut bs).unwrap()]
    }

    /// Residue over `0..end` with partitions of 4, where class 1 uses book 1 in the first pass.
    fn residue(residue_type: u16, end: u32, codebooks: &[Codebook]) -> Residue {
        residue_with_partitions(residue_type, end, 4, codebooks)
    }

    fn residue_with_partitions(
        residue_type: u16,
        end: u32,
        partition_size: u32,
        codebooks: &[Codebook],
    ) -> Residue {
        let mut bw = BitWriter::default();
        bw.write(0, 24);
        bw.write(end, 24);
        bw.write(partition_size - 1, 24);
        bw.write(1, 6);
        bw.write(0, 8);
        // Class 0, no books.
        bw.write(0, 3);
        bw.write_bool(false);
        // Class 1, pass 0 only.
        bw.write(1, 3);
        bw.write_bool(false);
        bw.write(1, 8);

        Residue::try_read(&mut BitReaderRtl::new(&bw.buf), residue_type, codebooks).unwrap()
    }

    /// Partition 0 is class 1 with entries 2 and 0, partition 1 is class 0.
    fn packet() -> Vec<u8> {
        let mut bw = BitWriter::default();
        bw.write(1, 1);
        bw.write(1, 1);
        bw.write(0, 1);
        bw.write(0, 1);
        bw.write(0, 1);
        bw.write(0, 1);
        bw.buf
    }

    fn channel_set(count: usize) -> ChannelSet {
        let mut set = ChannelSet::default();
        for ch in 0..count {
            set.set(ch);
        }
        set
    }

    fn decode(residue_type: u16, end: u32, n2: usize, channels: &mut [DspChannel]) {
        let codebooks = codebooks();
        let residue = residue(residue_type, end, &codebooks);
        let packet = packet();

        residue
            .read_residue(
                &mut BitReaderRtl::new(&packet),
                n2,
                &codebooks,
                channel_set(channels.len()),
                &mut ResidueScratch::default(),
                channels,
            )
            .unwrap();
    }

    #[test]
    fn verify_decode_classes() {
        let mut out = [0; 3];
        decode_classes(5 * 9 + 2 * 3 + 1, 9, &mut out);
        assert_eq!(out, [0, 5, 7]);
    }

    #[test]
    fn verify_residue_format0() {
        let mut channels = vec![DspChannel::new(16)];
        decode(0, 8, 8, &mut channels);
        assert_eq!(channels[0].residue[..8], [1.0, 1.0, 2.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn verify_residue_format1() {
        let mut channels = vec![DspChannel::new(16)];
        channels[0].residue.fill(9.0);
        decode(1, 8, 8, &mut channels);
        assert_eq!(channels[0].residue[..8], [1.0, 2.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn verify_residue_format2_deinterleaves() {
        let mut channels = vec![DspChannel::new(8), DspChannel::new(8)];
        decode(2, 8, 4, &mut channels);
        assert_eq!(channels[0].residue[..4], [1.0, 1.0, 0.0, 0.0]);
        assert_eq!(channels[1].residue[..4], [2.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn verify_residue_skips_do_not_decode() {
        let mut channels = vec![DspChannel::new(16)];
        channels[0].residue.fill(9.0);
        channels[0].do_not_decode = true;
        decode(1, 8, 8, &mut channels);
        assert!(channels[0].residue[..8].iter().all(|&r| r == 0.0));
    }

    #[test]
    fn verify_residue_end_of_packet() {
        let codebooks = codebooks();
        let residue = residue(1, 8, &codebooks);

        let mut channels = vec![DspChannel::new(16)];

        // Partition 1 ends after its first vector.
        let mut bw = BitWriter::default();
        for bit in [1, 1, 0, 0, 0, 1, 0, 1] {
            bw.write(bit, 1);
        }

        residue
            .read_residue(
                &mut BitReaderRtl::new(&bw.buf),
                8,
                &codebooks,
                channel_set(1),
                &mut ResidueScratch::default(),
                &mut channels,
            )
            .unwrap();

        assert_eq!(channels[0].residue[..8], [1.0, 2.0, 1.0, 1.0, 2.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn verify_residue_partition_not_multiple_of_dimensions() {
        let codebooks = codebooks();

        // Partitions of 3 samples decoded with 2-dimensional vectors.
        for (residue_type, expected) in
            [(0, [1.0, 2.0, 0.0, 0.0, 0.0, 0.0]), (1, [1.0, 2.0, 1.0, 0.0, 0.0, 0.0])]
        {
            let residue = residue_with_partitions(residue_type, 6, 3, &codebooks);

            let mut channels = vec![DspChannel::new(16)];

            residue
                .read_residue(
                    &mut BitReaderRtl::new(&packet()),
                    8,
                    &codebooks,
                    channel_set(1),
                    &mut ResidueScratch::default(),
                    &mut channels,
                )
                .unwrap();

            assert_eq!(channels[0].residue[..6], expected, "residue type {}", residue_type);
        }
    }

    #[test]
    fn verify_residue_setup_rejects_small_classbook() {
        let codebooks = codebooks();

        // Three classifications cannot be coded by a 2 entry classbook.
        let mut bw = BitWriter::default();
        bw.write(0, 24);
        bw.write(8, 24);
        bw.write(3, 24);
        bw.write(2, 6);
        bw.write(0, 8);

        let res = Residue::try_read(&mut BitReaderRtl::new(&bw.buf), 1, &codebooks);
        assert!(matches!(res, Err(Error::InvalidSetup(_))));
    }

    #[test]
    fn verify_residue_setup_requires_vq_books() {
        let mut bw = BitWriter::default();
        write_scalar_codebook(&mut bw, 1, &[1, 1]);
        let codebooks = vec![Codebook::read(&mut BitReaderRtl::new(&bw.buf)).unwrap()];

        let mut bw = BitWriter::default();
        bw.write(0, 24);
        bw.write(8, 24);
        bw.write(3, 24);
        bw.write(0, 6);
        bw.write(0, 8);
        bw.write(1, 3);
        bw.write_bool(false);
        bw.write(0, 8);

        let res = Residue::try_read(&mut BitReaderRtl::new(&bw.buf), 1, &codebooks);
        assert!(matches!(res, Err(Error::InvalidSetup(_))));
    }
}
