// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use strophe_core::errors::{decode_error, end_of_stream_error, setup_error, Result};
use strophe_core::io::ReadBitsRtl;

use super::common::*;

/// The width of the direct lookup table index.
const FAST_BITS: u32 = 10;

/// Marks an unoccupied direct lookup table slot.
const FAST_NONE: u32 = u32::MAX;

/// The maximum number of scalars in an unpacked VQ lookup table.
const MAX_VQ_SCALARS: u64 = 1 << 22;

/// As defined in section 9.2.2 of the Vorbis I specification.
///
/// `float32_unpack` is intended to translate the packed binary representation of a Vorbis
/// codebook float value into the representation used by the decoder for floating point numbers.
#[inline(always)]
fn float32_unpack(x: u32) -> f32 {
    let mantissa = x & 0x1fffff;
    let sign = x & 0x80000000;
    let exponent = (x & 0x7fe00000) >> 21;
    let value = (mantissa as f32) * 2.0f32.powi(exponent as i32 - 788);
    if sign == 0 {
        value
    }
    else {
        -value
    }
}

/// Returns `true` if `base ^ exp` is greater than `limit`.
fn pow_exceeds(base: u32, exp: u32, limit: u32) -> bool {
    let mut acc = 1u64;
    for _ in 0..exp {
        acc *= u64::from(base);
        if acc > u64::from(limit) {
            return true;
        }
    }
    false
}

/// As defined in section 9.2.3 of the Vorbis I specification.
///
/// The greatest integer value for which the return value to the power of `dimensions` is less
/// than or equal to `entries`.
fn lookup1_values(entries: u32, dimensions: u16) -> u32 {
    let dims = u32::from(dimensions);

    let mut value = f64::from(entries).powf(1.0 / f64::from(dims)).floor() as u32;

    // Correct for rounding in the floating-point estimate.
    while value > 0 && pow_exceeds(value, dims, entries) {
        value -= 1;
    }
    while !pow_exceeds(value + 1, dims, entries) {
        value += 1;
    }

    value
}

/// As defined in section 3.2.1 of the Vorbis I specification.
fn unpack_vq_lookup_type1(
    multiplicands: &[u16],
    min_value: f32,
    delta_value: f32,
    sequence_p: bool,
    entries: u32,
    dimensions: u16,
    lookup_values: u32,
) -> Vec<f32> {
    let dims = usize::from(dimensions);
    let mut vq_lookup = vec![0.0; entries as usize * dims];

    for (entry, vector) in vq_lookup.chunks_exact_mut(dims).enumerate() {
        let mut last = 0.0;
        let mut index_divisor = 1u64;

        for value in vector.iter_mut() {
            let offset = ((entry as u64 / index_divisor) % u64::from(lookup_values)) as usize;

            *value = f32::from(multiplicands[offset]) * delta_value + min_value + last;

            if sequence_p {
                last = *value;
            }

            index_divisor *= u64::from(lookup_values);
        }
    }

    vq_lookup
}

/// As defined in section 3.2.1 of the Vorbis I specification.
fn unpack_vq_lookup_type2(
    multiplicands: &[u16],
    min_value: f32,
    delta_value: f32,
    sequence_p: bool,
    dimensions: u16,
) -> Vec<f32> {
    let mut vq_lookup = vec![0.0; multiplicands.len()];

    for (vector, mults) in vq_lookup
        .chunks_exact_mut(usize::from(dimensions))
        .zip(multiplicands.chunks_exact(usize::from(dimensions)))
    {
        let mut last = 0.0;

        for (value, &mult) in vector.iter_mut().zip(mults) {
            *value = f32::from(mult) * delta_value + min_value + last;

            if sequence_p {
                last = *value;
            }
        }
    }

    vq_lookup
}

/// Assigns canonical codewords, in entry order, to a list of codeword lengths. A length of 0
/// marks an unused entry. Returned codewords are right-aligned and read most-significant bit
/// first.
fn synthesize_codewords(code_lens: &[u8]) -> Result<Vec<u32>> {
    let mut codewords = vec![0; code_lens.len()];

    // For each depth of the code tree, the left-aligned prefix of the next free node at that
    // depth, or 0 if there is none.
    let mut available = [0u32; 33];

    let mut used = code_lens.iter().enumerate().filter(|(_, &len)| len > 0);

    let first_len = match used.next() {
        Some((_, &len)) => usize::from(len),
        None => return Ok(codewords),
    };

    // The first codeword is all zeros. Its siblings at every depth are free.
    for (depth, slot) in available.iter_mut().enumerate().take(first_len + 1).skip(1) {
        *slot = 1 << (32 - depth);
    }

    let mut num_used = 1;

    for (entry, &len) in used {
        let len = usize::from(len);

        // Take the deepest free node not deeper than the codeword.
        let mut depth = len;

        while depth > 0 && available[depth] == 0 {
            depth -= 1;
        }

        if depth == 0 {
            return setup_error("vorbis: codebook overspecified");
        }

        let prefix = available[depth];
        available[depth] = 0;

        codewords[entry] = prefix >> (32 - len);

        // Descending to the codeword's depth frees the right sibling at every level passed.
        for (d, slot) in available.iter_mut().enumerate().take(len + 1).skip(depth + 1) {
            *slot = prefix + (1 << (32 - d));
        }

        num_used += 1;
    }

    // Single entry codebooks are technically invalid, but must be supported as a special-case
    // per Vorbis I specification, errata 20150226.
    if num_used > 1 && available[1..].iter().any(|&slot| slot != 0) {
        return setup_error("vorbis: codebook underspecified");
    }

    Ok(codewords)
}

#[derive(Copy, Clone, Debug)]
struct SortedCodeword {
    /// The codeword, left-aligned.
    key: u32,
    entry: u32,
    len: u8,
}

/// A Huffman decoding table.
///
/// Codewords of at most `FAST_BITS` bits are resolved by indexing a direct table with the next
/// `FAST_BITS` bits of the stream. All codewords are also held in a table sorted by their
/// left-aligned value, which is binary searched with the bit-reversed next 32 bits.
struct HuffmanTable {
    fast: Box<[(u32, u8)]>,
    sorted: Box<[SortedCodeword]>,
    max_len: u8,
    /// The entry and length of the codeword of a single entry codebook.
    single: Option<(u32, u8)>,
}

impl HuffmanTable {
    fn new(code_lens: &[u8]) -> Result<Self> {
        let codewords = synthesize_codewords(code_lens)?;

        let mut fast = vec![(FAST_NONE, 0u8); 1 << FAST_BITS].into_boxed_slice();
        let mut sorted = Vec::new();
        let mut max_len = 0;

        for (entry, (&codeword, &len)) in codewords.iter().zip(code_lens).enumerate() {
            if len == 0 {
                continue;
            }

            let bits = u32::from(len);
            let entry = entry as u32;

            // In stream order the codeword's first bit is read first, i.e. bit-reversed.
            let reversed = codeword.reverse_bits() >> (32 - bits);

            if bits <= FAST_BITS {
                for suffix in 0..(1 << (FAST_BITS - bits)) {
                    fast[(reversed | (suffix << bits)) as usize] = (entry, len);
                }
            }

            sorted.push(SortedCodeword { key: codeword << (32 - bits), entry, len });
            max_len = max_len.max(len);
        }

        sorted.sort_unstable_by_key(|c| c.key);

        let single = match sorted.as_slice() {
            [only] => Some((only.entry, only.len)),
            _ => None,
        };

        Ok(HuffmanTable { fast, sorted: sorted.into_boxed_slice(), max_len, single })
    }

    /// Finds the codeword that prefixes `bits`, where `bits` holds the next 32 bits of the stream
    /// in stream order (first bit in the least-significant position).
    fn search(&self, bits: u32) -> Option<(u32, u8)> {
        let key = bits.reverse_bits();

        let idx = self.sorted.partition_point(|c| c.key <= key);

        let candidate = self.sorted.get(idx.checked_sub(1)?)?;

        let mask = !(u32::MAX.checked_shr(u32::from(candidate.len)).unwrap_or(0));

        if key & mask == candidate.key {
            Some((candidate.entry, candidate.len))
        }
        else {
            None
        }
    }

    fn decode<B: ReadBitsRtl>(&self, bs: &mut B) -> Result<u32> {
        if let Some((entry, len)) = self.single {
            bs.ignore_bits(u32::from(len))?;
            return Ok(entry);
        }

        let (bits, available) = bs.peek_bits_leq32(FAST_BITS);

        let (entry, len) = self.fast[bits as usize];

        if entry != FAST_NONE && u32::from(len) <= available {
            bs.ignore_bits(u32::from(len))?;
            return Ok(entry);
        }

        let (bits, available) = bs.peek_bits_leq32(32);

        match self.search(bits) {
            Some((entry, len)) if u32::from(len) <= available => {
                bs.ignore_bits(u32::from(len))?;
                Ok(entry)
            }
            Some(_) => end_of_stream_error(),
            None if available < u32::from(self.max_len) => end_of_stream_error(),
            None => decode_error("vorbis: invalid codeword"),
        }
    }
}

pub struct Codebook {
    table: HuffmanTable,
    dimensions: u16,
    entries: u32,
    vq_vec: Option<Vec<f32>>,
}

impl Codebook {
    pub fn read<B: ReadBitsRtl>(bs: &mut B) -> Result<Self> {
        // Verify codebook synchronization word.
        let sync = bs.read_bits_leq32(24)?;

        if sync != 0x564342 {
            return setup_error("vorbis: invalid codebook sync");
        }

        // Read codebook number of dimensions and entries.
        let dimensions = bs.read_bits_leq32(16)? as u16;
        let entries = bs.read_bits_leq32(24)?;

        if dimensions == 0 {
            return setup_error("vorbis: codebook has zero dimensions");
        }

        let is_length_ordered = bs.read_bool()?;

        let mut code_lens = Vec::<u8>::with_capacity(entries as usize);

        if !is_length_ordered {
            let is_sparse = bs.read_bool()?;

            for _ in 0..entries {
                // Unused entries of a sparse codebook have a length of 0.
                let is_used = !is_sparse || bs.read_bool()?;

                let code_len = if is_used { bs.read_bits_leq32(5)? as u8 + 1 } else { 0 };

                code_lens.push(code_len);
            }
        }
        else {
            // Runs of entries with increasing code lengths.
            let mut cur_entry = 0;
            let mut cur_len = bs.read_bits_leq32(5)? + 1;

            while cur_entry < entries {
                if cur_len > 32 {
                    return setup_error("vorbis: codebook code length exceeds 32 bits");
                }

                let num = bs.read_bits_leq32(ilog(entries - cur_entry))?;

                cur_entry += num;

                if cur_entry > entries {
                    return setup_error("vorbis: codebook length runs exceed entries");
                }

                code_lens.extend(std::iter::repeat(cur_len as u8).take(num as usize));

                cur_len += 1;
            }
        }

        // Read and unpack vector quantization (VQ) lookup table.
        let lookup_type = bs.read_bits_leq32(4)?;

        let vq_vec = match lookup_type {
            0 => None,
            1 | 2 => {
                let min_value = float32_unpack(bs.read_bits_leq32(32)?);
                let delta_value = float32_unpack(bs.read_bits_leq32(32)?);
                let value_bits = bs.read_bits_leq32(4)? + 1;
                let sequence_p = bs.read_bool()?;

                if u64::from(entries) * u64::from(dimensions) > MAX_VQ_SCALARS {
                    return setup_error("vorbis: codebook vq table too large");
                }

                let lookup_values = match lookup_type {
                    1 => lookup1_values(entries, dimensions),
                    _ => entries * u32::from(dimensions),
                };

                let mut multiplicands = Vec::<u16>::with_capacity(lookup_values as usize);

                for _ in 0..lookup_values {
                    multiplicands.push(bs.read_bits_leq32(value_bits)? as u16);
                }

                let vq_lookup = match lookup_type {
                    1 => unpack_vq_lookup_type1(
                        &multiplicands,
                        min_value,
                        delta_value,
                        sequence_p,
                        entries,
                        dimensions,
                        lookup_values,
                    ),
                    _ => unpack_vq_lookup_type2(
                        &multiplicands,
                        min_value,
                        delta_value,
                        sequence_p,
                        dimensions,
                    ),
                };

                Some(vq_lookup)
            }
            _ => return setup_error("vorbis: invalid codebook lookup type"),
        };

        let table = HuffmanTable::new(&code_lens)?;

        Ok(Codebook { table, dimensions, entries, vq_vec })
    }

    /// Reads the next entry number.
    #[inline(always)]
    pub fn read_scalar<B: ReadBitsRtl>(&self, bs: &mut B) -> Result<u32> {
        self.table.decode(bs)
    }

    /// Reads the next entry and returns its VQ vector.
    #[inline(always)]
    pub fn read_vq<B: ReadBitsRtl>(&self, bs: &mut B) -> Result<&[f32]> {
        let entry = self.table.decode(bs)?;

        match &self.vq_vec {
            Some(vq) => {
                let dims = usize::from(self.dimensions);
                let start = dims * entry as usize;
                Ok(&vq[start..start + dims])
            }
            None => decode_error("vorbis: not a vq codebook"),
        }
    }

    #[inline(always)]
    pub fn dimensions(&self) -> u16 {
        self.dimensions
    }

    #[inline(always)]
    pub fn entries(&self) -> u32 {
        self.entries
    }

    pub fn has_vq(&self) -> bool {
        self.vq_vec.is_some()
    }
}
