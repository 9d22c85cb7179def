// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A minimal 16-bit PCM WAVE writer.

use std::io::{self, Seek, SeekFrom, Write};

const HEADER_LEN: u32 = 44;

pub struct WavWriter<W: Write + Seek> {
    inner: W,
    data_len: u32,
}

impl<W: Write + Seek> WavWriter<W> {
    /// Writes the header with placeholder chunk sizes. They are filled in by `finalize`.
    pub fn new(mut inner: W, n_channels: u16, sample_rate: u32) -> io::Result<Self> {
        let block_align = 2 * n_channels;

        inner.write_all(b"RIFF")?;
        inner.write_all(&0u32.to_le_bytes())?;
        inner.write_all(b"WAVE")?;

        inner.write_all(b"fmt ")?;
        inner.write_all(&16u32.to_le_bytes())?;
        // PCM
        inner.write_all(&1u16.to_le_bytes())?;
        inner.write_all(&n_channels.to_le_bytes())?;
        inner.write_all(&sample_rate.to_le_bytes())?;
        inner.write_all(&(sample_rate * u32::from(block_align)).to_le_bytes())?;
        inner.write_all(&block_align.to_le_bytes())?;
        inner.write_all(&16u16.to_le_bytes())?;

        inner.write_all(b"data")?;
        inner.write_all(&0u32.to_le_bytes())?;

        Ok(WavWriter { inner, data_len: 0 })
    }

    /// Writes interleaved samples.
    pub fn write_samples(&mut self, samples: &[f32]) -> io::Result<()> {
        for &sample in samples {
            let sample = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            self.inner.write_all(&sample.to_le_bytes())?;
        }

        self.data_len = self.data_len.saturating_add(2 * samples.len() as u32);

        Ok(())
    }

    /// Fills in the chunk sizes and returns the inner writer.
    pub fn finalize(mut self) -> io::Result<W> {
        self.inner.seek(SeekFrom::Start(4))?;
        self.inner.write_all(&(HEADER_LEN - 8 + self.data_len).to_le_bytes())?;

        self.inner.seek(SeekFrom::Start(40))?;
        self.inner.write_all(&self.data_len.to_le_bytes())?;

        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;

        Ok(self.inner)
    }
}
