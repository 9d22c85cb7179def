// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte- and bit-level readers shared by the Ogg demuxer and the Vorbis decoder.
//!
//! Byte readers implement [`ReadBytes`]. [`MediaSourceStream`] buffers a [`MediaSource`] for the
//! demuxer, [`BufReader`] reads a packet held in memory, and [`MonitorStream`] feeds every byte it
//! reads to a checksum.

use std::io;

mod bit;
mod buf_reader;
mod media_source_stream;
mod monitor_stream;

pub use bit::*;
pub use buf_reader::BufReader;
pub use media_source_stream::{MediaSourceStream, MediaSourceStreamOptions};
pub use monitor_stream::{Monitor, MonitorStream};

/// A byte source that a [`MediaSourceStream`] can buffer.
///
/// Every source implements [`std::io::Seek`], but only those reporting `is_seekable` are ever
/// seeked.
pub trait MediaSource: io::Read + io::Seek + Send + Sync {
    /// Returns if the source can be seeked. May be slow, so callers should cache the answer.
    fn is_seekable(&self) -> bool;

    /// Returns the total length of the source in bytes, if known. May be slow.
    fn byte_len(&self) -> Option<u64>;
}

impl MediaSource for std::fs::File {
    /// Only regular files are seekable. Metadata follows symlinks.
    fn is_seekable(&self) -> bool {
        match self.metadata() {
            Ok(metadata) => metadata.is_file(),
            _ => false,
        }
    }

    fn byte_len(&self) -> Option<u64> {
        self.metadata().ok().map(|metadata| metadata.len())
    }
}

impl<T: AsRef<[u8]> + Send + Sync> MediaSource for io::Cursor<T> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }
}

/// Presents a plain [`std::io::Read`] such as a pipe or standard input as an unseekable
/// [`MediaSource`] of unknown length.
pub struct ReadOnlySource<R: io::Read> {
    inner: R,
}

impl<R: io::Read + Send> ReadOnlySource<R> {
    pub fn new(inner: R) -> Self {
        ReadOnlySource { inner }
    }
}

impl<R: io::Read + Send + Sync> MediaSource for ReadOnlySource<R> {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

impl<R: io::Read> io::Read for ReadOnlySource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: io::Read> io::Seek for ReadOnlySource<R> {
    fn seek(&mut self, _: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Other, "source does not support seeking"))
    }
}

/// Sequential byte reads with little-endian integer helpers. Ogg and Vorbis are little-endian
/// throughout.
///
/// Reads past the end of the source fail with [`io::ErrorKind::UnexpectedEof`].
pub trait ReadBytes {
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Reads the next four bytes in stream order.
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]>;

    /// Fills `buf` completely, or fails.
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Returns the offset of the next byte to be read.
    fn pos(&self) -> u64;

    #[inline(always)]
    fn read_u8(&mut self) -> io::Result<u8> {
        self.read_byte()
    }

    #[inline(always)]
    fn read_u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.read_quad_bytes()?))
    }

    #[inline(always)]
    fn read_i32(&mut self) -> io::Result<i32> {
        Ok(i32::from_le_bytes(self.read_quad_bytes()?))
    }

    #[inline(always)]
    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_buf_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<R: ReadBytes> ReadBytes for &mut R {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        (*self).read_byte()
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        (*self).read_quad_bytes()
    }

    #[inline(always)]
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (*self).read_buf_exact(buf)
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        (**self).pos()
    }
}

/// Repositions a stream within the bytes it still holds in memory, without touching the source.
pub trait SeekBuffered {
    /// Moves to the absolute position `pos`, clamped to the buffered range, and returns the new
    /// position.
    fn seek_buffered(&mut self, pos: u64) -> u64;
}
