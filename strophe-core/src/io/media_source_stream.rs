// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io;
use std::io::{IoSliceMut, Read, Seek};

use log::debug;

use super::{MediaSource, ReadBytes, SeekBuffered};

const END_OF_STREAM_ERROR_STR: &str = "end of stream";

/// `MediaSourceStreamOptions` specifies the buffering behaviour of a `MediaSourceStream`.
#[derive(Copy, Clone, Debug)]
pub struct MediaSourceStreamOptions {
    /// The ring buffer size. Must be a power of 2 and larger than 32kB.
    ///
    /// The default leaves room to rewind over one maximum-sized Ogg page after a read-ahead block.
    pub buffer_len: usize,
}

impl Default for MediaSourceStreamOptions {
    fn default() -> Self {
        MediaSourceStreamOptions { buffer_len: 128 * 1024 }
    }
}

/// A `MediaSourceStream` is the common reader type of Strophe. It wraps any [`MediaSource`] behind
/// a ring buffer.
///
/// The read-ahead length starts at 1kB and doubles on each sequential fetch up to 32kB, so that a
/// burst of seeks does not over-read. Bytes already read remain in the ring and may be revisited
/// with [`SeekBuffered`] without touching the inner source. A regular `seek()` outside the
/// buffered range invalidates the ring.
pub struct MediaSourceStream {
    inner: Box<dyn MediaSource>,
    ring: Box<[u8]>,
    ring_mask: usize,
    read_pos: usize,
    write_pos: usize,
    read_block_len: usize,
    /// Absolute position of the inner source.
    abs_pos: u64,
    /// Bytes read from the inner source since instantiation or the last ring invalidation.
    rel_pos: u64,
    is_seekable: bool,
    byte_len: Option<u64>,
}

impl MediaSourceStream {
    const MIN_BLOCK_LEN: usize = 1 * 1024;
    const MAX_BLOCK_LEN: usize = 32 * 1024;

    pub fn new(source: Box<dyn MediaSource>, options: MediaSourceStreamOptions) -> Self {
        assert!(options.buffer_len.count_ones() == 1, "buffer length must be a power of 2");
        assert!(options.buffer_len > Self::MAX_BLOCK_LEN, "buffer length must exceed 32kB");

        // Cache these since they may be expensive to query.
        let is_seekable = source.is_seekable();
        let byte_len = source.byte_len();

        MediaSourceStream {
            inner: source,
            ring: vec![0; options.buffer_len].into_boxed_slice(),
            ring_mask: options.buffer_len - 1,
            read_pos: 0,
            write_pos: 0,
            read_block_len: Self::MIN_BLOCK_LEN,
            abs_pos: 0,
            rel_pos: 0,
            is_seekable,
            byte_len,
        }
    }

    /// Returns if the underlying source is seekable.
    pub fn is_seekable(&self) -> bool {
        self.is_seekable
    }

    /// Returns the length of the underlying source in bytes, if known.
    pub fn byte_len(&self) -> Option<u64> {
        self.byte_len
    }

    #[inline(always)]
    fn is_buffer_exhausted(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// If the buffer has been exhausted, fetch a new block of data to replenish the buffer.
    fn fetch(&mut self) -> io::Result<()> {
        if self.is_buffer_exhausted() {
            let (vec1, vec0) = self.ring.split_at_mut(self.write_pos);

            let actual_read_len = if vec0.len() >= self.read_block_len {
                self.inner.read(&mut vec0[..self.read_block_len])?
            }
            else {
                // The block wraps around the end of the ring, read into both regions.
                let rem = self.read_block_len - vec0.len();

                let ring_vectors = &mut [IoSliceMut::new(vec0), IoSliceMut::new(&mut vec1[..rem])];

                self.inner.read_vectored(ring_vectors)?
            };

            self.write_pos = (self.write_pos + actual_read_len) & self.ring_mask;

            self.abs_pos += actual_read_len as u64;
            self.rel_pos += actual_read_len as u64;

            self.read_block_len = cmp::min(self.read_block_len << 1, Self::MAX_BLOCK_LEN);
        }

        Ok(())
    }

    /// Like `fetch`, but returns an end-of-stream error if no more data could be fetched.
    fn fetch_or_eof(&mut self) -> io::Result<()> {
        self.fetch()?;

        if self.is_buffer_exhausted() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, END_OF_STREAM_ERROR_STR));
        }

        Ok(())
    }

    #[inline(always)]
    fn consume(&mut self, len: usize) {
        self.read_pos = (self.read_pos + len) & self.ring_mask;
    }

    /// Gets the largest contiguous slice of buffered data starting from the read position.
    #[inline(always)]
    fn contiguous_buf(&self) -> &[u8] {
        if self.write_pos >= self.read_pos {
            &self.ring[self.read_pos..self.write_pos]
        }
        else {
            &self.ring[self.read_pos..]
        }
    }

    /// Bytes fetched from the source but not yet read.
    fn unread_buffer_len(&self) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        }
        else {
            self.write_pos + (self.ring.len() - self.read_pos)
        }
    }

    /// Bytes already read that are still held in the ring.
    fn read_buffer_len(&self) -> usize {
        let unread_len = self.unread_buffer_len();

        // One slot is sacrificed so that a full rewind does not alias an empty ring.
        cmp::min(self.ring.len() - 1, self.rel_pos as usize) - unread_len
    }

    /// Invalidates the ring and sets the absolute stream position to `pos`.
    fn reset(&mut self, pos: u64) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.read_block_len = Self::MIN_BLOCK_LEN;
        self.abs_pos = pos;
        self.rel_pos = 0;
    }
}

impl Read for MediaSourceStream {
    fn read(&mut self, mut buf: &mut [u8]) -> io::Result<usize> {
        let read_len = buf.len();

        while !buf.is_empty() {
            self.fetch()?;

            match self.contiguous_buf().read(buf) {
                Ok(0) => break,
                Ok(count) => {
                    buf = &mut buf[count..];
                    self.consume(count);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(read_len - buf.len())
    }
}

impl Seek for MediaSourceStream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let cur = self.pos();

        // Resolve the target so that seeks landing inside the ring do not touch the source.
        let target = match pos {
            io::SeekFrom::Start(pos) => Some(pos),
            io::SeekFrom::Current(delta) => cur.checked_add_signed(delta),
            io::SeekFrom::End(_) => None,
        };

        if let Some(target) = target {
            let lower = cur - self.read_buffer_len() as u64;
            let upper = cur + self.unread_buffer_len() as u64;

            if target >= lower && target <= upper {
                return Ok(self.seek_buffered(target));
            }
        }

        // The inner source is ahead of the stream position by the unread portion of the ring.
        let pos = match pos {
            io::SeekFrom::Current(delta) => {
                let delta = delta - self.unread_buffer_len() as i64;
                self.inner.seek(io::SeekFrom::Current(delta))
            }
            _ => self.inner.seek(pos),
        }?;

        debug!("seek to {} invalidates the read-ahead buffer", pos);

        self.reset(pos);

        Ok(pos)
    }
}

impl ReadBytes for MediaSourceStream {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        if self.is_buffer_exhausted() {
            self.fetch_or_eof()?;
        }

        let value = self.ring[self.read_pos];
        self.consume(1);

        Ok(value)
    }

    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        let mut bytes = [0; 4];

        let buf = self.contiguous_buf();

        if buf.len() >= 4 {
            bytes.copy_from_slice(&buf[..4]);
            self.consume(4);
        }
        else {
            for byte in bytes.iter_mut() {
                *byte = self.read_byte()?;
            }
        }

        Ok(bytes)
    }

    fn read_buf_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => break,
                Ok(count) => {
                    buf = &mut buf[count..];
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        if !buf.is_empty() {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, END_OF_STREAM_ERROR_STR))
        }
        else {
            Ok(())
        }
    }

    fn pos(&self) -> u64 {
        self.abs_pos - self.unread_buffer_len() as u64
    }
}

impl SeekBuffered for MediaSourceStream {
    fn seek_buffered(&mut self, pos: u64) -> u64 {
        let old_pos = self.pos();

        if pos < old_pos {
            let back = cmp::min(old_pos - pos, self.read_buffer_len() as u64) as usize;
            self.read_pos = (self.read_pos + self.ring.len() - back) & self.ring_mask;
        }
        else if pos > old_pos {
            let ahead = cmp::min(pos - old_pos, self.unread_buffer_len() as u64) as usize;
            self.consume(ahead);
        }

        self.pos()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use super::{MediaSourceStream, ReadBytes, SeekBuffered};

    fn generate_random_bytes(len: usize) -> Box<[u8]> {
        let mut lcg: u32 = 0xec57c4bf;

        let mut bytes = vec![0; len];

        for quad in bytes.chunks_mut(4) {
            lcg = lcg.wrapping_mul(1664525).wrapping_add(1013904223);
            for (src, dest) in quad.iter_mut().zip(&lcg.to_ne_bytes()) {
                *src = *dest;
            }
        }

        bytes.into_boxed_slice()
    }

    #[test]
    fn verify_mss_read_wraps_ring() {
        let data = generate_random_bytes(3 * 128 * 1024 + 17);

        let source = Box::new(Cursor::new(data.clone()));
        let mut mss = MediaSourceStream::new(source, Default::default());

        for byte in &data[..160 * 1024] {
            assert_eq!(*byte, mss.read_byte().unwrap());
        }

        let mut skipped = [0u8; 33];
        mss.read_buf_exact(&mut skipped).unwrap();
        assert_eq!(&skipped[..], &data[160 * 1024..160 * 1024 + 33]);

        let mut pos = 160 * 1024 + 33;
        for bytes in data[pos..pos + 4 * 20 * 1024].chunks_exact(4) {
            assert_eq!(bytes, &mss.read_quad_bytes().unwrap());
        }
        pos += 4 * 20 * 1024;

        let mut buf = vec![0u8; data.len() - pos];
        mss.read_buf_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[pos..]);

        assert!(mss.read_byte().is_err());
    }

    #[test]
    fn verify_mss_seek_buffered() {
        let data = generate_random_bytes(300 * 1024);

        let source = Box::new(Cursor::new(data.clone()));
        let mut mss = MediaSourceStream::new(source, Default::default());

        let mut head = vec![0u8; 70 * 1024];
        mss.read_buf_exact(&mut head).unwrap();
        assert_eq!(mss.pos(), 70 * 1024);

        // Rewind within the ring.
        assert_eq!(mss.seek_buffered(1000), 1000);
        assert_eq!(mss.read_byte().unwrap(), data[1000]);

        // Forward again, past what was read before.
        assert_eq!(mss.seek_buffered(70 * 1024 + 10), 70 * 1024 + 10);
        assert_eq!(mss.read_byte().unwrap(), data[70 * 1024 + 10]);

        let mut rest = vec![0u8; 130 * 1024];
        mss.read_buf_exact(&mut rest).unwrap();
        let pos = mss.pos();

        // Rewinding past the start of the ring is clamped.
        let rewound = mss.seek_buffered(0);
        assert!(rewound > 0);
        assert!(pos - rewound < 128 * 1024);
        assert_eq!(mss.read_byte().unwrap(), data[rewound as usize]);
    }

    #[test]
    fn verify_mss_seek() {
        let data = generate_random_bytes(300 * 1024);

        let source = Box::new(Cursor::new(data.clone()));
        let mut mss = MediaSourceStream::new(source, Default::default());

        assert_eq!(mss.seek(SeekFrom::Start(250 * 1024)).unwrap(), 250 * 1024);
        assert_eq!(mss.read_byte().unwrap(), data[250 * 1024]);

        assert_eq!(mss.seek(SeekFrom::Start(7)).unwrap(), 7);
        assert_eq!(mss.read_byte().unwrap(), data[7]);

        assert_eq!(mss.seek(SeekFrom::Current(99)).unwrap(), 107);
        assert_eq!(mss.read_byte().unwrap(), data[107]);

        assert_eq!(mss.seek(SeekFrom::End(-1)).unwrap(), data.len() as u64 - 1);
        assert_eq!(mss.read_byte().unwrap(), data[data.len() - 1]);
        assert!(mss.read_byte().is_err());
    }
}
