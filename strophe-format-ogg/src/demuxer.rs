// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Ordering;
use std::io::{Seek, SeekFrom};

use log::{debug, info, warn};

use strophe_core::errors::{seek_error, unsupported_error, Error, Result, SeekErrorKind};
use strophe_core::formats::{FormatOptions, SeekedTo};
use strophe_core::io::{MediaSourceStream, ReadBytes};
use strophe_core::packet::Packet;

use super::logical::LogicalStream;
use super::mappings::{detect_vorbis, HeaderCollector, VorbisHeaders};
use super::page::PageReader;
use super::seek::{self, StreamBounds};

/// The reader state saved before a seek and restored if the seek fails.
struct Checkpoint {
    pos: u64,
    stream: LogicalStream,
    prime_sequence: Option<u32>,
    ended: bool,
}

/// Ogg demultiplexer for a single Vorbis logical stream.
///
/// `OggReader` reads the header packets of the first Vorbis logical stream on open, then yields
/// its audio packets in order. Pages of other multiplexed logical streams are skipped.
pub struct OggReader {
    reader: MediaSourceStream,
    pages: PageReader,
    stream: LogicalStream,
    headers: VorbisHeaders,
    data_start: u64,
    /// The stream state after the last header page, holding any audio data that shares it.
    lead: LogicalStream,
    total_frames: Option<u64>,
    /// After a seek, the sequence number of the page whose last packet primes the decoder.
    prime_sequence: Option<u32>,
    ended: bool,
    opts: FormatOptions,
}

impl OggReader {
    pub fn try_new(mut reader: MediaSourceStream, opts: FormatOptions) -> Result<Self> {
        let mut pages = PageReader::new();

        // The beginning-of-stream pages of all logical streams precede any other page. Pages are
        // strictly validated until the headers are read.
        let serial = loop {
            pages.try_next_page(&mut reader)?;

            let page = pages.page();

            if !page.header.is_first_page() {
                return unsupported_error("ogg: no vorbis logical stream");
            }

            if let Some(first) = page.packets().next() {
                if detect_vorbis(first) {
                    break page.header.serial;
                }
            }

            debug!("ogg: skipping logical stream {:#x}", page.header.serial);
        };

        info!("ogg: selected vorbis logical stream {:#x}", serial);

        let mut stream = LogicalStream::new(serial);
        stream.read_page(&pages.page());

        let mut collector = HeaderCollector::default();

        let headers = loop {
            if let Some(packet) = stream.next_packet() {
                match collector.push(packet)? {
                    Some(headers) => break headers,
                    None => continue,
                }
            }

            pages.try_next_page(&mut reader)?;

            let page = pages.page();

            if page.header.serial == serial {
                stream.read_page(&page);
            }
        };

        let data_start = pages.page_end();

        if stream.num_queued() > 0 {
            debug!("ogg: {} audio packets share the setup header page", stream.num_queued());
        }

        let lead = stream.clone();

        let mut ogg = OggReader {
            reader,
            pages,
            stream,
            headers,
            data_start,
            lead,
            total_frames: None,
            prime_sequence: None,
            ended: false,
            opts,
        };

        if opts.probe_total_frames && ogg.reader.is_seekable() {
            ogg.total_frames = ogg.probe_total_frames()?;
        }

        Ok(ogg)
    }

    /// Gets the Vorbis header packets.
    pub fn headers(&self) -> &VorbisHeaders {
        &self.headers
    }

    /// Gets the serial number of the selected logical stream.
    pub fn serial(&self) -> u32 {
        self.stream.serial()
    }

    /// Gets the granule position of the last page, if known.
    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn options(&self) -> &FormatOptions {
        &self.opts
    }

    /// Gets the next audio packet, or `None` at the end of the logical stream.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.stream.next_packet() {
                return Ok(Some(packet));
            }

            if self.ended {
                return Ok(None);
            }

            match self.pages.next_page(&mut self.reader) {
                Ok(_) => (),
                Err(Error::UnexpectedEnd) => {
                    debug!("ogg: end of physical stream at {}", self.reader.pos());
                    self.ended = true;
                    continue;
                }
                Err(err) => return Err(err),
            }

            let page = self.pages.page();

            if page.header.serial != self.stream.serial() {
                continue;
            }

            self.stream.read_page(&page);

            if let Some(prime) = self.prime_sequence {
                match page.header.sequence.cmp(&prime) {
                    Ordering::Less => self.stream.discard_packets(),
                    Ordering::Equal => {
                        self.stream.keep_last_packet();
                        self.prime_sequence = None;
                    }
                    Ordering::Greater => {
                        warn!("ogg: missed the priming page {}", prime);
                        self.prime_sequence = None;
                    }
                }
            }

            if page.header.is_last_page() {
                self.ended = true;
            }
        }
    }

    /// Seeks so that the packets read next decode to a block containing the frame `ts`.
    pub fn seek(&mut self, ts: u64) -> Result<SeekedTo> {
        if !self.reader.is_seekable() {
            return seek_error(SeekErrorKind::Unseekable);
        }

        let checkpoint = Checkpoint {
            pos: self.reader.pos(),
            stream: self.stream.clone(),
            prime_sequence: self.prime_sequence,
            ended: self.ended,
        };

        match self.try_seek(ts) {
            Ok(seeked_to) => Ok(seeked_to),
            Err(err) => {
                warn!("ogg: seek to {} failed ({}), restoring position", ts, err);
                self.restore(checkpoint)?;
                Err(err)
            }
        }
    }

    fn try_seek(&mut self, ts: u64) -> Result<SeekedTo> {
        let total = match self.total_frames {
            Some(total) => total,
            None => {
                let total = self.probe_total_frames()?;
                self.total_frames = total;
                match total {
                    Some(total) => total,
                    None => return seek_error(SeekErrorKind::PageNotFound),
                }
            }
        };

        if ts > total {
            return seek_error(SeekErrorKind::OutOfRange);
        }

        let byte_len = match self.reader.byte_len() {
            Some(byte_len) => byte_len,
            None => return seek_error(SeekErrorKind::Unseekable),
        };

        let bounds = StreamBounds {
            serial: self.stream.serial(),
            data_start: self.data_start,
            byte_len,
            total,
        };

        let point = seek::search(&mut self.reader, &mut self.pages, &bounds, ts)?;

        self.reader.seek(SeekFrom::Start(point.start))?;

        // Reading resumes after the header pages, so restore the audio data that shares them.
        if point.prime_sequence.is_none() {
            self.stream = self.lead.clone();
        }
        else {
            self.stream.reset();
        }

        self.prime_sequence = point.prime_sequence;
        self.ended = false;

        Ok(SeekedTo { required_ts: ts, actual_ts: point.actual_ts })
    }

    fn restore(&mut self, checkpoint: Checkpoint) -> Result<()> {
        self.reader.seek(SeekFrom::Start(checkpoint.pos))?;
        self.stream = checkpoint.stream;
        self.prime_sequence = checkpoint.prime_sequence;
        self.ended = checkpoint.ended;
        Ok(())
    }

    /// Finds the final granule position, leaving the reader where it was.
    fn probe_total_frames(&mut self) -> Result<Option<u64>> {
        let byte_len = match self.reader.byte_len() {
            Some(byte_len) => byte_len,
            None => return Ok(None),
        };

        let pos = self.reader.pos();

        let total = seek::probe_total_frames(
            &mut self.reader,
            &mut self.pages,
            self.stream.serial(),
            self.data_start,
            byte_len,
        );

        self.reader.seek(SeekFrom::Start(pos))?;

        let total = total?;

        debug!("ogg: stream has {:?} frames", total);

        Ok(total)
    }

    /// Unwraps the underlying media source stream.
    pub fn into_inner(self) -> MediaSourceStream {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use strophe_core::errors::{Error, SeekErrorKind};
    use strophe_core::formats::FormatOptions;
    use strophe_core::io::{MediaSourceStream, ReadOnlySource};

    use super::OggReader;
    use crate::page::tests::build_page;
    use crate::page::PageFlags;

    fn header(packet_type: u8) -> Vec<u8> {
        let mut buf = vec![packet_type];
        buf.extend_from_slice(b"vorbis");
        buf.extend_from_slice(&[0; 16]);
        buf
    }

    /// A stream with an unrelated logical stream multiplexed in, and `n` audio pages each
    /// completing two packets.
    fn build_stream(n: u32) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(build_page(PageFlags::FIRST, 0, 1, 0, &[&header(1)[..]], false));
        data.extend(build_page(PageFlags::FIRST, 0, 2, 0, &[b"OpusHead"], false));
        let (comment, setup) = (header(3), header(5));
        data.extend(build_page(PageFlags::empty(), 0, 1, 1, &[&comment[..], &setup[..]], false));

        for i in 1..=n {
            let a = vec![2 * i as u8; 40];
            let b = vec![2 * i as u8 + 1; 40];
            let flags = if i == n { PageFlags::LAST } else { PageFlags::empty() };
            data.extend(build_page(flags, u64::from(i) * 1000, 1, i + 1, &[&a[..], &b[..]], false));
            data.extend(build_page(PageFlags::empty(), 0, 2, i, &[b"noise"], false));
        }

        data
    }

    fn open(data: Vec<u8>) -> OggReader {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
        OggReader::try_new(mss, FormatOptions::default()).unwrap()
    }

    #[test]
    fn verify_headers_and_packets() {
        let mut ogg = open(build_stream(3));

        assert_eq!(ogg.serial(), 1);
        assert_eq!(ogg.headers().ident[0], 1);
        assert_eq!(ogg.headers().comment[0], 3);
        assert_eq!(ogg.headers().setup[0], 5);
        assert_eq!(ogg.total_frames(), Some(3000));

        let mut count = 0;
        while let Some(packet) = ogg.next_packet().unwrap() {
            count += 1;
            assert_eq!(packet.buf()[0], count as u8 + 1);
            assert_eq!(packet.granule.is_some(), count % 2 == 0);
            assert_eq!(packet.is_eos, count == 6);
        }
        assert_eq!(count, 6);
    }

    #[test]
    fn verify_seek_primes_with_last_packet() {
        let mut ogg = open(build_stream(10));

        let seeked = ogg.seek(4500).unwrap();
        assert_eq!(seeked.actual_ts, 4000);

        // The last packet of page 4 primes the decoder.
        let packet = ogg.next_packet().unwrap().unwrap();
        assert_eq!(packet.buf()[0], 9);
        assert_eq!(packet.granule, Some(4000));

        let packet = ogg.next_packet().unwrap().unwrap();
        assert_eq!(packet.buf()[0], 10);
    }

    #[test]
    fn verify_seek_to_audio_on_setup_page() {
        let long = vec![0x44u8; 300];

        let mut data = Vec::new();
        data.extend(build_page(PageFlags::FIRST, 0, 1, 0, &[&header(1)[..]], false));

        // The setup page completes one audio packet and begins another.
        let (comment, setup) = (header(3), header(5));
        let fragments: [&[u8]; 4] = [&comment, &setup, &[0x42; 20], &long[..255]];
        data.extend(build_page(PageFlags::empty(), 500, 1, 1, &fragments, true));

        let fragments: [&[u8]; 2] = [&long[255..], &[0x46; 20]];
        data.extend(build_page(PageFlags::CONTINUED, 1500, 1, 2, &fragments, false));
        data.extend(build_page(PageFlags::LAST, 2500, 1, 3, &[&[0x48; 20]], false));

        let mut ogg = open(data);
        assert_eq!(ogg.total_frames(), Some(2500));

        let read_all = |ogg: &mut OggReader| {
            let mut firsts = Vec::new();
            while let Some(packet) = ogg.next_packet().unwrap() {
                firsts.push((packet.buf()[0], packet.buf().len()));
            }
            firsts
        };

        let expected = vec![(0x42, 20), (0x44, 300), (0x46, 20), (0x48, 20)];
        assert_eq!(read_all(&mut ogg), expected);

        let seeked = ogg.seek(100).unwrap();
        assert_eq!(seeked.actual_ts, 0);
        assert_eq!(read_all(&mut ogg), expected);
    }

    #[test]
    fn verify_seek_errors_restore_position() {
        let mut ogg = open(build_stream(4));

        let first = ogg.next_packet().unwrap().unwrap();
        assert_eq!(first.buf()[0], 2);

        let err = ogg.seek(10_000).unwrap_err();
        assert!(matches!(err, Error::SeekFailed(SeekErrorKind::OutOfRange)));

        let next = ogg.next_packet().unwrap().unwrap();
        assert_eq!(next.buf()[0], 3);
    }

    #[test]
    fn verify_unseekable() {
        let source = ReadOnlySource::new(Cursor::new(build_stream(2)));
        let mss = MediaSourceStream::new(Box::new(source), Default::default());
        let mut ogg = OggReader::try_new(mss, FormatOptions::default()).unwrap();

        assert_eq!(ogg.total_frames(), None);
        assert!(matches!(ogg.seek(0), Err(Error::SeekFailed(SeekErrorKind::Unseekable))));
    }

    #[test]
    fn verify_corrupt_header_page() {
        let mut data = build_stream(2);
        data[30] ^= 0x01;

        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
        let result = OggReader::try_new(mss, FormatOptions::default());
        assert!(matches!(result, Err(Error::CorruptPage(_))));
    }
}
