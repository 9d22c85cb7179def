// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitflags::bitflags;
use log::{debug, warn};
use smallvec::SmallVec;

use strophe_core::checksum::Crc32;
use strophe_core::errors::{corrupt_page_error, Error, Result};
use strophe_core::io::{BufReader, Monitor, MonitorStream, ReadBytes, SeekBuffered};

const OGG_PAGE_MARKER: [u8; 4] = *b"OggS";
const OGG_PAGE_HEADER_SIZE: usize = 27;

pub const OGG_PAGE_MAX_SIZE: usize = OGG_PAGE_HEADER_SIZE + 255 + 255 * 255;

/// The granule position of a page on which no packet completes.
const OGG_NO_GRANULE: u64 = u64::MAX;

bitflags! {
    /// Page header type flags.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// The first packet on the page continues a packet from the previous page.
        const CONTINUED = 0x01;
        /// Beginning of a logical stream.
        const FIRST     = 0x02;
        /// End of a logical stream.
        const LAST      = 0x04;
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct PageHeader {
    pub absgp: u64,
    pub serial: u32,
    pub sequence: u32,
    pub crc: u32,
    pub n_segments: u8,
    pub flags: PageFlags,
}

impl PageHeader {
    pub fn is_continuation(&self) -> bool {
        self.flags.contains(PageFlags::CONTINUED)
    }

    pub fn is_first_page(&self) -> bool {
        self.flags.contains(PageFlags::FIRST)
    }

    pub fn is_last_page(&self) -> bool {
        self.flags.contains(PageFlags::LAST)
    }

    /// The granule position, or `None` if no packet completes on this page.
    pub fn granule(&self) -> Option<u64> {
        if self.absgp == OGG_NO_GRANULE {
            None
        }
        else {
            Some(self.absgp)
        }
    }
}

/// Reads a `PageHeader`, excluding the capture pattern, from the the provided reader.
fn read_page_header<B: ReadBytes>(reader: &mut B) -> Result<PageHeader> {
    let version = reader.read_byte()?;

    // There is only one Ogg stream structure version, and that is version 0.
    if version != 0 {
        return Err(Error::InvalidStreamVersion(version));
    }

    let flags = reader.read_byte()?;

    // Only the first 3 least-significant bits are used for flags.
    let flags = match PageFlags::from_bits(flags) {
        Some(flags) => flags,
        None => return corrupt_page_error("ogg: invalid flag bits set"),
    };

    let absgp = reader.read_u64()?;
    let serial = reader.read_u32()?;
    let sequence = reader.read_u32()?;
    let crc = reader.read_u32()?;
    let n_segments = reader.read_byte()?;

    Ok(PageHeader { absgp, serial, sequence, crc, n_segments, flags })
}

/// Synchronizes the provided reader to the byte after the next Ogg capture pattern. Performs no
/// further verification.
fn sync_page<B: ReadBytes>(reader: &mut B) -> Result<()> {
    let mut marker = u32::from_be_bytes(reader.read_quad_bytes()?);

    while marker.to_be_bytes() != OGG_PAGE_MARKER {
        marker <<= 8;
        marker |= u32::from(reader.read_u8()?);
    }

    Ok(())
}

/// An iterator over the packets, or packet fragments, completed within a `Page`.
pub struct PagePackets<'a> {
    lens: core::slice::Iter<'a, u16>,
    data: &'a [u8],
}

impl<'a> PagePackets<'a> {
    /// If this page ends with an incomplete (partial) packet, get a slice to the data associated
    /// with the partial packet.
    pub fn partial_packet(self) -> Option<&'a [u8]> {
        let discard = self.lens.map(|&len| usize::from(len)).sum::<usize>();

        if self.data.len() > discard {
            Some(&self.data[discard..])
        }
        else {
            None
        }
    }
}

impl<'a> Iterator for PagePackets<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.lens.next()?;
        let (packet, rem) = self.data.split_at(usize::from(*len));
        self.data = rem;
        Some(packet)
    }
}

/// An Ogg page.
pub struct Page<'a> {
    /// The page header.
    pub header: PageHeader,
    packet_lens: &'a [u16],
    page_buf: &'a [u8],
}

impl Page<'_> {
    /// Returns an iterator over all packets completed on the page. If the page is a continuation,
    /// the first item is the tail of the continued packet.
    pub fn packets(&self) -> PagePackets<'_> {
        PagePackets { lens: self.packet_lens.iter(), data: self.page_buf }
    }

    /// Gets the number of packets completed on this page.
    pub fn num_packets(&self) -> usize {
        self.packet_lens.len()
    }
}

/// A reader of Ogg pages.
#[derive(Clone, Default)]
pub struct PageReader {
    header: PageHeader,
    packet_lens: SmallVec<[u16; 32]>,
    page_buf: Vec<u8>,
    page_buf_len: usize,
    page_start: u64,
    page_end: u64,
}

impl PageReader {
    pub fn new() -> Self {
        Default::default()
    }

    /// Attempts to read the next page. If the page is corrupted or invalid, returns an error and
    /// leaves the reader positioned one byte past the failed capture pattern.
    pub fn try_next_page<B>(&mut self, reader: &mut B) -> Result<()>
    where
        B: ReadBytes + SeekBuffered,
    {
        let mut header_buf = [0u8; OGG_PAGE_HEADER_SIZE];
        header_buf[..4].copy_from_slice(&OGG_PAGE_MARKER);

        sync_page(reader)?;

        // If the page is found to be corrupt the reader seeks back here to regain
        // synchronization.
        let sync_pos = reader.pos();

        reader.read_buf_exact(&mut header_buf[4..])?;

        let header = match read_page_header(&mut BufReader::new(&header_buf[4..])) {
            Ok(header) => header,
            Err(err) => {
                reader.seek_buffered(sync_pos);
                return Err(err);
            }
        };

        // The checksum is computed with the checksum field zeroed.
        header_buf[22..26].copy_from_slice(&[0u8; 4]);

        let mut crc32 = Crc32::new(0);
        crc32.process_buf_bytes(&header_buf);

        // The remainder of the page is checksummed as it is read.
        let mut crc32_reader = MonitorStream::new(&mut *reader, crc32);

        let mut packet_lens = SmallVec::<[u16; 32]>::new();
        let mut page_body_len = 0;
        let mut packet_len = 0;

        for _ in 0..header.n_segments {
            let seg_len = crc32_reader.read_byte()?;

            page_body_len += usize::from(seg_len);
            packet_len += u16::from(seg_len);

            // A segment with a length < 255 terminates a packet.
            if seg_len < 255 {
                packet_lens.push(packet_len);
                packet_len = 0;
            }
        }

        Self::read_page_body(&mut self.page_buf, &mut crc32_reader, page_body_len)?;

        let calculated_crc = crc32_reader.monitor().crc();

        if header.crc != calculated_crc {
            warn!(
                "ogg: crc mismatch on page at {}: expected {:#x}, got {:#x}",
                sync_pos - 4,
                header.crc,
                calculated_crc
            );

            self.page_buf_len = 0;
            self.packet_lens.clear();

            reader.seek_buffered(sync_pos);

            return corrupt_page_error("ogg: crc mismatch");
        }

        self.header = header;
        self.packet_lens = packet_lens;
        self.page_buf_len = page_body_len;
        self.page_start = sync_pos - OGG_PAGE_MARKER.len() as u64;
        self.page_end = reader.pos();

        Ok(())
    }

    /// Reads the next page. Corrupt or invalid pages are discarded, and the reader resynchronizes
    /// on the next capture pattern, until a valid page is read or the stream ends.
    pub fn next_page<B>(&mut self, reader: &mut B) -> Result<()>
    where
        B: ReadBytes + SeekBuffered,
    {
        loop {
            match self.try_next_page(reader) {
                Ok(_) => break,
                Err(Error::CorruptPage(msg)) => debug!("{}, resynchronizing", msg),
                Err(Error::InvalidStreamVersion(version)) => {
                    debug!("ogg: invalid stream structure version {}, resynchronizing", version)
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Gets the current page header.
    pub fn header(&self) -> PageHeader {
        self.header
    }

    /// Gets the byte position of the capture pattern of the current page.
    pub fn page_start(&self) -> u64 {
        self.page_start
    }

    /// Gets the byte position immediately after the current page.
    pub fn page_end(&self) -> u64 {
        self.page_end
    }

    /// Gets a reference to the current page.
    pub fn page(&self) -> Page<'_> {
        Page {
            header: self.header,
            packet_lens: &self.packet_lens,
            page_buf: &self.page_buf[..self.page_buf_len],
        }
    }

    fn read_page_body<B: ReadBytes>(
        page_buf: &mut Vec<u8>,
        reader: &mut B,
        len: usize,
    ) -> Result<()> {
        debug_assert!(len <= 255 * 255);

        if len > page_buf.len() {
            // New page buffer size, rounded up to the nearest 8K block.
            let new_buf_len = (len + (8 * 1024 - 1)) & !(8 * 1024 - 1);
            debug!("grow page buffer to {} bytes", new_buf_len);

            page_buf.resize(new_buf_len, Default::default());
        }

        reader.read_buf_exact(&mut page_buf[..len])?;

        Ok(())
    }
}
