// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::{Seek, SeekFrom};

use log::{debug, trace};

use strophe_core::errors::{seek_error, Error, Result, SeekErrorKind};
use strophe_core::io::MediaSourceStream;

use super::page::{PageReader, OGG_PAGE_MAX_SIZE};

const MAX_PAGE: u64 = OGG_PAGE_MAX_SIZE as u64;

/// The number of missed guesses after which interpolation gives way to bisection. A guess misses
/// if it fails to at least halve the bracket.
const INTERPOLATED_MISSES: u32 = 4;
/// The number of missed guesses after which the bracket is split exactly in half.
const BIASED_MISSES: u32 = 8;

/// A summary of a page read while searching.
#[derive(Copy, Clone, Debug)]
struct PageInfo {
    start: u64,
    end: u64,
    granule: u64,
    sequence: u32,
    is_continuation: bool,
    n_completed: usize,
}

/// The extent of a logical stream within the physical stream.
#[derive(Copy, Clone, Debug)]
pub struct StreamBounds {
    pub serial: u32,
    /// The position of the first page after the header pages.
    pub data_start: u64,
    /// The length of the physical stream in bytes.
    pub byte_len: u64,
    /// The granule position of the final page.
    pub total: u64,
}

/// Where to resume reading after a seek.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekPoint {
    /// The position to resume reading pages from.
    pub start: u64,
    /// Packets completed before the page with this sequence number are discarded, and only the
    /// last packet completed on it is kept to prime the decoder. `None` if reading resumes from
    /// the first audio page.
    pub prime_sequence: Option<u32>,
    /// The timestamp of the first sample the decoder produces after priming.
    pub actual_ts: u64,
}

/// Reads pages from `pos` until a page of the stream that starts before `limit` is found. If
/// `need_granule` is set, pages on which no packet completes are skipped.
fn read_page_info(
    reader: &mut MediaSourceStream,
    pages: &mut PageReader,
    serial: u32,
    pos: u64,
    limit: u64,
    need_granule: bool,
) -> Result<Option<PageInfo>> {
    reader.seek(SeekFrom::Start(pos))?;

    loop {
        match pages.next_page(reader) {
            Ok(_) => (),
            Err(Error::UnexpectedEnd) => return Ok(None),
            Err(err) => return Err(err),
        }

        if pages.page_start() >= limit {
            return Ok(None);
        }

        let page = pages.page();

        if page.header.serial != serial {
            continue;
        }

        let granule = match page.header.granule() {
            Some(granule) => granule,
            None if need_granule => continue,
            None => u64::MAX,
        };

        return Ok(Some(PageInfo {
            start: pages.page_start(),
            end: pages.page_end(),
            granule,
            sequence: page.header.sequence,
            is_continuation: page.header.is_continuation(),
            n_completed: page.num_packets(),
        }));
    }
}

/// Finds the last page of the stream that starts before `before`, and after `floor`.
fn find_prev_page(
    reader: &mut MediaSourceStream,
    pages: &mut PageReader,
    serial: u32,
    floor: u64,
    before: u64,
) -> Result<Option<PageInfo>> {
    let mut window = MAX_PAGE;

    loop {
        let lo = before.saturating_sub(window).max(floor);

        let mut found = None;
        let mut pos = lo;

        while let Some(info) = read_page_info(reader, pages, serial, pos, before, false)? {
            pos = info.end;
            found = Some(info);
        }

        if found.is_some() || lo == floor {
            return Ok(found);
        }

        window *= 2;
    }
}

/// Picks the position of the next guess within the bracket `[lo, hi)`.
fn next_guess(lo: u64, hi: u64, lo_ts: u64, hi_ts: u64, target: u64, misses: u32) -> u64 {
    let span = hi - lo;

    let guess = if misses < INTERPOLATED_MISSES && hi_ts > lo_ts {
        let offset = u128::from(target - lo_ts) * u128::from(span) / u128::from(hi_ts - lo_ts);
        // Back off by a page so the guess lands before the page holding the target.
        (lo + offset as u64).saturating_sub(MAX_PAGE / 2)
    }
    else if misses < BIASED_MISSES {
        (lo + span / 2).saturating_sub(MAX_PAGE / 2)
    }
    else {
        lo + span / 2
    };

    guess.clamp(lo, hi - 1)
}

/// Searches the physical stream for the page from which decoding should resume to reach
/// `target`. Pages are bracketed by bisection on their granule positions.
pub fn search(
    reader: &mut MediaSourceStream,
    pages: &mut PageReader,
    bounds: &StreamBounds,
    target: u64,
) -> Result<SeekPoint> {
    let serial = bounds.serial;

    // The left side of the bracket starts as a virtual page ending where audio data begins.
    let mut left: Option<PageInfo> = None;
    let mut left_end = bounds.data_start;
    let mut left_ts = 0;

    let mut right_start = bounds.byte_len;
    let mut right_ts = bounds.total;

    let mut misses = 0;

    while right_start > left_end {
        let span = right_start - left_end;

        if span <= MAX_PAGE {
            // Scan the remaining span linearly.
            let mut pos = left_end;

            while let Some(info) = read_page_info(reader, pages, serial, pos, right_start, true)? {
                if info.granule < left_ts || info.granule > right_ts {
                    return seek_error(SeekErrorKind::NonMonotonic);
                }
                if info.granule > target {
                    break;
                }
                pos = info.end;
                left_ts = info.granule;
                left = Some(info);
            }
            break;
        }

        let guess = next_guess(left_end, right_start, left_ts, right_ts, target, misses);

        trace!("guess at {} (bracket {}..{}, {} misses)", guess, left_end, right_start, misses);

        match read_page_info(reader, pages, serial, guess, right_start, true)? {
            Some(info) => {
                if info.granule < left_ts || info.granule > right_ts {
                    return seek_error(SeekErrorKind::NonMonotonic);
                }

                if info.granule <= target {
                    left_end = info.end;
                    left_ts = info.granule;
                    left = Some(info);
                }
                else {
                    right_start = info.start;
                    right_ts = info.granule;
                }
            }
            None => {
                // No complete page starts between the guess and the right side of the bracket.
                right_start = guess;
            }
        }

        if right_start.saturating_sub(left_end) > span / 2 {
            misses += 1;
        }
    }

    let left = match left {
        Some(left) => left,
        None => {
            debug!("seek resolved to the first audio page");
            return Ok(SeekPoint { start: bounds.data_start, prime_sequence: None, actual_ts: 0 });
        }
    };

    // If the only packet completed on the page began on an earlier page, resume from the page on
    // which it starts.
    let mut start = left.start;

    if left.is_continuation && left.n_completed == 1 {
        let mut cur = left;

        loop {
            let prev = match find_prev_page(reader, pages, serial, bounds.data_start, cur.start)? {
                Some(prev) => prev,
                None => return seek_error(SeekErrorKind::PageNotFound),
            };

            start = prev.start;

            if prev.is_continuation && prev.n_completed == 0 {
                cur = prev;
            }
            else {
                break;
            }
        }
    }

    debug!(
        "seek to {} resolved to page {} at {} (granule {}), reading from {}",
        target, left.sequence, left.start, left.granule, start
    );

    Ok(SeekPoint { start, prime_sequence: Some(left.sequence), actual_ts: left.granule })
}

/// Finds the granule position of the last page of the stream by scanning backwards from the end
/// of the physical stream.
pub fn probe_total_frames(
    reader: &mut MediaSourceStream,
    pages: &mut PageReader,
    serial: u32,
    data_start: u64,
    byte_len: u64,
) -> Result<Option<u64>> {
    let mut window = 2 * MAX_PAGE;
    let mut hi = byte_len;

    loop {
        let lo = hi.saturating_sub(window).max(data_start);

        let mut last = None;
        let mut pos = lo;

        while let Some(info) = read_page_info(reader, pages, serial, pos, byte_len, true)? {
            pos = info.end;
            last = Some(info.granule);
        }

        if last.is_some() || lo == data_start {
            return Ok(last);
        }

        hi = lo;
        window *= 2;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use strophe_core::errors::{Error, SeekErrorKind};
    use strophe_core::io::MediaSourceStream;

    use super::{next_guess, probe_total_frames, search, SeekPoint, StreamBounds, MAX_PAGE};
    use crate::page::tests::build_page;
    use crate::page::{PageFlags, PageReader};

    struct Fixture {
        data: Vec<u8>,
        /// (start, sequence, granule) of each page.
        pages: Vec<(u64, u32, u64)>,
    }

    /// Builds a stream of `n` single-packet pages, each completing 100 samples, preceded by a
    /// 64 byte header page.
    fn fixture(n: u32, granule: impl Fn(u32) -> u64) -> Fixture {
        let mut data = build_page(PageFlags::FIRST, 0, 3, 0, &[&[1u8; 64][..]], false);
        let mut pages = Vec::new();

        for i in 1..=n {
            let body = vec![i as u8; 1000 + (i as usize * 37) % 500];
            let flags = if i == n { PageFlags::LAST } else { PageFlags::empty() };
            pages.push((data.len() as u64, i, granule(i)));
            data.extend(build_page(flags, granule(i), 3, i, &[&body[..]], false));
        }

        Fixture { data, pages }
    }

    fn bounds(f: &Fixture) -> StreamBounds {
        StreamBounds {
            serial: 3,
            data_start: f.pages[0].0,
            byte_len: f.data.len() as u64,
            total: f.pages.last().unwrap().2,
        }
    }

    fn mss(data: &[u8]) -> MediaSourceStream {
        MediaSourceStream::new(Box::new(Cursor::new(data.to_vec())), Default::default())
    }

    #[test]
    fn verify_search_finds_bracketing_page() {
        let f = fixture(400, |i| u64::from(i) * 100);
        let bounds = bounds(&f);
        let mut reader = mss(&f.data);
        let mut pages = PageReader::new();

        for target in [0, 50, 100, 150, 12_345, 20_000, 39_999, 40_000] {
            let point = search(&mut reader, &mut pages, &bounds, target).unwrap();

            match f.pages.iter().rev().find(|p| p.2 <= target) {
                Some(&(start, sequence, granule)) => assert_eq!(
                    point,
                    SeekPoint { start, prime_sequence: Some(sequence), actual_ts: granule }
                ),
                None => assert_eq!(point.prime_sequence, None),
            }
        }
    }

    #[test]
    fn verify_search_variable_bitrate() {
        // Granules grow quadratically, so interpolated guesses land far from the target.
        let f = fixture(400, |i| u64::from(i) * u64::from(i));
        let bounds = bounds(&f);
        let mut reader = mss(&f.data);
        let mut pages = PageReader::new();

        for target in [0, 1, 3, 4, 2_500, 40_000, 100_000, 159_999, 160_000] {
            let point = search(&mut reader, &mut pages, &bounds, target).unwrap();

            let expected = f.pages.iter().rev().find(|p| p.2 <= target);
            assert_eq!(point.prime_sequence, expected.map(|p| p.1), "target {}", target);
            assert_eq!(point.actual_ts, expected.map_or(0, |p| p.2), "target {}", target);
        }
    }

    #[test]
    fn verify_next_guess() {
        let (lo, hi) = (1_000, 1_000 + 100 * MAX_PAGE);

        // Interpolated, backed off by half a page.
        let guess = next_guess(lo, hi, 0, 1_000, 250, 0);
        assert_eq!(guess, lo + 25 * MAX_PAGE - MAX_PAGE / 2);
        assert_eq!(next_guess(lo, hi, 0, 1_000, 250, 3), guess);

        // Bisection once interpolation has missed too often.
        let mid = lo + 50 * MAX_PAGE;
        assert_eq!(next_guess(lo, hi, 0, 1_000, 250, 4), mid - MAX_PAGE / 2);
        assert_eq!(next_guess(lo, hi, 0, 1_000, 250, 8), mid);

        // Guesses stay within the bracket.
        assert_eq!(next_guess(lo, hi, 0, 1_000, 0, 0), lo);
        assert!(next_guess(lo, hi, 0, 1_000, 1_000, 0) < hi);
    }

    #[test]
    fn verify_search_non_monotonic() {
        let f = fixture(400, |i| if i == 200 { 1 } else { u64::from(i) * 100 });
        let bounds = bounds(&f);
        let mut reader = mss(&f.data);
        let mut pages = PageReader::new();

        let mut failed = false;
        for target in (0..40_000).step_by(997) {
            match search(&mut reader, &mut pages, &bounds, target) {
                Ok(_) => (),
                Err(Error::SeekFailed(SeekErrorKind::NonMonotonic)) => failed = true,
                Err(err) => panic!("unexpected error {}", err),
            }
        }
        assert!(failed);
    }

    #[test]
    fn verify_search_backs_up_to_packet_start() {
        let mut data = build_page(PageFlags::FIRST, 0, 3, 0, &[&[1u8; 64][..]], false);
        let data_start = data.len() as u64;

        let big = vec![5u8; 255 * 3 + 10];

        data.extend(build_page(PageFlags::empty(), 100, 3, 1, &[b"p1", &big[..255]], true));
        let spanning_start = data.len() as u64;
        data.extend(build_page(PageFlags::CONTINUED, u64::MAX, 3, 2, &[&big[255..510]], true));
        let completing_start = data.len() as u64;
        data.extend(build_page(PageFlags::CONTINUED, 300, 3, 3, &[&big[510..]], false));
        data.extend(build_page(PageFlags::LAST, 400, 3, 4, &[b"end"], false));

        let bounds =
            StreamBounds { serial: 3, data_start, byte_len: data.len() as u64, total: 400 };
        let mut reader = mss(&data);
        let mut pages = PageReader::new();

        let point = search(&mut reader, &mut pages, &bounds, 350).unwrap();

        assert!(spanning_start < completing_start);
        assert_eq!(point, SeekPoint { start: data_start, prime_sequence: Some(3), actual_ts: 300 });
    }

    #[test]
    fn verify_probe_total_frames() {
        let f = fixture(300, |i| u64::from(i) * 64);
        let mut reader = mss(&f.data);
        let mut pages = PageReader::new();

        let total =
            probe_total_frames(&mut reader, &mut pages, 3, f.pages[0].0, f.data.len() as u64);
        assert_eq!(total.unwrap(), Some(300 * 64));
    }
}
