// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identification and comment header packets.

use hashbrown::HashMap;
use lazy_static::lazy_static;
use log::warn;

use strophe_core::errors::{setup_error, Error, Result};
use strophe_core::io::{BufReader, ReadBytes};

/// The packet type for an identification header.
pub(crate) const VORBIS_PACKET_TYPE_IDENTIFICATION: u8 = 1;
/// The packet type for a comment header.
pub(crate) const VORBIS_PACKET_TYPE_COMMENT: u8 = 3;
/// The packet type for a setup header.
pub(crate) const VORBIS_PACKET_TYPE_SETUP: u8 = 5;

/// The common header packet signature.
pub(crate) const VORBIS_HEADER_PACKET_SIGNATURE: &[u8] = b"vorbis";

/// The Vorbis version supported by this decoder.
const VORBIS_VERSION: u32 = 0;

/// The minimum block size (64) expressed as a power-of-2 exponent.
const VORBIS_BLOCKSIZE_MIN: u8 = 6;
/// The maximum block size (8192) expressed as a power-of-2 exponent.
const VORBIS_BLOCKSIZE_MAX: u8 = 13;

/// The maximum number of channels supported.
pub const VORBIS_MAX_CHANNELS: u8 = 16;

/// The identification header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentHeader {
    pub n_channels: u8,
    pub sample_rate: u32,
    /// Bitrate limits and the nominal bitrate in bits per second. A value of 0 is unset.
    pub bitrate_max: i32,
    pub bitrate_nominal: i32,
    pub bitrate_min: i32,
    /// The short block size as a power-of-2 exponent.
    pub bs0_exp: u8,
    /// The long block size as a power-of-2 exponent.
    pub bs1_exp: u8,
}

impl IdentHeader {
    /// The short block size in samples.
    pub fn blocksize0(&self) -> usize {
        1 << self.bs0_exp
    }

    /// The long block size in samples.
    pub fn blocksize1(&self) -> usize {
        1 << self.bs1_exp
    }
}

/// Maps a truncated header to a setup error.
pub(crate) fn truncated<T>(res: Result<T>) -> Result<T> {
    match res {
        Err(Error::UnexpectedEnd) => setup_error("vorbis: truncated header packet"),
        res => res,
    }
}

/// Reads and verifies the packet type and the signature common to all header packets.
pub(crate) fn read_header_preamble<B: ReadBytes>(reader: &mut B, packet_type: u8) -> Result<()> {
    if reader.read_u8()? != packet_type {
        return setup_error("vorbis: unexpected header packet type");
    }

    let mut packet_sig_buf = [0; 6];
    reader.read_buf_exact(&mut packet_sig_buf)?;

    if packet_sig_buf != VORBIS_HEADER_PACKET_SIGNATURE {
        return setup_error("vorbis: invalid header signature");
    }

    Ok(())
}

/// Reads the identification header packet.
pub fn read_ident_header(buf: &[u8]) -> Result<IdentHeader> {
    truncated(read_ident_header_inner(&mut BufReader::new(buf)))
}

fn read_ident_header_inner<B: ReadBytes>(reader: &mut B) -> Result<IdentHeader> {
    read_header_preamble(reader, VORBIS_PACKET_TYPE_IDENTIFICATION)?;

    if reader.read_u32()? != VORBIS_VERSION {
        return setup_error("vorbis: only vorbis 1 is supported");
    }

    let n_channels = reader.read_u8()?;

    if n_channels == 0 {
        return setup_error("vorbis: number of channels cannot be 0");
    }

    if n_channels > VORBIS_MAX_CHANNELS {
        return Err(Error::TooManyChannels(n_channels));
    }

    let sample_rate = reader.read_u32()?;

    if sample_rate == 0 {
        return setup_error("vorbis: sample rate cannot be 0");
    }

    let bitrate_max = reader.read_i32()?;
    let bitrate_nominal = reader.read_i32()?;
    let bitrate_min = reader.read_i32()?;

    // Block sizes are packed into a single byte, short block size in the low nibble.
    let block_sizes = reader.read_u8()?;

    let bs0_exp = block_sizes & 0x0f;
    let bs1_exp = block_sizes >> 4;

    if bs0_exp < VORBIS_BLOCKSIZE_MIN || bs0_exp > VORBIS_BLOCKSIZE_MAX {
        return setup_error("vorbis: blocksize_0 out-of-bounds");
    }

    if bs1_exp < VORBIS_BLOCKSIZE_MIN || bs1_exp > VORBIS_BLOCKSIZE_MAX {
        return setup_error("vorbis: blocksize_1 out-of-bounds");
    }

    if bs0_exp > bs1_exp {
        return setup_error("vorbis: blocksize_0 exceeds blocksize_1");
    }

    if reader.read_u8()? & 0x1 != 0x1 {
        return setup_error("vorbis: ident header framing flag unset");
    }

    Ok(IdentHeader {
        n_channels,
        sample_rate,
        bitrate_max,
        bitrate_nominal,
        bitrate_min,
        bs0_exp,
        bs1_exp,
    })
}

/// Well-known comment keys.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StandardTagKey {
    Album,
    AlbumArtist,
    Artist,
    Comment,
    Composer,
    Copyright,
    Date,
    Description,
    DiscNumber,
    Encoder,
    Genre,
    Isrc,
    License,
    Organization,
    Performer,
    ReplayGainAlbumGain,
    ReplayGainAlbumPeak,
    ReplayGainTrackGain,
    ReplayGainTrackPeak,
    TrackNumber,
    TrackTitle,
    TrackTotal,
    Version,
}

lazy_static! {
    static ref VORBIS_COMMENT_MAP: HashMap<&'static str, StandardTagKey> = {
        let mut m = HashMap::new();
        m.insert("album"                , StandardTagKey::Album);
        m.insert("album artist"         , StandardTagKey::AlbumArtist);
        m.insert("albumartist"          , StandardTagKey::AlbumArtist);
        m.insert("artist"               , StandardTagKey::Artist);
        m.insert("comment"              , StandardTagKey::Comment);
        m.insert("composer"             , StandardTagKey::Composer);
        m.insert("copyright"            , StandardTagKey::Copyright);
        m.insert("date"                 , StandardTagKey::Date);
        m.insert("description"          , StandardTagKey::Description);
        m.insert("discnumber"           , StandardTagKey::DiscNumber);
        m.insert("encoder"              , StandardTagKey::Encoder);
        m.insert("genre"                , StandardTagKey::Genre);
        m.insert("isrc"                 , StandardTagKey::Isrc);
        m.insert("license"              , StandardTagKey::License);
        m.insert("organization"         , StandardTagKey::Organization);
        m.insert("performer"            , StandardTagKey::Performer);
        m.insert("replaygain_album_gain", StandardTagKey::ReplayGainAlbumGain);
        m.insert("replaygain_album_peak", StandardTagKey::ReplayGainAlbumPeak);
        m.insert("replaygain_track_gain", StandardTagKey::ReplayGainTrackGain);
        m.insert("replaygain_track_peak", StandardTagKey::ReplayGainTrackPeak);
        m.insert("title"                , StandardTagKey::TrackTitle);
        m.insert("totaltracks"          , StandardTagKey::TrackTotal);
        m.insert("tracknumber"          , StandardTagKey::TrackNumber);
        m.insert("tracktotal"           , StandardTagKey::TrackTotal);
        m.insert("version"              , StandardTagKey::Version);
        m
    };
}

/// A single `KEY=value` comment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// The key as written in the stream.
    pub key: String,
    pub value: String,
    /// The well-known meaning of the key, if any.
    pub std_key: Option<StandardTagKey>,
}

/// The comment header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Comments {
    pub vendor: String,
    pub tags: Vec<Tag>,
}

impl Comments {
    /// Gets the value of the first tag with the given well-known key.
    pub fn get(&self, key: StandardTagKey) -> Option<&str> {
        self.tags.iter().find(|tag| tag.std_key == Some(key)).map(|tag| tag.value.as_str())
    }
}

/// Parses a comment string into a `Tag`. Keys are compared case-insensitively. Comments without
/// a `=` are ignored.
fn parse_comment(comment: &str) -> Option<Tag> {
    let (key, value) = comment.split_once('=')?;

    let std_key = VORBIS_COMMENT_MAP.get(key.to_ascii_lowercase().as_str()).copied();

    Some(Tag { key: key.to_string(), value: value.to_string(), std_key })
}

/// Reads the comment header packet.
pub fn read_comment_header(buf: &[u8]) -> Result<Comments> {
    truncated(read_comment_header_inner(&mut BufReader::new(buf)))
}

fn read_comment_header_inner(reader: &mut BufReader<'_>) -> Result<Comments> {
    read_header_preamble(reader, VORBIS_PACKET_TYPE_COMMENT)?;

    let vendor_len = reader.read_u32()? as usize;
    let vendor = String::from_utf8_lossy(reader.read_buf_bytes_ref(vendor_len)?).into_owned();

    let n_comments = reader.read_u32()?;

    let mut tags = Vec::new();

    for _ in 0..n_comments {
        let comment_len = reader.read_u32()? as usize;
        let comment = String::from_utf8_lossy(reader.read_buf_bytes_ref(comment_len)?);

        match parse_comment(&comment) {
            Some(tag) => tags.push(tag),
            None => warn!("vorbis: ignoring malformed comment"),
        }
    }

    // Some encoders omit the framing bit of the comment header.
    match reader.read_u8() {
        Ok(framing) if framing & 0x1 == 0x1 => (),
        _ => warn!("vorbis: comment header framing flag unset"),
    }

    Ok(Comments { vendor, tags })
}

#[cfg(test)]
pub(crate) mod tests {
    use strophe_core::errors::Error;

    use super::{read_comment_header, read_ident_header, StandardTagKey};

    pub fn ident_packet(channels: u8, rate: u32, block_sizes: u8) -> Vec<u8> {
        let mut buf = vec![1];
        buf.extend_from_slice(b"vorbis");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(channels);
        buf.extend_from_slice(&rate.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&64_000i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.push(block_sizes);
        buf.push(1);
        buf
    }

    #[test]
    fn verify_read_ident_header() {
        let ident = read_ident_header(&ident_packet(2, 44_100, 0xb8)).unwrap();
        assert_eq!(ident.n_channels, 2);
        assert_eq!(ident.sample_rate, 44_100);
        assert_eq!(ident.bitrate_nominal, 64_000);
        assert_eq!(ident.blocksize0(), 256);
        assert_eq!(ident.blocksize1(), 2048);
    }

    #[test]
    fn verify_ident_header_errors() {
        let res = read_ident_header(&ident_packet(17, 44_100, 0xb8));
        assert!(matches!(res, Err(Error::TooManyChannels(17))));

        // Short block larger than long block.
        let res = read_ident_header(&ident_packet(1, 8_000, 0x8b));
        assert!(matches!(res, Err(Error::InvalidSetup(_))));

        // Block size out of range.
        let res = read_ident_header(&ident_packet(1, 8_000, 0xe8));
        assert!(matches!(res, Err(Error::InvalidSetup(_))));

        let mut packet = ident_packet(1, 8_000, 0x88);
        packet[3] = b'X';
        assert!(matches!(read_ident_header(&packet), Err(Error::InvalidSetup(_))));

        let packet = ident_packet(1, 8_000, 0x88);
        let res = read_ident_header(&packet[..20]);
        assert!(matches!(res, Err(Error::InvalidSetup(_))));
    }

    #[test]
    fn verify_read_comment_header() {
        let mut buf = vec![3];
        buf.extend_from_slice(b"vorbis");

        let vendor = b"strophe test";
        buf.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        buf.extend_from_slice(vendor);

        let comments: [&[u8]; 3] = [b"TITLE=Overture", b"Custom=x=y", b"garbage"];
        buf.extend_from_slice(&(comments.len() as u32).to_le_bytes());

        for comment in comments {
            buf.extend_from_slice(&(comment.len() as u32).to_le_bytes());
            buf.extend_from_slice(comment);
        }

        buf.push(1);

        let comments = read_comment_header(&buf).unwrap();

        assert_eq!(comments.vendor, "strophe test");
        assert_eq!(comments.tags.len(), 2);
        assert_eq!(comments.get(StandardTagKey::TrackTitle), Some("Overture"));
        assert_eq!(comments.tags[1].key, "Custom");
        assert_eq!(comments.tags[1].value, "x=y");
        assert_eq!(comments.tags[1].std_key, None);
    }
}
