// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use strophe_core::errors::{setup_error, Result};
use strophe_core::packet::Packet;

/// The identification header packet type.
const VORBIS_PACKET_TYPE_IDENTIFICATION: u8 = 1;
/// The comment header packet type.
const VORBIS_PACKET_TYPE_COMMENT: u8 = 3;
/// The setup header packet type.
const VORBIS_PACKET_TYPE_SETUP: u8 = 5;

/// The common header packet signature.
const VORBIS_HEADER_PACKET_SIGNATURE: &[u8] = b"vorbis";

/// Returns `true` if the packet is a Vorbis header packet of the given type.
fn is_header_packet(buf: &[u8], packet_type: u8) -> bool {
    buf.len() > 7 && buf[0] == packet_type && &buf[1..7] == VORBIS_HEADER_PACKET_SIGNATURE
}

/// Detects if the first packet of a logical stream is a Vorbis identification header.
pub fn detect_vorbis(buf: &[u8]) -> bool {
    is_header_packet(buf, VORBIS_PACKET_TYPE_IDENTIFICATION)
}

/// The three Vorbis header packets, in stream order.
#[derive(Clone, Debug)]
pub struct VorbisHeaders {
    pub ident: Box<[u8]>,
    pub comment: Box<[u8]>,
    pub setup: Box<[u8]>,
}

/// Collects the header packets of a Vorbis logical stream.
#[derive(Default)]
pub struct HeaderCollector {
    ident: Option<Box<[u8]>>,
    comment: Option<Box<[u8]>>,
}

impl HeaderCollector {
    /// Pushes the next packet of the stream. Returns the headers once all three are collected.
    pub fn push(&mut self, packet: Packet) -> Result<Option<VorbisHeaders>> {
        match (&self.ident, &self.comment) {
            (None, _) => {
                if !is_header_packet(packet.buf(), VORBIS_PACKET_TYPE_IDENTIFICATION) {
                    return setup_error("ogg (vorbis): expected identification header");
                }
                self.ident = Some(packet.data);
            }
            (Some(_), None) => {
                if !is_header_packet(packet.buf(), VORBIS_PACKET_TYPE_COMMENT) {
                    return setup_error("ogg (vorbis): expected comment header");
                }
                self.comment = Some(packet.data);
            }
            (Some(_), Some(_)) => {
                if !is_header_packet(packet.buf(), VORBIS_PACKET_TYPE_SETUP) {
                    return setup_error("ogg (vorbis): expected setup header");
                }

                if let (Some(ident), Some(comment)) = (self.ident.take(), self.comment.take()) {
                    return Ok(Some(VorbisHeaders { ident, comment, setup: packet.data }));
                }
            }
        }
        Ok(None)
    }
}
