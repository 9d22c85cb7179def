// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `packet` module defines the packet structure.

use crate::io::BufReader;

/// A `Packet` is one complete logical packet of a codec bitstream, reassembled from one or more
/// container pages.
#[derive(Clone, Debug)]
pub struct Packet {
    /// The granule position of the page on which this packet completes, if this packet is the
    /// last packet completed on that page.
    pub granule: Option<u64>,
    /// `true` if this packet is the final packet of the logical stream.
    pub is_eos: bool,
    /// The packet data buffer.
    pub data: Box<[u8]>,
}

impl Packet {
    /// Create a new `Packet` without timing information.
    pub fn new(data: impl Into<Box<[u8]>>) -> Self {
        Packet { granule: None, is_eos: false, data: data.into() }
    }

    /// Get an immutable slice to the packet buffer.
    pub fn buf(&self) -> &[u8] {
        &self.data
    }

    /// Get a `BufReader` to read the packet data buffer sequentially.
    pub fn as_buf_reader(&self) -> BufReader<'_> {
        BufReader::new(&self.data)
    }
}
