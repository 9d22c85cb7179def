// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use log::{debug, warn};

use strophe_core::packet::Packet;

use super::page::Page;

/// Assembles the packets of one logical stream from its pages.
#[derive(Clone, Debug)]
pub struct LogicalStream {
    serial: u32,
    partial: Vec<u8>,
    packets: VecDeque<Packet>,
    last_sequence: Option<u32>,
}

impl LogicalStream {
    pub fn new(serial: u32) -> Self {
        LogicalStream {
            serial,
            partial: Default::default(),
            packets: Default::default(),
            last_sequence: None,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Clears all queued packets, any partially assembled packet, and the page sequence history.
    pub fn reset(&mut self) {
        self.partial.clear();
        self.packets.clear();
        self.last_sequence = None;
    }

    /// Reads a page of this logical stream and queues every packet completed on it.
    pub fn read_page(&mut self, page: &Page<'_>) {
        let header = &page.header;

        debug_assert_eq!(header.serial, self.serial);

        if let Some(last) = self.last_sequence {
            if header.sequence != last.wrapping_add(1) && !self.partial.is_empty() {
                warn!(
                    "ogg: page sequence gap ({} -> {}), dropping partial packet",
                    last, header.sequence
                );
                self.partial.clear();
            }
        }

        self.last_sequence = Some(header.sequence);

        if !header.is_continuation() && !self.partial.is_empty() {
            warn!("ogg: expected a continuation page, dropping partial packet");
            self.partial.clear();
        }

        // The leading fragment of a continuation page has nothing to continue.
        let orphaned = header.is_continuation() && self.partial.is_empty();

        let num_packets = page.num_packets();
        let mut packets = page.packets();

        for (i, data) in packets.by_ref().enumerate() {
            if orphaned && i == 0 {
                debug!("ogg: dropping orphaned packet fragment of {} bytes", data.len());
                continue;
            }

            let mut buf = std::mem::take(&mut self.partial);
            buf.extend_from_slice(data);

            let is_last = i + 1 == num_packets;

            self.packets.push_back(Packet {
                granule: if is_last { header.granule() } else { None },
                is_eos: is_last && header.is_last_page(),
                data: buf.into_boxed_slice(),
            });
        }

        if let Some(data) = packets.partial_packet() {
            if orphaned && num_packets == 0 {
                debug!("ogg: dropping orphaned packet fragment of {} bytes", data.len());
            }
            else {
                self.partial.extend_from_slice(data);
            }
        }
    }

    /// Pops the next complete packet.
    pub fn next_packet(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Discards all queued packets. A partially assembled packet is kept.
    pub fn discard_packets(&mut self) {
        self.packets.clear();
    }

    /// Discards all queued packets except the most recently completed one.
    pub fn keep_last_packet(&mut self) {
        let excess = self.packets.len().saturating_sub(1);
        self.packets.drain(..excess);
    }

    pub fn num_queued(&self) -> usize {
        self.packets.len()
    }
}
