// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use super::ReadBytes;

/// Receives a copy of each byte read through a [`MonitorStream`], in stream order.
pub trait Monitor {
    fn process_byte(&mut self, byte: u8);

    #[inline(always)]
    fn process_quad_bytes(&mut self, buf: [u8; 4]) {
        self.process_buf_bytes(&buf);
    }

    fn process_buf_bytes(&mut self, buf: &[u8]);
}

/// Wraps a byte reader so that a [`Monitor`], usually a checksum, sees everything read through it.
/// Nothing is buffered; positions are those of the inner reader.
pub struct MonitorStream<B: ReadBytes, M: Monitor> {
    inner: B,
    monitor: M,
}

impl<B: ReadBytes, M: Monitor> MonitorStream<B, M> {
    pub fn new(inner: B, monitor: M) -> MonitorStream<B, M> {
        MonitorStream { inner, monitor }
    }

    pub fn monitor(&self) -> &M {
        &self.monitor
    }
}

impl<B: ReadBytes, M: Monitor> ReadBytes for MonitorStream<B, M> {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        let byte = self.inner.read_byte()?;
        self.monitor.process_byte(byte);
        Ok(byte)
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        let bytes = self.inner.read_quad_bytes()?;
        self.monitor.process_quad_bytes(bytes);
        Ok(bytes)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_buf_exact(buf)?;
        self.monitor.process_buf_bytes(buf);
        Ok(())
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.inner.pos()
    }
}

#[cfg(test)]
mod tests {
    use super::{Monitor, MonitorStream};
    use crate::io::{BufReader, ReadBytes};

    struct Tally(Vec<u8>);

    impl Monitor for Tally {
        fn process_byte(&mut self, byte: u8) {
            self.0.push(byte);
        }

        fn process_buf_bytes(&mut self, buf: &[u8]) {
            self.0.extend_from_slice(buf);
        }
    }

    #[test]
    fn verify_monitor_sees_every_read() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14];
        let mut reader = BufReader::new(&data);

        let mut stream = MonitorStream::new(&mut reader, Tally(Vec::new()));
        assert_eq!(stream.read_byte().unwrap(), 1);
        assert_eq!(stream.read_u32().unwrap(), 0x0504_0302);
        assert_eq!(stream.read_u64().unwrap(), 0x0d0c_0b0a_0908_0706);
        assert_eq!(stream.pos(), 13);
        assert_eq!(stream.monitor().0, &data[..13]);

        // A failed read reports nothing.
        assert!(stream.read_u32().is_err());
        assert_eq!(stream.monitor().0.len(), 13);

        drop(stream);
        assert_eq!(reader.read_byte().unwrap(), 14);
    }
}
