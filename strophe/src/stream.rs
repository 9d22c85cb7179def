// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ops::Range;

use log::{debug, info, warn};

use strophe_codec_vorbis::{read_comment_header, Comments, VorbisDecoder};
use strophe_core::audio::Channels;
use strophe_core::codecs::DecoderOptions;
use strophe_core::errors::{decode_error, Error, Result};
use strophe_core::formats::FormatOptions;
use strophe_core::io::MediaSourceStream;
use strophe_format_ogg::OggReader;

use crate::mix::{rate_factor, write_frame, ChannelMode};

/// The result of pulling audio from a stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketOutcome {
    /// The given number of frames were produced.
    Data(usize),
    /// The stream has no more audio.
    EndOfStream,
}

/// The life-cycle state of a `VorbisStream`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// The headers are parsed and no audio was decoded yet.
    Ready,
    /// Audio packets are being decoded.
    Decoding,
    /// A seek is in progress.
    Seeking,
    /// The stream was closed.
    Closed,
}

/// Information about an open stream.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    /// The channels, in output order.
    pub channels: Channels,
    /// The sample rate in Hz.
    pub sample_rate: u32,
    /// Upper, nominal and lower bitrate limits in bits per second, when set by the encoder.
    pub bitrate_max: Option<u32>,
    pub bitrate_nominal: Option<u32>,
    pub bitrate_min: Option<u32>,
    /// The short and long block sizes.
    pub block_sizes: (usize, usize),
    /// The total number of frames, when known.
    pub total_frames: Option<u64>,
    /// The serial number of the Ogg logical stream.
    pub serial: u32,
    /// The Vorbis comments.
    pub comments: Comments,
}

/// Frames of a decoded block in planar layout.
pub struct PlanarBlock<'a> {
    decoder: &'a VorbisDecoder,
    range: Range<usize>,
    ts: u64,
}

impl PlanarBlock<'_> {
    /// Gets the number of frames.
    pub fn frames(&self) -> usize {
        self.range.len()
    }

    /// Gets the number of planes.
    pub fn num_planes(&self) -> usize {
        self.decoder.last_decoded().num_planes()
    }

    /// Gets the samples of plane `ch`.
    pub fn chan(&self, ch: usize) -> &[f32] {
        &self.decoder.last_decoded().chan(ch)[self.range.clone()]
    }

    /// Gets the timestamp of the first frame.
    pub fn ts(&self) -> u64 {
        self.ts
    }
}

fn bitrate(value: i32) -> Option<u32> {
    if value > 0 {
        Some(value as u32)
    }
    else {
        None
    }
}

/// An Ogg Vorbis stream.
///
/// Packets are read from the Ogg bitstream and decoded on demand. The stream keeps a cursor into
/// the last decoded block so that callers may pull any number of frames per call.
pub struct VorbisStream {
    reader: OggReader,
    decoder: VorbisDecoder,
    info: StreamInfo,
    state: StreamState,
    /// The unread frames of the last decoded block.
    pending: Range<usize>,
    /// The timestamp of the first frame of the last decoded block.
    block_ts: u64,
    /// The timestamp of the first frame of the next decoded block.
    next_block_ts: u64,
    /// The number of frames still to be dropped to reach a seek target.
    discard: u64,
    /// The number of output frames already emitted for the current frame when upsampling.
    repeat: usize,
}

impl VorbisStream {
    /// Opens the stream, reading and validating the header packets.
    pub fn try_new(
        source: MediaSourceStream,
        fmt_opts: &FormatOptions,
        dec_opts: &DecoderOptions,
    ) -> Result<Self> {
        let reader = OggReader::try_new(source, *fmt_opts)?;

        let headers = reader.headers();

        let decoder = VorbisDecoder::try_new(&headers.ident, &headers.setup, dec_opts)?;

        let comments = match read_comment_header(&headers.comment) {
            Ok(comments) => comments,
            Err(err) => {
                warn!("vorbis: ignoring malformed comment header: {}", err);
                Default::default()
            }
        };

        let ident = decoder.ident();

        let info = StreamInfo {
            channels: decoder.spec().channels().clone(),
            sample_rate: ident.sample_rate,
            bitrate_max: bitrate(ident.bitrate_max),
            bitrate_nominal: bitrate(ident.bitrate_nominal),
            bitrate_min: bitrate(ident.bitrate_min),
            block_sizes: (ident.blocksize0(), ident.blocksize1()),
            total_frames: reader.total_frames(),
            serial: reader.serial(),
            comments,
        };

        info!(
            "opened vorbis stream: {} Hz, {} channel(s), {:?} frames",
            info.sample_rate,
            info.channels.count(),
            info.total_frames
        );

        Ok(VorbisStream {
            reader,
            decoder,
            info,
            state: StreamState::Ready,
            pending: 0..0,
            block_ts: 0,
            next_block_ts: 0,
            discard: 0,
            repeat: 0,
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Gets the timestamp of the next frame to be read.
    pub fn position(&self) -> u64 {
        if self.pending.is_empty() {
            self.next_block_ts + self.discard
        }
        else {
            self.block_ts + self.pending.start as u64
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.state == StreamState::Closed {
            return decode_error("stream closed");
        }
        Ok(())
    }

    /// Decodes the next block of audio, dropping any unread frames of the current block. Returns
    /// the number of frames in the new block. Blocks left empty after priming, seek alignment or
    /// end trimming are skipped.
    pub fn next_block(&mut self) -> Result<PacketOutcome> {
        self.check_open()?;

        self.state = StreamState::Decoding;
        self.pending = 0..0;
        self.repeat = 0;

        loop {
            let packet = match self.reader.next_packet()? {
                Some(packet) => packet,
                None => return Ok(PacketOutcome::EndOfStream),
            };

            let conceal = self.decoder.options().conceal_errors;

            let len = match self.decoder.decode(&packet) {
                Ok(buf) => buf.frames(),
                Err(err @ (Error::InvalidStream(_) | Error::UnexpectedEnd)) if conceal => {
                    warn!("vorbis: concealing packet at frame {}: {}", self.next_block_ts, err);
                    self.decoder.conceal(&packet).frames()
                }
                Err(err) => return Err(err),
            };

            self.block_ts = self.next_block_ts;
            self.next_block_ts += len as u64;

            let mut range = 0..len;

            // Seek alignment.
            let skip = self.discard.min(len as u64);
            range.start += skip as usize;
            self.discard -= skip;

            // Samples past the end of the final page are padding.
            if self.reader.options().enable_gapless {
                let limit = if packet.is_eos { packet.granule } else { None };

                if let Some(limit) = limit.or(self.info.total_frames) {
                    if self.next_block_ts > limit {
                        let keep = limit.saturating_sub(self.block_ts).min(len as u64) as usize;
                        debug!("trimming {} frames of end padding", len - keep);
                        range.end = keep.max(range.start);
                        self.next_block_ts = self.next_block_ts.min(limit.max(self.block_ts));
                    }
                }
            }

            if !range.is_empty() {
                self.pending = range;
                return Ok(PacketOutcome::Data(self.pending.len()));
            }
        }
    }

    /// Reads up to `frames` interleaved frames of `channels` channels at `rate` Hz into `out`.
    ///
    /// `rate` must be an integer multiple of the stream's sample rate, each frame is repeated to
    /// reach it. `channels` must be a multiple of the stream's channel count, in which case the
    /// channels are repeated, or 1 to down-mix. Returns the number of frames written, or
    /// `EndOfStream` if none could be.
    pub fn read(
        &mut self,
        out: &mut [f32],
        frames: usize,
        channels: usize,
        rate: u32,
    ) -> Result<PacketOutcome> {
        self.check_open()?;

        let factor = rate_factor(self.info.sample_rate, rate)?;
        let mode = ChannelMode::new(self.info.channels.count(), channels)?;

        let frames = frames.min(out.len() / channels);

        let mut written = 0;

        for dst in out.chunks_exact_mut(channels).take(frames) {
            if self.pending.is_empty() && self.next_block()? == PacketOutcome::EndOfStream {
                break;
            }

            write_frame(self.decoder.last_decoded(), self.pending.start, mode, dst);
            written += 1;

            self.repeat += 1;

            if self.repeat == factor {
                self.repeat = 0;
                self.pending.start += 1;
            }
        }

        if written == 0 && frames > 0 {
            return Ok(PacketOutcome::EndOfStream);
        }

        Ok(PacketOutcome::Data(written))
    }

    /// Reads the unread frames of the current block, or of the next block if the current one is
    /// exhausted, without conversion. Returns `None` at the end of the stream.
    pub fn read_planar(&mut self) -> Result<Option<PlanarBlock<'_>>> {
        self.check_open()?;

        if self.pending.is_empty() && self.next_block()? == PacketOutcome::EndOfStream {
            return Ok(None);
        }

        let range = std::mem::replace(&mut self.pending, 0..0);
        self.repeat = 0;

        let ts = self.block_ts + range.start as u64;

        Ok(Some(PlanarBlock { decoder: &self.decoder, range, ts }))
    }

    /// Seeks to `frame`. The next frame read is `frame`. On failure the stream continues from
    /// where it was.
    pub fn seek(&mut self, frame: u64) -> Result<u64> {
        self.check_open()?;

        let prev_state = self.state;
        self.state = StreamState::Seeking;

        let seeked_to = match self.reader.seek(frame) {
            Ok(seeked_to) => seeked_to,
            Err(err) => {
                self.state = prev_state;
                return Err(err);
            }
        };

        self.info.total_frames = self.reader.total_frames();

        debug!(
            "seeked to frame {}, discarding {} frames",
            seeked_to.actual_ts,
            frame - seeked_to.actual_ts
        );

        self.decoder.reset();

        self.pending = 0..0;
        self.repeat = 0;
        self.block_ts = seeked_to.actual_ts;
        self.next_block_ts = seeked_to.actual_ts;
        self.discard = frame - seeked_to.actual_ts;

        self.state = StreamState::Decoding;

        Ok(frame)
    }

    /// Closes the stream. Any further call fails.
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
        self.pending = 0..0;
    }
}
