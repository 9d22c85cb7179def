// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `formats` module defines options and results common to demuxing.

/// `FormatOptions` is the set of options accepted by the demuxer.
#[derive(Copy, Clone, Debug)]
pub struct FormatOptions {
    /// Enable support for gapless playback. Default: `true`.
    ///
    /// When enabled, samples past the final granule position of the stream are trimmed from the
    /// last decoded block.
    pub enable_gapless: bool,
    /// Probe the end of a seekable source for its final granule position when opening it, so the
    /// total number of frames is known up-front. Default: `true`.
    pub probe_total_frames: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions { enable_gapless: true, probe_total_frames: true }
    }
}

/// `SeekedTo` is the result of a seek.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekedTo {
    /// The frame timestamp requested.
    pub required_ts: u64,
    /// The frame timestamp of the first frame the reader will produce. Always less than or equal
    /// to `required_ts`.
    pub actual_ts: u64,
}
