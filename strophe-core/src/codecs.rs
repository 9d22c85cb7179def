// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `codecs` module defines options common to decoders.

/// `DecoderOptions` is the set of options accepted by the decoder.
#[derive(Copy, Clone, Debug)]
pub struct DecoderOptions {
    /// Replace the output of an audio packet that fails to decode with silence of the expected
    /// duration and continue, instead of returning the error. Default: `true`.
    pub conceal_errors: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions { conceal_errors: true }
    }
}
