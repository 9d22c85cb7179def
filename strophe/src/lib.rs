// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Strophe crates. Please see the workspace Cargo.toml
// for their justification.
#![allow(clippy::comparison_chain)]
#![allow(clippy::excessive_precision)]
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

//! # Project Strophe
//!
//! Strophe is a pure Rust Ogg Vorbis decoder.
//!
//! # Usage
//!
//! 1.  Wrap the source of the Ogg bitstream, anything implementing
//!     [`MediaSource`][core::io::MediaSource], in a
//!     [`MediaSourceStream`][core::io::MediaSourceStream].
//! 2.  Open a [`VorbisStream`] with the stream. The header packets are read and validated, and
//!     the stream information and comments become available through [`VorbisStream::info`].
//! 3.  Pull interleaved samples with [`VorbisStream::read`] at the stream's sample rate, or an
//!     integer multiple of it, until [`PacketOutcome::EndOfStream`] is returned. Alternatively,
//!     [`VorbisStream::read_planar`] yields the decoded blocks without conversion.
//! 4.  [`VorbisStream::seek`] positions the stream at any frame.
//!
//! A packet that fails to decode is replaced by silence of the same duration unless
//! [`DecoderOptions::conceal_errors`][core::codecs::DecoderOptions] is unset. Errors while opening
//! the stream are always fatal.

mod mix;
mod stream;

pub use stream::{PacketOutcome, PlanarBlock, StreamInfo, StreamState, VorbisStream};

pub mod core {
    //! The `core` module re-exports the shared Strophe primitives.

    pub use strophe_core::*;
}

pub mod codec {
    //! The `codec` module re-exports the Vorbis decoder and header types.

    pub use strophe_codec_vorbis::{
        read_comment_header, read_ident_header, Comments, IdentHeader, StandardTagKey, Tag,
        VorbisDecoder, VORBIS_MAX_CHANNELS,
    };
}

pub mod format {
    //! The `format` module re-exports the Ogg demuxer.

    pub use strophe_format_ogg::{OggReader, PageFlags, PageHeader, VorbisHeaders};
}
