// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `SeekErrorKind` is a list of reasons why a seek may fail.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekErrorKind {
    /// The stream is not seekable at all.
    Unseekable,
    /// The timestamp to seek to is out of range.
    OutOfRange,
    /// Granule positions of probed pages were not monotonically increasing.
    NonMonotonic,
    /// No valid page could be located within the searched byte range.
    PageNotFound,
}

impl SeekErrorKind {
    fn as_str(&self) -> &'static str {
        match *self {
            SeekErrorKind::Unseekable => "stream is not seekable",
            SeekErrorKind::OutOfRange => "requested seek timestamp is out-of-range for stream",
            SeekErrorKind::NonMonotonic => "granule positions are not monotonic",
            SeekErrorKind::PageNotFound => "could not locate a valid page",
        }
    }
}

/// `Error` provides an enumeration of all possible errors reported by Strophe.
#[derive(Debug)]
pub enum Error {
    /// An IO error occured while reading or seeking the source.
    IoError(io::Error),
    /// An Ogg page had a bad capture pattern, bad flags, or a CRC mismatch.
    CorruptPage(&'static str),
    /// An Ogg page declared a stream structure version other than 0.
    InvalidStreamVersion(u8),
    /// A header packet was malformed or referenced a configuration that does not exist.
    InvalidSetup(&'static str),
    /// The stream declared more channels than are supported.
    TooManyChannels(u8),
    /// The stream uses a feature that is not supported.
    FeatureNotSupported(&'static str),
    /// An audio packet could not be decoded.
    InvalidStream(&'static str),
    /// The stream could not be seeked.
    SeekFailed(SeekErrorKind),
    /// The end of the data was reached in the middle of a structure.
    UnexpectedEnd,
    /// The requested output sample rate is not an integer multiple of the stream's rate.
    UnsupportedSampleRate { stream: u32, requested: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => err.fmt(f),
            Error::CorruptPage(msg) => write!(f, "corrupt page: {}", msg),
            Error::InvalidStreamVersion(version) => {
                write!(f, "invalid stream structure version: {}", version)
            }
            Error::InvalidSetup(msg) => write!(f, "invalid setup: {}", msg),
            Error::TooManyChannels(count) => write!(f, "too many channels: {}", count),
            Error::FeatureNotSupported(feature) => write!(f, "unsupported feature: {}", feature),
            Error::InvalidStream(msg) => write!(f, "malformed stream: {}", msg),
            Error::SeekFailed(ref kind) => write!(f, "seek error: {}", kind.as_str()),
            Error::UnexpectedEnd => write!(f, "unexpected end of data"),
            Error::UnsupportedSampleRate { stream, requested } => {
                write!(
                    f,
                    "unsupported sample rate: {} Hz is not an integer multiple of {} Hz",
                    requested, stream
                )
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::UnexpectedEnd,
            _ => Error::IoError(err),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a corrupt page error.
pub fn corrupt_page_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::CorruptPage(desc))
}

/// Convenience function to create a setup error.
pub fn setup_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::InvalidSetup(desc))
}

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::InvalidStream(desc))
}

/// Convenience function to create a seek error.
pub fn seek_error<T>(kind: SeekErrorKind) -> Result<T> {
    Err(Error::SeekFailed(kind))
}

/// Convenience function to create an unsupported feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::FeatureNotSupported(feature))
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::UnexpectedEnd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_eof_maps_to_unexpected_end() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream").into();
        assert!(matches!(err, Error::UnexpectedEnd));

        let err: Error = io::Error::new(io::ErrorKind::Other, "other").into();
        assert!(matches!(err, Error::IoError(_)));
    }
}
