// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// Justification: Fields on DecoderOptions and FormatOptions may change at any time, but
// strophe-play doesn't want to be updated every time those fields change, therefore always fill
// in the remaining fields with default values.
#![allow(clippy::needless_update)]

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use clap::{Arg, ArgMatches};
use log::{error, info, warn, LevelFilter};

use strophe::core::codecs::DecoderOptions;
use strophe::core::errors::Result;
use strophe::core::formats::FormatOptions;
use strophe::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use strophe::{PacketOutcome, VorbisStream};

mod ui;
mod wav;

use wav::WavWriter;

/// The number of frames pulled per read, as an audio callback would.
const CHUNK_FRAMES: usize = 1024;

enum SeekPosition {
    Time(f64),
    Timestamp(u64),
}

fn main() {
    let args = clap::Command::new("Strophe Play")
        .version("1.0")
        .author("The Project Strophe Developers")
        .about("Decode Ogg Vorbis files with Strophe")
        .arg(
            Arg::new("seek")
                .long("seek")
                .short('s')
                .value_name("TIME")
                .help("Seek to the time in seconds")
                .conflicts_with_all(&["seek-ts", "probe-only"]),
        )
        .arg(
            Arg::new("seek-ts")
                .long("seek-ts")
                .short('S')
                .value_name("FRAME")
                .help("Seek to the frame")
                .conflicts_with_all(&["seek", "probe-only"]),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("PATH")
                .help("Write the decoded audio to a 16-bit WAVE file")
                .conflicts_with("probe-only"),
        )
        .arg(
            Arg::new("rate")
                .long("rate")
                .value_name("HZ")
                .help("Output sample rate, an integer multiple of the stream's sample rate"),
        )
        .arg(
            Arg::new("channels")
                .long("channels")
                .value_name("COUNT")
                .help("Output channels, a multiple of the stream's channels or 1 to down-mix"),
        )
        .arg(
            Arg::new("probe-only")
                .long("probe-only")
                .help("Only print information about the stream"),
        )
        .arg(Arg::new("no-progress").long("no-progress").help("Do not display decoding progress"))
        .arg(Arg::new("no-gapless").long("no-gapless").help("Disable gapless decoding"))
        .arg(
            Arg::new("no-conceal")
                .long("no-conceal")
                .help("Stop at the first packet that fails to decode"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Increase the log verbosity"),
        )
        .arg(
            Arg::new("INPUT")
                .help("The input file path, or - to use standard input")
                .required(true)
                .index(1),
        )
        .get_matches();

    let level = match args.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut logger = pretty_env_logger::formatted_builder();
    logger.filter_level(level);

    // RUST_LOG filters take precedence over the verbosity flag.
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }

    logger.init();

    // For any error, return an exit code -1. Otherwise return the exit code provided.
    let code = match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err.to_string().to_lowercase());
            -1
        }
    };

    std::process::exit(code)
}

fn run(args: &ArgMatches) -> Result<i32> {
    let path = Path::new(args.value_of("INPUT").unwrap_or("-"));

    // If the path string is '-' then read from standard input.
    let source = if path.as_os_str() == "-" {
        Box::new(ReadOnlySource::new(std::io::stdin())) as Box<dyn MediaSource>
    }
    else {
        Box::new(File::open(path)?)
    };

    let mss = MediaSourceStream::new(source, Default::default());

    let fmt_opts =
        FormatOptions { enable_gapless: !args.is_present("no-gapless"), ..Default::default() };

    let dec_opts =
        DecoderOptions { conceal_errors: !args.is_present("no-conceal"), ..Default::default() };

    let mut stream = VorbisStream::try_new(mss, &fmt_opts, &dec_opts)?;

    ui::print_info(path, stream.info());

    if args.is_present("probe-only") {
        return Ok(0);
    }

    let seek = if let Some(time) = args.value_of("seek") {
        Some(SeekPosition::Time(time.parse::<f64>().unwrap_or(0.0)))
    }
    else {
        args.value_of("seek-ts").map(|ts| SeekPosition::Timestamp(ts.parse::<u64>().unwrap_or(0)))
    };

    if let Some(seek) = seek {
        let frame = match seek {
            SeekPosition::Time(t) => (t.max(0.0) * f64::from(stream.info().sample_rate)) as u64,
            SeekPosition::Timestamp(ts) => ts,
        };

        // Don't give-up on a seek error, decode from the start instead.
        match stream.seek(frame) {
            Ok(frame) => info!("seeked to frame {}", frame),
            Err(err) => warn!("seek error: {}", err),
        }
    }

    let rate = match args.value_of("rate") {
        Some(rate) => rate.parse::<u32>().unwrap_or(0),
        None => stream.info().sample_rate,
    };

    let channels = match args.value_of("channels") {
        Some(channels) => channels.parse::<usize>().unwrap_or(0),
        None => stream.info().channels.count(),
    };

    let mut wav = match args.value_of("output") {
        Some(out) => {
            let file = BufWriter::new(File::create(out)?);
            Some(WavWriter::new(file, channels as u16, rate)?)
        }
        None => None,
    };

    decode(&mut stream, wav.as_mut(), channels, rate, !args.is_present("no-progress"))?;

    if let Some(wav) = wav {
        wav.finalize()?;
    }

    stream.close();

    Ok(0)
}

fn decode<W>(
    stream: &mut VorbisStream,
    mut wav: Option<&mut WavWriter<W>>,
    channels: usize,
    rate: u32,
    progress: bool,
) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    let mut buf = vec![0.0f32; CHUNK_FRAMES * channels];

    let native_rate = stream.info().sample_rate;
    let total = stream.info().total_frames;

    let mut frames = 0u64;

    loop {
        let n = match stream.read(&mut buf, CHUNK_FRAMES, channels, rate)? {
            PacketOutcome::Data(n) => n,
            PacketOutcome::EndOfStream => break,
        };

        if let Some(wav) = wav.as_mut() {
            wav.write_samples(&buf[..n * channels])?;
        }

        frames += n as u64;

        if progress {
            ui::print_progress(stream.position(), total, native_rate);
        }
    }

    if progress {
        println!();
    }

    info!("end of stream, {} frames written at {} Hz", frames, rate);

    Ok(())
}
