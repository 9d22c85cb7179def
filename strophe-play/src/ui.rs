// Strophe
// Copyright (c) 2019-2024 The Project Strophe Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Write;
use std::path::Path;

use strophe::codec::Tag;
use strophe::StreamInfo;

const MIN_PAD: usize = 12;
const MAX_PAD: usize = 24;

pub fn print_info(path: &Path, info: &StreamInfo) {
    println!("+ {}", path.display());
    print_header("Stream");
    print_pair("Serial:", &format!("{:#x}", info.serial));
    print_pair("Sample Rate:", &info.sample_rate);
    print_pair("Channels:", &format!("{} ({})", info.channels.count(), info.channels));
    print_pair("Block Sizes:", &format!("{}, {}", info.block_sizes.0, info.block_sizes.1));

    if let Some(nominal) = info.bitrate_nominal {
        print_pair("Bitrate:", &format!("{} kbps", nominal / 1000));
    }

    if let Some(total) = info.total_frames {
        print_pair("Frames:", &total);
        print_pair("Duration:", &fmt_time(total, info.sample_rate));
    }

    print_blank();
    print_header("Comments");
    print_pair("Vendor:", &info.comments.vendor);
    print_tags(&info.comments.tags);
    println!("-");
}

fn print_tags(tags: &[Tag]) {
    let pad = optimal_tag_key_pad(tags);

    for tag in tags {
        // Well-known keys are printed by name, others as written.
        let key = match tag.std_key {
            Some(std_key) => format!("{:?}:", std_key),
            None => format!("{}:", tag.key),
        };

        println!("|     {} {}", pad_key(&key, pad), tag.value);
    }
}

fn optimal_tag_key_pad(tags: &[Tag]) -> usize {
    let longest = tags.iter().map(|tag| tag.key.chars().count() + 1).max();
    longest.unwrap_or(MIN_PAD).clamp(MIN_PAD, MAX_PAD)
}

fn pad_key(key: &str, pad: usize) -> String {
    if key.len() <= pad {
        format!("{:<pad$}", key)
    }
    else {
        // Key length too large.
        format!("{:.<pad$}", key.split_at(pad - 2).0)
    }
}

fn print_pair<T: std::fmt::Display>(key: &str, value: &T) {
    println!("|     {} {}", pad_key(key, MIN_PAD), value);
}

fn print_header(title: &str) {
    println!("| // {} //", title)
}

fn print_blank() {
    println!("|")
}

pub fn fmt_time(ts: u64, sample_rate: u32) -> String {
    let rate = u64::from(sample_rate.max(1));

    let seconds = ts / rate;
    let hours = seconds / (60 * 60);
    let mins = (seconds % (60 * 60)) / 60;
    let secs = (seconds % 60) as f64 + (ts % rate) as f64 / rate as f64;

    format!("{}:{:0>2}:{:0>6.3}", hours, mins, secs)
}

pub fn print_progress(ts: u64, total: Option<u64>, sample_rate: u32) {
    const NUM_STEPS: u64 = 60;

    let mut output = std::io::stdout();

    let bar = match total {
        Some(total) if total > 0 => {
            let done = (ts.min(total) * NUM_STEPS / total) as usize;
            format!("[{:<width$}]", "=".repeat(done), width = NUM_STEPS as usize)
        }
        _ => String::new(),
    };

    print!("\r\u{25b6}\u{fe0f}  {} {}", fmt_time(ts, sample_rate), bar);

    // Flushing may fail, but it's not critical.
    output.flush().ok();
}

#[cfg(test)]
mod tests {
    use super::{fmt_time, pad_key};

    #[test]
    fn verify_fmt_time() {
        assert_eq!(fmt_time(0, 44_100), "0:00:00.000");
        assert_eq!(fmt_time(44_100 * 61 + 22_050, 44_100), "0:01:01.500");
        assert_eq!(fmt_time(8_000 * 3_600, 8_000), "1:00:00.000");
    }

    #[test]
    fn verify_pad_key() {
        assert_eq!(pad_key("Rate:", 8), "Rate:   ");
        assert_eq!(pad_key("ReplayGainTrackGain:", 8), "Replay..");
    }
}
