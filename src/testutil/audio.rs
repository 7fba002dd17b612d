// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::f32::consts::PI;
use std::io::{Cursor, Seek, Write};
use std::{error::Error, fs::File, path::Path};

use hound::{SampleFormat, WavSpec, WavWriter};

/// Test tone frequency.
const TONE_HZ: f32 = 220.0;

/// Test tone amplitude, quiet enough to stay below the master bus knee.
const TONE_AMPLITUDE: f32 = 0.1;

fn write_tone<W: Write + Seek>(
    writer: W,
    duration_secs: f64,
    sample_rate: u32,
    channels: u16,
) -> Result<(), Box<dyn Error>> {
    let mut writer = WavWriter::new(
        writer,
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;

    let frames = (duration_secs * f64::from(sample_rate)).round() as usize;
    for frame in 0..frames {
        let t = frame as f32 / sample_rate as f32;
        let value = TONE_AMPLITUDE * (2.0 * PI * TONE_HZ * t).sin();
        for _ in 0..channels {
            writer.write_sample((value * f32::from(i16::MAX)) as i16)?;
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Encodes a sine tone as an in-memory 16-bit WAV payload.
pub fn wav_bytes(duration_secs: f64, sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    write_tone(&mut cursor, duration_secs, sample_rate, channels).expect("unable to encode wav");
    cursor.into_inner()
}

/// Writes a sine tone WAV file to disk.
pub fn write_wav(
    path: &Path,
    duration_secs: f64,
    sample_rate: u32,
    channels: u16,
) -> Result<(), Box<dyn Error>> {
    write_tone(File::create(path)?, duration_secs, sample_rate, channels)
}
