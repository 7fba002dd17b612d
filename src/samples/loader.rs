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

//! Decoding of encoded audio payloads into in-memory sample buffers.
//!
//! Samples are decoded entirely into memory so triggering never touches I/O.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer as DecodedSamples;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info, warn};

use super::error::DecodeError;

/// Decoded PCM audio. The data is stored in an Arc so voices can share it;
/// a buffer is never modified once built.
#[derive(Clone)]
pub struct SampleBuffer {
    /// Interleaved samples.
    data: Arc<Vec<f32>>,
    /// Number of channels in the sample.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl SampleBuffer {
    /// Creates a buffer from interleaved samples.
    pub fn new(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        Self {
            data: Arc::new(data),
            channel_count: channel_count.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    /// Returns the duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns the duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }

    /// Returns the sample for the given frame and channel, or silence past the end.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channel_count as usize;
        self.data
            .get(frame * channels + channel % channels)
            .copied()
            .unwrap_or(0.0)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Returns true if both handles share the same decoded data.
    pub fn same_data(&self, other: &SampleBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("channels", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Decodes an encoded payload (WAV, MP3, FLAC, OGG, ...) into a sample buffer.
///
/// The optional extension is only a hint; the container is probed from the bytes.
pub fn decode(bytes: Vec<u8>, extension: Option<&str>) -> Result<SampleBuffer, DecodeError> {
    let payload_len = bytes.len();
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params.sample_rate.ok_or(DecodeError::UnknownSampleRate)?;

    let mut decoder = get_codecs().make(&params, &DecoderOptions::default())?;
    let mut channel_count = params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::DecodeError(_)) => {
                // Some readers report the end of the stream this way
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if channel_count == 0 {
            channel_count = spec.channels.count() as u16;
        }
        let mut buffer = DecodedSamples::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() || channel_count == 0 {
        return Err(DecodeError::Empty);
    }

    let buffer = SampleBuffer::new(samples, channel_count, sample_rate);
    info!(
        payload_kb = payload_len / 1024,
        channels = channel_count,
        sample_rate,
        duration_ms = buffer.duration().as_millis(),
        memory_kb = buffer.memory_size() / 1024,
        "Sample decoded"
    );
    debug!(?buffer, "Decoded buffer");

    Ok(buffer)
}
