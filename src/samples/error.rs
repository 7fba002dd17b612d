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

/// Errors surfaced by the sample engine to its callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The host refused to open an audio output. Playback stays disabled for
    /// the rest of the session.
    #[error("Audio output unavailable: {0}")]
    AudioUnavailable(String),

    /// The payload could not be decoded. Any previously loaded sample is kept.
    #[error("Unable to decode sample: {0}")]
    Decode(#[from] DecodeError),
}

/// Error types for decoding an encoded audio payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Audio file error: {0}")]
    AudioError(#[from] symphonia::core::errors::Error),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Sample rate not specified")]
    UnknownSampleRate,

    #[error("Payload contained no audio frames")]
    Empty,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Decode task failed: {0}")]
    Task(String),
}
