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

//! Keyboard-triggered sample playback.
//!
//! This module provides:
//! - Sample decoding (in-memory for zero-latency playback)
//! - The audio graph: output context, master bus, loaded buffer and fade time
//! - Per-key voice management with stealing on retrigger
//! - The engine tying them together

mod engine;
mod error;
mod fade;
mod graph;
mod loader;
mod voice;

pub use engine::SampleEngine;
pub use error::{DecodeError, EngineError};
pub use fade::{FadeControl, DEFAULT_FADE_OUT_SECS};
pub use graph::AudioGraph;
pub use loader::{decode, SampleBuffer};
pub use voice::{SourceHandle, Voice, VoiceManager, VoiceState};
