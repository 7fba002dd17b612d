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

//! Sample engine that ties the audio graph to the per-key voice table.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::error::{DecodeError, EngineError};
use super::graph::AudioGraph;
use super::loader::SampleBuffer;
use super::voice::{SourceHandle, Voice, VoiceManager};
use crate::audio::{self, Device};
use crate::keymap::{rate_for, PhysicalKey};

/// The playback engine. One instance owns all graph and voice state; every
/// operation except loading is synchronous.
pub struct SampleEngine {
    graph: AudioGraph,
    voices: VoiceManager,
}

impl SampleEngine {
    /// Creates an engine that will open the given device on first load.
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            graph: AudioGraph::new(device),
            voices: VoiceManager::new(),
        }
    }

    /// Starts a voice for the key at the given pitch, stealing any voice the
    /// key already has. Does nothing until a sample is loaded.
    pub fn trigger(&mut self, key: PhysicalKey, pitch: i32) {
        let (Some(context), Some(buffer)) = (self.graph.context(), self.graph.buffer()) else {
            debug!(key = %key, "No sample loaded, ignoring trigger");
            return;
        };

        let now = context.current_sample();
        self.voices.prune_finished(now);
        if self.voices.force_stop(key, now) {
            debug!(key = %key, "Stole voice on retrigger");
        }

        let rate = rate_for(pitch);
        let step = rate * buffer.sample_rate() as f64 / context.sample_rate() as f64;
        let source = SourceHandle::start(
            audio::next_voice_id(),
            buffer.clone(),
            step,
            context.commands(),
        );
        debug!(key = %key, pitch, rate, voice_id = source.id(), "Voice triggered");
        self.voices.insert(Voice::new(key, pitch, rate, now, source), now);
    }

    /// Fades out the key's voice over the current fade time and forgets it.
    pub fn release(&mut self, key: PhysicalKey) {
        let Some(context) = self.graph.context() else {
            return;
        };
        let now = context.current_sample();
        let fade_frames =
            (self.graph.fade().seconds() * f64::from(context.sample_rate())).round() as u64;
        self.voices.prune_finished(now);
        self.voices.release(key, now, fade_frames);
    }

    /// Silences the key's voice immediately.
    pub fn force_stop(&mut self, key: PhysicalKey) {
        if let Some(context) = self.graph.context() {
            self.voices.force_stop(key, context.current_sample());
        }
    }

    /// Silences every voice and clears the table.
    pub fn stop_all(&mut self) {
        if let Some(context) = self.graph.context() {
            let stopped = self.voices.stop_all(context.current_sample());
            if stopped > 0 {
                info!(stopped, "Stopped all voices");
            }
        }
    }

    /// Decodes and installs a new sample. Sounding voices keep playing the
    /// sample they were started with.
    pub async fn load_buffer(
        &mut self,
        bytes: Vec<u8>,
        extension: Option<String>,
    ) -> Result<&SampleBuffer, EngineError> {
        self.graph.load_buffer(bytes, extension).await
    }

    /// Reads a sample file and installs it.
    pub async fn load_file(&mut self, path: &Path) -> Result<&SampleBuffer, EngineError> {
        let bytes = tokio::fs::read(path).await.map_err(DecodeError::from)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string);
        info!(path = %path.display(), "Loading sample");
        self.load_buffer(bytes, extension).await
    }

    /// Opens the audio output if it is not open yet.
    pub fn ensure_graph(&mut self) -> Result<(), EngineError> {
        self.graph.ensure_graph().map(|_| ())
    }

    /// Sets the release time, clamped to the valid range. Returns the value applied.
    pub fn set_fade_out(&mut self, seconds: f64) -> f64 {
        let applied = self.graph.fade_mut().set(seconds);
        debug!(requested = seconds, applied, "Fade out set");
        applied
    }

    /// The release time in seconds.
    pub fn fade_out_seconds(&self) -> f64 {
        self.graph.fade().seconds()
    }

    /// The valid range for the release time.
    pub fn fade_range(&self) -> (f64, f64) {
        self.graph.fade().range()
    }

    /// Duration of the loaded sample in seconds.
    pub fn current_duration(&self) -> Option<f64> {
        self.graph.current_duration()
    }

    /// Number of keys with a sounding voice.
    pub fn active_voice_count(&self) -> usize {
        self.voices.active_count()
    }

    /// The voice recorded for the key.
    pub fn voice_for(&self, key: PhysicalKey) -> Option<&Voice> {
        self.voices.voice_for(key)
    }

    /// The audio graph.
    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }
}
