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

//! Voice management for per-key sample playback.
//!
//! Each physical key owns at most one voice. Retriggering a key steals its
//! voice; releasing hands the voice to the renderer to fade out on its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::audio::{MixerCommand, PlayingVoice};
use crate::keymap::PhysicalKey;
use crate::samples::SampleBuffer;

/// Lifecycle of a voice. Idle keys have no voice at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Sounding,
    Releasing,
}

/// Control-side handle for a voice started in the render mixer. Stopping or
/// releasing consumes the handle, so a voice can never be restarted.
pub struct SourceHandle {
    id: u64,
    commands: Sender<MixerCommand>,
    finished: Arc<AtomicBool>,
}

impl SourceHandle {
    /// Starts a voice over `buffer` at `step` source frames per output frame.
    pub fn start(
        id: u64,
        buffer: SampleBuffer,
        step: f64,
        commands: &Sender<MixerCommand>,
    ) -> SourceHandle {
        let finished = Arc::new(AtomicBool::new(false));
        let handle = SourceHandle {
            id,
            commands: commands.clone(),
            finished: finished.clone(),
        };
        handle.send(MixerCommand::Start(PlayingVoice::new(
            id, buffer, step, finished,
        )));
        handle
    }

    /// The voice ID shared with the renderer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true once the renderer has stopped the voice.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    /// Ramps the gain to zero over `fade_frames` starting at `at`, then stops.
    pub fn release(self, at: u64, fade_frames: u64) {
        self.send(MixerCommand::Release {
            id: self.id,
            at,
            fade_frames,
        });
    }

    /// Silences and stops the voice at `at`.
    pub fn stop(self, at: u64) {
        self.send(MixerCommand::Stop { id: self.id, at });
    }

    fn send(&self, command: MixerCommand) {
        if self.commands.send(command).is_err() {
            warn!(voice_id = self.id, "Render mixer is gone, dropping voice command");
        }
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// One playback of the sample at a given pitch.
#[derive(Debug)]
pub struct Voice {
    /// The key that triggered this voice.
    key: PhysicalKey,
    /// The pitch the key mapped to.
    pitch: i32,
    /// Playback rate derived from the pitch.
    rate: f64,
    /// Render clock frame at which the voice was started.
    started_at: u64,
    state: VoiceState,
    /// Present until the voice is released or stopped.
    source: Option<SourceHandle>,
}

impl Voice {
    /// Creates a sounding voice around a started source.
    pub fn new(
        key: PhysicalKey,
        pitch: i32,
        rate: f64,
        started_at: u64,
        source: SourceHandle,
    ) -> Self {
        Self {
            key,
            pitch,
            rate,
            started_at,
            state: VoiceState::Sounding,
            source: Some(source),
        }
    }

    pub fn key(&self) -> PhysicalKey {
        self.key
    }

    pub fn pitch(&self) -> i32 {
        self.pitch
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Returns true once the renderer has stopped the voice on its own,
    /// e.g. because the sample played to the end.
    pub fn is_finished(&self) -> bool {
        self.source.as_ref().is_some_and(SourceHandle::is_finished)
    }

    /// The renderer's ID for this voice.
    pub fn id(&self) -> Option<u64> {
        self.source.as_ref().map(SourceHandle::id)
    }

    /// Hands the voice to the renderer to fade out and marks it Releasing.
    fn release(&mut self, at: u64, fade_frames: u64) {
        if let Some(source) = self.source.take() {
            source.release(at, fade_frames);
        }
        self.state = VoiceState::Releasing;
    }

    /// Stops the voice immediately.
    fn stop(mut self, at: u64) {
        if let Some(source) = self.source.take() {
            source.stop(at);
        }
    }
}

/// The active voice table: at most one voice per physical key.
#[derive(Default)]
pub struct VoiceManager {
    voices: HashMap<PhysicalKey, Voice>,
}

impl VoiceManager {
    /// Creates a new voice manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly started voice. Any voice already recorded for the key
    /// is stopped at `now`.
    pub fn insert(&mut self, voice: Voice, now: u64) {
        if let Some(previous) = self.voices.insert(voice.key(), voice) {
            debug!(key = %previous.key(), "Replacing a voice that was not stopped first");
            previous.stop(now);
        }
    }

    /// Releases the voice for the key, removing it from the table. Returns the
    /// released voice, or None if the key had no voice.
    pub fn release(&mut self, key: PhysicalKey, at: u64, fade_frames: u64) -> Option<Voice> {
        let mut voice = self.voices.remove(&key)?;
        voice.release(at, fade_frames);
        debug!(key = %key, fade_frames, "Voice released");
        Some(voice)
    }

    /// Stops the voice for the key at `at`. Returns true if there was one.
    pub fn force_stop(&mut self, key: PhysicalKey, at: u64) -> bool {
        match self.voices.remove(&key) {
            Some(voice) => {
                voice.stop(at);
                true
            }
            None => false,
        }
    }

    /// Stops every voice and clears the table. Returns how many were stopped.
    pub fn stop_all(&mut self, at: u64) -> usize {
        let count = self.voices.len();
        for (_, voice) in self.voices.drain() {
            voice.stop(at);
        }
        count
    }

    /// Forgets voices whose sample ended while the key was still held.
    /// Returns how many were removed.
    pub fn prune_finished(&mut self, now: u64) -> usize {
        let before = self.voices.len();
        self.voices.retain(|key, voice| {
            if !voice.is_finished() {
                return true;
            }
            debug!(
                key = %key,
                held_frames = now.saturating_sub(voice.started_at()),
                "Voice played to the end"
            );
            false
        });
        before - self.voices.len()
    }

    /// Returns the voice recorded for the key.
    pub fn voice_for(&self, key: PhysicalKey) -> Option<&Voice> {
        self.voices.get(&key)
    }

    /// Returns the number of voices in the table.
    pub fn active_count(&self) -> usize {
        self.voices.len()
    }
}

impl fmt::Debug for VoiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<PhysicalKey> = self.voices.keys().copied().collect();
        keys.sort();
        f.debug_struct("VoiceManager").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioMixer;
    use crossbeam_channel::Receiver;

    fn channel() -> (Sender<MixerCommand>, Receiver<MixerCommand>) {
        crossbeam_channel::unbounded()
    }

    fn start_voice(key: PhysicalKey, id: u64, tx: &Sender<MixerCommand>) -> Voice {
        let buffer = SampleBuffer::new(vec![0.0; 10], 1, 10);
        let source = SourceHandle::start(id, buffer, 1.0, tx);
        Voice::new(key, 60, 1.0, 0, source)
    }

    fn describe(command: MixerCommand) -> String {
        match command {
            MixerCommand::Start(_) => "start".to_string(),
            MixerCommand::Release {
                id,
                at,
                fade_frames,
            } => format!("release {} at {} over {}", id, at, fade_frames),
            MixerCommand::Stop { id, at } => format!("stop {} at {}", id, at),
        }
    }

    fn drain(rx: &Receiver<MixerCommand>) -> Vec<String> {
        rx.try_iter().map(describe).collect()
    }

    #[test]
    fn test_insert_and_release() {
        let (tx, rx) = channel();
        let mut manager = VoiceManager::new();

        manager.insert(start_voice(PhysicalKey::KeyA, 1, &tx), 0);
        assert_eq!(manager.active_count(), 1);
        assert_eq!(
            manager.voice_for(PhysicalKey::KeyA).map(Voice::state),
            Some(VoiceState::Sounding)
        );

        let released = manager.release(PhysicalKey::KeyA, 100, 25).unwrap();
        assert_eq!(released.state(), VoiceState::Releasing);
        assert_eq!(released.id(), None);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(drain(&rx), vec!["start", "release 1 at 100 over 25"]);
    }

    #[test]
    fn test_release_unknown_key_is_noop() {
        let (tx, rx) = channel();
        let mut manager = VoiceManager::new();
        manager.insert(start_voice(PhysicalKey::KeyA, 1, &tx), 0);
        drain(&rx);

        assert!(manager.release(PhysicalKey::KeyS, 0, 10).is_none());
        assert!(!manager.force_stop(PhysicalKey::KeyS, 0));
        assert_eq!(manager.active_count(), 1);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_insert_replaces_existing_voice() {
        let (tx, rx) = channel();
        let mut manager = VoiceManager::new();
        manager.insert(start_voice(PhysicalKey::KeyA, 1, &tx), 0);
        manager.insert(start_voice(PhysicalKey::KeyA, 2, &tx), 5);

        assert_eq!(manager.active_count(), 1);
        assert_eq!(
            manager.voice_for(PhysicalKey::KeyA).and_then(Voice::id),
            Some(2)
        );
        assert_eq!(drain(&rx), vec!["start", "start", "stop 1 at 5"]);
    }

    #[test]
    fn test_stop_all() {
        let (tx, rx) = channel();
        let mut manager = VoiceManager::new();
        manager.insert(start_voice(PhysicalKey::KeyA, 1, &tx), 0);
        manager.insert(start_voice(PhysicalKey::KeyS, 2, &tx), 0);
        drain(&rx);

        assert_eq!(manager.stop_all(42), 2);
        assert_eq!(manager.active_count(), 0);

        let mut stops = drain(&rx);
        stops.sort();
        assert_eq!(stops, vec!["stop 1 at 42", "stop 2 at 42"]);
    }

    #[test]
    fn test_prune_finished() {
        let (tx, rx) = channel();
        let mixer = AudioMixer::new(1, 10, rx);
        let mut manager = VoiceManager::new();

        let short = SourceHandle::start(1, SampleBuffer::new(vec![0.0; 2], 1, 10), 1.0, &tx);
        manager.insert(Voice::new(PhysicalKey::KeyA, 60, 1.0, 0, short), 0);
        manager.insert(start_voice(PhysicalKey::KeyS, 2, &tx), 0);
        assert_eq!(manager.prune_finished(0), 0);

        // Past the end of the short buffer, the long one is still going
        mixer.process_frames(3);
        assert!(manager.voice_for(PhysicalKey::KeyA).unwrap().is_finished());
        assert!(!manager.voice_for(PhysicalKey::KeyS).unwrap().is_finished());

        assert_eq!(manager.prune_finished(3), 1);
        assert!(manager.voice_for(PhysicalKey::KeyA).is_none());
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn test_commands_after_mixer_is_gone() {
        let (tx, rx) = channel();
        drop(rx);
        let mut manager = VoiceManager::new();

        // Nothing panics; the failures are only logged.
        manager.insert(start_voice(PhysicalKey::KeyA, 1, &tx), 0);
        assert!(manager.release(PhysicalKey::KeyA, 0, 10).is_some());
    }
}
