// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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
// Render-side mixing logic shared by the cpal output and the mock device
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::debug;

use crate::audio::compressor::{DynamicsCompressor, MASTER_BUS};
use crate::samples::SampleBuffer;

/// Timed requests sent from the control side to the renderer. Times are in
/// frames of the render clock; times already in the past take effect at the
/// start of the next rendered block.
pub enum MixerCommand {
    /// Starts a voice at the next rendered frame.
    Start(PlayingVoice),
    /// Ramps the voice's gain linearly from 1 to 0 over `fade_frames`
    /// starting at `at`, then stops it.
    Release { id: u64, at: u64, fade_frames: u64 },
    /// Silences and stops the voice at `at`.
    Stop { id: u64, at: u64 },
}

/// A linear gain ramp down to silence.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    start: u64,
    frames: u64,
}

/// A voice as seen by the renderer: a one-shot read head over a sample buffer.
pub struct PlayingVoice {
    /// Unique ID shared with the control side.
    id: u64,
    /// The buffer this voice was started with.
    buffer: SampleBuffer,
    /// Source frames advanced per output frame.
    step: f64,
    /// Current read position in source frames.
    position: f64,
    /// Scheduled release ramp, if any.
    ramp: Option<Ramp>,
    /// Frame at which the voice stops, if scheduled.
    stop_at: Option<u64>,
    /// Set once the voice has stopped or run off the end of the buffer.
    finished: Arc<AtomicBool>,
}

impl PlayingVoice {
    /// Creates a voice reading `buffer` at `step` source frames per output frame.
    pub fn new(id: u64, buffer: SampleBuffer, step: f64, finished: Arc<AtomicBool>) -> Self {
        Self {
            id,
            buffer,
            step,
            position: 0.0,
            ramp: None,
            stop_at: None,
            finished,
        }
    }

    fn schedule_stop(&mut self, at: u64) {
        self.stop_at = Some(self.stop_at.map_or(at, |current| current.min(at)));
    }

    #[inline]
    fn gain_at(&self, now: u64) -> f32 {
        match self.ramp {
            Some(ramp) if now >= ramp.start => {
                if ramp.frames == 0 {
                    0.0
                } else {
                    (1.0 - (now - ramp.start) as f32 / ramp.frames as f32).max(0.0)
                }
            }
            _ => 1.0,
        }
    }

    /// Adds this voice's contribution for frame `now` into `frame`.
    /// Returns false once the voice is finished.
    #[inline]
    fn render_into(&mut self, frame: &mut [f32], now: u64) -> bool {
        if self.stop_at.is_some_and(|stop_at| now >= stop_at) {
            self.finished.store(true, Ordering::Relaxed);
            return false;
        }

        let frames = self.buffer.frames();
        let index = self.position as usize;
        if index >= frames {
            self.finished.store(true, Ordering::Relaxed);
            return false;
        }

        let frac = (self.position - index as f64) as f32;
        let gain = self.gain_at(now);
        for (channel, out) in frame.iter_mut().enumerate() {
            let s0 = self.buffer.sample(index, channel);
            let s1 = if index + 1 < frames {
                self.buffer.sample(index + 1, channel)
            } else {
                s0
            };
            *out += (s0 + (s1 - s0) * frac) * gain;
        }

        self.position += self.step;
        true
    }
}

struct MixerState {
    voices: Vec<PlayingVoice>,
    master_bus: DynamicsCompressor,
}

impl MixerState {
    fn apply(&mut self, command: MixerCommand, now: u64) {
        match command {
            MixerCommand::Start(voice) => self.voices.push(voice),
            MixerCommand::Release {
                id,
                at,
                fade_frames,
            } => match self.voices.iter_mut().find(|v| v.id == id) {
                Some(voice) => {
                    let start = at.max(now);
                    voice.ramp = Some(Ramp {
                        start,
                        frames: fade_frames,
                    });
                    voice.schedule_stop(start + fade_frames);
                }
                None => debug!(voice_id = id, "Release for a voice that already ended"),
            },
            MixerCommand::Stop { id, at } => match self.voices.iter_mut().find(|v| v.id == id) {
                Some(voice) => voice.schedule_stop(at.max(now)),
                None => debug!(voice_id = id, "Stop for a voice that already ended"),
            },
        }
    }
}

/// Mixes all playing voices and runs the result through the master bus.
#[derive(Clone)]
pub struct AudioMixer {
    state: Arc<Mutex<MixerState>>,
    commands: Receiver<MixerCommand>,
    /// Frames rendered so far.
    clock: Arc<AtomicU64>,
    num_channels: u16,
    sample_rate: u32,
}

impl AudioMixer {
    /// Creates a new mixer that receives its commands from `commands`.
    pub fn new(num_channels: u16, sample_rate: u32, commands: Receiver<MixerCommand>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MixerState {
                voices: Vec::new(),
                master_bus: DynamicsCompressor::new(MASTER_BUS, sample_rate),
            })),
            commands,
            clock: Arc::new(AtomicU64::new(0)),
            num_channels: num_channels.max(1),
            sample_rate,
        }
    }

    /// Renders as many whole frames as fit into the interleaved output buffer.
    pub fn process_into_output(&self, output: &mut [f32]) {
        let channels = self.num_channels as usize;
        let start = self.clock.load(Ordering::Acquire);

        let mut state = self.state.lock();
        while let Ok(command) = self.commands.try_recv() {
            state.apply(command, start);
        }

        let MixerState { voices, master_bus } = &mut *state;
        let mut rendered = 0u64;
        for frame in output.chunks_exact_mut(channels) {
            let now = start + rendered;
            frame.fill(0.0);
            voices.retain_mut(|voice| voice.render_into(frame, now));
            master_bus.process_frame(frame);
            rendered += 1;
        }
        drop(state);

        self.clock.store(start + rendered, Ordering::Release);
    }

    /// Renders `num_frames` frames into a freshly allocated buffer.
    pub fn process_frames(&self, num_frames: usize) -> Vec<f32> {
        let mut frames = vec![0.0f32; num_frames * self.num_channels as usize];
        self.process_into_output(&mut frames);
        frames
    }

    /// Returns the number of frames rendered so far.
    pub fn current_frame(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Returns true if the voice with the given ID is still rendering.
    pub fn is_playing(&self, id: u64) -> bool {
        self.state.lock().voices.iter().any(|v| v.id == id)
    }

    /// Returns the number of voices still rendering.
    pub fn active_voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Gets the number of output channels
    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    /// Gets the sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
