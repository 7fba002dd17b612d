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
// The running audio context: an output device pulling from a render mixer,
// plus the command channel the control side uses to drive it.
//

use std::error::Error;

use crossbeam_channel::Sender;
use tracing::info;

use crate::audio::mixer::{AudioMixer, MixerCommand};
use crate::audio::{Device, Output};

/// Holds the render mixer and keeps its output running.
pub struct AudioContext {
    mixer: AudioMixer,
    commands: Sender<MixerCommand>,
    /// Output stops when this is dropped.
    _output: Box<dyn Output>,
}

impl AudioContext {
    /// Builds a mixer matching the device and starts output.
    pub fn new(device: &dyn Device) -> Result<AudioContext, Box<dyn Error>> {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let mixer = AudioMixer::new(device.num_channels(), device.sample_rate(), command_rx);
        let output = device.start(mixer.clone())?;

        info!(
            device = %device,
            sample_rate = device.sample_rate(),
            channels = device.num_channels(),
            "Audio context started"
        );

        Ok(AudioContext {
            mixer,
            commands,
            _output: output,
        })
    }

    /// Returns the current render clock in frames.
    pub fn current_sample(&self) -> u64 {
        self.mixer.current_frame()
    }

    /// Returns the output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate()
    }

    /// Returns the sender for timed render commands.
    pub fn commands(&self) -> &Sender<MixerCommand> {
        &self.commands
    }

    /// Returns the render mixer.
    pub fn mixer(&self) -> &AudioMixer {
        &self.mixer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock;

    #[test]
    fn test_context_clock() {
        let device = mock::Device::get("mock", 2, 1000);
        let context = AudioContext::new(&device).unwrap();
        assert_eq!(context.current_sample(), 0);

        context.mixer().process_frames(500);
        assert_eq!(context.current_sample(), 500);
        assert_eq!(context.sample_rate(), 1000);
    }

    #[test]
    fn test_context_unavailable() {
        let device = mock::Device::get("mock-unavailable", 2, 1000);
        assert!(AudioContext::new(&device).is_err());
    }
}
