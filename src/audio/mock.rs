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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::info;

use crate::audio::mixer::AudioMixer;

/// A mock device. Doesn't actually play anything; frames are rendered only
/// when the mixer is pulled directly. A device named "mock-unavailable"
/// refuses to start.
#[derive(Clone)]
pub struct Device {
    name: String,
    num_channels: u16,
    sample_rate: u32,
    is_running: Arc<AtomicBool>,
}

/// Handle for a running mock device.
struct Output {
    is_running: Arc<AtomicBool>,
}

impl crate::audio::Output for Output {}

impl Drop for Output {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
    }
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str, num_channels: u16, sample_rate: u32) -> Device {
        Device {
            name: name.to_string(),
            num_channels: num_channels.max(1),
            sample_rate,
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true if output has been started and not dropped.
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }
}

impl crate::audio::Device for Device {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn num_channels(&self) -> u16 {
        self.num_channels
    }

    fn start(&self, _: AudioMixer) -> Result<Box<dyn crate::audio::Output>, Box<dyn Error>> {
        if self.name == "mock-unavailable" {
            return Err(format!("device {} refused to open", self.name).into());
        }

        info!(device = self.name, "Starting mock output.");
        self.is_running.store(true, Ordering::Relaxed);
        Ok(Box::new(Output {
            is_running: self.is_running.clone(),
        }))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}
