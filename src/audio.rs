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
use std::sync::atomic::{AtomicU64, Ordering};
use std::{error::Error, fmt, sync::Arc};

use crate::config;

pub mod compressor;
pub mod context;
pub mod cpal;
pub mod mixer;
pub mod mock;
pub mod thread_priority;

pub use context::AudioContext;
pub use mixer::{AudioMixer, MixerCommand, PlayingVoice};

/// An audio output that renders frames pulled from a mixer.
pub trait Device: fmt::Display + Send + Sync {
    /// The sample rate the output runs at.
    fn sample_rate(&self) -> u32;

    /// The number of interleaved output channels.
    fn num_channels(&self) -> u16;

    /// Starts pulling frames from the mixer. Output continues until the
    /// returned handle is dropped.
    fn start(&self, mixer: AudioMixer) -> Result<Box<dyn Output>, Box<dyn Error>>;
}

/// A running output. Dropping it stops the output.
pub trait Output: Send {}

/// Global atomic counter for generating unique voice IDs
static VOICE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns a process-wide unique voice ID.
pub fn next_voice_id() -> u64 {
    VOICE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets a device for the given configuration. Device names starting with
/// "mock" select the mock device.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(
            device,
            config.channels(),
            config.sample_rate(),
        )));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_ids_are_unique() {
        let first = next_voice_id();
        let second = next_voice_id();
        assert!(second > first);
    }

    #[test]
    fn test_get_mock_device() {
        let config = config::Audio::new("mock-device");
        let device = get_device(&config).unwrap();
        assert_eq!(device.sample_rate(), 44100);
        assert_eq!(device.num_channels(), 2);
        assert_eq!(device.to_string(), "mock-device (Mock)");
    }
}
