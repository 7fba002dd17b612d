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
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

use super::audio::Audio;
use super::error::ConfigError;
use crate::keymap::{KeyPitchMap, PhysicalKey, UnknownKey};

/// The configuration for the sampler.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Player {
    /// The audio output configuration.
    #[serde(default)]
    audio: Audio,

    /// A sample to load at startup.
    sample: Option<PathBuf>,

    /// Replaces the default key layout. Keys are physical key codes, e.g. `KeyA`.
    keymap: Option<HashMap<String, i32>>,
}

impl Player {
    /// Parse a player configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Player, ConfigError> {
        Self::from_source(File::from(path))
    }

    fn from_source<S>(source: S) -> Result<Player, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Ok(Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize::<Player>()?)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    /// Replaces the audio device.
    pub fn set_device(&mut self, device: &str) {
        self.audio.set_device(device);
    }

    /// The sample to load at startup, if any.
    pub fn sample(&self) -> Option<&Path> {
        self.sample.as_deref()
    }

    pub fn set_sample(&mut self, sample: PathBuf) {
        self.sample = Some(sample);
    }

    /// Builds the key map, falling back to the default layout.
    pub fn keymap(&self) -> Result<KeyPitchMap, ConfigError> {
        let Some(entries) = &self.keymap else {
            return Ok(KeyPitchMap::default());
        };

        let entries = entries
            .iter()
            .map(|(key, pitch)| Ok((parse_key(key)?, *pitch)))
            .collect::<Result<Vec<(PhysicalKey, i32)>, ConfigError>>()?;
        Ok(KeyPitchMap::from_entries(entries))
    }
}

/// Key names are matched without regard to case, since the config loader
/// may fold them.
fn parse_key(name: &str) -> Result<PhysicalKey, UnknownKey> {
    PhysicalKey::ALL
        .iter()
        .copied()
        .find(|key| key.as_str().eq_ignore_ascii_case(name))
        .ok_or_else(|| UnknownKey(name.to_string()))
}
