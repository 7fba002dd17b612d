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

//! Physical key identifiers, the key-to-pitch map and the pitch-to-rate conversion.
//!
//! Keys are identified by their physical position (named after the W3C
//! `KeyboardEvent.code` values), never by the character they produce, so the
//! same map works regardless of keyboard layout.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The pitch that plays the sample at its native speed.
pub const REFERENCE_PITCH: i32 = 60;

/// Returns the playback-rate multiplier for the given pitch.
///
/// One semitone above the reference multiplies the rate by the twelfth root of two.
pub fn rate_for(pitch: i32) -> f64 {
    2f64.powf(f64::from(pitch - REFERENCE_PITCH) / 12.0)
}

macro_rules! physical_keys {
    ($($variant:ident),+ $(,)?) => {
        /// A layout-independent physical key.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum PhysicalKey {
            $($variant),+
        }

        impl PhysicalKey {
            /// Every known physical key.
            pub const ALL: &'static [PhysicalKey] = &[$(PhysicalKey::$variant),+];

            /// Returns the code name of this key, e.g. `KeyA`.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(PhysicalKey::$variant => stringify!($variant)),+
                }
            }
        }

        impl FromStr for PhysicalKey {
            type Err = UnknownKey;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(PhysicalKey::$variant),)+
                    _ => Err(UnknownKey(s.to_string())),
                }
            }
        }
    };
}

physical_keys!(
    Backquote,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    Digit0,
    Minus,
    Equal,
    KeyQ,
    KeyW,
    KeyE,
    KeyR,
    KeyT,
    KeyY,
    KeyU,
    KeyI,
    KeyO,
    KeyP,
    BracketLeft,
    BracketRight,
    Backslash,
    KeyA,
    KeyS,
    KeyD,
    KeyF,
    KeyG,
    KeyH,
    KeyJ,
    KeyK,
    KeyL,
    Semicolon,
    Quote,
    KeyZ,
    KeyX,
    KeyC,
    KeyV,
    KeyB,
    KeyN,
    KeyM,
    Comma,
    Period,
    Slash,
    Space,
);

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a physical key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown physical key '{0}'")]
pub struct UnknownKey(pub String);

/// The default two-row piano layout. The home row carries the reference octave
/// with black keys on the row above; the bottom row is the octave below.
const DEFAULT_LAYOUT: &[(PhysicalKey, i32)] = &[
    (PhysicalKey::KeyA, 60),
    (PhysicalKey::KeyW, 61),
    (PhysicalKey::KeyS, 62),
    (PhysicalKey::KeyE, 63),
    (PhysicalKey::KeyD, 64),
    (PhysicalKey::KeyF, 65),
    (PhysicalKey::KeyT, 66),
    (PhysicalKey::KeyG, 67),
    (PhysicalKey::KeyY, 68),
    (PhysicalKey::KeyH, 69),
    (PhysicalKey::KeyU, 70),
    (PhysicalKey::KeyJ, 71),
    (PhysicalKey::KeyK, 72),
    (PhysicalKey::KeyO, 73),
    (PhysicalKey::KeyL, 74),
    (PhysicalKey::KeyP, 75),
    (PhysicalKey::Semicolon, 76),
    (PhysicalKey::Quote, 77),
    (PhysicalKey::KeyZ, 48),
    (PhysicalKey::KeyX, 50),
    (PhysicalKey::KeyC, 52),
    (PhysicalKey::KeyV, 53),
    (PhysicalKey::KeyB, 55),
    (PhysicalKey::KeyN, 57),
    (PhysicalKey::KeyM, 59),
    (PhysicalKey::Comma, 60),
    (PhysicalKey::Period, 62),
    (PhysicalKey::Slash, 64),
];

/// Maps physical keys to pitches. Built once and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPitchMap {
    pitches: HashMap<PhysicalKey, i32>,
}

impl KeyPitchMap {
    /// Builds a map from explicit entries. Later entries for the same key win.
    pub fn from_entries<I>(entries: I) -> KeyPitchMap
    where
        I: IntoIterator<Item = (PhysicalKey, i32)>,
    {
        KeyPitchMap {
            pitches: entries.into_iter().collect(),
        }
    }

    /// Returns the pitch for the key, or None if the key is not mapped.
    pub fn pitch_for(&self, key: PhysicalKey) -> Option<i32> {
        self.pitches.get(&key).copied()
    }

    /// Returns all mappings sorted by pitch, then by key.
    pub fn sorted(&self) -> Vec<(PhysicalKey, i32)> {
        let mut entries: Vec<(PhysicalKey, i32)> =
            self.pitches.iter().map(|(k, p)| (*k, *p)).collect();
        entries.sort_by_key(|(key, pitch)| (*pitch, *key));
        entries
    }

    /// Returns the number of mapped keys.
    pub fn len(&self) -> usize {
        self.pitches.len()
    }

    /// Returns true if no keys are mapped.
    pub fn is_empty(&self) -> bool {
        self.pitches.is_empty()
    }
}

impl Default for KeyPitchMap {
    fn default() -> Self {
        KeyPitchMap::from_entries(DEFAULT_LAYOUT.iter().copied())
    }
}
