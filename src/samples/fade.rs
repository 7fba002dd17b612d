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

//! Release fade time for triggered voices.
//!
//! The fade is kept per loaded sample: loading a buffer resets it to a default
//! derived from the sample's length, and user changes are clamped to half of it.

/// Fade-out used before any sample is loaded, and the cap on the derived default.
pub const DEFAULT_FADE_OUT_SECS: f64 = 0.15;

/// Share of the sample duration used for the derived default.
const DEFAULT_FADE_FRACTION: f64 = 0.15;

/// The user-adjustable release time. Valid values lie in `[0, duration / 2]`
/// of the loaded sample; out-of-range requests are clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeControl {
    seconds: f64,
    max: f64,
}

impl Default for FadeControl {
    fn default() -> Self {
        FadeControl {
            seconds: DEFAULT_FADE_OUT_SECS,
            max: 0.0,
        }
    }
}

impl FadeControl {
    /// Recomputes the range for a newly installed buffer and re-derives the default.
    pub fn on_buffer_changed(&mut self, duration_secs: f64) {
        self.max = if duration_secs.is_finite() && duration_secs > 0.0 {
            duration_secs / 2.0
        } else {
            0.0
        };
        self.seconds = self.clamp(DEFAULT_FADE_OUT_SECS.min(duration_secs * DEFAULT_FADE_FRACTION));
    }

    /// Sets the fade time, clamping into range. Returns the value applied.
    pub fn set(&mut self, requested: f64) -> f64 {
        self.seconds = self.clamp(requested);
        self.seconds
    }

    /// The current fade time in seconds.
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// The upper bound of the valid range.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// The valid range as `(min, max)`.
    pub fn range(&self) -> (f64, f64) {
        (0.0, self.max)
    }

    fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, self.max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_before_load() {
        let fade = FadeControl::default();
        assert_eq!(fade.seconds(), 0.15);
        assert_eq!(fade.range(), (0.0, 0.0));
    }

    #[test]
    fn test_defaults_follow_duration() {
        let mut fade = FadeControl::default();

        fade.on_buffer_changed(2.0);
        assert_eq!(fade.seconds(), 0.15);
        assert_eq!(fade.range(), (0.0, 1.0));

        // Short samples get a proportional fade
        fade.on_buffer_changed(0.5);
        assert!((fade.seconds() - 0.075).abs() < 1e-12);
        assert_eq!(fade.max(), 0.25);

        fade.on_buffer_changed(0.0);
        assert_eq!(fade.seconds(), 0.0);
        assert_eq!(fade.max(), 0.0);
    }

    #[test]
    fn test_set_clamps() {
        let mut fade = FadeControl::default();
        fade.on_buffer_changed(1.0);

        assert_eq!(fade.set(0.3), 0.3);
        assert_eq!(fade.set(5.0), 0.5);
        assert_eq!(fade.set(-1.0), 0.0);
        assert_eq!(fade.set(f64::NAN), 0.0);
        assert_eq!(fade.set(f64::INFINITY), 0.5);
        assert_eq!(fade.seconds(), 0.5);
    }
}
