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

//! Feed-forward soft-knee dynamics compressor used as the master bus.
//!
//! The detector follows the loudest channel of each frame, so every channel
//! receives the same gain reduction.

/// Fixed compressor parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorParams {
    /// Level in dB above which compression begins.
    pub threshold_db: f32,
    /// Width in dB of the soft knee centred on the threshold.
    pub knee_db: f32,
    /// Input/output ratio above the knee.
    pub ratio: f32,
    /// Attack time in seconds.
    pub attack_secs: f32,
    /// Release time in seconds.
    pub release_secs: f32,
}

/// The master bus settings every voice is routed through.
pub const MASTER_BUS: CompressorParams = CompressorParams {
    threshold_db: -12.0,
    knee_db: 12.0,
    ratio: 20.0,
    attack_secs: 0.003,
    release_secs: 0.25,
};

/// Quietest level the detector resolves, in dB.
const FLOOR_DB: f32 = -120.0;

/// A dynamics compressor operating on interleaved frames.
#[derive(Debug, Clone)]
pub struct DynamicsCompressor {
    params: CompressorParams,
    attack_coeff: f32,
    release_coeff: f32,
    /// Smoothed gain reduction in dB (always <= 0).
    reduction_db: f32,
}

impl DynamicsCompressor {
    /// Creates a compressor for the given sample rate.
    pub fn new(params: CompressorParams, sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        Self {
            params,
            attack_coeff: time_coefficient(params.attack_secs, sample_rate),
            release_coeff: time_coefficient(params.release_secs, sample_rate),
            reduction_db: 0.0,
        }
    }

    /// Returns the current gain reduction in dB (0.0 means no compression).
    pub fn reduction_db(&self) -> f32 {
        self.reduction_db
    }

    /// Static gain curve: the gain change in dB for a detector level in dB.
    pub fn compute_gain_db(&self, input_db: f32) -> f32 {
        let CompressorParams {
            threshold_db,
            knee_db,
            ratio,
            ..
        } = self.params;
        let overshoot = input_db - threshold_db;
        let slope = 1.0 - 1.0 / ratio;

        if knee_db <= 0.0 {
            return if overshoot > 0.0 { -overshoot * slope } else { 0.0 };
        }

        if overshoot <= -knee_db / 2.0 {
            0.0
        } else if overshoot >= knee_db / 2.0 {
            -overshoot * slope
        } else {
            // Quadratic interpolation through the knee
            let x = overshoot + knee_db / 2.0;
            -slope * x * x / (2.0 * knee_db)
        }
    }

    /// Compresses one interleaved frame in place.
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        let peak = frame.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        let level_db = if peak > 0.0 {
            (20.0 * peak.log10()).max(FLOOR_DB)
        } else {
            FLOOR_DB
        };

        let target = self.compute_gain_db(level_db);
        let coeff = if target < self.reduction_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.reduction_db = coeff * self.reduction_db + (1.0 - coeff) * target;

        let gain = 10f32.powf(self.reduction_db / 20.0);
        for sample in frame.iter_mut() {
            *sample *= gain;
        }
    }
}

/// One-pole smoothing coefficient for a time constant in seconds.
fn time_coefficient(secs: f32, sample_rate: f32) -> f32 {
    if secs <= 0.0 {
        0.0
    } else {
        (-1.0 / (secs * sample_rate)).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_bus_parameters() {
        assert_eq!(MASTER_BUS.threshold_db, -12.0);
        assert_eq!(MASTER_BUS.knee_db, 12.0);
        assert_eq!(MASTER_BUS.ratio, 20.0);
        assert_eq!(MASTER_BUS.attack_secs, 0.003);
        assert_eq!(MASTER_BUS.release_secs, 0.25);
    }

    #[test]
    fn test_gain_curve() {
        let comp = DynamicsCompressor::new(MASTER_BUS, 48000);

        // Below the knee nothing happens
        assert_eq!(comp.compute_gain_db(-30.0), 0.0);
        assert_eq!(comp.compute_gain_db(-18.0), 0.0);

        // Above the knee the full ratio applies: 12 dB over at 20:1 -> -11.4 dB
        assert!((comp.compute_gain_db(0.0) - (-11.4)).abs() < 1e-4);

        // Inside the knee the reduction is partial and continuous at the edges
        let mid = comp.compute_gain_db(-12.0);
        assert!(mid < 0.0 && mid > -6.0 * 0.95);
        assert!((comp.compute_gain_db(-6.0) - (-6.0 * 0.95)).abs() < 1e-4);
    }

    #[test]
    fn test_quiet_signal_passes_through() {
        let mut comp = DynamicsCompressor::new(MASTER_BUS, 48000);
        for _ in 0..4800 {
            let mut frame = [0.05f32, -0.05];
            comp.process_frame(&mut frame);
            assert_eq!(frame, [0.05, -0.05]);
        }
        assert_eq!(comp.reduction_db(), 0.0);
    }

    #[test]
    fn test_loud_signal_is_reduced_after_attack() {
        let mut comp = DynamicsCompressor::new(MASTER_BUS, 48000);
        let mut last = [0.0f32; 2];
        // 50ms is many attack time constants
        for _ in 0..2400 {
            let mut frame = [1.0f32, 1.0];
            comp.process_frame(&mut frame);
            last = frame;
        }
        // Settles near -11.4 dB of reduction
        assert!((comp.reduction_db() - (-11.4)).abs() < 0.1);
        assert!(last[0] < 0.3 && last[0] > 0.25);
        assert_eq!(last[0], last[1]);
    }

    #[test]
    fn test_release_recovers() {
        let mut comp = DynamicsCompressor::new(MASTER_BUS, 48000);
        for _ in 0..2400 {
            comp.process_frame(&mut [1.0f32]);
        }
        let compressed = comp.reduction_db();
        // Two seconds is eight release time constants
        for _ in 0..96000 {
            comp.process_frame(&mut [0.0f32]);
        }
        assert!(comp.reduction_db() > compressed);
        assert!(comp.reduction_db() > -0.1);
    }
}
