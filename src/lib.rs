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

//! A keyboard-played polyphonic sampler. Each key plays the loaded sample
//! transposed to the key's pitch.

pub mod audio;
pub mod config;
pub mod controller;
pub mod keymap;
pub mod playsync;
pub mod samples;
#[cfg(test)]
mod testutil;
