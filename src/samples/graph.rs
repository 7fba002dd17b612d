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

//! Owns the audio context, the loaded sample and the fade control.
//!
//! The context is opened lazily on first use. If the device refuses to open,
//! the graph stays unavailable for the rest of the session.

use std::sync::Arc;

use tracing::{error, info};

use super::error::{DecodeError, EngineError};
use super::fade::FadeControl;
use super::loader::{decode, SampleBuffer};
use crate::audio::{AudioContext, Device};

enum GraphState {
    Uninitialized,
    Ready(AudioContext),
    Unavailable(String),
}

/// The audio graph: device context, master bus (inside the mixer), current
/// buffer and fade time.
pub struct AudioGraph {
    device: Arc<dyn Device>,
    state: GraphState,
    buffer: Option<SampleBuffer>,
    fade: FadeControl,
}

impl AudioGraph {
    /// Creates a graph for the device. Nothing is opened until first use.
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            state: GraphState::Uninitialized,
            buffer: None,
            fade: FadeControl::default(),
        }
    }

    /// Opens the audio context on first call. Later calls return the same
    /// context, or the original failure without retrying.
    pub fn ensure_graph(&mut self) -> Result<&AudioContext, EngineError> {
        if let GraphState::Uninitialized = self.state {
            self.state = match AudioContext::new(self.device.as_ref()) {
                Ok(context) => GraphState::Ready(context),
                Err(e) => {
                    error!(device = %self.device, err = %e, "Unable to open audio output");
                    GraphState::Unavailable(e.to_string())
                }
            };
        }

        match &self.state {
            GraphState::Ready(context) => Ok(context),
            GraphState::Unavailable(reason) => Err(EngineError::AudioUnavailable(reason.clone())),
            GraphState::Uninitialized => Err(EngineError::AudioUnavailable(
                "audio context was not initialized".to_string(),
            )),
        }
    }

    /// Decodes the payload off the control path and installs it as the
    /// current buffer. On failure the previous buffer stays installed.
    pub async fn load_buffer(
        &mut self,
        bytes: Vec<u8>,
        extension: Option<String>,
    ) -> Result<&SampleBuffer, EngineError> {
        self.ensure_graph()?;

        let buffer = tokio::task::spawn_blocking(move || decode(bytes, extension.as_deref()))
            .await
            .map_err(|e| DecodeError::Task(e.to_string()))??;

        self.fade.on_buffer_changed(buffer.duration_secs());
        info!(
            duration_ms = buffer.duration().as_millis(),
            fade_out_secs = self.fade.seconds(),
            "Sample installed"
        );
        Ok(&*self.buffer.insert(buffer))
    }

    /// The running context, if the graph has been opened.
    pub fn context(&self) -> Option<&AudioContext> {
        match &self.state {
            GraphState::Ready(context) => Some(context),
            _ => None,
        }
    }

    /// Returns true once opening the device has failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self.state, GraphState::Unavailable(_))
    }

    /// The currently installed buffer.
    pub fn buffer(&self) -> Option<&SampleBuffer> {
        self.buffer.as_ref()
    }

    /// Duration of the installed buffer in seconds.
    pub fn current_duration(&self) -> Option<f64> {
        self.buffer.as_ref().map(SampleBuffer::duration_secs)
    }

    pub fn fade(&self) -> &FadeControl {
        &self.fade
    }

    pub fn fade_mut(&mut self) -> &mut FadeControl {
        &mut self.fade
    }
}
