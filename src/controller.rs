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
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{debug, error, info, info_span, Instrument};

use crate::keymap::PhysicalKey;
use crate::playsync::CancelHandle;
use crate::samples::SampleEngine;

pub mod keyboard;
pub mod router;

pub use router::{Disposition, InputRouter};

/// Capacity of the channel between a driver and the controller.
const EVENT_BUFFER: usize = 64;

/// Whether a key went down or came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Down,
    Up,
}

/// Where input focus was when a key event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    /// No entry field has focus; keys play notes.
    #[default]
    Document,
    /// A free-text entry field.
    TextInput,
    /// A numeric entry field.
    NumberInput,
}

/// A physical key press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: PhysicalKey,
    pub action: KeyAction,
    /// True for auto-repeated key-downs while the key is held.
    pub repeat: bool,
    pub focus: Focus,
}

/// Controller events that will trigger behavior in the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A key went down or up.
    Key(KeyEvent),

    /// Sets the release time in seconds. Out-of-range values are clamped.
    SetFadeOut(f64),

    /// Loads a new sample from disk. On success the input listener is reattached.
    LoadSample(PathBuf),

    /// Stops every voice and exits.
    Quit,
}

/// A source of controller events.
pub trait Driver: Send + Sync + 'static {
    /// Starts delivering events until the cancel handle is cancelled.
    fn monitor_events(
        &self,
        events_tx: Sender<Event>,
        cancel: CancelHandle,
    ) -> JoinHandle<Result<(), io::Error>>;
}

/// Drives the sample engine from a driver's events.
pub struct Controller {
    handle: JoinHandle<SampleEngine>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(engine: SampleEngine, router: InputRouter, driver: Arc<dyn Driver>) -> Controller {
        Controller {
            handle: tokio::spawn(
                Controller::handle_events(engine, router, driver).instrument(info_span!("controller")),
            ),
        }
    }

    /// Join will block until the controller finishes. Returns the engine.
    pub async fn join(&mut self) -> Result<SampleEngine, JoinError> {
        (&mut self.handle).await
    }

    /// Dispatches events from the driver until asked to quit or the driver
    /// closes its channel.
    async fn handle_events(
        mut engine: SampleEngine,
        mut router: InputRouter,
        driver: Arc<dyn Driver>,
    ) -> SampleEngine {
        let mut events_rx = Controller::attach(&mut router, driver.as_ref());
        let mut pending: VecDeque<Event> = VecDeque::new();

        info!(
            duration_secs = engine.current_duration(),
            fade_out_secs = engine.fade_out_seconds(),
            "Controller started."
        );

        loop {
            let event = match pending.pop_front() {
                Some(event) => event,
                None => match events_rx.recv().await {
                    Some(event) => event,
                    None => {
                        info!("Input listener closed.");
                        break;
                    }
                },
            };

            match event {
                Event::Key(key_event) => {
                    let disposition = router.route(&key_event, &mut engine);
                    debug!(?key_event, ?disposition, "Routed key event.");
                }
                Event::SetFadeOut(seconds) => {
                    let applied = engine.set_fade_out(seconds);
                    info!(requested = seconds, applied, "Fade out changed.");
                }
                Event::LoadSample(path) => match engine.load_file(&path).await {
                    Ok(buffer) => {
                        info!(
                            path = %path.display(),
                            duration_ms = buffer.duration().as_millis(),
                            "Sample loaded."
                        );
                        Controller::detach(&mut router, &mut engine, &mut events_rx, &mut pending)
                            .await;
                        events_rx = Controller::attach(&mut router, driver.as_ref());
                    }
                    Err(e) => error!(path = %path.display(), err = %e, "Unable to load sample."),
                },
                Event::Quit => break,
            }
        }

        Controller::detach(&mut router, &mut engine, &mut events_rx, &mut pending).await;
        info!("Controller closing.");
        engine
    }

    /// Installs the driver on a fresh channel. Only the driver holds the sender.
    fn attach(router: &mut InputRouter, driver: &dyn Driver) -> mpsc::Receiver<Event> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        router.install(driver, events_tx);
        events_rx
    }

    /// Stops every voice and detaches the input listener, waiting for it to
    /// exit. The channel is drained meanwhile so a driver blocked on a full
    /// channel can notice the cancel. Key events drained here are dropped;
    /// anything else is queued in `pending`.
    async fn detach(
        router: &mut InputRouter,
        engine: &mut SampleEngine,
        events_rx: &mut mpsc::Receiver<Event>,
        pending: &mut VecDeque<Event>,
    ) {
        engine.stop_all();
        let Some(mut handle) = router.uninstall() else {
            return;
        };

        let result = loop {
            tokio::select! {
                result = &mut handle => break result,
                Some(event) = events_rx.recv() => Controller::hold(event, pending),
            }
        };
        while let Ok(event) = events_rx.try_recv() {
            Controller::hold(event, pending);
        }

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Input listener failed: {}", e),
            Err(e) => error!("Error waiting for input listener to stop: {}", e),
        }
    }

    fn hold(event: Event, pending: &mut VecDeque<Event>) {
        match event {
            Event::Key(key_event) => debug!(?key_event, "Dropped key event while detaching."),
            other => pending.push_back(other),
        }
    }
}
