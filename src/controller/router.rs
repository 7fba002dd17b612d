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

//! Turns key events into note triggers and releases.

use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{debug, info};

use super::{Driver, Event, Focus, KeyAction, KeyEvent};
use crate::keymap::KeyPitchMap;
use crate::playsync::CancelHandle;
use crate::samples::SampleEngine;

/// What happened to a routed key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The event played or released a note; default handling should be suppressed.
    Consumed,
    /// The event was not for the instrument.
    Ignored,
}

/// An attached driver.
struct Listener {
    cancel: CancelHandle,
    handle: JoinHandle<Result<(), io::Error>>,
}

/// Routes key events to the engine and owns the attached input driver.
pub struct InputRouter {
    keymap: KeyPitchMap,
    listener: Option<Listener>,
}

impl InputRouter {
    /// Creates a router with no driver attached.
    pub fn new(keymap: KeyPitchMap) -> Self {
        Self {
            keymap,
            listener: None,
        }
    }

    /// Applies one key event to the engine.
    pub fn route(&self, event: &KeyEvent, engine: &mut SampleEngine) -> Disposition {
        if matches!(event.focus, Focus::TextInput | Focus::NumberInput) {
            return Disposition::Ignored;
        }
        if event.repeat && event.action == KeyAction::Down {
            return Disposition::Ignored;
        }

        let Some(pitch) = self.keymap.pitch_for(event.key) else {
            return Disposition::Ignored;
        };

        match event.action {
            KeyAction::Down => engine.trigger(event.key, pitch),
            KeyAction::Up => engine.release(event.key),
        }
        Disposition::Consumed
    }

    /// Attaches a driver, cancelling any previously attached one first so a
    /// key press is never delivered twice.
    pub fn install(&mut self, driver: &dyn Driver, events_tx: Sender<Event>) {
        if self.uninstall().is_some() {
            debug!("Replaced previous input listener");
        }

        let cancel = CancelHandle::new();
        let handle = driver.monitor_events(events_tx, cancel.clone());
        self.listener = Some(Listener { cancel, handle });
        info!(keys = self.keymap.len(), "Input listener attached");
    }

    /// Detaches the current driver. Returns its task so the caller may wait
    /// for it to finish.
    pub fn uninstall(&mut self) -> Option<JoinHandle<Result<(), io::Error>>> {
        let listener = self.listener.take()?;
        listener.cancel.cancel();
        Some(listener.handle)
    }

    /// Returns true if a driver is attached.
    pub fn is_installed(&self) -> bool {
        self.listener.is_some()
    }
}

impl Drop for InputRouter {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::audio::mock;
    use crate::keymap::PhysicalKey;
    use crate::testutil::{eventually_async, wav_bytes};

    async fn loaded_engine() -> SampleEngine {
        let mut engine = SampleEngine::new(Arc::new(mock::Device::get("mock", 1, 1000)));
        engine
            .load_buffer(wav_bytes(1.0, 1000, 1), None)
            .await
            .unwrap();
        engine
    }

    fn key(key: PhysicalKey, action: KeyAction) -> KeyEvent {
        KeyEvent {
            key,
            action,
            repeat: false,
            focus: Focus::Document,
        }
    }

    #[tokio::test]
    async fn test_route_trigger_and_release() {
        let mut engine = loaded_engine().await;
        let router = InputRouter::new(KeyPitchMap::default());

        let down = key(PhysicalKey::KeyK, KeyAction::Down);
        assert_eq!(router.route(&down, &mut engine), Disposition::Consumed);
        let voice = engine.voice_for(PhysicalKey::KeyK).unwrap();
        assert_eq!(voice.pitch(), 72);

        let up = key(PhysicalKey::KeyK, KeyAction::Up);
        assert_eq!(router.route(&up, &mut engine), Disposition::Consumed);
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[tokio::test]
    async fn test_auto_repeat_is_suppressed() {
        let mut engine = loaded_engine().await;
        let router = InputRouter::new(KeyPitchMap::default());

        router.route(&key(PhysicalKey::KeyA, KeyAction::Down), &mut engine);
        let first_id = engine.voice_for(PhysicalKey::KeyA).and_then(|v| v.id());

        let repeat = KeyEvent {
            repeat: true,
            ..key(PhysicalKey::KeyA, KeyAction::Down)
        };
        for _ in 0..5 {
            assert_eq!(router.route(&repeat, &mut engine), Disposition::Ignored);
        }
        assert_eq!(engine.active_voice_count(), 1);
        assert_eq!(
            engine.voice_for(PhysicalKey::KeyA).and_then(|v| v.id()),
            first_id
        );
    }

    #[tokio::test]
    async fn test_text_focus_is_suppressed() {
        let mut engine = loaded_engine().await;
        let router = InputRouter::new(KeyPitchMap::default());

        for focus in [Focus::TextInput, Focus::NumberInput] {
            let event = KeyEvent {
                focus,
                ..key(PhysicalKey::KeyA, KeyAction::Down)
            };
            assert_eq!(router.route(&event, &mut engine), Disposition::Ignored);
        }
        assert_eq!(engine.active_voice_count(), 0);

        // Once the field closes the same key plays
        let event = key(PhysicalKey::KeyA, KeyAction::Down);
        assert_eq!(router.route(&event, &mut engine), Disposition::Consumed);
    }

    #[tokio::test]
    async fn test_unmapped_keys_are_ignored() {
        let mut engine = loaded_engine().await;
        let router = InputRouter::new(KeyPitchMap::default());

        let down = key(PhysicalKey::Digit1, KeyAction::Down);
        assert_eq!(router.route(&down, &mut engine), Disposition::Ignored);
        let up = key(PhysicalKey::Space, KeyAction::Up);
        assert_eq!(router.route(&up, &mut engine), Disposition::Ignored);
        assert_eq!(engine.active_voice_count(), 0);
    }

    /// Counts how many of its listeners are still running.
    struct CountingDriver {
        running: Arc<AtomicUsize>,
    }

    impl Driver for CountingDriver {
        fn monitor_events(
            &self,
            _events_tx: Sender<Event>,
            cancel: CancelHandle,
        ) -> JoinHandle<Result<(), io::Error>> {
            let running = self.running.clone();
            running.fetch_add(1, Ordering::SeqCst);
            tokio::task::spawn_blocking(move || {
                cancel.wait();
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_install_replaces_listener() {
        let running = Arc::new(AtomicUsize::new(0));
        let driver = CountingDriver {
            running: running.clone(),
        };
        let (events_tx, _events_rx) = mpsc::channel(8);
        let mut router = InputRouter::new(KeyPitchMap::default());
        assert!(!router.is_installed());

        router.install(&driver, events_tx.clone());
        router.install(&driver, events_tx.clone());
        router.install(&driver, events_tx);
        assert!(router.is_installed());

        eventually_async(
            || {
                let running = running.clone();
                async move { running.load(Ordering::SeqCst) == 1 }
            },
            "Old listeners were never cancelled",
        )
        .await;

        let handle = router.uninstall().unwrap();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert!(!router.is_installed());
        assert!(router.uninstall().is_none());
    }
}
