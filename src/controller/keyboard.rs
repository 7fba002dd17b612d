// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
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

//! Terminal keyboard driver.
//!
//! Key presses are read in raw mode and mapped to physical keys assuming a US
//! QWERTY layout. Two entry fields are available: Enter opens a numeric field
//! for the fade-out time and Ctrl+L opens a text field for a sample path.
//! While a field is open, key events are still forwarded, marked with the
//! field's focus, so the router can ignore them.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, KeyCode, KeyEvent as TermKeyEvent, KeyEventKind, KeyModifiers,
    KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use tokio::sync::mpsc::error::TrySendError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::{Event, Focus, KeyAction, KeyEvent};
use crate::keymap::PhysicalKey;
use crate::playsync::CancelHandle;

/// How often the driver checks for cancellation while waiting for input.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for room in a full channel before checking for
/// cancellation again.
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Without release reporting, a press of the same key this soon after the
/// previous one is taken as auto-repeat. The first repeat after the
/// terminal's initial delay still retriggers.
const REPEAT_WINDOW: Duration = Duration::from_millis(100);

/// Maps a character to the physical key that produces it on a US QWERTY keyboard.
pub fn key_for_char(c: char) -> Option<PhysicalKey> {
    use PhysicalKey::*;

    let key = match c.to_ascii_lowercase() {
        '`' | '~' => Backquote,
        '1' | '!' => Digit1,
        '2' | '@' => Digit2,
        '3' | '#' => Digit3,
        '4' | '$' => Digit4,
        '5' | '%' => Digit5,
        '6' | '^' => Digit6,
        '7' | '&' => Digit7,
        '8' | '*' => Digit8,
        '9' | '(' => Digit9,
        '0' | ')' => Digit0,
        '-' | '_' => Minus,
        '=' | '+' => Equal,
        'q' => KeyQ,
        'w' => KeyW,
        'e' => KeyE,
        'r' => KeyR,
        't' => KeyT,
        'y' => KeyY,
        'u' => KeyU,
        'i' => KeyI,
        'o' => KeyO,
        'p' => KeyP,
        '[' | '{' => BracketLeft,
        ']' | '}' => BracketRight,
        '\\' | '|' => Backslash,
        'a' => KeyA,
        's' => KeyS,
        'd' => KeyD,
        'f' => KeyF,
        'g' => KeyG,
        'h' => KeyH,
        'j' => KeyJ,
        'k' => KeyK,
        'l' => KeyL,
        ';' | ':' => Semicolon,
        '\'' | '"' => Quote,
        'z' => KeyZ,
        'x' => KeyX,
        'c' => KeyC,
        'v' => KeyV,
        'b' => KeyB,
        'n' => KeyN,
        'm' => KeyM,
        ',' | '<' => Comma,
        '.' | '>' => Period,
        '/' | '?' => Slash,
        ' ' => Space,
        _ => return None,
    };
    Some(key)
}

/// An open entry field.
#[derive(Debug, Clone, PartialEq)]
enum Entry {
    FadeOut(String),
    SamplePath(String),
}

impl Entry {
    fn focus(&self) -> Focus {
        match self {
            Entry::FadeOut(_) => Focus::NumberInput,
            Entry::SamplePath(_) => Focus::TextInput,
        }
    }

    fn text_mut(&mut self) -> &mut String {
        match self {
            Entry::FadeOut(text) | Entry::SamplePath(text) => text,
        }
    }
}

/// Turns terminal key events into controller events.
#[derive(Debug)]
struct InputState {
    entry: Option<Entry>,
    /// False when the terminal reports auto-repeat as plain presses.
    reports_releases: bool,
    last_press: Option<(PhysicalKey, Instant)>,
}

impl InputState {
    fn new(reports_releases: bool) -> InputState {
        InputState {
            entry: None,
            reports_releases,
            last_press: None,
        }
    }

    /// Handles one terminal key event received at `at`, echoing entry
    /// fields to the writer.
    fn handle<W: Write>(
        &mut self,
        key: TermKeyEvent,
        at: Instant,
        writer: &mut W,
    ) -> io::Result<Option<Event>> {
        let pressed = key.kind != KeyEventKind::Release;

        if pressed
            && key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q'))
        {
            return Ok(Some(Event::Quit));
        }

        match self.entry.take() {
            None => self.handle_playing(key, at, writer),
            Some(entry) => self.handle_entry(entry, key, writer),
        }
    }

    fn handle_playing<W: Write>(
        &mut self,
        key: TermKeyEvent,
        at: Instant,
        writer: &mut W,
    ) -> io::Result<Option<Event>> {
        let pressed = key.kind != KeyEventKind::Release;
        match key.code {
            KeyCode::Esc if pressed => Ok(Some(Event::Quit)),
            KeyCode::Enter if pressed => {
                write!(writer, "\r\nFade out (seconds): ")?;
                writer.flush()?;
                self.entry = Some(Entry::FadeOut(String::new()));
                Ok(None)
            }
            KeyCode::Char('l') if pressed && key.modifiers.contains(KeyModifiers::CONTROL) => {
                write!(writer, "\r\nSample path: ")?;
                writer.flush()?;
                self.entry = Some(Entry::SamplePath(String::new()));
                Ok(None)
            }
            _ => Ok(key_event(key, Focus::Document)
                .map(|event| self.detect_repeat(event, at))
                .map(Event::Key)),
        }
    }

    /// Marks quick successive presses of one key as repeats when the
    /// terminal cannot say so itself.
    fn detect_repeat(&mut self, mut event: KeyEvent, at: Instant) -> KeyEvent {
        if self.reports_releases || event.action != KeyAction::Down {
            return event;
        }
        if let Some((key, last)) = self.last_press {
            if key == event.key && at.saturating_duration_since(last) < REPEAT_WINDOW {
                event.repeat = true;
            }
        }
        self.last_press = Some((event.key, at));
        event
    }

    fn handle_entry<W: Write>(
        &mut self,
        mut entry: Entry,
        key: TermKeyEvent,
        writer: &mut W,
    ) -> io::Result<Option<Event>> {
        let focus = entry.focus();
        if key.kind == KeyEventKind::Release {
            self.entry = Some(entry);
            return Ok(key_event(key, focus).map(Event::Key));
        }

        match key.code {
            KeyCode::Esc => {
                write!(writer, "\r\n")?;
                writer.flush()?;
                Ok(None)
            }
            KeyCode::Enter => {
                write!(writer, "\r\n")?;
                writer.flush()?;
                Ok(submit(entry))
            }
            KeyCode::Backspace => {
                if entry.text_mut().pop().is_some() {
                    write!(writer, "\x08 \x08")?;
                    writer.flush()?;
                }
                self.entry = Some(entry);
                Ok(None)
            }
            KeyCode::Char(c) => {
                entry.text_mut().push(c);
                write!(writer, "{}", c)?;
                writer.flush()?;
                self.entry = Some(entry);
                Ok(key_event(key, focus).map(Event::Key))
            }
            _ => {
                self.entry = Some(entry);
                Ok(None)
            }
        }
    }
}

/// Converts a submitted entry into an event.
fn submit(entry: Entry) -> Option<Event> {
    match entry {
        Entry::FadeOut(text) => match text.trim().parse::<f64>() {
            Ok(seconds) => Some(Event::SetFadeOut(seconds)),
            Err(_) => {
                warn!(input = %text, "Fade out must be a number of seconds");
                None
            }
        },
        Entry::SamplePath(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(Event::LoadSample(PathBuf::from(text)))
            }
        }
    }
}

/// Builds a key event for a character key.
fn key_event(key: TermKeyEvent, focus: Focus) -> Option<KeyEvent> {
    let KeyCode::Char(c) = key.code else {
        return None;
    };
    if key
        .modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
    {
        return None;
    }

    let (action, repeat) = match key.kind {
        KeyEventKind::Press => (KeyAction::Down, false),
        KeyEventKind::Repeat => (KeyAction::Down, true),
        KeyEventKind::Release => (KeyAction::Up, false),
    };
    Some(KeyEvent {
        key: key_for_char(c)?,
        action,
        repeat,
        focus,
    })
}

/// Keeps the terminal in raw mode, with key release reporting when the
/// terminal supports it. Restores the terminal on drop.
pub struct TerminalGuard {
    enhanced: bool,
}

impl TerminalGuard {
    /// Switches the terminal into raw mode.
    pub fn enable() -> io::Result<TerminalGuard> {
        enable_raw_mode()?;
        let enhanced = supports_keyboard_enhancement().unwrap_or(false);
        if enhanced {
            execute!(
                io::stdout(),
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                )
            )?;
        } else {
            warn!("Terminal does not report key releases; notes play out and held keys retrigger once");
        }
        Ok(TerminalGuard { enhanced })
    }

    /// Returns true if key releases and repeats are reported.
    pub fn reports_releases(&self) -> bool {
        self.enhanced
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.enhanced {
            let _ = execute!(io::stdout(), PopKeyboardEnhancementFlags);
        }
        let _ = disable_raw_mode();
    }
}

/// Delivers an event without blocking past cancellation. Returns false if
/// the driver was cancelled or the controller is gone.
fn forward(events_tx: &Sender<Event>, cancel: &CancelHandle, mut event: Event) -> bool {
    loop {
        match events_tx.try_send(event) {
            Ok(()) => return true,
            Err(TrySendError::Closed(_)) => return false,
            Err(TrySendError::Full(returned)) => {
                if cancel.wait_timeout(SEND_RETRY_INTERVAL) {
                    return false;
                }
                event = returned;
            }
        }
    }
}

/// A driver that plays the sampler from the terminal keyboard.
pub struct Driver {
    reports_releases: bool,
}

impl Driver {
    /// Creates a driver. `reports_releases` comes from the terminal guard.
    pub fn new(reports_releases: bool) -> Driver {
        Driver { reports_releases }
    }

    fn monitor_io<W: Write>(
        events_tx: &Sender<Event>,
        cancel: &CancelHandle,
        reports_releases: bool,
        mut writer: W,
    ) -> Result<(), io::Error> {
        let mut state = InputState::new(reports_releases);
        while !cancel.is_cancelled() {
            if !event::poll(POLL_INTERVAL)? {
                continue;
            }
            let event::Event::Key(key) = event::read()? else {
                continue;
            };

            if let Some(event) = state.handle(key, Instant::now(), &mut writer)? {
                if !forward(events_tx, cancel, event) {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl super::Driver for Driver {
    fn monitor_events(
        &self,
        events_tx: Sender<Event>,
        cancel: CancelHandle,
    ) -> JoinHandle<Result<(), io::Error>> {
        let reports_releases = self.reports_releases;
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            let result = Self::monitor_io(&events_tx, &cancel, reports_releases, io::stdout());
            if result.is_err() {
                // Without input there is nothing left to do.
                forward(&events_tx, &cancel, Event::Quit);
            }
            result
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crossterm::event::KeyEventState;

    fn term_key(code: KeyCode, modifiers: KeyModifiers, kind: KeyEventKind) -> TermKeyEvent {
        TermKeyEvent {
            code,
            modifiers,
            kind,
            state: KeyEventState::NONE,
        }
    }

    fn press(c: char) -> TermKeyEvent {
        term_key(KeyCode::Char(c), KeyModifiers::NONE, KeyEventKind::Press)
    }

    fn feed(state: &mut InputState, keys: &[TermKeyEvent]) -> Vec<Event> {
        let mut out = Vec::new();
        keys.iter()
            .filter_map(|key| state.handle(*key, Instant::now(), &mut out).unwrap())
            .collect()
    }

    fn repeats(state: &mut InputState, presses: &[(char, u64)]) -> Vec<bool> {
        let start = Instant::now();
        let mut out = Vec::new();
        presses
            .iter()
            .map(|(c, ms)| {
                let at = start + Duration::from_millis(*ms);
                match state.handle(press(*c), at, &mut out).unwrap() {
                    Some(Event::Key(event)) => event.repeat,
                    other => panic!("unexpected event {:?}", other),
                }
            })
            .collect()
    }

    #[test]
    fn test_key_for_char() {
        assert_eq!(key_for_char('a'), Some(PhysicalKey::KeyA));
        assert_eq!(key_for_char('A'), Some(PhysicalKey::KeyA));
        assert_eq!(key_for_char(':'), Some(PhysicalKey::Semicolon));
        assert_eq!(key_for_char('"'), Some(PhysicalKey::Quote));
        assert_eq!(key_for_char('<'), Some(PhysicalKey::Comma));
        assert_eq!(key_for_char('é'), None);
    }

    #[test]
    fn test_note_events() {
        let mut state = InputState::new(true);
        let events = feed(
            &mut state,
            &[
                press('a'),
                term_key(KeyCode::Char('a'), KeyModifiers::NONE, KeyEventKind::Repeat),
                term_key(KeyCode::Char('a'), KeyModifiers::NONE, KeyEventKind::Release),
            ],
        );

        let expected = |action, repeat| {
            Event::Key(KeyEvent {
                key: PhysicalKey::KeyA,
                action,
                repeat,
                focus: Focus::Document,
            })
        };
        assert_eq!(
            events,
            vec![
                expected(KeyAction::Down, false),
                expected(KeyAction::Down, true),
                expected(KeyAction::Up, false),
            ]
        );
    }

    #[test]
    fn test_fade_entry() {
        let mut state = InputState::new(true);
        let enter = term_key(KeyCode::Enter, KeyModifiers::NONE, KeyEventKind::Press);
        let events = feed(&mut state, &[enter, press('0'), press('.'), press('3'), enter]);

        // Typed characters are forwarded with the field's focus
        assert_eq!(events.len(), 4);
        for event in &events[..3] {
            match event {
                Event::Key(key) => assert_eq!(key.focus, Focus::NumberInput),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(events[3], Event::SetFadeOut(0.3));
        assert!(state.entry.is_none());
    }

    #[test]
    fn test_path_entry_and_cancel() {
        let mut state = InputState::new(true);
        let open = term_key(KeyCode::Char('l'), KeyModifiers::CONTROL, KeyEventKind::Press);
        let enter = term_key(KeyCode::Enter, KeyModifiers::NONE, KeyEventKind::Press);
        let backspace = term_key(KeyCode::Backspace, KeyModifiers::NONE, KeyEventKind::Press);
        let esc = term_key(KeyCode::Esc, KeyModifiers::NONE, KeyEventKind::Press);

        let events = feed(
            &mut state,
            &[open, press('x'), press('.'), press('w'), press('a'), press('v'), press('x'), backspace, enter],
        );
        assert_eq!(events.last(), Some(&Event::LoadSample(PathBuf::from("x.wav"))));

        // Escape closes the field without submitting, then quits
        let events = feed(&mut state, &[open, press('y'), esc]);
        assert!(events
            .iter()
            .all(|e| matches!(e, Event::Key(KeyEvent { focus: Focus::TextInput, .. }))));
        assert_eq!(feed(&mut state, &[esc]), vec![Event::Quit]);
    }

    #[test]
    fn test_bad_fade_entry_is_dropped() {
        let mut state = InputState::new(true);
        let enter = term_key(KeyCode::Enter, KeyModifiers::NONE, KeyEventKind::Press);
        let events = feed(&mut state, &[enter, press('x'), enter]);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Key(_)));
    }

    #[test]
    fn test_ctrl_c_quits() {
        let mut state = InputState::new(true);
        let ctrl_c = term_key(KeyCode::Char('c'), KeyModifiers::CONTROL, KeyEventKind::Press);
        assert_eq!(feed(&mut state, &[ctrl_c]), vec![Event::Quit]);
    }

    #[test]
    fn test_presses_without_release_reporting() {
        let mut state = InputState::new(false);
        let held = repeats(
            &mut state,
            &[('a', 0), ('a', 500), ('a', 530), ('a', 560), ('s', 570), ('a', 580)],
        );
        assert_eq!(held, vec![false, false, true, true, false, false]);

        // Terminals that report repeats are trusted as is
        let mut state = InputState::new(true);
        assert_eq!(repeats(&mut state, &[('a', 0), ('a', 10)]), vec![false, false]);
    }

    #[test]
    fn test_forward_gives_up_when_cancelled() {
        let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(1);
        let cancel = CancelHandle::new();

        assert!(forward(&events_tx, &cancel, Event::SetFadeOut(0.1)));

        // The channel is full; cancelling releases the sender
        let canceller = cancel.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });
        assert!(!forward(&events_tx, &cancel, Event::Quit));
        thread.join().unwrap();
        assert_eq!(events_rx.try_recv().unwrap(), Event::SetFadeOut(0.1));

        // Room frees up before the cancel
        let cancel = CancelHandle::new();
        assert!(forward(&events_tx, &cancel, Event::Quit));
        assert_eq!(events_rx.try_recv().unwrap(), Event::Quit);
        drop(events_rx);
        assert!(!forward(&events_tx, &cancel, Event::Quit));
    }
}
