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
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Represents the current cancel state.
#[derive(PartialEq)]
enum CancelState {
    Untouched,
    Cancelled,
}

/// A cancel handle is passed to an input driver when it is attached. It's the driver's
/// responsibility to stop sending events once it has been cancelled.
#[derive(Clone)]
pub struct CancelHandle {
    /// Set to Cancelled once the underlying listener should stop.
    cancelled: Arc<Mutex<CancelState>>,
    /// The condvar will handle notification of cancelling.
    condvar: Arc<Condvar>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(Mutex::new(CancelState::Untouched)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true if the listener has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock() == CancelState::Cancelled
    }

    /// Waits for the cancel handle to be cancelled.
    pub fn wait(&self) {
        let mut cancelled = self.cancelled.lock();
        self.condvar
            .wait_while(&mut cancelled, |cancelled| *cancelled == CancelState::Untouched);
    }

    /// Waits up to the timeout for cancellation. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.cancelled.lock();
        self.condvar.wait_while_for(
            &mut cancelled,
            |cancelled| *cancelled == CancelState::Untouched,
            timeout,
        );
        *cancelled == CancelState::Cancelled
    }

    /// Cancel the listener.
    pub fn cancel(&self) {
        let mut cancel_state = self.cancelled.lock();
        if *cancel_state == CancelState::Untouched {
            *cancel_state = CancelState::Cancelled;
            self.condvar.notify_all();
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_cancel_handle_cancelled() {
        let cancel_handle = CancelHandle::new();
        assert!(!cancel_handle.is_cancelled());

        let join = {
            let cancel_handle = cancel_handle.clone();
            thread::spawn(move || cancel_handle.wait())
        };

        cancel_handle.cancel();
        assert!(join.join().is_ok());
        assert!(cancel_handle.is_cancelled());
    }

    #[test]
    fn test_cancel_handle_timeout() {
        let cancel_handle = CancelHandle::new();
        assert!(!cancel_handle.wait_timeout(Duration::from_millis(10)));

        cancel_handle.cancel();
        // Cancelling twice is harmless
        cancel_handle.cancel();
        assert!(cancel_handle.wait_timeout(Duration::from_millis(10)));
    }
}
