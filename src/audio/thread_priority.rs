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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, info, warn};

/// Default priority for the render thread when KEYSAMPLER_THREAD_PRIORITY is unset.
const DEFAULT_RENDER_THREAD_PRIORITY: u8 = 70;

/// Reads KEYSAMPLER_THREAD_PRIORITY (0-99) once, before the render thread starts.
pub fn render_thread_priority() -> ThreadPriorityValue {
    parse_priority(std::env::var("KEYSAMPLER_THREAD_PRIORITY").ok().as_deref())
}

fn parse_priority(value: Option<&str>) -> ThreadPriorityValue {
    value
        .and_then(|v| v.trim().parse::<u8>().ok())
        .filter(|n| *n < 100)
        .and_then(|n| ThreadPriorityValue::try_from(n).ok())
        .unwrap_or_else(|| ThreadPriorityValue::try_from(DEFAULT_RENDER_THREAD_PRIORITY).unwrap())
}

fn flag_value(value: Option<&str>) -> bool {
    value
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for the render thread.
/// Enabled unless KEYSAMPLER_DISABLE_RT_AUDIO is set.
pub fn rt_audio_enabled() -> bool {
    !flag_value(std::env::var("KEYSAMPLER_DISABLE_RT_AUDIO").ok().as_deref())
}

/// Raises the priority of the calling thread. Failures are logged and otherwise ignored.
pub fn configure_render_thread_priority(priority: ThreadPriorityValue, rt_audio: bool) {
    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        debug!(error = ?e, "Unable to raise render thread priority");
    }

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!("Enabled RT SCHED_FIFO for render thread");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to set RT SCHED_FIFO for render thread"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_priority() {
        let default = ThreadPriorityValue::try_from(DEFAULT_RENDER_THREAD_PRIORITY).unwrap();
        assert_eq!(parse_priority(None), default);
        assert_eq!(
            parse_priority(Some(" 42 ")),
            ThreadPriorityValue::try_from(42u8).unwrap()
        );
        assert_eq!(parse_priority(Some("100")), default);
        assert_eq!(parse_priority(Some("loud")), default);
    }

    #[test]
    fn test_flag_value() {
        assert!(flag_value(Some("1")));
        assert!(flag_value(Some("TRUE")));
        assert!(flag_value(Some("on")));
        assert!(!flag_value(Some("0")));
        assert!(!flag_value(None));
    }
}
