// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Panics as structured log events, and an optional watchdog for deadlocked
//! `parking_lot` locks (feature `deadlock_detection`).

use std::panic;

use backtrace::Backtrace;

/// Wraps the current panic hook so that every panic is also logged as an
/// `ERROR` event with its location, thread and backtrace.
pub fn set_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let backtrace = format!("{:?}", Backtrace::new());
        let thread = std::thread::current();
        let thread = thread.name().unwrap_or("<unnamed>");

        if let Some(location) = info.location() {
            tracing::error!(
                message = %info,
                thread,
                backtrace = %backtrace,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
            );
        } else {
            tracing::error!(message = %info, thread, backtrace = %backtrace);
        }
        default_hook(info);
    }));

    #[cfg(feature = "deadlock_detection")]
    spawn_deadlock_detector(std::time::Duration::from_secs(5));
}

/// Checks for deadlocked `parking_lot` mutexes every `interval` and logs the
/// threads involved.
#[cfg(feature = "deadlock_detection")]
pub fn spawn_deadlock_detector(interval: std::time::Duration) {
    let _ = std::thread::Builder::new()
        .name("deadlock-detector".to_string())
        .spawn(move || {
            loop {
                std::thread::sleep(interval);
                let deadlocks = parking_lot::deadlock::check_deadlock();
                if deadlocks.is_empty() {
                    continue;
                }

                tracing::error!(count = deadlocks.len(), "Deadlocks detected");
                for (i, threads) in deadlocks.iter().enumerate() {
                    for t in threads {
                        tracing::error!(
                            deadlock = i,
                            thread_id = ?t.thread_id(),
                            backtrace = ?t.backtrace(),
                            "Deadlocked thread"
                        );
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_hook_keeps_panic_payload() {
        set_panic_hook();

        let payload = std::thread::spawn(|| panic!("boom")).join().unwrap_err();

        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    }
}
