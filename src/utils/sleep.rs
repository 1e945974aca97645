//! Sleep utilities

use std::time::Duration;

/// Block the current thread for `duration`, returning immediately for zero.
pub fn sleep_for(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}
