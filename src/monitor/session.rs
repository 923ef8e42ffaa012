use std::sync::Mutex;

use super::rolling_log::RollingLog;

/// State shared between the orchestrator and every sink worker.
///
/// `rolling_log` carries its own lock. `display_lock` serializes preview
/// writes so the statistics view and stream snapshots never interleave.
pub struct Session {
    pub rolling_log: RollingLog,
    pub display_lock: Mutex<()>,
}

impl Session {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            rolling_log: RollingLog::new(log_capacity),
            display_lock: Mutex::new(()),
        }
    }

    /// Session whose rolling log fits a statistics view `height` pixels tall.
    pub fn for_view_height(height: u32) -> Self {
        Self {
            rolling_log: RollingLog::for_view_height(height),
            display_lock: Mutex::new(()),
        }
    }
}
