use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Pixel height of one rendered log line, and the top margin of the stats view.
pub const LINE_HEIGHT: u32 = 20;
pub const TOP_MARGIN: u32 = 15;

struct Inner {
    entries: VecDeque<String>,
    changed: bool,
}

/// Fixed-capacity log of recent detection events shared by every stream.
///
/// Every read and write happens under one lock. `changed` is set by appends
/// and cleared by `snapshot_if_changed` under the same lock, so a render never
/// misses an append that raced with it.
pub struct RollingLog {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl RollingLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                // Start dirty so the first render happens.
                changed: true,
            }),
        }
    }

    /// Capacity for a stats view `height` pixels tall.
    pub fn for_view_height(height: u32) -> Self {
        Self::new((height.saturating_sub(TOP_MARGIN) / LINE_HEIGHT) as usize)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append entries in order, evicting the oldest once full.
    pub fn append_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        let mut inner = self.lock()?;
        for entry in entries {
            if inner.entries.len() == self.capacity {
                inner.entries.pop_front();
            }
            inner.entries.push_back(entry);
        }
        inner.changed = true;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.entries.iter().cloned().collect())
    }

    /// Entries to render, or `None` when nothing changed since the last call.
    pub fn snapshot_if_changed(&self) -> Result<Option<Vec<String>>> {
        let mut inner = self.lock()?;
        if !inner.changed {
            return Ok(None);
        }
        inner.changed = false;
        Ok(Some(inner.entries.iter().cloned().collect()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("rolling log lock poisoned"))
    }
}
