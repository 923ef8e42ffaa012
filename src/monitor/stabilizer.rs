//! Per-stream object count debouncing.
//!
//! Raw per-frame counts jitter as the detector drops and regains objects. A
//! count is only trusted once the same value has been observed `threshold`
//! times in a row; the confirmed count then moves to it and the cumulative
//! total grows by any increase. The streak starts over after every commit.

pub const DEFAULT_DEBOUNCE_THRESHOLD: u32 = 5;

/// A confirmed-count change that passed the debounce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Commit {
    /// Frame number (0-based, per stream) at which the commit happened.
    pub frame_no: u64,
    pub previous: u32,
    pub count: u32,
}

impl Commit {
    /// Number of objects that appeared with this commit.
    pub fn new_objects(&self) -> u32 {
        self.count.saturating_sub(self.previous)
    }

    pub fn changed(&self) -> bool {
        self.count != self.previous
    }
}

#[derive(Clone, Debug)]
pub struct CountStabilizer {
    threshold: u32,
    candidate_count: u32,
    candidate_confidence: u32,
    last_correct_count: u32,
    total_count: u64,
    frames: u64,
}

impl CountStabilizer {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            candidate_count: 0,
            candidate_confidence: 0,
            last_correct_count: 0,
            total_count: 0,
            frames: 0,
        }
    }

    /// Feed one raw count. Returns the commit when the debounce fires.
    pub fn observe(&mut self, raw: u32) -> Option<Commit> {
        if raw == self.candidate_count {
            self.candidate_confidence += 1;
        } else {
            self.candidate_count = raw;
            self.candidate_confidence = 1;
        }

        let frame_no = self.frames;
        self.frames += 1;
        if self.candidate_confidence != self.threshold {
            return None;
        }

        self.candidate_confidence = 0;
        let commit = Commit {
            frame_no,
            previous: self.last_correct_count,
            count: raw,
        };
        self.total_count += u64::from(commit.new_objects());
        self.last_correct_count = raw;
        Some(commit)
    }

    /// Debounced count currently on screen.
    pub fn confirmed_count(&self) -> u32 {
        self.last_correct_count
    }

    /// Sum of all confirmed increases; never decreases.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn candidate(&self) -> (u32, u32) {
        (self.candidate_count, self.candidate_confidence)
    }

    /// Frames observed so far, committed or not.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for CountStabilizer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_THRESHOLD)
    }
}
