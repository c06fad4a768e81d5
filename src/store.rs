//! bounded reading history, oldest first.
//!
//! appends evict the oldest reading once the cap is exceeded. a wholesale
//! `replace` (a live sheet re-fetch) is not capped.

use std::collections::VecDeque;

use crate::domain::Reading;

pub const DEFAULT_CAP: usize = 50;

#[derive(Clone, Debug)]
pub struct ReadingStore {
    readings: VecDeque<Reading>,
    cap: usize,
}

impl ReadingStore {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { readings: VecDeque::with_capacity(cap), cap }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// append one reading, dropping the oldest ones past the cap
    pub fn push(&mut self, reading: Reading) {
        self.readings.push_back(reading);
        while self.readings.len() > self.cap {
            self.readings.pop_front();
        }
    }

    pub fn replace(&mut self, readings: Vec<Reading>) {
        self.readings = readings.into();
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// owned copy for rendering
    pub fn snapshot(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }

    /// the most recent `n` readings, oldest first
    pub fn recent(&self, n: usize) -> Vec<Reading> {
        let skip = self.readings.len().saturating_sub(n);
        self.readings.iter().skip(skip).cloned().collect()
    }
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAP)
    }
}
