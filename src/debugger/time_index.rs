//! Transcript line to execution time mapping
//!
//! ocamldebug counts executed events ("time") and can jump to any of them
//! with `goto <t>`. Each stop is stamped with the last reported time at the
//! transcript line where it happened, so a line of the transcript can be
//! turned back into a time to travel to.

use std::collections::BTreeMap;

/// Time counter value before the first report
pub const UNKNOWN_TIME: i64 = -1;

#[derive(Debug, Clone)]
pub struct TimeIndex {
    lines: BTreeMap<usize, i64>,
    current: i64,
}

impl Default for TimeIndex {
    fn default() -> Self {
        Self {
            lines: BTreeMap::new(),
            current: UNKNOWN_TIME,
        }
    }
}

impl TimeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last reported time, or [`UNKNOWN_TIME`]
    pub fn current(&self) -> i64 {
        self.current
    }

    /// A time report arrived
    pub fn set_current(&mut self, time: i64) {
        self.current = time;
    }

    /// Stamp the current time at `line`; returns the time recorded, if known
    pub fn stamp(&mut self, line: usize) -> Option<i64> {
        if self.current < 0 {
            return None;
        }
        self.lines.insert(line, self.current);
        Some(self.current)
    }

    /// Time recorded at `line` exactly
    pub fn get(&self, line: usize) -> Option<i64> {
        self.lines.get(&line).copied()
    }

    /// Time recorded at the closest line at or before `line`
    pub fn at_or_before(&self, line: usize) -> Option<(usize, i64)> {
        self.lines
            .range(..=line)
            .next_back()
            .map(|(&l, &t)| (l, t))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Forget everything, including the current time
    pub fn clear(&mut self) {
        self.lines.clear();
        self.current = UNKNOWN_TIME;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_needs_a_known_time() {
        let mut index = TimeIndex::new();
        assert_eq!(index.stamp(3), None);
        assert!(index.is_empty());

        index.set_current(12);
        assert_eq!(index.stamp(3), Some(12));
        assert_eq!(index.get(3), Some(12));
    }

    #[test]
    fn test_overwrite_and_non_monotonic_time() {
        let mut index = TimeIndex::new();
        index.set_current(40);
        index.stamp(10);
        index.set_current(35);
        index.stamp(12);
        index.set_current(7);
        index.stamp(10);

        assert_eq!(index.get(10), Some(7));
        assert_eq!(index.get(12), Some(35));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_at_or_before() {
        let mut index = TimeIndex::new();
        index.set_current(5);
        index.stamp(4);
        index.set_current(9);
        index.stamp(10);

        assert_eq!(index.at_or_before(3), None);
        assert_eq!(index.at_or_before(4), Some((4, 5)));
        assert_eq!(index.at_or_before(9), Some((4, 5)));
        assert_eq!(index.at_or_before(100), Some((10, 9)));
    }

    #[test]
    fn test_clear_resets_current_time() {
        let mut index = TimeIndex::new();
        index.set_current(20);
        index.stamp(1);
        index.clear();

        assert!(index.is_empty());
        assert_eq!(index.current(), UNKNOWN_TIME);
        assert_eq!(index.stamp(2), None);
    }
}
