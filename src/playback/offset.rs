//! Shared presentation-time offset
//!
//! Both decode threads rebase their timestamps with one offset per playback
//! segment. The first unit to arrive after an open or seek, from either
//! stream, latches `offset = first_pts - expected_start`; every later unit in
//! the segment, from both streams, is rebased with that same value.

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct OffsetState {
    expected_start: f64,
    offset: Option<f64>,
}

/// Session-wide pts offset
#[derive(Debug, Default)]
pub struct PtsOffset {
    state: Mutex<OffsetState>,
}

impl PtsOffset {
    pub fn new(expected_start: f64) -> Self {
        Self {
            state: Mutex::new(OffsetState { expected_start, offset: None }),
        }
    }

    /// Start a new segment beginning at `expected_start`
    pub fn reset(&self, expected_start: f64) {
        let mut state = self.state.lock();
        state.expected_start = expected_start;
        state.offset = None;
    }

    /// Rebase a stream pts, latching the offset on first use in the segment
    pub fn rebase(&self, pts: f64) -> f64 {
        let mut state = self.state.lock();
        let expected_start = state.expected_start;
        let offset = *state.offset.get_or_insert(pts - expected_start);
        pts - offset
    }

    pub fn expected_start(&self) -> f64 {
        self.state.lock().expected_start
    }

    /// Latched offset, `None` until the first unit of the segment
    pub fn offset(&self) -> Option<f64> {
        self.state.lock().offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_unit_latches() {
        let offset = PtsOffset::new(0.0);
        assert_eq!(offset.offset(), None);

        assert_eq!(offset.rebase(1.4), 0.0);
        assert_eq!(offset.rebase(2.4), 1.0);
        assert_eq!(offset.offset(), Some(1.4));
    }

    #[test]
    fn test_streams_share_one_zero_point() {
        let offset = PtsOffset::new(50.0);

        // audio arrives first, video's earlier keyframe-aligned unit follows
        let audio = offset.rebase(49.99);
        let video = offset.rebase(49.967);
        assert!((audio - 50.0).abs() < 1e-9);
        assert!((video - (49.967 + 0.01)).abs() < 1e-9);
    }

    #[test]
    fn test_reset_starts_new_segment() {
        let offset = PtsOffset::new(0.0);
        offset.rebase(3.0);

        offset.reset(20.0);
        assert_eq!(offset.expected_start(), 20.0);
        assert_eq!(offset.offset(), None);
        assert_eq!(offset.rebase(20.0), 20.0);
    }
}
