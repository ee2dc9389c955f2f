//! Wall-clock fallback for presentation timing
//!
//! Used when there is no audio master clock. The clock is anchored at the
//! pts of the first frame it is asked about and advances with elapsed wall
//! time scaled by playback speed, excluding time spent paused.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FallbackClock {
    anchor: Option<(f64, Instant)>,
    paused_since: Option<Instant>,
    paused_total: Duration,
    speed: f64,
}

impl FallbackClock {
    pub fn new(speed: f64) -> Self {
        Self {
            anchor: None,
            paused_since: None,
            paused_total: Duration::ZERO,
            speed,
        }
    }

    /// Current clock value, `None` until anchored
    pub fn now(&self) -> Option<f64> {
        self.value_at(Instant::now())
    }

    fn value_at(&self, now: Instant) -> Option<f64> {
        let (base, start) = self.anchor?;
        let mut paused = self.paused_total;
        if let Some(since) = self.paused_since {
            paused += now.saturating_duration_since(since);
        }
        let running = now.saturating_duration_since(start).saturating_sub(paused);
        Some(base + running.as_secs_f64() * self.speed)
    }

    /// Clock value for gating a frame at `pts`
    ///
    /// Anchors on first use and re-anchors when a frame earlier than the
    /// anchor shows up (a seek backwards or a new segment).
    pub fn gate(&mut self, pts: f64) -> f64 {
        let needs_anchor = match self.anchor {
            None => true,
            Some((base, _)) => pts < base,
        };
        if needs_anchor {
            self.anchor_at(pts);
        }
        self.now().unwrap_or(pts)
    }

    fn anchor_at(&mut self, pts: f64) {
        let now = Instant::now();
        self.anchor = Some((pts, now));
        self.paused_total = Duration::ZERO;
        if self.paused_since.is_some() {
            self.paused_since = Some(now);
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        match (paused, self.paused_since) {
            (true, None) => self.paused_since = Some(Instant::now()),
            (false, Some(since)) => {
                self.paused_total += since.elapsed();
                self.paused_since = None;
            }
            _ => {}
        }
    }

    /// Change speed without making the clock jump
    pub fn set_speed(&mut self, speed: f64) {
        if let Some(current) = self.now() {
            self.anchor_at(current);
        }
        self.speed = speed;
    }

    /// Forget the anchor, keeping pause state and speed
    pub fn reset(&mut self) {
        self.anchor = None;
        self.paused_total = Duration::ZERO;
        if self.paused_since.is_some() {
            self.paused_since = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_unanchored_clock_has_no_value() {
        assert_eq!(FallbackClock::new(1.0).now(), None);
    }

    #[test]
    fn test_gate_anchors_and_advances() {
        let mut clock = FallbackClock::new(1.0);
        assert_eq!(clock.gate(5.0), 5.0);

        sleep(Duration::from_millis(30));
        let value = clock.now().unwrap();
        assert!(value >= 5.03 && value < 5.5, "clock at {}", value);
    }

    #[test]
    fn test_earlier_frame_reanchors() {
        let mut clock = FallbackClock::new(1.0);
        clock.gate(10.0);
        let value = clock.gate(2.0);
        assert!((value - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_pause_freezes_clock() {
        let mut clock = FallbackClock::new(1.0);
        clock.gate(0.0);
        clock.set_paused(true);
        let frozen = clock.now().unwrap();

        sleep(Duration::from_millis(40));
        assert!((clock.now().unwrap() - frozen).abs() < 0.005);

        clock.set_paused(false);
        sleep(Duration::from_millis(20));
        assert!(clock.now().unwrap() > frozen);
    }

    #[test]
    fn test_speed_scales_elapsed_time() {
        let mut clock = FallbackClock::new(2.0);
        clock.gate(0.0);
        sleep(Duration::from_millis(50));
        let value = clock.now().unwrap();
        assert!(value >= 0.1 && value < 0.5, "clock at {}", value);
    }
}
