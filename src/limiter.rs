//! Frame rate gate
//!
//! One limiter runs per pipeline at the fastest rate any active consumer asks
//! for. Consumers that asked for a slower rate receive more frames than they
//! strictly need.

use std::time::{Duration, Instant};

/// Time gate deciding whether an arriving frame is processed
#[derive(Debug, Clone, Default)]
pub struct UpdateLimiter {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl UpdateLimiter {
    /// Create a limiter with the given minimum interval (zero = unlimited)
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Interval for a target frame rate (zero fps = unlimited)
    pub fn interval_for_fps(fps: f64) -> Duration {
        if fps > 0.0 {
            Duration::from_secs_f64(1.0 / fps)
        } else {
            Duration::ZERO
        }
    }

    /// Combined interval for a set of consumer intervals
    ///
    /// Any unlimited consumer disables limiting; otherwise the shortest
    /// requested interval wins.
    pub fn combined_interval<I>(intervals: I) -> Duration
    where
        I: IntoIterator<Item = Duration>,
    {
        let mut combined: Option<Duration> = None;
        for interval in intervals {
            if interval.is_zero() {
                return Duration::ZERO;
            }
            combined = Some(combined.map_or(interval, |c| c.min(interval)));
        }
        combined.unwrap_or(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Change the interval, keeping the last accepted time
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Decide whether a frame arriving at `now` passes the gate
    ///
    /// Accepted frames restart the interval.
    pub fn should_process(&mut self, now: Instant) -> bool {
        if self.is_active() {
            if let Some(last) = self.last_accepted {
                if now.saturating_duration_since(last) < self.interval {
                    return false;
                }
            }
        }
        self.last_accepted = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_accepts_everything() {
        let mut limiter = UpdateLimiter::default();
        let now = Instant::now();

        assert!(!limiter.is_active());
        assert!(limiter.should_process(now));
        assert!(limiter.should_process(now));
    }

    #[test]
    fn test_interval_gate() {
        let mut limiter = UpdateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(limiter.should_process(t0));
        assert!(!limiter.should_process(t0 + Duration::from_millis(40)));
        assert!(!limiter.should_process(t0 + Duration::from_millis(99)));
        assert!(limiter.should_process(t0 + Duration::from_millis(100)));
        // Dropped frames do not move the reference point
        assert!(!limiter.should_process(t0 + Duration::from_millis(150)));
        assert!(limiter.should_process(t0 + Duration::from_millis(200)));
    }

    #[test]
    fn test_combined_interval() {
        let ms = Duration::from_millis;

        assert_eq!(UpdateLimiter::combined_interval(Vec::new()), Duration::ZERO);
        assert_eq!(UpdateLimiter::combined_interval(vec![ms(50), ms(20), ms(100)]), ms(20));
        assert_eq!(UpdateLimiter::combined_interval(vec![ms(50), Duration::ZERO]), Duration::ZERO);
    }

    #[test]
    fn test_interval_for_fps() {
        assert_eq!(UpdateLimiter::interval_for_fps(0.0), Duration::ZERO);
        assert_eq!(UpdateLimiter::interval_for_fps(10.0), Duration::from_millis(100));
    }
}
