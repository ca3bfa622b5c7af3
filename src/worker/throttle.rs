use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Lets at most one sample through per interval; the first always passes
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn should_emit(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        match *last {
            Some(previous) if now.duration_since(previous) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_sample_per_interval() {
        let throttle = ProgressThrottle::new(Duration::from_millis(200));

        assert!(throttle.should_emit());
        assert!(!throttle.should_emit());

        std::thread::sleep(Duration::from_millis(250));
        assert!(throttle.should_emit());
        assert!(!throttle.should_emit());
    }

    #[test]
    fn test_zero_interval_passes_everything() {
        let throttle = ProgressThrottle::new(Duration::ZERO);
        assert!((0..10).all(|_| throttle.should_emit()));
    }
}
