use log::warn;
use std::cmp::Ordering;
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic interval loop. `tick()` sleeps until the next boundary and
/// returns false when the previous iteration overran the interval.
pub struct Loop {
    next_iter: Instant,
    interval: Duration,
}

impl Loop {
    pub fn prepare(interval: Duration) -> Self {
        Loop {
            next_iter: Instant::now() + interval,
            interval,
        }
    }

    pub fn tick(&mut self) -> bool {
        let t = Instant::now();
        let result = match t.cmp(&self.next_iter) {
            Ordering::Greater => false,
            Ordering::Equal => true,
            Ordering::Less => {
                thread::sleep(self.next_iter - t);
                true
            }
        };
        if result {
            self.next_iter += self.interval;
        } else {
            self.next_iter = Instant::now() + self.interval;
            warn!(
                "loop timeout ({:?} + {:?})",
                self.interval,
                self.next_iter.elapsed()
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_paces_iterations() {
        let mut int = Loop::prepare(Duration::from_millis(20));
        let start = Instant::now();
        assert!(int.tick());
        assert!(int.tick());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn overrun_reports_false() {
        let mut int = Loop::prepare(Duration::from_millis(5));
        thread::sleep(Duration::from_millis(15));
        assert!(!int.tick());
        // recovers on the next boundary
        assert!(int.tick());
    }
}
