//! Stabilization scheduling.

use std::time::{Duration, Instant};

/// Predecessor health checks run once every this many stabilization intervals.
const CHECK_PREDECESSOR_FACTOR: u32 = 3;

/// Stabilization schedule state
#[derive(Debug)]
pub struct Maintenance {
    interval: Duration,
    bits: u8,
    finger_routing: bool,
    last_stabilize: Instant,
    last_predecessor_check: Instant,
    next_finger: u8,
}

/// Decisions about one maintenance round
#[derive(Debug, PartialEq, Eq)]
pub struct MaintenanceDecisions {
    /// Whether to verify the successor and notify it.
    pub should_stabilize: bool,

    /// Finger to refresh, round-robin over `1..bits`.
    pub finger_to_fix: Option<u8>,

    /// Whether to ping the predecessor.
    pub should_check_predecessor: bool,
}

impl Maintenance {
    /// Create a new schedule. Nothing is due until `interval` elapses.
    pub fn new(interval: Duration, bits: u8, finger_routing: bool) -> Self {
        Maintenance {
            interval,
            bits,
            finger_routing,
            last_stabilize: Instant::now(),
            last_predecessor_check: Instant::now(),
            next_finger: 1,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Determine what maintenance operations should be performed.
    ///
    /// Computes decisions and resets internal timers when intervals elapse.
    pub fn decisions(&mut self) -> MaintenanceDecisions {
        self.decisions_at(Instant::now())
    }

    fn decisions_at(&mut self, now: Instant) -> MaintenanceDecisions {
        let should_stabilize = now.duration_since(self.last_stabilize) >= self.interval;
        let should_check_predecessor = now.duration_since(self.last_predecessor_check)
            >= self.interval * CHECK_PREDECESSOR_FACTOR;

        if should_stabilize {
            self.last_stabilize = now;
        }
        if should_check_predecessor {
            self.last_predecessor_check = now;
        }

        let finger_to_fix = if should_stabilize && self.finger_routing {
            self.next_finger()
        } else {
            None
        };

        MaintenanceDecisions {
            should_stabilize,
            finger_to_fix,
            should_check_predecessor,
        }
    }

    /// Finger 0 is the successor, which stabilization maintains itself.
    fn next_finger(&mut self) -> Option<u8> {
        if self.bits < 2 {
            return None;
        }

        let index = self.next_finger;
        self.next_finger = if index + 1 >= self.bits { 1 } else { index + 1 };

        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{Maintenance, MaintenanceDecisions, CHECK_PREDECESSOR_FACTOR};

    const INTERVAL: Duration = Duration::from_secs(1);

    #[test]
    fn nothing_due_before_interval() {
        let mut maintenance = Maintenance::new(INTERVAL, 6, true);

        assert_eq!(
            maintenance.decisions(),
            MaintenanceDecisions {
                should_stabilize: false,
                finger_to_fix: None,
                should_check_predecessor: false,
            }
        );
    }

    #[test]
    fn fingers_are_fixed_round_robin() {
        let mut maintenance = Maintenance::new(INTERVAL, 6, true);

        // Advance time forward instead of subtracting from Instant::now(), which
        // can overflow close to the platform's epoch.
        let mut now = Instant::now();
        let fixed: Vec<Option<u8>> = (0..7)
            .map(|_| {
                now += INTERVAL;
                maintenance.decisions_at(now).finger_to_fix
            })
            .collect();

        assert_eq!(
            fixed,
            vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(1), Some(2)]
        );
    }

    #[test]
    fn predecessor_check_is_less_frequent() {
        let mut maintenance = Maintenance::new(INTERVAL, 6, true);

        let mut now = Instant::now();
        let checks = (0..CHECK_PREDECESSOR_FACTOR * 2)
            .filter(|_| {
                now += INTERVAL;
                maintenance.decisions_at(now).should_check_predecessor
            })
            .count();

        assert_eq!(checks, 2);
    }

    #[test]
    fn naive_routing_never_fixes_fingers() {
        let mut maintenance = Maintenance::new(INTERVAL, 6, false);

        let decisions = maintenance.decisions_at(Instant::now() + INTERVAL);

        assert!(decisions.should_stabilize);
        assert_eq!(decisions.finger_to_fix, None);
    }

    #[test]
    fn single_bit_ring_has_no_fingers_to_fix() {
        let mut maintenance = Maintenance::new(INTERVAL, 1, true);

        let decisions = maintenance.decisions_at(Instant::now() + INTERVAL);

        assert_eq!(decisions.finger_to_fix, None);
    }
}
