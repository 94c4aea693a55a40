//! Retransmission timeout estimation (RFC 6298).
//!
//! `RTO = SRTT + 4 * RTTVAR`, clamped to `[initial floor, max_rto]`, doubled
//! on every expiry until a fresh RTT sample arrives.

use std::time::{Duration, Instant};

// Lower bound so loopback RTTs do not turn into a retransmit storm
const MIN_RTO: Duration = Duration::from_millis(20);

#[derive(Debug)]
pub struct RetransmitTimer {
    initial_rto: Duration,
    max_rto: Duration,
    current_rto: Duration,
    srtt: Option<Duration>,
    rttvar: Duration,
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new(initial_rto: Duration, max_rto: Duration) -> Self {
        RetransmitTimer {
            initial_rto,
            max_rto,
            current_rto: initial_rto,
            srtt: None,
            rttvar: Duration::ZERO,
            deadline: None,
        }
    }

    pub fn rto(&self) -> Duration {
        self.current_rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// First sample: SRTT = R, RTTVAR = R/2.
    /// Later:        RTTVAR = 3/4 RTTVAR + 1/4 |SRTT - R|, SRTT = 7/8 SRTT + 1/8 R.
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            }
            Some(srtt) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = self.rttvar * 3 / 4 + diff / 4;
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
        }
        self.reset_rto();
    }

    fn reset_rto(&mut self) {
        self.current_rto = match self.srtt {
            Some(srtt) => (srtt + self.rttvar * 4).max(MIN_RTO).min(self.max_rto),
            None => self.initial_rto,
        };
    }

    pub fn back_off(&mut self) {
        self.current_rto = (self.current_rto * 2).min(self.max_rto);
    }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.current_rto);
    }

    /// Arm only if not already running.
    pub fn arm_if_idle(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.arm(now);
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> RetransmitTimer {
        RetransmitTimer::new(Duration::from_millis(250), Duration::from_secs(4))
    }

    #[test]
    fn starts_at_initial_rto() {
        let t = timer();
        assert_eq!(t.rto(), Duration::from_millis(250));
        assert!(t.srtt().is_none());
        assert!(!t.is_armed());
    }

    #[test]
    fn first_sample_sets_srtt_and_rto() {
        let mut t = timer();
        t.record_rtt_sample(Duration::from_millis(100));
        assert_eq!(t.srtt(), Some(Duration::from_millis(100)));
        // 100 + 4 * 50
        assert_eq!(t.rto(), Duration::from_millis(300));
    }

    #[test]
    fn later_samples_are_smoothed() {
        let mut t = timer();
        t.record_rtt_sample(Duration::from_millis(100));
        t.record_rtt_sample(Duration::from_millis(200));
        // rttvar = 37.5 + 25 = 62.5, srtt = 87.5 + 25 = 112.5
        assert_eq!(t.srtt(), Some(Duration::from_micros(112_500)));
        assert_eq!(t.rto(), Duration::from_micros(362_500));
    }

    #[test]
    fn tiny_rtt_clamped_to_floor() {
        let mut t = timer();
        t.record_rtt_sample(Duration::from_micros(50));
        assert_eq!(t.rto(), MIN_RTO);
    }

    #[test]
    fn back_off_doubles_up_to_max() {
        let mut t = timer();
        t.back_off();
        assert_eq!(t.rto(), Duration::from_millis(500));
        for _ in 0..10 {
            t.back_off();
        }
        assert_eq!(t.rto(), Duration::from_secs(4));
    }

    #[test]
    fn expiry_follows_deadline() {
        let mut t = timer();
        let now = Instant::now();
        t.arm(now);
        assert!(!t.expired(now));
        assert!(t.expired(now + Duration::from_millis(250)));
        t.arm_if_idle(now + Duration::from_secs(1));
        assert!(t.expired(now + Duration::from_millis(300)));
        t.cancel();
        assert!(!t.expired(now + Duration::from_secs(10)));
    }
}
