// Current best bid/ask plus a bounded mid-price history, behind a plain
// `std::sync::Mutex` — the feed task only ever holds it for a quick,
// non-async mutation (never across an `.await`).
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct BboSnapshot {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub observed_at: u64,
}

impl BboSnapshot {
    pub fn is_ready(&self) -> bool {
        self.best_bid.is_some() && self.best_ask.is_some()
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid, self.best_ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }

    /// Ready *and* internally consistent. Transient `best_bid > best_ask`
    /// crossings can occur across separate updates — the Quoter must skip
    /// the tick rather than quote off a crossed book.
    pub fn is_usable(&self) -> bool {
        match (self.best_bid, self.best_ask) {
            (Some(b), Some(a)) => b <= a,
            _ => false,
        }
    }
}

/// One-shot latch for the "first BBO became ready" transition.
pub type FirstBboFlag = Arc<AtomicBool>;

pub fn new_first_bbo_flag() -> FirstBboFlag {
    Arc::new(AtomicBool::new(false))
}

#[derive(Debug)]
pub struct PriceFeedState {
    pub bbo: BboSnapshot,
    samples: VecDeque<(u64, f64)>,
    crash_window_ms: u64,
}

impl PriceFeedState {
    pub fn new(crash_window_ms: u64) -> Self {
        Self {
            bbo: BboSnapshot::default(),
            samples: VecDeque::new(),
            crash_window_ms,
        }
    }

    /// Applies an inbound BBO update. Returns `true` exactly on the tick
    /// where the snapshot transitions from not-ready to ready (the "first
    /// BBO" event the Quoter uses to place its startup seed order).
    pub fn update(&mut self, best_bid: Option<f64>, best_ask: Option<f64>, now_ms: u64) -> bool {
        let was_ready = self.bbo.is_ready();

        if let Some(b) = best_bid {
            self.bbo.best_bid = Some(b);
        }
        if let Some(a) = best_ask {
            self.bbo.best_ask = Some(a);
        }
        self.bbo.observed_at = now_ms;

        let became_ready = !was_ready && self.bbo.is_ready();

        if self.bbo.is_ready() {
            if let Some(mid) = self.bbo.mid() {
                self.samples.push_back((now_ms, mid));
                self.evict_stale(now_ms);
            }
        }

        became_ready
    }

    fn evict_stale(&mut self, now_ms: u64) {
        while let Some(&(ts, _)) = self.samples.front() {
            if now_ms.saturating_sub(ts) > self.crash_window_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn samples(&self) -> &VecDeque<(u64, f64)> {
        &self.samples
    }

    pub fn clear_samples(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_bbo_transition_fires_once() {
        let mut feed = PriceFeedState::new(60_000);
        assert!(!feed.update(Some(100000.0), None, 1));
        assert!(feed.update(None, Some(100002.0), 2));
        assert!(!feed.update(Some(100001.0), None, 3));
    }

    #[test]
    fn crossed_book_is_not_usable() {
        let mut feed = PriceFeedState::new(60_000);
        feed.update(Some(100002.0), Some(100000.0), 1);
        assert!(feed.bbo.is_ready());
        assert!(!feed.bbo.is_usable());
    }

    #[test]
    fn samples_evicted_outside_crash_window() {
        let mut feed = PriceFeedState::new(1_000);
        feed.update(Some(100000.0), Some(100000.0), 0);
        feed.update(Some(99000.0), Some(99000.0), 2_000);
        assert_eq!(feed.samples().len(), 1);
        assert_eq!(feed.samples().front().unwrap().0, 2_000);
    }

    #[test]
    fn mid_price_scenario_matches_worked_example() {
        let mut feed = PriceFeedState::new(60_000);
        feed.update(Some(100000.0), Some(100002.0), 0);
        assert_eq!(feed.bbo.mid(), Some(100001.0));
    }
}
