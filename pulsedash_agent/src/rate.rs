//! Network throughput from cumulative interface counters.
//!
//! The engine keeps one baseline per interface name and turns each new counter
//! pair into a bits/sec rate, a bounded history and an all-time peak. It is not
//! internally synchronized: the sampler holds it behind a single mutex so calls
//! for one interface are always time-ordered.
//!
//! Interfaces that stop being reported (container veth pairs come and go) are
//! forgotten after a configurable number of sampling rounds; their peaks go
//! with them.

use crate::types::{InterfaceRate, RateSample};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_HISTORY_LEN: usize = 120;
/// 1800 rounds is one hour at the default 2 s refresh.
pub const DEFAULT_FORGET_AFTER: u64 = 1800;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    while dq.len() >= cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

#[derive(Debug)]
struct Baseline {
    rx: u64,
    tx: u64,
    at: Instant,
}

#[derive(Debug)]
struct IfaceState {
    baseline: Baseline,
    last: Option<RateSample>,
    history: VecDeque<RateSample>,
    peak_rx: f64,
    peak_tx: f64,
    /// Round in which this interface was last observed.
    seen: u64,
}

impl IfaceState {
    fn reading(&self, name: &str, rx: u64, tx: u64) -> InterfaceRate {
        InterfaceRate {
            name: name.to_string(),
            ip4: String::new(),
            mac: String::new(),
            driver: String::new(),
            speed_mbps: None,
            rx_bytes: rx,
            tx_bytes: tx,
            rx_rate: self.last.map(|s| s.rx),
            tx_rate: self.last.map(|s| s.tx),
            peak_rx_rate: self.peak_rx,
            peak_tx_rate: self.peak_tx,
            history: self.history.iter().copied().collect(),
        }
    }
}

#[derive(Debug)]
pub struct RateEngine {
    capacity: usize,
    ifaces: HashMap<String, IfaceState>,
    round: u64,
}

impl Default for RateEngine {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

impl RateEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ifaces: HashMap::new(),
            round: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tracked(&self) -> usize {
        self.ifaces.len()
    }

    /// Feed one counter pair for `name` sampled at `at`.
    ///
    /// The returned record carries counters only (no identity fields); the
    /// caller merges identity from the network source.
    pub fn observe(&mut self, name: &str, rx: u64, tx: u64, at: Instant) -> InterfaceRate {
        let capacity = self.capacity;
        let round = self.round;
        let Some(state) = self.ifaces.get_mut(name) else {
            let state = IfaceState {
                baseline: Baseline { rx, tx, at },
                last: None,
                history: VecDeque::with_capacity(capacity),
                peak_rx: 0.0,
                peak_tx: 0.0,
                seen: round,
            };
            let reading = state.reading(name, rx, tx);
            self.ifaces.insert(name.to_string(), state);
            return reading;
        };
        state.seen = round;

        let dt = at
            .checked_duration_since(state.baseline.at)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        if dt <= 0.0 {
            // Report the counters the last rate was computed from.
            return state.reading(name, state.baseline.rx, state.baseline.tx);
        }

        let rx_rate = bits_per_sec(name, "rx", state.baseline.rx, rx, dt);
        let tx_rate = bits_per_sec(name, "tx", state.baseline.tx, tx, dt);
        let sample = RateSample {
            rx: rx_rate,
            tx: tx_rate,
        };

        push_capped(&mut state.history, sample, capacity);
        state.last = Some(sample);
        state.peak_rx = state.peak_rx.max(rx_rate);
        state.peak_tx = state.peak_tx.max(tx_rate);
        state.baseline = Baseline { rx, tx, at };

        state.reading(name, rx, tx)
    }

    /// Close one sampling round: forget interfaces not observed in the last
    /// `forget_after` rounds (this one included). Returns how many were dropped.
    pub fn end_round(&mut self, forget_after: u64) -> usize {
        let round = self.round;
        let before = self.ifaces.len();
        self.ifaces.retain(|name, state| {
            let keep = round - state.seen < forget_after;
            if !keep {
                debug!(iface = %name, absent_rounds = round - state.seen, "forgetting interface");
            }
            keep
        });
        self.round += 1;
        before - self.ifaces.len()
    }
}

fn bits_per_sec(name: &str, dir: &str, prev: u64, now: u64, dt: f64) -> f64 {
    match now.checked_sub(prev) {
        Some(delta) => (delta as f64 * 8.0 / dt).max(0.0),
        None => {
            info!(iface = name, dir, prev, now, "interface counter went backwards; reporting 0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn secs(t0: Instant, s: u64) -> Instant {
        t0 + Duration::from_secs(s)
    }

    #[test]
    fn first_observation_is_counters_only() {
        let mut eng = RateEngine::new(4);
        let r = eng.observe("eth0", 1000, 500, Instant::now());
        assert_eq!(r.rx_bytes, 1000);
        assert_eq!(r.tx_bytes, 500);
        assert!(r.rx_rate.is_none());
        assert!(r.tx_rate.is_none());
        assert!(r.history.is_empty());
        assert_eq!(eng.tracked(), 1);
    }

    #[test]
    fn second_observation_yields_bits_per_second() {
        let t0 = Instant::now();
        let mut eng = RateEngine::new(4);
        eng.observe("eth0", 1000, 500, t0);
        let r = eng.observe("eth0", 9000, 900, secs(t0, 1));
        assert_eq!(r.rx_rate, Some(64_000.0));
        assert_eq!(r.tx_rate, Some(3_200.0));
        assert_eq!(r.history.len(), 1);
    }

    #[test]
    fn rate_divides_by_elapsed_time() {
        let t0 = Instant::now();
        let mut eng = RateEngine::new(4);
        eng.observe("wlan0", 0, 0, t0);
        let r = eng.observe("wlan0", 4000, 1000, secs(t0, 4));
        assert_eq!(r.rx_rate, Some(8000.0));
        assert_eq!(r.tx_rate, Some(2000.0));
    }

    #[test]
    fn counter_reset_clamps_to_zero() {
        let t0 = Instant::now();
        let mut eng = RateEngine::new(4);
        eng.observe("eth0", 50_000, 50_000, t0);
        let r = eng.observe("eth0", 100, 60_000, secs(t0, 1));
        assert_eq!(r.rx_rate, Some(0.0));
        assert_eq!(r.tx_rate, Some(80_000.0));

        // The reset value becomes the new baseline.
        let r = eng.observe("eth0", 1100, 60_000, secs(t0, 2));
        assert_eq!(r.rx_rate, Some(8000.0));
    }

    #[test]
    fn zero_interval_repeats_last_rate_without_history() {
        let t0 = Instant::now();
        let mut eng = RateEngine::new(4);
        eng.observe("eth0", 0, 0, t0);
        eng.observe("eth0", 1000, 1000, secs(t0, 1));
        let r = eng.observe("eth0", 5000, 5000, secs(t0, 1));
        assert_eq!(r.rx_rate, Some(8000.0));
        assert_eq!(r.history.len(), 1);
        // Counters match the rate, not the discarded sample.
        assert_eq!((r.rx_bytes, r.tx_bytes), (1000, 1000));

        // Baseline untouched: the next real interval measures from t=1.
        let r = eng.observe("eth0", 3000, 3000, secs(t0, 2));
        assert_eq!(r.rx_rate, Some(16_000.0));
    }

    #[test]
    fn earlier_sample_time_is_ignored() {
        let t0 = Instant::now();
        let mut eng = RateEngine::new(4);
        eng.observe("eth0", 0, 0, secs(t0, 5));
        let r = eng.observe("eth0", 1000, 1000, t0);
        assert!(r.rx_rate.is_none());
        assert!(r.history.is_empty());
    }

    #[test]
    fn history_is_bounded_fifo() {
        let t0 = Instant::now();
        let cap = 3;
        let mut eng = RateEngine::new(cap);
        eng.observe("eth0", 0, 0, t0);
        let mut rx = 0u64;
        let mut last = None;
        for i in 1..=(cap as u64 + 1) {
            rx += i * 100;
            last = Some(eng.observe("eth0", rx, 0, secs(t0, i)));
        }
        let r = last.unwrap();
        assert_eq!(r.history.len(), cap);
        // Samples were 800, 1600, 2400, 3200 bit/s; the first was evicted.
        let got: Vec<f64> = r.history.iter().map(|s| s.rx).collect();
        assert_eq!(got, vec![1600.0, 2400.0, 3200.0]);
    }

    #[test]
    fn peaks_never_decrease() {
        let t0 = Instant::now();
        let mut eng = RateEngine::new(8);
        let counters = [0u64, 10_000, 10_500, 10_400, 90_000, 90_001];
        let mut prev_peak = 0.0;
        for (i, c) in counters.iter().enumerate() {
            let r = eng.observe("eth0", *c, *c, secs(t0, i as u64));
            assert!(r.peak_rx_rate >= prev_peak);
            assert!(r.rx_rate.unwrap_or(0.0) >= 0.0);
            assert!(r.tx_rate.unwrap_or(0.0) >= 0.0);
            prev_peak = r.peak_rx_rate;
        }
        assert_eq!(prev_peak, 79_600.0 * 8.0);
    }

    #[test]
    fn interfaces_are_tracked_independently() {
        let t0 = Instant::now();
        let mut eng = RateEngine::new(4);
        eng.observe("eth0", 0, 0, t0);
        let lo = eng.observe("lo", 0, 0, secs(t0, 1));
        assert!(lo.rx_rate.is_none());
        let eth = eng.observe("eth0", 125, 0, secs(t0, 1));
        assert_eq!(eth.rx_rate, Some(1000.0));
    }

    #[test]
    fn absent_interfaces_are_forgotten_after_enough_rounds() {
        let t0 = Instant::now();
        let mut eng = RateEngine::new(4);
        eng.observe("eth0", 0, 0, t0);
        eng.observe("veth1a2b", 0, 0, t0);
        assert_eq!(eng.end_round(2), 0);

        eng.observe("eth0", 100, 0, secs(t0, 1));
        assert_eq!(eng.end_round(2), 0);
        assert_eq!(eng.tracked(), 2);

        eng.observe("eth0", 200, 0, secs(t0, 2));
        assert_eq!(eng.end_round(2), 1);
        assert_eq!(eng.tracked(), 1);

        // A returning name starts over from a fresh baseline.
        let r = eng.observe("veth1a2b", 500, 0, secs(t0, 3));
        assert!(r.rx_rate.is_none());
        assert_eq!(r.peak_rx_rate, 0.0);
    }

    #[test]
    fn interfaces_seen_every_round_are_kept() {
        let t0 = Instant::now();
        let mut eng = RateEngine::new(4);
        for i in 0..10 {
            eng.observe("eth0", i * 10, 0, secs(t0, i));
            assert_eq!(eng.end_round(1), 0);
        }
        assert_eq!(eng.tracked(), 1);
    }

    #[test]
    fn push_capped_evicts_oldest() {
        let mut dq = VecDeque::new();
        for v in 0..5 {
            push_capped(&mut dq, v, 3);
        }
        assert_eq!(dq, VecDeque::from(vec![2, 3, 4]));
    }
}
