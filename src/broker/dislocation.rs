//! Rolling-window spread dislocation detection.
//!
//! Advisory only: a dislocated quote is logged and surfaced in the status
//! snapshot but never blocks a fill or widens a guard band.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::warn;

/// One observed spread.
#[derive(Debug, Clone, Copy)]
pub struct SpreadSample {
    pub spread: Decimal,
    pub ts: DateTime<Utc>,
}

/// Window tuning.
#[derive(Debug, Clone)]
pub struct DislocationConfig {
    /// Time window the moving average is computed over.
    pub window: Duration,
    /// Samples kept even when older than the window, so the average stays
    /// stable under sparse ticks.
    pub min_samples: usize,
    /// Current spread above `movingAverage × multiplier` flags dislocation.
    pub multiplier: Decimal,
}

impl Default for DislocationConfig {
    fn default() -> Self {
        Self {
            window: Duration::seconds(6),
            min_samples: 20,
            multiplier: Decimal::new(75, 1), // 7.5
        }
    }
}

/// Detects abnormally wide spreads relative to their recent moving average.
#[derive(Debug)]
pub struct DislocationGuard {
    config: DislocationConfig,
    samples: VecDeque<SpreadSample>,
}

impl DislocationGuard {
    pub fn new(config: DislocationConfig) -> Self {
        Self {
            config,
            samples: VecDeque::new(),
        }
    }

    /// Observe a best bid/ask pair; returns true when the current spread is
    /// dislocated against the retained window.
    pub fn observe(&mut self, bid: Decimal, ask: Decimal, ts: DateTime<Utc>) -> bool {
        let spread = (ask - bid).abs();

        self.prune(ts);

        let dislocated = match self.moving_average() {
            Some(avg) if self.samples.len() >= self.config.min_samples => {
                spread > avg * self.config.multiplier
            }
            _ => false,
        };

        if dislocated {
            warn!(
                %bid,
                %ask,
                %spread,
                window_len = self.samples.len(),
                "Quote dislocation detected"
            );
        }

        self.samples.push_back(SpreadSample { spread, ts });
        dislocated
    }

    /// Drop samples that are both older than the window and beyond the
    /// minimum retained count.
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.config.window;
        while self.samples.len() > self.config.min_samples {
            match self.samples.front() {
                Some(sample) if sample.ts < cutoff => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }
    }

    fn moving_average(&self) -> Option<Decimal> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: Decimal = self.samples.iter().map(|s| s.spread).sum();
        Some(sum / Decimal::from(self.samples.len()))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn guard() -> DislocationGuard {
        DislocationGuard::new(DislocationConfig::default())
    }

    #[test]
    fn test_constant_spread_never_flags() {
        let mut g = guard();
        let t0 = Utc::now();
        for i in 0..25 {
            let ts = t0 + Duration::milliseconds(i * 100);
            assert!(!g.observe(dec!(100), dec!(101), ts));
        }
    }

    #[test]
    fn test_spike_flags_after_stable_window() {
        // 25 samples of spread 1, then a spread of 20: 20 > 1 × 7.5.
        let mut g = guard();
        let t0 = Utc::now();
        for i in 0..25 {
            let ts = t0 + Duration::milliseconds(i * 100);
            assert!(!g.observe(dec!(100), dec!(101), ts));
        }
        let ts = t0 + Duration::milliseconds(2500);
        assert!(g.observe(dec!(100), dec!(120), ts));
    }

    #[test]
    fn test_no_flag_below_min_samples() {
        let mut g = guard();
        let t0 = Utc::now();
        for i in 0..5 {
            g.observe(dec!(100), dec!(101), t0 + Duration::milliseconds(i * 100));
        }
        // Window too thin for a stable average; wide quote passes silently.
        assert!(!g.observe(dec!(100), dec!(150), t0 + Duration::milliseconds(600)));
    }

    #[test]
    fn test_old_samples_pruned_beyond_minimum() {
        let mut g = guard();
        let t0 = Utc::now();
        for i in 0..40 {
            g.observe(dec!(100), dec!(101), t0 + Duration::milliseconds(i * 100));
        }
        // 10 seconds later everything is stale, but the minimum is retained.
        g.observe(dec!(100), dec!(101), t0 + Duration::seconds(10));
        assert_eq!(g.len(), DislocationConfig::default().min_samples + 1);
    }
}
