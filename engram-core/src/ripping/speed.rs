//! Rip progress accounting (spec.md §4.4).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEBOUNCE: Duration = Duration::from_millis(500);
const HISTORY_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    cumulative_bytes: u64,
}

/// Tracks a bounded history of `(timestamp, cumulative_bytes)` samples for
/// one title's rip and derives instant speed / ETA from the last two kept
/// samples. Samples arriving within [`DEBOUNCE`] of the previous kept one
/// are dropped rather than recorded.
#[derive(Debug, Default)]
pub struct SpeedCalculator {
    history: VecDeque<Sample>,
}

impl SpeedCalculator {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Records a new sample unless it arrived within the debounce window
    /// of the last kept one.
    pub fn record(&mut self, at: Instant, cumulative_bytes: u64) {
        if let Some(last) = self.history.back() {
            if at.duration_since(last.at) < DEBOUNCE {
                return;
            }
        }
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(Sample { at, cumulative_bytes });
    }

    /// Bytes per second over the last two kept samples, or `None` with
    /// fewer than two.
    pub fn instant_speed_bytes_per_sec(&self) -> Option<f64> {
        let last = self.history.back()?;
        let prev = self.history.get(self.history.len().checked_sub(2)?)?;
        let elapsed = last.at.duration_since(prev.at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let delta_bytes = last.cumulative_bytes.saturating_sub(prev.cumulative_bytes);
        Some(delta_bytes as f64 / elapsed)
    }

    pub fn human_speed(&self) -> Option<String> {
        self.instant_speed_bytes_per_sec().map(format_speed)
    }

    /// Seconds remaining to reach `total_bytes`, clamped to >= 0. `None`
    /// when speed cannot be determined.
    pub fn eta_seconds(&self, total_bytes: u64) -> Option<u64> {
        let speed = self.instant_speed_bytes_per_sec()?;
        if speed <= 0.0 {
            return None;
        }
        let current = self.history.back()?.cumulative_bytes;
        let remaining = total_bytes.saturating_sub(current) as f64;
        Some((remaining / speed).max(0.0).round() as u64)
    }
}

fn format_speed(bytes_per_sec: f64) -> String {
    const UNITS: &[&str] = &["B/s", "KB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_sec;
    let mut unit = UNITS[0];
    for candidate in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = candidate;
    }
    format!("{value:.1} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounces_samples_within_half_a_second() {
        let mut calc = SpeedCalculator::new();
        let t0 = Instant::now();
        calc.record(t0, 0);
        calc.record(t0 + Duration::from_millis(100), 1_000_000);
        assert_eq!(calc.history.len(), 1, "second sample should be debounced");
    }

    #[test]
    fn computes_instant_speed_over_last_two_samples() {
        let mut calc = SpeedCalculator::new();
        let t0 = Instant::now();
        calc.record(t0, 0);
        calc.record(t0 + Duration::from_secs(1), 10_000_000);
        let speed = calc.instant_speed_bytes_per_sec().unwrap();
        assert!((speed - 10_000_000.0).abs() < 1.0);
    }

    #[test]
    fn eta_is_clamped_to_zero_when_complete() {
        let mut calc = SpeedCalculator::new();
        let t0 = Instant::now();
        calc.record(t0, 0);
        calc.record(t0 + Duration::from_secs(1), 1_000_000_000);
        let eta = calc.eta_seconds(1_000_000_000).unwrap();
        assert_eq!(eta, 0);
    }

    #[test]
    fn human_speed_formats_megabytes() {
        let mut calc = SpeedCalculator::new();
        let t0 = Instant::now();
        calc.record(t0, 0);
        calc.record(t0 + Duration::from_secs(1), 44_564_480); // ~42.5 MB/s
        let human = calc.human_speed().unwrap();
        assert!(human.ends_with("MB/s"), "got {human}");
    }

    #[test]
    fn history_is_bounded() {
        let mut calc = SpeedCalculator::new();
        let t0 = Instant::now();
        for i in 0..20u64 {
            calc.record(t0 + Duration::from_millis(600 * i), i * 1_000_000);
        }
        assert!(calc.history.len() <= HISTORY_CAPACITY);
    }
}
