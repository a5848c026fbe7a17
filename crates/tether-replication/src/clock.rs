//! Latency measurement and network clock synchronization.
//!
//! Each peer proxy owns a [`LatencyTracker`] fed by ping/pong round trips;
//! the coordinator owns one [`NetworkClock`] that folds every peer's time
//! samples into a smoothed shared timeline. The smoothed clock nudges toward
//! consensus instead of jumping and never runs backwards, so shadow-state
//! timestamps and cadence timers stay monotonic.

use tracing::trace;

use crate::config::ReplicationConfig;
use crate::window::Window;

/// Round trips kept per peer.
const ROUND_TRIP_WINDOW: usize = 16;
/// (local, remote) time pairs kept for the remote time-rate estimate.
const REMOTE_TIME_WINDOW: usize = 16;
/// Time-error samples kept by the network clock.
const TIME_ERROR_WINDOW: usize = 32;

/// Minimum spacing between remote-time samples worth keeping.
const MIN_TIME_SPACING: f64 = 1e-4;

// ---------------------------------------------------------------------------
// LatencyTracker
// ---------------------------------------------------------------------------

/// Rolling latency statistics for one remote peer.
#[derive(Debug, Clone, Default)]
pub struct LatencyTracker {
    round_trips: Window<f64, ROUND_TRIP_WINDOW>,
    latency: f64,
    spread: f64,
    reverse_latency: f64,
    reverse_spread: f64,
    remote_times: Window<(f64, f64), REMOTE_TIME_WINDOW>,
    time_rate: f64,
}

impl LatencyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in one measured round trip.
    ///
    /// Samples far outside the trailing distribution (beyond three standard
    /// deviations once the window has warmed up) are rejected rather than
    /// integrated, and `false` is returned.
    pub fn record_round_trip(&mut self, round_trip: f64) -> bool {
        let round_trip = round_trip.max(0.0);
        if self.round_trips.len() >= 8 {
            let ceiling = self.round_trips.mean() + 3.0 * self.round_trips.std_dev() + 1e-3;
            if round_trip > ceiling {
                trace!(round_trip, ceiling, "round-trip outlier rejected");
                return false;
            }
        }
        self.round_trips.push(round_trip);
        self.latency = self.round_trips.mean() / 2.0;
        self.spread = self.round_trips.std_dev() / 2.0;
        true
    }

    /// Stores the peer's self-reported reverse-path metrics.
    pub fn record_reverse(&mut self, latency: f64, spread: f64) {
        self.reverse_latency = latency;
        self.reverse_spread = spread;
    }

    /// Feeds one (local, remote) time pair into the time-rate estimate: the
    /// average rate at which the remote clock advances per local second.
    pub fn record_remote_time(&mut self, local: f64, remote: f64) {
        if let Some((last_local, _)) = self.remote_times.newest()
            && local - last_local < MIN_TIME_SPACING
        {
            return;
        }
        self.remote_times.push((local, remote));
        if !self.remote_times.is_full() {
            return;
        }

        let pairs: Vec<(f64, f64)> = self.remote_times.iter().collect();
        let mut rate = 0.0;
        for w in pairs.windows(2) {
            let d_local = w[1].0 - w[0].0;
            let d_remote = w[1].1 - w[0].1;
            if d_local > MIN_TIME_SPACING {
                rate += d_remote / d_local;
            }
        }
        self.time_rate = rate / (pairs.len() - 1) as f64;
    }

    /// Estimated one-way latency toward the peer, in seconds.
    pub fn latency(&self) -> f64 {
        self.latency
    }

    /// Standard deviation of the one-way latency estimate.
    pub fn spread(&self) -> f64 {
        self.spread
    }

    /// The peer's own latency estimate toward us.
    pub fn reverse_latency(&self) -> f64 {
        self.reverse_latency
    }

    /// Spread of the peer's reverse estimate.
    pub fn reverse_spread(&self) -> f64 {
        self.reverse_spread
    }

    /// Rate of the remote clock relative to ours (1.0 = same speed);
    /// 0 until enough pairs are collected.
    pub fn time_rate(&self) -> f64 {
        self.time_rate
    }

    /// Returns `true` once the round-trip window is full.
    pub fn is_reliable(&self) -> bool {
        self.round_trips.is_full()
    }

    /// Returns `true` if at least one round trip has been integrated.
    pub fn has_samples(&self) -> bool {
        !self.round_trips.is_empty()
    }

    /// One-way latency corrected for path asymmetry: when the peer reports a
    /// plausible reverse latency, the forward leg is the measured round trip
    /// minus the reverse leg; otherwise half the round trip.
    pub fn one_way_estimate(&self) -> f64 {
        let round_trip = self.latency * 2.0;
        if self.reverse_latency > 0.0 && self.reverse_latency < round_trip {
            round_trip - self.reverse_latency
        } else {
            self.latency
        }
    }

    /// Discards all collected statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// NetworkClock
// ---------------------------------------------------------------------------

/// The coordinator's clock pair: raw local elapsed time, and a smoothed
/// network time that converges across peers.
#[derive(Debug)]
pub struct NetworkClock {
    raw_time: f64,
    network_time: f64,
    errors: Window<f64, TIME_ERROR_WINDOW>,
    samples: u32,
    synchronized: bool,
    gain: f64,
    max_step: f64,
    deviation_threshold: f64,
    min_samples: u32,
}

impl NetworkClock {
    /// Creates a clock with the configured smoothing behavior.
    pub fn new(config: &ReplicationConfig) -> Self {
        Self {
            raw_time: 0.0,
            network_time: 0.0,
            errors: Window::new(),
            samples: 0,
            synchronized: false,
            gain: config.time_adjust_gain,
            max_step: config.max_time_step,
            deviation_threshold: config.time_sync_deviation,
            min_samples: config.min_time_samples,
        }
    }

    /// Advances both clocks by one tick.
    pub fn advance(&mut self, dt: f64) {
        self.raw_time += dt;
        self.network_time += dt;
    }

    /// Folds in one remote time sample: the peer's network time as stamped
    /// at send, plus our estimate of the one-way latency it aged in flight.
    pub fn observe(&mut self, remote_time: f64, one_way_latency: f64) {
        let predicted = remote_time + one_way_latency;
        let error = predicted - self.network_time;
        self.errors.push(error);
        self.samples = self.samples.saturating_add(1);

        // Nudge toward the consensus timeline, forward only. Peers that are
        // behind catch up; the timeline never rewinds under anyone.
        if error > 0.0 {
            let step = (error * self.gain).min(self.max_step);
            self.network_time += step;
        }

        if !self.synchronized
            && self.samples >= self.min_samples
            && self.errors.std_dev() < self.deviation_threshold
        {
            trace!(
                samples = self.samples,
                deviation = self.errors.std_dev(),
                "network time synchronized"
            );
            self.synchronized = true;
        }
    }

    /// Raw local elapsed time, in seconds. Never adjusted.
    pub fn raw_time(&self) -> f64 {
        self.raw_time
    }

    /// Smoothed network time, in seconds.
    pub fn network_time(&self) -> f64 {
        self.network_time
    }

    /// Variance of the recent time errors.
    pub fn time_variance(&self) -> f64 {
        self.errors.variance()
    }

    /// Whether the smoothed clock has converged. Latches true.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_converges_on_constant_round_trip() {
        let mut tracker = LatencyTracker::new();
        for _ in 0..20 {
            assert!(tracker.record_round_trip(0.1));
        }
        assert!(tracker.is_reliable());
        assert!((tracker.latency() - 0.05).abs() < 1e-9);
        assert!(tracker.spread() < 1e-9);
    }

    #[test]
    fn test_round_trip_outlier_is_rejected() {
        let mut tracker = LatencyTracker::new();
        for _ in 0..10 {
            tracker.record_round_trip(0.05);
        }
        let before = tracker.latency();
        assert!(!tracker.record_round_trip(1.5));
        assert_eq!(tracker.latency(), before);
        // Nearby samples still integrate.
        assert!(tracker.record_round_trip(0.051));
    }

    #[test]
    fn test_one_way_estimate_uses_reverse_latency() {
        let mut tracker = LatencyTracker::new();
        for _ in 0..10 {
            tracker.record_round_trip(0.1);
        }
        // Symmetric until the peer reports otherwise.
        assert!((tracker.one_way_estimate() - 0.05).abs() < 1e-9);
        // Peer says its leg is 30 ms, so ours is 70 ms.
        tracker.record_reverse(0.03, 0.001);
        assert!((tracker.one_way_estimate() - 0.07).abs() < 1e-9);
        // Implausible reverse readings fall back to the symmetric split.
        tracker.record_reverse(0.5, 0.0);
        assert!((tracker.one_way_estimate() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_time_rate_tracks_remote_clock_speed() {
        let mut tracker = LatencyTracker::new();
        // Remote clock runs at 2x.
        for i in 0..REMOTE_TIME_WINDOW {
            let local = i as f64 * 0.5;
            tracker.record_remote_time(local, local * 2.0);
        }
        assert!((tracker.time_rate() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_statistics() {
        let mut tracker = LatencyTracker::new();
        tracker.record_round_trip(0.1);
        tracker.record_reverse(0.05, 0.01);
        tracker.reset();
        assert!(!tracker.has_samples());
        assert_eq!(tracker.latency(), 0.0);
        assert_eq!(tracker.reverse_latency(), 0.0);
    }

    fn test_clock() -> NetworkClock {
        NetworkClock::new(&ReplicationConfig::default())
    }

    #[test]
    fn test_clock_synchronizes_on_stable_samples() {
        let mut clock = test_clock();
        // Peer runs 2 s ahead; constant latency 50 ms, already compensated.
        for _ in 0..20 {
            clock.advance(0.1);
            let remote_now = clock.raw_time() + 2.0;
            clock.observe(remote_now - 0.05, 0.05);
        }
        assert!(clock.is_synchronized());
        // Smoothed time should have climbed most of the way to the peer.
        assert!(clock.network_time() > clock.raw_time() + 1.5);
    }

    #[test]
    fn test_clock_never_runs_backwards() {
        let mut clock = test_clock();
        let mut last = clock.network_time();
        for i in 0..50 {
            clock.advance(0.05);
            // Alternate samples from a peer 1 s behind us.
            if i % 2 == 0 {
                clock.observe(clock.network_time() - 1.0, 0.0);
            }
            assert!(clock.network_time() >= last);
            last = clock.network_time();
        }
    }

    #[test]
    fn test_clock_needs_minimum_samples() {
        let mut clock = test_clock();
        for _ in 0..3 {
            clock.advance(0.1);
            clock.observe(clock.network_time(), 0.0);
        }
        assert!(!clock.is_synchronized());
        assert!(clock.time_variance() < 1e-6);
    }

    #[test]
    fn test_noisy_samples_delay_synchronization() {
        let mut clock = test_clock();
        for i in 0..20 {
            clock.advance(0.1);
            // ±80 ms of alternating error, well past the 10 ms threshold.
            let noise = if i % 2 == 0 { 0.08 } else { -0.08 };
            clock.observe(clock.network_time() + noise, 0.0);
        }
        assert!(!clock.is_synchronized());
    }
}
