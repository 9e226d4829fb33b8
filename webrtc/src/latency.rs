//! Latency estimation
//!
//! Three figures are tracked separately and reported side by side:
//!
//! - end-to-end media delay, sampled whenever the transport's frame counters
//!   advance between stats polls (rolling window of the last 20 samples)
//! - one-way network delay from explicit `LatencyProbe` round trips
//! - the signaling round-trip the server reports when the viewer connects

use crate::types::TransportStats;
use liveview_values::{LatencyReport, LatencySample};
use std::collections::VecDeque;

/// Samples retained
pub const SAMPLE_CAPACITY: usize = 100;

/// Samples in the rolling aggregate
pub const ROLLING_WINDOW: usize = 20;

/// Upper bound (exclusive) for a plausible end-to-end sample
pub const MAX_PLAUSIBLE_MS: f64 = 2000.0;

/// Rolling latency estimator
#[derive(Debug, Clone)]
pub struct LatencyEstimator {
    samples: VecDeque<LatencySample>,
    encoding_delay_ms: u64,
    last_frames: u64,
    next_frame_id: u64,
    network_ms: Option<f64>,
    signaling_ms: Option<f64>,
    report: LatencyReport,
}

impl LatencyEstimator {
    pub fn new(encoding_delay_ms: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
            encoding_delay_ms,
            last_frames: 0,
            next_frame_id: 0,
            network_ms: None,
            signaling_ms: None,
            report: LatencyReport::default(),
        }
    }

    /// Feed a stats poll taken at `now_ms`.
    ///
    /// Records a sample only when the frame counters advanced since the
    /// previous poll. Capture time is the transport's last-packet timestamp
    /// when it has one, else `now - network - encoding delay`.
    pub fn observe(&mut self, stats: &TransportStats, now_ms: u64) -> Option<LatencySample> {
        let frames = stats.frames();
        // A fresh transport restarts its counters from zero
        let baseline = if frames < self.last_frames { 0 } else { self.last_frames };
        let advanced = frames > baseline;
        self.last_frames = frames;
        if !advanced {
            return None;
        }

        let capture_ts = match stats.last_packet_received_ms {
            Some(ts) if ts <= now_ms => ts,
            _ => {
                let network = self.network_ms.unwrap_or(0.0).max(0.0).round() as u64;
                now_ms.saturating_sub(network + self.encoding_delay_ms)
            }
        };

        self.record(capture_ts, now_ms)
    }

    /// Record an end-to-end sample. Samples outside `(0, 2000)` ms are discarded.
    pub fn record(&mut self, capture_ts: u64, display_ts: u64) -> Option<LatencySample> {
        let end_to_end_ms = display_ts as f64 - capture_ts as f64;
        if !(end_to_end_ms > 0.0 && end_to_end_ms < MAX_PLAUSIBLE_MS) {
            tracing::trace!("Discarding implausible latency sample: {} ms", end_to_end_ms);
            return None;
        }

        self.next_frame_id += 1;
        let sample = LatencySample {
            frame_id: self.next_frame_id,
            capture_ts,
            display_ts,
            end_to_end_ms,
            signaling_ms: self.signaling_ms,
            network_ms: self.network_ms,
        };

        if self.samples.len() == SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample.clone());
        self.recompute();

        Some(sample)
    }

    /// Handle a probe reply received at `receive_ts` for a probe sent at `client_ts`.
    ///
    /// Returns the one-way estimate, or `None` if the clocks disagree.
    pub fn record_probe(&mut self, client_ts: u64, receive_ts: u64) -> Option<f64> {
        if receive_ts < client_ts {
            tracing::warn!("Probe reply predates its probe ({} < {})", receive_ts, client_ts);
            return None;
        }
        let one_way = (receive_ts - client_ts) as f64 / 2.0;
        self.network_ms = Some(one_way);
        self.report.network_ms = Some(one_way);
        Some(one_way)
    }

    /// Signaling round-trip reported at connection time
    pub fn set_signaling_latency(&mut self, ms: f64) {
        self.signaling_ms = Some(ms);
        self.report.signaling_ms = Some(ms);
    }

    /// Current report
    pub fn report(&self) -> LatencyReport {
        self.report.clone()
    }

    /// Retained samples, oldest first
    pub fn samples(&self) -> impl Iterator<Item = &LatencySample> {
        self.samples.iter()
    }

    /// Forget everything
    pub fn reset(&mut self) {
        *self = Self::new(self.encoding_delay_ms);
    }

    fn recompute(&mut self) {
        let window: Vec<f64> = self
            .samples
            .iter()
            .rev()
            .take(ROLLING_WINDOW)
            .map(|s| s.end_to_end_ms)
            .collect();

        let Some(&current) = window.first() else {
            return;
        };

        self.report.current = current;
        self.report.average = window.iter().sum::<f64>() / window.len() as f64;
        self.report.min = window.iter().copied().fold(f64::INFINITY, f64::min);
        self.report.max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        self.report.sample_count = window.len();
    }
}
