//! Rolling performance statistics
//!
//! Every delivered frame, with or without detections, is recorded with the
//! time it was received. Rates are computed over trailing windows of receive
//! time; totals are cumulative since the last reset.

use liveview_values::{InferenceFrame, PerformanceStats, TransportKind};
use std::collections::VecDeque;

/// Window for detections per second
pub const DETECTION_RATE_WINDOW_MS: u64 = 5_000;

/// Window for frames per second
pub const FPS_WINDOW_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
struct FrameSample {
    received_ms: u64,
    inference_time_ms: f64,
    detections: usize,
}

/// Performance buffer over delivered frames
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    samples: VecDeque<FrameSample>,
    capacity: usize,
    frames_seen: u64,
    frames_with_detections: u64,
    total_detections: u64,
}

impl PerformanceTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            frames_seen: 0,
            frames_with_detections: 0,
            total_detections: 0,
        }
    }

    /// Record a frame received at `now_ms`
    pub fn record(&mut self, frame: &InferenceFrame, now_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(FrameSample {
            received_ms: now_ms,
            inference_time_ms: frame.inference_time_ms,
            detections: frame.detections.len(),
        });

        self.frames_seen += 1;
        self.total_detections += frame.detections.len() as u64;
        if frame.has_detections() {
            self.frames_with_detections += 1;
        }
    }

    /// Frames recorded since the last reset
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn buffered(&self) -> usize {
        self.samples.len()
    }

    /// Derived statistics as of `now_ms`
    pub fn snapshot(
        &self,
        now_ms: u64,
        connection_attempts: u32,
        transport_kind: TransportKind,
    ) -> PerformanceStats {
        let avg_inference_time_ms = if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().map(|s| s.inference_time_ms).sum::<f64>() / self.samples.len() as f64
        };

        let recent_detections: usize = self
            .within(now_ms, DETECTION_RATE_WINDOW_MS)
            .map(|s| s.detections)
            .sum();
        let recent_frames = self.within(now_ms, FPS_WINDOW_MS).count();

        let accuracy_pct = if self.frames_seen == 0 {
            0.0
        } else {
            self.frames_with_detections as f64 / self.frames_seen as f64 * 100.0
        };

        PerformanceStats {
            avg_inference_time_ms,
            detections_per_second: recent_detections as f64 / (DETECTION_RATE_WINDOW_MS as f64 / 1000.0),
            total_detections: self.total_detections,
            accuracy_pct,
            inference_fps: recent_frames as f64 / (FPS_WINDOW_MS as f64 / 1000.0),
            connection_attempts,
            transport_kind,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.capacity);
    }

    fn within(&self, now_ms: u64, window_ms: u64) -> impl Iterator<Item = &FrameSample> {
        let cutoff = now_ms.saturating_sub(window_ms);
        self.samples.iter().filter(move |s| s.received_ms > cutoff && s.received_ms <= now_ms)
    }
}
