//! Deployment tracker
//!
//! Runs the clustering over history snapshots and keeps the events it has
//! emitted. A cluster is only judged once it has settled, that is once no
//! later detection can still join it. Detections that became part of an
//! event are remembered by id, so feeding overlapping snapshots never emits
//! the same deployment twice. Clusters that outgrow `max_detections` are
//! stationary objects rather than deployments; their detections are
//! remembered as rejected and poison any cluster they end up in later.

use crate::cluster::{cluster, Candidate, Cluster};
use crate::config::ClusterConfig;
use liveview_values::{DeploymentEvent, DeploymentStats, HistoryEntry};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Turns detection history into deployment events
#[derive(Debug, Clone)]
pub struct DeploymentTracker {
    config: ClusterConfig,
    events: Vec<DeploymentEvent>,
    consumed: HashSet<String>,
    rejected: HashSet<String>,
}

impl DeploymentTracker {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
            consumed: HashSet::new(),
            rejected: HashSet::new(),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Cluster the unconsumed detections of `entries` and emit events for
    /// settled clusters of acceptable size. Returns the new events.
    ///
    /// A cluster has settled when `max(now_ms, newest entry)` is more than
    /// `time_window_ms` past its latest member. Clusters still open are left
    /// for a later call.
    pub fn ingest(&mut self, entries: &[Arc<HistoryEntry>], now_ms: u64) -> Vec<DeploymentEvent> {
        self.prune(entries);

        let Some(newest) = entries.iter().map(|e| e.timestamp).max() else {
            return Vec::new();
        };
        let clock = now_ms.max(newest);

        let candidates = self.candidates(entries);
        let clusters = cluster(&candidates, &self.config);

        let mut emitted = Vec::new();
        for cluster in clusters {
            let oversized = cluster.len() > self.config.max_detections;
            if oversized || cluster.members.iter().any(|id| self.rejected.contains(id)) {
                self.reject(cluster);
                continue;
            }

            let settled = clock.saturating_sub(cluster.last_ts) > self.config.time_window_ms;
            if !settled || cluster.len() < self.config.min_detections {
                continue;
            }

            let event = to_event(&cluster);
            tracing::info!(
                "Deployment {} at ({:.0}, {:.0}): {} x{} (conf {:.2})",
                event.id,
                event.center_x,
                event.center_y,
                event.troop_types.join("+"),
                event.detection_count,
                event.confidence
            );

            self.consumed.extend(cluster.members);
            emitted.push(event);
        }

        self.events.extend(emitted.iter().cloned());
        emitted
    }

    /// Every event since the last clear, oldest first
    pub fn events(&self) -> &[DeploymentEvent] {
        &self.events
    }

    /// Events whose first detection is at most `recent_window_ms` before `now_ms`
    pub fn recent(&self, now_ms: u64) -> Vec<DeploymentEvent> {
        self.within(now_ms, self.config.recent_window_ms).cloned().collect()
    }

    /// Summary as of `now_ms`
    pub fn stats(&self, now_ms: u64) -> DeploymentStats {
        let total = self.events.len();
        let per_minute = self.within(now_ms, self.config.rate_window_ms).count();

        let average_duration_ms = if total == 0 {
            0.0
        } else {
            self.events.iter().map(|e| e.duration_ms as f64).sum::<f64>() / total as f64
        };

        // (count, first-seen rank) per troop type
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for troop in self.events.iter().flat_map(|e| e.troop_types.iter()) {
            let rank = counts.len();
            counts.entry(troop.as_str()).or_insert((0, rank)).0 += 1;
        }
        let most_common_troop = counts
            .into_iter()
            .min_by(|(_, (count_a, rank_a)), (_, (count_b, rank_b))| {
                count_b.cmp(count_a).then(rank_a.cmp(rank_b))
            })
            .map(|(troop, _)| troop.to_string());

        DeploymentStats {
            total,
            per_minute,
            average_duration_ms,
            most_common_troop,
        }
    }

    /// Forget every event and every consumed or rejected detection
    pub fn clear(&mut self) {
        self.events.clear();
        self.consumed.clear();
        self.rejected.clear();
    }

    fn reject(&mut self, cluster: Cluster) {
        let fresh = cluster
            .members
            .iter()
            .filter(|id| !self.rejected.contains(*id))
            .count();
        if fresh > 0 {
            let (x, y) = cluster.centroid();
            tracing::debug!(
                "Ignoring stationary {} at ({:.0}, {:.0}): {} detections",
                cluster.labels.join("+"),
                x,
                y,
                cluster.len()
            );
        }
        self.rejected.extend(cluster.members);
    }

    fn candidates(&self, entries: &[Arc<HistoryEntry>]) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for entry in entries {
            for (index, detection) in entry.detections.iter().enumerate() {
                let id = entry.detection_id(index);
                if self.consumed.contains(&id) {
                    continue;
                }

                if let Err(e) = detection.validate() {
                    tracing::warn!("Skipping detection {}: {}", id, e);
                    continue;
                }

                if detection.confidence < self.config.min_confidence {
                    continue;
                }

                let (x, y) = detection.bounding_box.center();
                candidates.push(Candidate {
                    id,
                    timestamp: entry.timestamp,
                    x,
                    y,
                    label: detection.class_label.clone(),
                    confidence: detection.confidence,
                });
            }
        }

        candidates
    }

    /// Drop remembered ids whose entry left the store
    fn prune(&mut self, entries: &[Arc<HistoryEntry>]) {
        let present: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let still_present = |id: &String| {
            id.rsplit_once('#')
                .is_some_and(|(entry_id, _)| present.contains(entry_id))
        };
        self.consumed.retain(|id| still_present(id));
        self.rejected.retain(|id| still_present(id));
    }

    fn within(&self, now_ms: u64, window_ms: u64) -> impl Iterator<Item = &DeploymentEvent> {
        self.events
            .iter()
            .filter(move |e| now_ms.saturating_sub(e.timestamp) <= window_ms)
    }
}

impl Default for DeploymentTracker {
    fn default() -> Self {
        Self::new(ClusterConfig::default())
    }
}

fn to_event(cluster: &Cluster) -> DeploymentEvent {
    let (center_x, center_y) = cluster.centroid();
    DeploymentEvent {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: cluster.first_ts,
        center_x,
        center_y,
        troop_types: cluster.labels.clone(),
        detection_count: cluster.len(),
        duration_ms: cluster.duration_ms(),
        confidence: cluster.mean_confidence(),
    }
}
