//! Greedy spatio-temporal clustering
//!
//! Candidates are visited in timestamp order. Each joins the nearest open
//! cluster whose running centroid is within `proximity_px` and whose latest
//! member is at most `time_window_ms` older; otherwise it opens a new
//! cluster. Equidistant ties go to the cluster updated most recently.

use crate::config::ClusterConfig;

/// One detection eligible for clustering
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Stable detection id
    pub id: String,
    pub timestamp: u64,
    pub x: f64,
    pub y: f64,
    pub label: String,
    pub confidence: f64,
}

/// A group of candidates
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Member ids in join order
    pub members: Vec<String>,
    /// Unique labels in first-seen order
    pub labels: Vec<String>,
    pub first_ts: u64,
    pub last_ts: u64,
    sum_x: f64,
    sum_y: f64,
    sum_confidence: f64,
    /// Visit index of the latest join
    updated: usize,
}

impl Cluster {
    fn open(candidate: &Candidate, visit: usize) -> Self {
        Self {
            members: vec![candidate.id.clone()],
            labels: vec![candidate.label.clone()],
            first_ts: candidate.timestamp,
            last_ts: candidate.timestamp,
            sum_x: candidate.x,
            sum_y: candidate.y,
            sum_confidence: candidate.confidence,
            updated: visit,
        }
    }

    fn join(&mut self, candidate: &Candidate, visit: usize) {
        self.members.push(candidate.id.clone());
        if !self.labels.contains(&candidate.label) {
            self.labels.push(candidate.label.clone());
        }
        self.last_ts = self.last_ts.max(candidate.timestamp);
        self.sum_x += candidate.x;
        self.sum_y += candidate.y;
        self.sum_confidence += candidate.confidence;
        self.updated = visit;
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Running centroid `(x, y)`
    pub fn centroid(&self) -> (f64, f64) {
        let n = self.len() as f64;
        (self.sum_x / n, self.sum_y / n)
    }

    pub fn mean_confidence(&self) -> f64 {
        self.sum_confidence / self.len() as f64
    }

    pub fn duration_ms(&self) -> u64 {
        self.last_ts - self.first_ts
    }

    fn distance_to(&self, candidate: &Candidate) -> f64 {
        let (cx, cy) = self.centroid();
        (candidate.x - cx).hypot(candidate.y - cy)
    }
}

/// Cluster `candidates` (any order) under `config`.
pub fn cluster(candidates: &[Candidate], config: &ClusterConfig) -> Vec<Cluster> {
    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| c.timestamp);

    let mut clusters: Vec<Cluster> = Vec::new();

    for (visit, candidate) in ordered.into_iter().enumerate() {
        let mut best: Option<(usize, f64)> = None;

        for (index, cluster) in clusters.iter().enumerate() {
            if candidate.timestamp.saturating_sub(cluster.last_ts) > config.time_window_ms {
                continue;
            }
            let distance = cluster.distance_to(candidate);
            if distance > config.proximity_px {
                continue;
            }

            best = match best {
                None => Some((index, distance)),
                Some((current, best_distance)) => {
                    let closer = distance < best_distance;
                    let tie_newer = distance == best_distance
                        && cluster.updated > clusters[current].updated;
                    if closer || tie_newer {
                        Some((index, distance))
                    } else {
                        Some((current, best_distance))
                    }
                }
            };
        }

        match best {
            Some((index, _)) => clusters[index].join(candidate, visit),
            None => clusters.push(Cluster::open(candidate, visit)),
        }
    }

    clusters
}
