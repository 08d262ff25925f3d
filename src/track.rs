//! Track state, running aggregates, bounded history, and the lifecycle
//! state machine (§3, §4.6).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::Cluster;
use crate::config::TrackingConfig;
use crate::filter::KinematicFilter;

/// Stable opaque identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
    Tentative,
    Confirmed,
    PreTail,
    PostTail,
    Deleted,
}

/// Running aggregates updated on each association (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrackAggregates {
    pub avg_bbox: [f64; 3],
    pub max_height_p95: f64,
    pub avg_intensity: f64,
    pub avg_speed: f64,
    pub peak_speed: f64,
    pub path_length_m: f64,
    count: u64,
}

impl TrackAggregates {
    fn observe(&mut self, cluster: &Cluster, speed: f64, step_distance: f64) {
        let n = self.count as f64;
        let n1 = n + 1.0;
        for i in 0..3 {
            self.avg_bbox[i] = (self.avg_bbox[i] * n + cluster.bbox[i]) / n1;
        }
        self.max_height_p95 = self.max_height_p95.max(cluster.height_p95);
        self.avg_intensity = (self.avg_intensity * n + cluster.intensity_mean) / n1;
        self.avg_speed = (self.avg_speed * n + speed) / n1;
        self.peak_speed = self.peak_speed.max(speed);
        self.path_length_m += step_distance;
        self.count += 1;
    }
}

/// A snapshot summary for downstream classification / training-data
/// filtering (SPEC_FULL.md §10). Computation only; the track keeps owning
/// the underlying history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySnapshot {
    pub median_speed: f64,
    pub speed_p95: f64,
    pub heading_variance: f64,
    pub observation_count: u64,
}

/// A long-lived track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub track_id: TrackId,
    pub state: TrackState,
    pub filter: KinematicFilter,
    pub hits: u32,
    pub misses: u32,
    pub observation_count: u64,
    pub first_seen_ns: i64,
    pub last_seen_ns: i64,
    /// Timestamp this track's filter was last advanced to, via `predict`.
    /// Distinct from `last_seen_ns` (last *association*): a coasting
    /// track is predicted every frame whether or not it is matched, and
    /// `predict`'s `dt` must be measured from the previous frame, not
    /// from a stale association timestamp, or repeated coasting frames
    /// would double-count elapsed time.
    pub last_predicted_ns: i64,
    pub frames_in_pretail: u32,
    pub frames_since_last: u32,
    pub aggregates: TrackAggregates,
    pub speed_history: VecDeque<f64>,
    pub position_history: VecDeque<(f64, f64, i64)>,
    /// Score recorded by the most recent sparse-continuation update, if any
    /// (§4.5: "the track records the score for later quality assessment").
    pub last_sparse_score: Option<f64>,
    history_capacity: usize,
}

impl Track {
    /// Create a new Tentative track from an unmatched cluster that passed
    /// the creation policy. `hits = 1`, `misses = 0` (§4.6).
    pub fn new(cluster: &Cluster, config: &TrackingConfig) -> Self {
        let (x, y) = cluster.position_xy();
        let (vx, vy) = (cluster.velocity[0], cluster.velocity[1]);
        // Initial uncertainty is moderate; it shrinks as measurements
        // arrive. Velocity starts less certain than position since it is
        // only indirectly observed by the position-only measurement model.
        let filter = KinematicFilter::new(x, y, vx, vy, 5.0, 10.0);

        let mut aggregates = TrackAggregates::default();
        let speed = vx.hypot(vy);
        aggregates.observe(cluster, speed, 0.0);

        let mut speed_history = VecDeque::with_capacity(config.history_capacity);
        speed_history.push_back(speed);
        let mut position_history = VecDeque::with_capacity(config.history_capacity);
        position_history.push_back((x, y, cluster.timestamp_ns));

        Self {
            track_id: TrackId::new(),
            state: TrackState::Tentative,
            filter,
            hits: 1,
            misses: 0,
            observation_count: 1,
            first_seen_ns: cluster.timestamp_ns,
            last_seen_ns: cluster.timestamp_ns,
            last_predicted_ns: cluster.timestamp_ns,
            frames_in_pretail: 0,
            frames_since_last: 0,
            aggregates,
            speed_history,
            position_history,
            last_sparse_score: None,
            history_capacity: config.history_capacity,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !matches!(self.state, TrackState::Deleted)
    }

    /// `dt`, in seconds, from `last_predicted_ns` to `t_ns`. Non-negative
    /// by construction (the caller validates frame-timestamp
    /// monotonicity).
    pub fn dt_to(&self, t_ns: i64) -> f64 {
        ((t_ns - self.last_predicted_ns).max(0) as f64) * 1e-9
    }

    /// Record that this track's filter has been predicted up to `t_ns`.
    /// Must be called once per frame, immediately after `filter.predict`.
    pub fn mark_predicted(&mut self, t_ns: i64) {
        self.last_predicted_ns = t_ns;
    }

    /// Push a bounded history entry, evicting the oldest on overflow.
    fn push_speed(&mut self, speed: f64) {
        if self.speed_history.len() >= self.history_capacity {
            self.speed_history.pop_front();
        }
        self.speed_history.push_back(speed);
    }

    fn push_position(&mut self, x: f64, y: f64, t_ns: i64) {
        if self.position_history.len() >= self.history_capacity {
            self.position_history.pop_front();
        }
        self.position_history.push_back((x, y, t_ns));
    }

    /// Apply a successful association: update running aggregates and bounded
    /// history. Does not touch the Kalman filter (the caller already ran
    /// `filter.update`) or lifecycle counters.
    pub fn record_association(&mut self, cluster: &Cluster, sparse_score: Option<f64>) {
        let (x, y) = self.filter.position();
        let (vx, vy) = self.filter.velocity();
        let speed = vx.hypot(vy);

        let step_distance = self
            .position_history
            .back()
            .map(|&(px, py, _)| ((x - px).powi(2) + (y - py).powi(2)).sqrt())
            .unwrap_or(0.0);

        self.aggregates.observe(cluster, speed, step_distance);
        self.push_speed(speed);
        self.push_position(x, y, cluster.timestamp_ns);

        self.observation_count += 1;
        self.last_seen_ns = cluster.timestamp_ns;
        self.frames_since_last = 0;
        self.last_sparse_score = sparse_score;
    }

    /// Run the lifecycle state machine for one frame (§4.6). `associated`
    /// covers both a normal match and a sparse-continuation match;
    /// `recovered` marks a long-tail recovery (distinct entry path into
    /// Confirmed). Also applies the covariance sanity cap.
    pub fn advance_lifecycle(&mut self, associated: bool, recovered: bool, config: &TrackingConfig) {
        if self.filter.covariance_trace() > config.max_cov_trace {
            self.state = TrackState::Deleted;
            return;
        }

        match self.state {
            TrackState::Tentative => {
                if associated {
                    self.hits += 1;
                    self.misses = 0;
                    if self.hits >= config.promote_hits {
                        self.state = TrackState::Confirmed;
                    }
                } else {
                    self.misses += 1;
                    self.frames_since_last += 1;
                    if self.misses >= config.max_tentative_misses {
                        self.state = TrackState::Deleted;
                    }
                }
            }
            TrackState::Confirmed => {
                if associated {
                    self.hits += 1;
                    self.misses = 0;
                } else {
                    self.misses += 1;
                    self.frames_since_last += 1;
                    if self.misses >= config.pretail_misses {
                        self.state = TrackState::PreTail;
                        self.frames_in_pretail = 1;
                    }
                }
            }
            TrackState::PreTail => {
                if associated || recovered {
                    self.state = TrackState::Confirmed;
                    self.hits += 1;
                    self.misses = 0;
                    self.frames_in_pretail = 0;
                } else {
                    self.frames_since_last += 1;
                    self.frames_in_pretail += 1;
                    if self.frames_in_pretail >= config.max_pretail_frames {
                        self.state = TrackState::PostTail;
                    }
                }
            }
            TrackState::PostTail => {
                if recovered {
                    self.state = TrackState::Confirmed;
                    self.hits += 1;
                    self.misses = 0;
                    self.frames_since_last = 0;
                } else {
                    self.frames_since_last += 1;
                    if self.frames_since_last > config.max_prediction_frames {
                        self.state = TrackState::Deleted;
                    }
                }
            }
            TrackState::Deleted => {}
        }
    }

    /// Compute a point-in-time quality snapshot for downstream consumers.
    pub fn quality_snapshot(&self) -> QualitySnapshot {
        let mut speeds: Vec<f64> = self.speed_history.iter().copied().collect();
        speeds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median_speed = percentile(&speeds, 0.5);
        let speed_p95 = percentile(&speeds, 0.95);

        let heading_variance = heading_variance(&self.position_history);

        QualitySnapshot {
            median_speed,
            speed_p95,
            heading_variance,
            observation_count: self.observation_count,
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn heading_variance(history: &VecDeque<(f64, f64, i64)>) -> f64 {
    if history.len() < 3 {
        return 0.0;
    }
    let headings: Vec<f64> = history
        .iter()
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| {
            let (x0, y0, _) = w[0];
            let (x1, y1, _) = w[1];
            (y1 - y0).atan2(x1 - x0)
        })
        .collect();
    let mean: f64 = headings.iter().sum::<f64>() / headings.len() as f64;
    headings.iter().map(|h| (h - mean).powi(2)).sum::<f64>() / headings.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cluster() -> Cluster {
        Cluster {
            cluster_id: 1,
            centroid: [10.0, 20.0, 0.5],
            bbox: [1.8, 0.6, 1.7],
            point_count: 20,
            velocity: [5.0, 2.0],
            velocity_confidence: 0.9,
            timestamp_ns: 0,
            height_p95: 1.6,
            intensity_mean: 30.0,
        }
    }

    #[test]
    fn new_track_is_tentative_with_one_hit() {
        let t = Track::new(&sample_cluster(), &TrackingConfig::default());
        assert_eq!(t.state, TrackState::Tentative);
        assert_eq!(t.hits, 1);
        assert_eq!(t.misses, 0);
        assert_eq!(t.observation_count, 1);
    }

    #[test]
    fn promotes_after_promote_hits_consecutive_associations() {
        let config = TrackingConfig::default();
        let mut t = Track::new(&sample_cluster(), &config);
        t.advance_lifecycle(true, false, &config);
        assert_eq!(t.state, TrackState::Tentative);
        t.advance_lifecycle(true, false, &config);
        assert_eq!(t.state, TrackState::Confirmed);
    }

    #[test]
    fn tentative_deletes_after_max_misses() {
        let config = TrackingConfig::default();
        let mut t = Track::new(&sample_cluster(), &config);
        for _ in 0..config.max_tentative_misses {
            t.advance_lifecycle(false, false, &config);
        }
        assert_eq!(t.state, TrackState::Deleted);
    }

    #[test]
    fn speed_history_never_exceeds_capacity() {
        let config = TrackingConfig {
            history_capacity: 4,
            ..Default::default()
        };
        let mut t = Track::new(&sample_cluster(), &config);
        for i in 0..20 {
            t.record_association(&sample_cluster(), None);
            assert!(t.speed_history.len() <= 4, "overflow at iteration {i}");
        }
    }

    #[test]
    fn observation_count_is_monotonic() {
        let config = TrackingConfig::default();
        let mut t = Track::new(&sample_cluster(), &config);
        let mut prev = t.observation_count;
        for _ in 0..10 {
            t.record_association(&sample_cluster(), None);
            assert!(t.observation_count >= prev);
            prev = t.observation_count;
        }
    }
}
