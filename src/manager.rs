//! Frame-by-frame orchestration: predict, associate, update, lifecycle
//! (§4.8).

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::association::associate;
use crate::cluster::Cluster;
use crate::config::TrackingConfig;
use crate::debug::{AssociationRecord, DebugCollector, FrameArtifacts, GatingRecord, InnovationRecord, PredictionRecord};
use crate::error::TrackError;
use crate::filter::measurement_noise;
use crate::gating::gating_ellipse;
use crate::longtail::{best_recovery, LongTailPrediction};
use crate::sparse::evaluate as evaluate_sparse;
use crate::track::{QualitySnapshot, Track, TrackId, TrackState};

/// Outward-facing per-track snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub track_id: TrackId,
    pub state: TrackState,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub covariance_4x4: Option<[[f64; 4]; 4]>,
    pub speed_mps: f64,
    pub heading_rad: f64,
    pub hits: u32,
    pub misses: u32,
    pub observation_count: u64,
    pub avg_speed_mps: f64,
    pub peak_speed_mps: f64,
    pub path_length_m: f64,
}

/// Everything produced by one call to [`TrackManager::process_frame`].
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame_id: u64,
    pub tracks: Vec<TrackSnapshot>,
    pub new_track_ids: Vec<TrackId>,
    pub deleted_track_ids: Vec<TrackId>,
    pub debug: Option<FrameArtifacts>,
}

/// Owns the live track population and drives the per-frame update.
pub struct TrackManager {
    config: TrackingConfig,
    tracks: Vec<Track>,
    last_frame_id: Option<u64>,
    last_t_ns: Option<i64>,
    poisoned: bool,
    debug: DebugCollector,
}

impl TrackManager {
    pub fn new(config: TrackingConfig) -> Result<Self, TrackError> {
        config.validate()?;
        Ok(Self {
            config,
            tracks: Vec::new(),
            last_frame_id: None,
            last_t_ns: None,
            poisoned: false,
            debug: DebugCollector::new(),
        })
    }

    pub fn set_debug_enabled(&mut self, enabled: bool) {
        self.debug.set_enabled(enabled);
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn check_not_poisoned(&self) -> Result<(), TrackError> {
        if self.poisoned {
            return Err(TrackError::Internal(
                "track manager is poisoned by a prior internal error".to_string(),
            ));
        }
        Ok(())
    }

    /// Run one frame through the full predict/associate/update/lifecycle
    /// loop.
    ///
    /// `frame_id` must be strictly increasing across calls (monotonicity
    /// invariant, §8). `t_ns` must be non-decreasing.
    pub fn process_frame(
        &mut self,
        frame_id: u64,
        t_ns: i64,
        clusters: &[Cluster],
    ) -> Result<FrameOutput, TrackError> {
        self.check_not_poisoned()?;

        if let Some(last) = self.last_frame_id {
            if frame_id <= last {
                return Err(TrackError::InvalidInput(format!(
                    "frame_id {frame_id} is not strictly greater than previous frame_id {last}"
                )));
            }
        }
        if let Some(last_t) = self.last_t_ns {
            if t_ns < last_t {
                return Err(TrackError::InvalidInput(format!(
                    "t_ns {t_ns} precedes previous frame's t_ns {last_t}"
                )));
            }
        }
        for c in clusters {
            c.validate()?;
        }

        self.debug.begin_frame(frame_id);

        // 1. Predict every active track forward to this frame's timestamp.
        for track in &mut self.tracks {
            let dt = track.dt_to(t_ns);
            track
                .filter
                .predict(dt, self.config.process_noise_sigma_a.powi(2));
            track.mark_predicted(t_ns);
            if self.debug.is_enabled() {
                let (x, y) = track.filter.position();
                self.debug.record_prediction(PredictionRecord {
                    track_id: track.track_id,
                    x,
                    y,
                });
            }
        }

        // 2. Gated greedy association.
        let result = associate(&self.tracks, clusters, &self.config);

        if self.debug.is_enabled() {
            for track in &self.tracks {
                if let Some(prediction) = track.filter.last_prediction {
                    if let Some(ellipse) = gating_ellipse(prediction.h_p_ht, self.config.gate_chi2) {
                        self.debug.record_gating_ellipse(GatingRecord {
                            track_id: track.track_id,
                            ellipse,
                        });
                    }
                }
            }
        }

        // 3. Apply matched pairs: normal Kalman update or sparse
        // continuation, depending on point count.
        let mut recovered_tracks: Vec<bool> = vec![false; self.tracks.len()];
        // Clusters whose gated match was rejected by the sparse-continuation
        // table (§4.5): these are not claimed by this track and remain
        // available for new-track admission below.
        let mut sparse_rejected_clusters: Vec<bool> = vec![false; clusters.len()];
        for &(track_idx, cluster_idx, d_sq) in &result.matches {
            let cluster = &clusters[cluster_idx];
            let track = &mut self.tracks[track_idx];

            let sparse = cluster.point_count < self.config.sparse_continuation_ceiling;
            let mut applied_sparse = false;

            if sparse {
                let (px, py) = track.filter.position();
                let (pvx, pvy) = track.filter.velocity();
                if let Some(outcome) = evaluate_sparse(
                    cluster,
                    Vector2::new(px, py),
                    Vector2::new(pvx, pvy),
                    &self.config,
                ) {
                    // Blend toward the measurement without running the
                    // full-gain Kalman update (§4.5): the measurement is
                    // too sparse to trust at normal gain.
                    let blend = 0.3;
                    let (cx, cy) = cluster.position_xy();
                    let new_x = px + (cx - px) * blend;
                    let new_y = py + (cy - py) * blend;
                    track.filter.state[0] = new_x;
                    track.filter.state[1] = new_y;
                    track.record_association(cluster, Some(outcome.score));
                    applied_sparse = true;
                    if self.debug.is_enabled() {
                        self.debug.record_association(AssociationRecord {
                            track_id: track.track_id,
                            cluster_id: cluster.cluster_id,
                            d_sq,
                            sparse: true,
                        });
                    }
                } else {
                    // Gated on position alone but fails the sparse tolerance
                    // table (§4.5: "A cluster is valid for sparse
                    // continuation ... when all hold"). Not a measurement
                    // this track may trust; take a miss and leave the
                    // cluster free for new-track admission.
                    trace!(
                        track_id = %track.track_id,
                        cluster_id = cluster.cluster_id,
                        "sparse cluster failed continuation tolerance, treating as unmatched"
                    );
                    sparse_rejected_clusters[cluster_idx] = true;
                    track.advance_lifecycle(false, false, &self.config);
                    continue;
                }
            }

            if !applied_sparse {
                let z = Vector2::new(cluster.centroid[0], cluster.centroid[1]);
                let r = measurement_noise(
                    cluster.point_count,
                    self.config.measurement_noise_sigma_p,
                    self.config.full_confidence_point_count,
                );
                let residual_before = z - Vector2::new(track.filter.position().0, track.filter.position().1);
                let updated = track.filter.update(z, r);
                if !updated {
                    warn!(track_id = %track.track_id, "numerical degeneracy updating track");
                    track.advance_lifecycle(false, false, &self.config);
                    continue;
                }
                if self.debug.is_enabled() {
                    self.debug.record_innovation(InnovationRecord {
                        track_id: track.track_id,
                        residual_x: residual_before.x,
                        residual_y: residual_before.y,
                    });
                    self.debug.record_association(AssociationRecord {
                        track_id: track.track_id,
                        cluster_id: cluster.cluster_id,
                        d_sq,
                        sparse: false,
                    });
                }
                track.record_association(cluster, None);
            }

            track.advance_lifecycle(true, false, &self.config);
        }

        // 4. Long-tail coast + recovery search for unmatched PreTail/PostTail
        // tracks against the clusters no regular match claimed.
        let mut claimed_clusters: Vec<bool> = vec![false; clusters.len()];
        for &(_, cluster_idx, _) in &result.matches {
            if !sparse_rejected_clusters[cluster_idx] {
                claimed_clusters[cluster_idx] = true;
            }
        }

        for &track_idx in &result.unmatched_tracks {
            let track = &mut self.tracks[track_idx];
            if !matches!(track.state, TrackState::PreTail | TrackState::PostTail) {
                continue;
            }
            let (x, y) = track.filter.position();
            let (vx, vy) = track.filter.velocity();
            let dt = 0.0; // already predicted to t_ns above
            let prediction = LongTailPrediction::coast(
                x,
                y,
                vx,
                vy,
                dt,
                track.frames_since_last + 1,
                &self.config,
            );

            let remaining: Vec<Cluster> = clusters
                .iter()
                .enumerate()
                .filter(|(i, _)| !claimed_clusters[*i])
                .map(|(_, c)| *c)
                .collect();

            if let Some(recovered) = best_recovery(&prediction, &remaining, &self.config) {
                let recovered_id = recovered.cluster_id;
                let original_idx = clusters.iter().position(|c| c.cluster_id == recovered_id);
                if let Some(original_idx) = original_idx {
                    claimed_clusters[original_idx] = true;
                }
                let z = Vector2::new(recovered.centroid[0], recovered.centroid[1]);
                let r = measurement_noise(
                    recovered.point_count,
                    self.config.measurement_noise_sigma_p,
                    self.config.full_confidence_point_count,
                );
                if track.filter.update(z, r) {
                    track.record_association(recovered, None);
                    recovered_tracks[track_idx] = true;
                    debug!(track_id = %track.track_id, "recovered from long-tail coast");
                } else {
                    if let Some(original_idx) = original_idx {
                        claimed_clusters[original_idx] = false;
                    }
                    warn!(track_id = %track.track_id, "numerical degeneracy during long-tail recovery");
                }
            }
        }

        for (track_idx, track) in self.tracks.iter_mut().enumerate() {
            if result.unmatched_tracks.contains(&track_idx) {
                track.advance_lifecycle(false, recovered_tracks[track_idx], &self.config);
            }
        }

        // 5. Admit new tracks from clusters nobody claimed.
        let mut new_track_ids = Vec::new();
        for (idx, cluster) in clusters.iter().enumerate() {
            if claimed_clusters[idx] {
                continue;
            }
            if cluster.point_count < self.config.min_points_for_new_track {
                continue;
            }
            if cluster.velocity_confidence < self.config.min_confidence_for_new_track {
                continue;
            }
            let track = Track::new(cluster, &self.config);
            new_track_ids.push(track.track_id);
            trace!(track_id = %track.track_id, "admitted new track");
            self.tracks.push(track);
        }

        // 6. Purge deleted tracks.
        let mut deleted_track_ids = Vec::new();
        self.tracks.retain(|t| {
            if t.state == TrackState::Deleted {
                deleted_track_ids.push(t.track_id);
                false
            } else {
                true
            }
        });

        self.last_frame_id = Some(frame_id);
        self.last_t_ns = Some(t_ns);

        let snapshots = self.tracks.iter().map(snapshot_of).collect();

        Ok(FrameOutput {
            frame_id,
            tracks: snapshots,
            new_track_ids,
            deleted_track_ids,
            debug: self.debug.emit(),
        })
    }

    /// Force the manager into the poisoned state; used by callers that
    /// detect an unrecoverable external invariant violation.
    pub fn poison(&mut self, reason: &str) {
        warn!(reason, "poisoning track manager");
        self.poisoned = true;
    }

    pub fn quality_snapshot(&self, track_id: TrackId) -> Option<QualitySnapshot> {
        self.tracks
            .iter()
            .find(|t| t.track_id == track_id)
            .map(Track::quality_snapshot)
    }
}

fn snapshot_of(track: &Track) -> TrackSnapshot {
    let (x, y) = track.filter.position();
    let (vx, vy) = track.filter.velocity();
    let speed_mps = vx.hypot(vy);
    let heading_rad = vy.atan2(vx);
    let covariance_4x4 = if track.filter.is_covariance_healthy(1e-3) {
        let c = track.filter.covariance;
        Some([
            [c[(0, 0)], c[(0, 1)], c[(0, 2)], c[(0, 3)]],
            [c[(1, 0)], c[(1, 1)], c[(1, 2)], c[(1, 3)]],
            [c[(2, 0)], c[(2, 1)], c[(2, 2)], c[(2, 3)]],
            [c[(3, 0)], c[(3, 1)], c[(3, 2)], c[(3, 3)]],
        ])
    } else {
        None
    };

    TrackSnapshot {
        track_id: track.track_id,
        state: track.state,
        x,
        y,
        vx,
        vy,
        covariance_4x4,
        speed_mps,
        heading_rad,
        hits: track.hits,
        misses: track.misses,
        observation_count: track.observation_count,
        avg_speed_mps: track.aggregates.avg_speed,
        peak_speed_mps: track.aggregates.peak_speed,
        path_length_m: track.aggregates.path_length_m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: u64, t_ns: i64, x: f64, y: f64) -> Cluster {
        Cluster {
            cluster_id: id,
            centroid: [x, y, 0.0],
            bbox: [1.8, 0.6, 1.7],
            point_count: 25,
            velocity: [5.0, 0.0],
            velocity_confidence: 0.9,
            timestamp_ns: t_ns,
            height_p95: 1.6,
            intensity_mean: 30.0,
        }
    }

    #[test]
    fn rejects_non_monotonic_frame_id() {
        let mut mgr = TrackManager::new(TrackingConfig::default()).unwrap();
        mgr.process_frame(1, 0, &[]).unwrap();
        let err = mgr.process_frame(1, 100_000_000, &[]);
        assert!(err.is_err());
    }

    #[test]
    fn track_confirms_after_enough_consistent_hits() {
        let config = TrackingConfig::default();
        let mut mgr = TrackManager::new(config.clone()).unwrap();
        let mut t_ns = 0i64;
        let mut state = TrackState::Tentative;
        for frame in 1..=5u64 {
            let out = mgr
                .process_frame(frame, t_ns, &[cluster(1, t_ns, 10.0 + frame as f64 * 0.5, 20.0)])
                .unwrap();
            if let Some(snapshot) = out.tracks.first() {
                state = snapshot.state;
            }
            t_ns += 100_000_000;
        }
        assert_eq!(state, TrackState::Confirmed);
    }

    #[test]
    fn track_survives_brief_occlusion_and_recovers() {
        let config = TrackingConfig::default();
        let mut mgr = TrackManager::new(config).unwrap();
        let mut t_ns = 0i64;
        for frame in 1..=4u64 {
            mgr.process_frame(frame, t_ns, &[cluster(1, t_ns, 10.0 + frame as f64 * 0.5, 20.0)])
                .unwrap();
            t_ns += 100_000_000;
        }
        // occlusion: no clusters for a couple of frames
        for frame in 5..=6u64 {
            mgr.process_frame(frame, t_ns, &[]).unwrap();
            t_ns += 100_000_000;
        }
        // reappears nearby with a consistent velocity
        let out = mgr
            .process_frame(7, t_ns, &[cluster(1, t_ns, 14.0, 20.0)])
            .unwrap();
        assert_eq!(out.tracks.len(), 1);
        assert_ne!(out.tracks[0].state, TrackState::Deleted);
    }

    #[test]
    fn new_track_created_from_unmatched_cluster() {
        let mut mgr = TrackManager::new(TrackingConfig::default()).unwrap();
        let out = mgr.process_frame(1, 0, &[cluster(1, 0, 10.0, 20.0)]).unwrap();
        assert_eq!(out.new_track_ids.len(), 1);
        assert_eq!(out.tracks.len(), 1);
    }

    #[test]
    fn low_point_count_cluster_does_not_spawn_a_track() {
        let mut mgr = TrackManager::new(TrackingConfig::default()).unwrap();
        let mut c = cluster(1, 0, 10.0, 20.0);
        c.point_count = 1;
        let out = mgr.process_frame(1, 0, &[c]).unwrap();
        assert!(out.new_track_ids.is_empty());
    }
}
