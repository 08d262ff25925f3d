//! Greedy nearest-neighbour data association with gating (§4.3).

use nalgebra::Vector2;

use crate::cluster::Cluster;
use crate::config::TrackingConfig;
use crate::filter::measurement_noise;
use crate::gating::{mahalanobis_sq, passes_gate};
use crate::track::{Track, TrackId, TrackState};

/// A gated (track, cluster) candidate pair.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    track_idx: usize,
    cluster_idx: usize,
    d_sq: f64,
    point_count: u32,
    velocity_confidence: f64,
    cluster_id: u64,
}

/// Result of one frame's association pass.
#[derive(Debug, Clone)]
pub struct AssociationResult {
    /// `(track_idx, cluster_idx, d_sq)`, in the index spaces of the slices
    /// passed to [`associate`].
    pub matches: Vec<(usize, usize, f64)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_clusters: Vec<usize>,
}

/// Build every gated candidate between `tracks` (which must already have
/// `predict` called this frame) and `clusters`, then greedily select
/// matches best-first.
///
/// Only Tentative, Confirmed, and PreTail tracks participate (§4.3);
/// PostTail tracks are excluded here and surface only through the
/// long-tail recovery path (§4.4), so they always come back in
/// `unmatched_tracks`.
///
/// Tie-break order when `d_sq` is equal (§4.3): higher `point_count` wins,
/// then higher `velocity_confidence`, then smaller `cluster_id`.
pub fn associate(tracks: &[Track], clusters: &[Cluster], config: &TrackingConfig) -> AssociationResult {
    let mut candidates = Vec::with_capacity(tracks.len() * 2);

    for (track_idx, track) in tracks.iter().enumerate() {
        if track.state == TrackState::PostTail {
            continue;
        }
        let Some(prediction) = track.filter.last_prediction else {
            continue;
        };
        for (cluster_idx, cluster) in clusters.iter().enumerate() {
            let r = measurement_noise(
                cluster.point_count,
                config.measurement_noise_sigma_p,
                config.full_confidence_point_count,
            );
            let s = prediction.h_p_ht + r;
            let z = Vector2::new(cluster.centroid[0], cluster.centroid[1]);
            let Some(d_sq) = mahalanobis_sq(z, prediction.z_pred, s) else {
                continue;
            };
            if !passes_gate(d_sq, config.gate_chi2) {
                continue;
            }
            candidates.push(Candidate {
                track_idx,
                cluster_idx,
                d_sq,
                point_count: cluster.point_count,
                velocity_confidence: cluster.velocity_confidence,
                cluster_id: cluster.cluster_id,
            });
        }
    }

    candidates.sort_by(|a, b| {
        a.d_sq
            .partial_cmp(&b.d_sq)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.point_count.cmp(&a.point_count))
            .then_with(|| {
                b.velocity_confidence
                    .partial_cmp(&a.velocity_confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });

    let mut taken_tracks = vec![false; tracks.len()];
    let mut taken_clusters = vec![false; clusters.len()];
    let mut matches = Vec::new();

    for c in &candidates {
        if taken_tracks[c.track_idx] || taken_clusters[c.cluster_idx] {
            continue;
        }
        taken_tracks[c.track_idx] = true;
        taken_clusters[c.cluster_idx] = true;
        matches.push((c.track_idx, c.cluster_idx, c.d_sq));
    }

    let unmatched_tracks = (0..tracks.len()).filter(|&i| !taken_tracks[i]).collect();
    let unmatched_clusters = (0..clusters.len()).filter(|&i| !taken_clusters[i]).collect();

    AssociationResult {
        matches,
        unmatched_tracks,
        unmatched_clusters,
    }
}

/// Lookup helper: map a matched track index back to its [`TrackId`].
pub fn track_id_at(tracks: &[Track], idx: usize) -> TrackId {
    tracks[idx].track_id
}
