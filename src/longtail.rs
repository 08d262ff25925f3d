//! Long-tail coast-and-recover regime for PreTail/PostTail tracks (§4.4).
//!
//! Once a track stops matching, it keeps coasting on its last known
//! velocity instead of freezing in place; the uncertainty radius used for
//! recovery search grows with the number of frames coasted, capped at
//! `max_uncertainty_radius`.

use nalgebra::Vector2;

use crate::cluster::Cluster;
use crate::config::TrackingConfig;

/// A coasted prediction for a track with no association this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LongTailPrediction {
    pub predicted_x: f64,
    pub predicted_y: f64,
    pub velocity_x: f64,
    pub velocity_y: f64,
    pub uncertainty_radius: f64,
    pub frames_since_last: u32,
}

impl LongTailPrediction {
    /// Coast `(x, y)` forward by `dt` seconds at `(vx, vy)` and derive the
    /// uncertainty radius from `frames_since_last`.
    pub fn coast(
        x: f64,
        y: f64,
        vx: f64,
        vy: f64,
        dt: f64,
        frames_since_last: u32,
        config: &TrackingConfig,
    ) -> Self {
        let radius = (config.uncertainty_r0 + config.uncertainty_k * frames_since_last as f64)
            .min(config.max_uncertainty_radius);
        Self {
            predicted_x: x + vx * dt,
            predicted_y: y + vy * dt,
            velocity_x: vx,
            velocity_y: vy,
            uncertainty_radius: radius,
            frames_since_last,
        }
    }

    #[inline]
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.predicted_x, self.predicted_y)
    }
}

/// Per-component velocity tolerance for long-tail recovery, relaxed when
/// the candidate cluster's velocity estimate is low-confidence (§4.4:
/// "a configurable tolerance ... relaxed when confidence is low"). Widens
/// linearly from `recovery_vel_tol` at full confidence towards double that
/// at zero confidence, the same shortfall-scaling `measurement_noise` uses
/// for point-count confidence.
fn recovery_velocity_tolerance(config: &TrackingConfig, velocity_confidence: f64) -> f64 {
    let shortfall = 1.0 - velocity_confidence.clamp(0.0, 1.0);
    config.recovery_vel_tol * (1.0 + shortfall)
}

/// `true` if `cluster` is a plausible recovery for this coasted
/// prediction: within the uncertainty radius spatially, and within the
/// (confidence-relaxed) velocity tolerance per component.
pub fn is_recovery_candidate(
    prediction: &LongTailPrediction,
    cluster: &Cluster,
    config: &TrackingConfig,
) -> bool {
    let (cx, cy) = cluster.position_xy();
    let spatial_delta =
        ((cx - prediction.predicted_x).powi(2) + (cy - prediction.predicted_y).powi(2)).sqrt();
    if spatial_delta > prediction.uncertainty_radius {
        return false;
    }

    let vel_tol = recovery_velocity_tolerance(config, cluster.velocity_confidence);
    (cluster.velocity[0] - prediction.velocity_x).abs() <= vel_tol
        && (cluster.velocity[1] - prediction.velocity_y).abs() <= vel_tol
}

/// Rank recovery candidates for one prediction by normalised combined
/// position+velocity distance (lower is better). Candidates that fail
/// [`is_recovery_candidate`] are excluded entirely, not merely ranked low.
pub fn best_recovery<'a>(
    prediction: &LongTailPrediction,
    candidates: &'a [Cluster],
    config: &TrackingConfig,
) -> Option<&'a Cluster> {
    candidates
        .iter()
        .filter(|c| is_recovery_candidate(prediction, c, config))
        .min_by(|a, b| {
            combined_distance(prediction, a, config)
                .partial_cmp(&combined_distance(prediction, b, config))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

fn combined_distance(prediction: &LongTailPrediction, cluster: &Cluster, config: &TrackingConfig) -> f64 {
    let (cx, cy) = cluster.position_xy();
    let spatial = ((cx - prediction.predicted_x).powi(2) + (cy - prediction.predicted_y).powi(2)).sqrt()
        / prediction.uncertainty_radius.max(1e-6);
    let vel_tol = recovery_velocity_tolerance(config, cluster.velocity_confidence);
    let velocity = ((cluster.velocity[0] - prediction.velocity_x).powi(2)
        + (cluster.velocity[1] - prediction.velocity_y).powi(2))
    .sqrt()
        / vel_tol.max(1e-6);
    spatial + velocity
}
