//! Adaptive sparse-continuation tolerance table (§4.5).
//!
//! Below `sparse_continuation_ceiling` points, a matched cluster is too
//! sparse to trust a full Kalman update at normal gain; instead the track
//! checks the candidate against a velocity/spatial tolerance band, and if
//! it passes, nudges the state toward the measurement with a fixed (not
//! gain-computed) blend instead of running the filter's `update`. The
//! tolerance band tightens as point_count drops — fewer points means less
//! trust, so the kinematics must match more closely to be accepted.

use nalgebra::Vector2;

use crate::cluster::Cluster;
use crate::config::TrackingConfig;

/// One row of the point-count -> tolerance table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceRow {
    pub min_point_count: u32,
    pub velocity_tol_mps: f64,
    pub spatial_tol_m: f64,
}

/// Rows are evaluated highest-`min_point_count`-first so the row for the
/// candidate's actual point-count tier wins.
const TABLE: &[ToleranceRow] = &[
    ToleranceRow { min_point_count: 12, velocity_tol_mps: 2.0, spatial_tol_m: 1.0 },
    ToleranceRow { min_point_count: 6, velocity_tol_mps: 1.5, spatial_tol_m: 0.8 },
    ToleranceRow { min_point_count: 3, velocity_tol_mps: 0.5, spatial_tol_m: 0.5 },
];

/// Look up the tolerance row applicable to `point_count`. Returns `None`
/// below the table's floor (point_count < 3, always rejected).
pub fn tolerance_for(point_count: u32) -> Option<ToleranceRow> {
    TABLE
        .iter()
        .filter(|row| point_count >= row.min_point_count)
        .max_by_key(|row| row.min_point_count)
        .copied()
}

/// Outcome of a sparse-continuation eligibility check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseContinuation {
    /// In (0, 1]; higher is a better-supported continuation.
    pub score: f64,
}

/// Decide whether `cluster` is eligible for sparse continuation against a
/// track's predicted position/velocity, and if so, score it.
///
/// Eligibility requires: `point_count` at or above `min_points_absolute`,
/// `velocity_confidence` at or above `min_velocity_confidence_for_sparse`,
/// and both the spatial and velocity deltas within the tolerance row for
/// this point count.
pub fn evaluate(
    cluster: &Cluster,
    predicted_pos: Vector2<f64>,
    predicted_vel: Vector2<f64>,
    config: &TrackingConfig,
) -> Option<SparseContinuation> {
    if cluster.point_count < config.min_points_absolute {
        return None;
    }
    if cluster.velocity_confidence < config.min_velocity_confidence_for_sparse {
        return None;
    }
    let row = tolerance_for(cluster.point_count)?;

    let (cx, cy) = cluster.position_xy();
    let spatial_delta = ((cx - predicted_pos.x).powi(2) + (cy - predicted_pos.y).powi(2)).sqrt();
    if spatial_delta > row.spatial_tol_m {
        return None;
    }

    let vel_delta_x = (cluster.velocity[0] - predicted_vel.x).abs();
    let vel_delta_y = (cluster.velocity[1] - predicted_vel.y).abs();
    if vel_delta_x > row.velocity_tol_mps || vel_delta_y > row.velocity_tol_mps {
        return None;
    }
    let vel_delta = vel_delta_x.hypot(vel_delta_y);

    let spatial_score = 1.0 - (spatial_delta / row.spatial_tol_m).clamp(0.0, 1.0);
    let velocity_score = 1.0 - (vel_delta / (row.velocity_tol_mps * std::f64::consts::SQRT_2)).clamp(0.0, 1.0);
    let confidence_score = cluster.velocity_confidence;

    let score = ((spatial_score + velocity_score + confidence_score) / 3.0).max(f64::MIN_POSITIVE);
    Some(SparseContinuation { score })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(point_count: u32, x: f64, y: f64, vx: f64, vy: f64, conf: f64) -> Cluster {
        Cluster {
            cluster_id: 1,
            centroid: [x, y, 0.0],
            bbox: [1.0, 1.0, 1.0],
            point_count,
            velocity: [vx, vy],
            velocity_confidence: conf,
            timestamp_ns: 0,
            height_p95: 1.0,
            intensity_mean: 10.0,
        }
    }

    #[test]
    fn tolerance_tightens_as_points_drop() {
        let high = tolerance_for(15).unwrap();
        let low = tolerance_for(4).unwrap();
        assert!(low.spatial_tol_m < high.spatial_tol_m);
        assert!(low.velocity_tol_mps < high.velocity_tol_mps);
    }

    #[test]
    fn below_table_floor_yields_none() {
        assert!(tolerance_for(0).is_none());
        assert!(tolerance_for(2).is_none());
    }

    #[test]
    fn close_sparse_cluster_is_eligible() {
        let config = TrackingConfig::default();
        let c = cluster(5, 10.05, 20.0, 5.0, 2.0, 0.8);
        let result = evaluate(&c, Vector2::new(10.0, 20.0), Vector2::new(5.0, 2.0), &config);
        assert!(result.is_some());
        assert!(result.unwrap().score > 0.5);
    }

    #[test]
    fn far_sparse_cluster_is_rejected() {
        let config = TrackingConfig::default();
        let c = cluster(4, 50.0, 50.0, 5.0, 2.0, 0.8);
        let result = evaluate(&c, Vector2::new(10.0, 20.0), Vector2::new(5.0, 2.0), &config);
        assert!(result.is_none());
    }

    #[test]
    fn low_velocity_confidence_is_rejected() {
        let config = TrackingConfig::default();
        let c = cluster(10, 10.0, 20.0, 5.0, 2.0, 0.1);
        let result = evaluate(&c, Vector2::new(10.0, 20.0), Vector2::new(5.0, 2.0), &config);
        assert!(result.is_none());
    }

    /// Literal S4 scenario: velocity (5.2, 0.1) against track velocity
    /// (5, 0), point_count 4 — accepted (both deltas within 0.5 tol).
    #[test]
    fn s4_accepts_small_velocity_divergence_at_point_count_4() {
        let config = TrackingConfig::default();
        let c = cluster(4, 10.0, 20.0, 5.2, 0.1, 0.8);
        let result = evaluate(&c, Vector2::new(10.0, 20.0), Vector2::new(5.0, 0.0), &config);
        assert!(result.is_some());
    }

    /// Literal S4 variant: velocity (6.0, 0) at the same point_count is
    /// rejected (|Δvx| = 1.0 exceeds the 0.5 tolerance).
    #[test]
    fn s4_rejects_larger_velocity_divergence_at_point_count_4() {
        let config = TrackingConfig::default();
        let c = cluster(4, 10.0, 20.0, 6.0, 0.0, 0.8);
        let result = evaluate(&c, Vector2::new(10.0, 20.0), Vector2::new(5.0, 0.0), &config);
        assert!(result.is_none());
    }

    /// Invariant 10: rejected one below `min_points_absolute`, accepted at
    /// exactly that floor with velocity in tolerance.
    #[test]
    fn invariant_10_point_count_floor_boundary() {
        let config = TrackingConfig::default();
        let below = cluster(config.min_points_absolute - 1, 10.0, 20.0, 5.0, 0.0, 0.8);
        assert!(evaluate(&below, Vector2::new(10.0, 20.0), Vector2::new(5.0, 0.0), &config).is_none());

        let at_floor = cluster(config.min_points_absolute, 10.0, 20.0, 5.0, 0.0, 0.8);
        assert!(evaluate(&at_floor, Vector2::new(10.0, 20.0), Vector2::new(5.0, 0.0), &config).is_some());
    }
}
