//! Constant-velocity Kalman filter over state `[x, y, vx, vy]`.
//!
//! Mirrors the predict/update structure of the grounding crate's augmented
//! EKF (`godview_time::AugmentedStateFilter`), narrowed to the fixed 4-state
//! model this spec calls for: no lag-augmentation, no OOSM handling, just
//! `predict(dt)` / `update(z, R)` with a cached innovation for gating.

use nalgebra::{Matrix2, Matrix4, Vector2, Vector4};
use serde::{Deserialize, Serialize};

/// Cached result of the most recent `predict` call, valid only for the
/// frame it was computed in.
///
/// `h_p_ht` is `H P H^T` in the predicted (position-only) measurement
/// space; it does *not* include measurement noise, because `R` varies per
/// candidate cluster (point-count dependent, §4.1) and association gates
/// several candidate clusters against the same prediction. Per-candidate
/// innovation covariance is `h_p_ht + R(cluster)`, computed by the caller
/// (see [`crate::gating`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PredictionCache {
    pub z_pred: Vector2<f64>,
    pub h_p_ht: Matrix2<f64>,
}

/// Constant-velocity Kalman filter state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinematicFilter {
    pub state: Vector4<f64>,
    pub covariance: Matrix4<f64>,
    #[serde(skip)]
    pub last_prediction: Option<PredictionCache>,
}

fn measurement_matrix() -> nalgebra::Matrix2x4<f64> {
    let mut h = nalgebra::Matrix2x4::zeros();
    h[(0, 0)] = 1.0;
    h[(1, 1)] = 1.0;
    h
}

fn transition_matrix(dt: f64) -> Matrix4<f64> {
    let mut f = Matrix4::identity();
    f[(0, 2)] = dt;
    f[(1, 3)] = dt;
    f
}

/// Piecewise-white-acceleration process noise discretisation for a
/// constant-velocity model with scalar acceleration variance `sigma_a_sq`.
fn process_noise(dt: f64, sigma_a_sq: f64) -> Matrix4<f64> {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt3 * dt;

    let q_pp = dt4 / 4.0;
    let q_pv = dt3 / 2.0;
    let q_vv = dt2;

    Matrix4::new(
        q_pp, 0.0, q_pv, 0.0,
        0.0, q_pp, 0.0, q_pv,
        q_pv, 0.0, q_vv, 0.0,
        0.0, q_pv, 0.0, q_vv,
    ) * sigma_a_sq
}

impl KinematicFilter {
    /// Initialise directly from an observed position and velocity (the
    /// cluster already carries a velocity estimate, so a new track does not
    /// start from rest).
    pub fn new(x: f64, y: f64, vx: f64, vy: f64, initial_pos_var: f64, initial_vel_var: f64) -> Self {
        let state = Vector4::new(x, y, vx, vy);
        let covariance = Matrix4::from_diagonal(&Vector4::new(
            initial_pos_var,
            initial_pos_var,
            initial_vel_var,
            initial_vel_var,
        ));
        Self {
            state,
            covariance,
            last_prediction: None,
        }
    }

    #[inline]
    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }

    #[inline]
    pub fn velocity(&self) -> (f64, f64) {
        (self.state[2], self.state[3])
    }

    /// `x <- F(dt) x`, `P <- F(dt) P F(dt)^T + Q(dt)`. Caches the predicted
    /// measurement and `H P H^T` for this frame's gating computations.
    ///
    /// `dt = 0` is the identity on `x` and `P` (invariant #7 in §8): `F(0)`
    /// is the identity matrix and `Q(0)` is the zero matrix.
    pub fn predict(&mut self, dt: f64, sigma_a_sq: f64) {
        let f = transition_matrix(dt);
        self.state = f * self.state;
        self.covariance = f * self.covariance * f.transpose() + process_noise(dt, sigma_a_sq);

        let h = measurement_matrix();
        let z_pred = h * self.state;
        let h_p_ht = h * self.covariance * h.transpose();
        self.last_prediction = Some(PredictionCache { z_pred, h_p_ht });
    }

    /// Standard Kalman gain update from a position measurement `z` with
    /// noise `r`. Returns `false` (and leaves state/covariance untouched) if
    /// the innovation covariance is numerically singular — the caller
    /// treats this as `NumericalDegeneracy` and the track takes a miss.
    pub fn update(&mut self, z: Vector2<f64>, r: Matrix2<f64>) -> bool {
        let h = measurement_matrix();
        let y = z - h * self.state;
        let s = h * self.covariance * h.transpose() + r;

        let s_inv = match s.try_inverse() {
            Some(inv) => inv,
            None => return false,
        };

        let k = self.covariance * h.transpose() * s_inv;
        self.state += k * y;

        let ikh = Matrix4::identity() - k * h;
        let mut p = ikh * self.covariance;
        // Symmetrise to remove round-off asymmetry (§4.1).
        p = (p + p.transpose()) * 0.5;
        self.covariance = p;
        true
    }

    /// Trace of the full covariance, used for the sanity-cap lifecycle rule.
    pub fn covariance_trace(&self) -> f64 {
        self.covariance.trace()
    }

    /// `true` if `covariance` is symmetric to within `tol` and has no
    /// eigenvalue below `-tol` (property test #1 in §8).
    pub fn is_covariance_healthy(&self, tol: f64) -> bool {
        let asym = (self.covariance - self.covariance.transpose()).abs().max();
        if asym > tol {
            return false;
        }
        let sym = nalgebra::SymmetricEigen::new(self.covariance);
        sym.eigenvalues.iter().all(|&lambda| lambda >= -tol)
    }
}

/// Measurement noise `R = diag(sigma_p^2, sigma_p^2)`, inflated for clusters
/// with fewer points than `full_confidence_point_count` (§4.1: "scaled up
/// when point_count is low"). The inflation is linear in the shortfall so
/// gating degrades gracefully rather than stepping.
pub fn measurement_noise(point_count: u32, sigma_p: f64, full_confidence_point_count: u32) -> Matrix2<f64> {
    let base = sigma_p * sigma_p;
    let scale = if point_count >= full_confidence_point_count {
        1.0
    } else {
        let shortfall =
            (full_confidence_point_count - point_count) as f64 / full_confidence_point_count as f64;
        1.0 + shortfall * 3.0
    };
    Matrix2::from_diagonal(&Vector2::new(base * scale, base * scale))
}
