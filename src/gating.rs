//! Mahalanobis distance, gating, and gating-ellipse derivation (§4.2).

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Squared Mahalanobis distance `d^2 = (z - z_pred)^T S^-1 (z - z_pred)`.
/// Returns `None` if `S` is numerically singular.
pub fn mahalanobis_sq(z: Vector2<f64>, z_pred: Vector2<f64>, s: Matrix2<f64>) -> Option<f64> {
    let residual = z - z_pred;
    let s_inv = s.try_inverse()?;
    Some((residual.transpose() * s_inv * residual)[(0, 0)])
}

/// `true` iff `d_sq` passes the chi-squared gate.
#[inline]
pub fn passes_gate(d_sq: f64, chi2_threshold: f64) -> bool {
    d_sq <= chi2_threshold
}

/// A gating ellipse derived from an innovation covariance, for debug
/// visualisation: semi-axes `sqrt(chi2 * lambda_i)`, rotation from the
/// principal eigenvector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatingEllipse {
    pub semi_major: f64,
    pub semi_minor: f64,
    pub rotation_rad: f64,
}

/// Eigendecompose `s` and derive the gating ellipse at `chi2_threshold`.
/// Returns `None` if `s` is not positive semi-definite (negative
/// eigenvalue beyond round-off).
pub fn gating_ellipse(s: Matrix2<f64>, chi2_threshold: f64) -> Option<GatingEllipse> {
    let eig = nalgebra::SymmetricEigen::new(s);
    let (l0, l1) = (eig.eigenvalues[0], eig.eigenvalues[1]);
    if l0 < -1e-9 || l1 < -1e-9 {
        return None;
    }
    let l0 = l0.max(0.0);
    let l1 = l1.max(0.0);

    let (major_idx, minor_idx) = if l0 >= l1 { (0, 1) } else { (1, 0) };
    let major_eigvec = eig.eigenvectors.column(major_idx);
    let rotation_rad = major_eigvec[1].atan2(major_eigvec[0]);

    Some(GatingEllipse {
        semi_major: (chi2_threshold * eig.eigenvalues[major_idx].max(0.0)).sqrt(),
        semi_minor: (chi2_threshold * eig.eigenvalues[minor_idx].max(0.0)).sqrt(),
        rotation_rad,
    })
}
