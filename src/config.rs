//! Runtime configuration for the track manager.
//!
//! All values are optional in the sense that [`TrackingConfig::default`]
//! supplies the defaults stated in the component design; callers may
//! override any subset.

use crate::error::TrackError;

/// Tunable parameters for association, gating, lifecycle, and the
/// long-tail/sparse-continuation regimes.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    // --- Lifecycle thresholds ---
    /// Tentative -> Confirmed once consecutive hits reach this count.
    pub promote_hits: u32,
    /// Tentative -> Deleted once misses reach this count.
    pub max_tentative_misses: u32,
    /// Confirmed -> PreTail once misses reach this count.
    pub pretail_misses: u32,
    /// PreTail -> PostTail once frames spent in PreTail reach this count.
    pub max_pretail_frames: u32,
    /// PostTail -> Deleted once frames coasted since last hit exceed this.
    pub max_prediction_frames: u32,
    /// Sanity cap on filter covariance trace; exceeding it deletes the track
    /// regardless of lifecycle state.
    pub max_cov_trace: f64,

    // --- Long-tail coasting ---
    /// Base uncertainty radius (metres) on entering PostTail.
    pub uncertainty_r0: f64,
    /// Growth rate of the uncertainty radius, metres per coasted frame.
    pub uncertainty_k: f64,
    /// Cap on the uncertainty radius.
    pub max_uncertainty_radius: f64,
    /// Per-component velocity tolerance (m/s) for long-tail recovery.
    pub recovery_vel_tol: f64,

    // --- Kalman filter ---
    /// Acceleration process-noise standard deviation (m/s^2).
    pub process_noise_sigma_a: f64,
    /// Position measurement-noise standard deviation (m) at full confidence.
    pub measurement_noise_sigma_p: f64,
    /// Point count at or above which measurement noise is not inflated.
    pub full_confidence_point_count: u32,

    // --- Gating ---
    /// Chi-squared gating threshold (2 DOF).
    pub gate_chi2: f64,

    // --- New-track admission ---
    pub min_points_for_new_track: u32,
    pub min_confidence_for_new_track: f64,

    // --- Sparse continuation ---
    pub min_points_absolute: u32,
    pub min_velocity_confidence_for_sparse: f64,
    /// Point count at/above which a matched cluster always gets a normal
    /// (non-sparse) Kalman update. Below it, the adaptive tolerance table
    /// decides eligibility. See SPEC_FULL.md #4 for why 12 was chosen.
    pub sparse_continuation_ceiling: u32,

    // --- History buffers ---
    /// Maximum retained entries in `speed_history` / `position_history`.
    pub history_capacity: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            promote_hits: 3,
            max_tentative_misses: 2,
            pretail_misses: 1,
            max_pretail_frames: 5,
            max_prediction_frames: 20,
            max_cov_trace: 1e6,

            uncertainty_r0: 1.0,
            uncertainty_k: 0.25,
            max_uncertainty_radius: 8.0,
            recovery_vel_tol: 2.0,

            process_noise_sigma_a: 1.0,
            measurement_noise_sigma_p: 0.15,
            full_confidence_point_count: 20,

            gate_chi2: 9.21,

            min_points_for_new_track: 3,
            min_confidence_for_new_track: 0.3,

            min_points_absolute: 3,
            min_velocity_confidence_for_sparse: 0.5,
            sparse_continuation_ceiling: 12,

            history_capacity: 64,
        }
    }
}

impl TrackingConfig {
    /// Validate this configuration, rejecting values that can never yield
    /// sensible tracking behaviour.
    pub fn validate(&self) -> Result<(), TrackError> {
        let checks: &[(bool, &str)] = &[
            (self.promote_hits > 0, "promote_hits must be > 0"),
            (self.max_pretail_frames > 0, "max_pretail_frames must be > 0"),
            (
                self.max_prediction_frames > 0,
                "max_prediction_frames must be > 0",
            ),
            (self.max_cov_trace > 0.0, "max_cov_trace must be > 0"),
            (self.uncertainty_r0 >= 0.0, "uncertainty_r0 must be >= 0"),
            (self.uncertainty_k >= 0.0, "uncertainty_k must be >= 0"),
            (
                self.max_uncertainty_radius >= self.uncertainty_r0,
                "max_uncertainty_radius must be >= uncertainty_r0",
            ),
            (
                self.recovery_vel_tol > 0.0,
                "recovery_vel_tol must be > 0",
            ),
            (
                self.process_noise_sigma_a > 0.0,
                "process_noise_sigma_a must be > 0",
            ),
            (
                self.measurement_noise_sigma_p > 0.0,
                "measurement_noise_sigma_p must be > 0",
            ),
            (self.full_confidence_point_count > 0, "full_confidence_point_count must be > 0"),
            (self.gate_chi2 > 0.0, "gate_chi2 must be > 0"),
            (
                (0.0..=1.0).contains(&self.min_confidence_for_new_track),
                "min_confidence_for_new_track must be in [0, 1]",
            ),
            (
                (0.0..=1.0).contains(&self.min_velocity_confidence_for_sparse),
                "min_velocity_confidence_for_sparse must be in [0, 1]",
            ),
            (self.history_capacity > 0, "history_capacity must be > 0"),
        ];

        for (ok, msg) in checks {
            if !ok {
                return Err(TrackError::ConfigOutOfRange((*msg).to_string()));
            }
        }
        Ok(())
    }
}
