//! Per-frame observation ("cluster") input type.

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// A foreground point cluster produced by the upstream perception stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique within its frame.
    pub cluster_id: u64,
    /// World-frame centroid, metres.
    pub centroid: [f64; 3],
    /// Length, width, height in metres.
    pub bbox: [f64; 3],
    /// Non-negative point count.
    pub point_count: u32,
    /// (vx, vy) in m/s.
    pub velocity: [f64; 2],
    /// In [0, 1].
    pub velocity_confidence: f64,
    /// World-frame acquisition time, nanoseconds.
    pub timestamp_ns: i64,
    pub height_p95: f64,
    pub intensity_mean: f64,
}

impl Cluster {
    /// Position components, x/y only (the measurement model is position-only
    /// in the plane).
    #[inline]
    pub fn position_xy(&self) -> (f64, f64) {
        (self.centroid[0], self.centroid[1])
    }

    /// Validate a single cluster per the InvalidInput taxonomy in §7:
    /// NaN/Inf in centroid or velocity, or a nonsensical confidence.
    pub fn validate(&self) -> Result<(), TrackError> {
        let finite = self.centroid.iter().all(|v| v.is_finite())
            && self.bbox.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.height_p95.is_finite()
            && self.intensity_mean.is_finite();
        if !finite {
            return Err(TrackError::InvalidInput(format!(
                "cluster {} has non-finite field",
                self.cluster_id
            )));
        }
        if !(0.0..=1.0).contains(&self.velocity_confidence) {
            return Err(TrackError::InvalidInput(format!(
                "cluster {} velocity_confidence {} out of [0, 1]",
                self.cluster_id, self.velocity_confidence
            )));
        }
        Ok(())
    }
}
