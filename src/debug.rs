//! Optional per-frame debug artifact collector.
//!
//! Disabled by default and a no-op (no allocation, no work) in that state,
//! so production callers pay nothing for it. Enable with
//! [`DebugCollector::set_enabled`] to capture association/gating/
//! innovation/prediction traces for offline inspection or visualisation.

use serde::{Deserialize, Serialize};

use crate::error::TrackError;
use crate::track::TrackId;

/// One recorded association decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub track_id: TrackId,
    pub cluster_id: u64,
    pub d_sq: f64,
    pub sparse: bool,
}

/// One recorded gating ellipse, keyed by the track it was computed for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GatingRecord {
    pub track_id: TrackId,
    pub ellipse: crate::gating::GatingEllipse,
}

/// One recorded innovation (measurement residual after update).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InnovationRecord {
    pub track_id: TrackId,
    pub residual_x: f64,
    pub residual_y: f64,
}

/// One recorded pre-association prediction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub track_id: TrackId,
    pub x: f64,
    pub y: f64,
}

/// Accumulated artifacts for a single frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameArtifacts {
    pub frame_id: u64,
    pub associations: Vec<AssociationRecord>,
    pub gating_ellipses: Vec<GatingRecord>,
    pub innovations: Vec<InnovationRecord>,
    pub predictions: Vec<PredictionRecord>,
}

impl FrameArtifacts {
    /// Render this frame's artifacts as pretty-printed JSON, for offline
    /// inspection or visualisation tooling.
    pub fn to_json(&self) -> Result<String, TrackError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TrackError::Internal(format!("failed to serialise frame artifacts: {e}")))
    }
}

const ASSOCIATION_CAPACITY_HINT: usize = 32;
const GATING_CAPACITY_HINT: usize = 16;
const INNOVATION_CAPACITY_HINT: usize = 16;
const PREDICTION_CAPACITY_HINT: usize = 16;

/// Collects per-frame debug artifacts when enabled; every `record_*` call
/// is a no-op while disabled.
#[derive(Debug, Default)]
pub struct DebugCollector {
    enabled: bool,
    current: Option<FrameArtifacts>,
}

impl DebugCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.current = None;
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start a new frame's artifact buffer, discarding any unconsumed
    /// previous frame. No-op while disabled.
    pub fn begin_frame(&mut self, frame_id: u64) {
        if !self.enabled {
            return;
        }
        self.current = Some(FrameArtifacts {
            frame_id,
            associations: Vec::with_capacity(ASSOCIATION_CAPACITY_HINT),
            gating_ellipses: Vec::with_capacity(GATING_CAPACITY_HINT),
            innovations: Vec::with_capacity(INNOVATION_CAPACITY_HINT),
            predictions: Vec::with_capacity(PREDICTION_CAPACITY_HINT),
        });
    }

    pub fn record_association(&mut self, record: AssociationRecord) {
        if let Some(frame) = self.current.as_mut() {
            frame.associations.push(record);
        }
    }

    pub fn record_gating_ellipse(&mut self, record: GatingRecord) {
        if let Some(frame) = self.current.as_mut() {
            frame.gating_ellipses.push(record);
        }
    }

    pub fn record_innovation(&mut self, record: InnovationRecord) {
        if let Some(frame) = self.current.as_mut() {
            frame.innovations.push(record);
        }
    }

    pub fn record_prediction(&mut self, record: PredictionRecord) {
        if let Some(frame) = self.current.as_mut() {
            frame.predictions.push(record);
        }
    }

    /// Take the current frame's artifacts, leaving `None` behind. Returns
    /// `None` while disabled or before `begin_frame` has been called.
    pub fn emit(&mut self) -> Option<FrameArtifacts> {
        self.current.take()
    }

    /// Drop any buffered frame without consuming it.
    pub fn reset(&mut self) {
        self.current = None;
    }
}
