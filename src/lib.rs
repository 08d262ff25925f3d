//! Velocity-coherent multi-object tracking core for roadside LiDAR traffic
//! sensing: Kalman filtering, gated greedy association, long-tail
//! coast-and-recover, sparse continuation, and track lifecycle management.
//!
//! The core never initialises a [`tracing`] subscriber; it only emits
//! events through the ambient one a binary sets up. Errors are always
//! returned, never logged.

pub mod association;
pub mod cluster;
pub mod config;
pub mod debug;
pub mod error;
pub mod filter;
pub mod gating;
pub mod longtail;
pub mod manager;
pub mod sparse;
pub mod track;

pub use cluster::Cluster;
pub use config::TrackingConfig;
pub use error::TrackError;
pub use manager::{FrameOutput, TrackManager, TrackSnapshot};
pub use track::{Track, TrackId, TrackState};
