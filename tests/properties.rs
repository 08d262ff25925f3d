//! Property-based invariant checks over the filter, gating, and
//! association primitives, and over `TrackManager::process_frame` itself.

use lidar_track_core::filter::{measurement_noise, KinematicFilter};
use lidar_track_core::gating::{gating_ellipse, mahalanobis_sq};
use lidar_track_core::{Cluster, TrackManager, TrackingConfig};
use nalgebra::{Matrix2, Vector2};
use proptest::prelude::*;

fn finite_f64(min: f64, max: f64) -> impl Strategy<Value = f64> {
    (min..max).prop_filter("finite", |v: &f64| v.is_finite())
}

fn sized_cluster(id: u64, t_ns: i64, x: f64, y: f64, vx: f64, vy: f64) -> Cluster {
    Cluster {
        cluster_id: id,
        centroid: [x, y, 0.5],
        bbox: [1.8, 0.6, 1.7],
        point_count: 25,
        velocity: [vx, vy],
        velocity_confidence: 0.9,
        timestamp_ns: t_ns,
        height_p95: 1.6,
        intensity_mean: 30.0,
    }
}

proptest! {
    /// Invariant: covariance stays symmetric and positive semi-definite
    /// after any sequence of predict/update cycles.
    #[test]
    fn covariance_stays_symmetric_and_psd(
        x in finite_f64(-100.0, 100.0),
        y in finite_f64(-100.0, 100.0),
        vx in finite_f64(-20.0, 20.0),
        vy in finite_f64(-20.0, 20.0),
        dts in proptest::collection::vec(0.0..0.5f64, 1..10),
        meas_jitter in finite_f64(-0.5, 0.5),
    ) {
        let mut f = KinematicFilter::new(x, y, vx, vy, 2.0, 2.0);
        for dt in dts {
            f.predict(dt, 1.0);
            let z = Vector2::new(f.state[0] + meas_jitter, f.state[1] - meas_jitter);
            f.update(z, measurement_noise(20, 0.15, 20));
            prop_assert!(f.is_covariance_healthy(1e-3));
        }
    }

    /// Invariant: a zero-duration predict is the identity on state and
    /// covariance, for any starting state.
    #[test]
    fn zero_dt_predict_is_always_identity(
        x in finite_f64(-1000.0, 1000.0),
        y in finite_f64(-1000.0, 1000.0),
        vx in finite_f64(-50.0, 50.0),
        vy in finite_f64(-50.0, 50.0),
    ) {
        let mut f = KinematicFilter::new(x, y, vx, vy, 3.0, 3.0);
        let state_before = f.state;
        let cov_before = f.covariance;
        f.predict(0.0, 2.0);
        prop_assert!((f.state - state_before).abs().max() < 1e-9);
        prop_assert!((f.covariance - cov_before).abs().max() < 1e-9);
    }

    /// Invariant: Mahalanobis distance from a prediction to itself is
    /// (numerically) zero, for any valid covariance.
    #[test]
    fn mahalanobis_distance_to_self_is_zero(
        z_x in finite_f64(-500.0, 500.0),
        z_y in finite_f64(-500.0, 500.0),
        var_x in 0.01..50.0f64,
        var_y in 0.01..50.0f64,
    ) {
        let z = Vector2::new(z_x, z_y);
        let s = Matrix2::from_diagonal(&Vector2::new(var_x, var_y));
        let d_sq = mahalanobis_sq(z, z, s).expect("diagonal positive covariance is invertible");
        prop_assert!(d_sq.abs() < 1e-6);
    }

    /// Invariant: measurement noise scale never decreases as point_count
    /// drops below full confidence.
    #[test]
    fn measurement_noise_is_monotonic_in_point_count(
        lower in 1u32..20,
        higher in 1u32..20,
    ) {
        prop_assume!(lower <= higher);
        let r_lower = measurement_noise(lower, 0.15, 20);
        let r_higher = measurement_noise(higher, 0.15, 20);
        prop_assert!(r_lower[(0, 0)] >= r_higher[(0, 0)] - 1e-12);
    }

    /// Invariant: a positive semi-definite covariance always yields a
    /// gating ellipse with non-negative axes.
    #[test]
    fn gating_ellipse_axes_are_non_negative(
        var_x in 0.0..50.0f64,
        var_y in 0.0..50.0f64,
        cov_xy in -5.0..5.0f64,
    ) {
        let s = Matrix2::new(var_x + 5.0, cov_xy, cov_xy, var_y + 5.0);
        if let Some(ellipse) = gating_ellipse(s, 9.21) {
            prop_assert!(ellipse.semi_major >= 0.0);
            prop_assert!(ellipse.semi_minor >= 0.0);
            prop_assert!(ellipse.semi_major >= ellipse.semi_minor - 1e-9);
        }
    }

    /// Invariant: predicting forward with a positive velocity and dt
    /// always advances position in the direction of travel.
    #[test]
    fn predict_moves_position_along_velocity(
        vx in 1.0..30.0f64,
        dt in 0.01..1.0f64,
    ) {
        let mut f = KinematicFilter::new(0.0, 0.0, vx, 0.0, 1.0, 1.0);
        f.predict(dt, 1.0);
        prop_assert!(f.state[0] > 0.0);
    }

    /// Invariant #3 (§8): `observation_count` never decreases across
    /// consecutive frames for a track that keeps matching.
    #[test]
    fn observation_count_is_monotonic_across_frames(
        x0 in finite_f64(-200.0, 200.0),
        y0 in finite_f64(-200.0, 200.0),
        vx in finite_f64(-10.0, 10.0),
        vy in finite_f64(-10.0, 10.0),
        frames in 2usize..8,
    ) {
        let mut mgr = TrackManager::new(TrackingConfig::default()).unwrap();
        let mut t_ns = 0i64;
        let mut x = x0;
        let mut y = y0;
        let mut prev_count = None;

        for frame in 1..=(frames as u64) {
            let out = mgr
                .process_frame(frame, t_ns, &[sized_cluster(1, t_ns, x, y, vx, vy)])
                .unwrap();
            prop_assert_eq!(out.tracks.len(), 1);
            let count = out.tracks[0].observation_count;
            if let Some(prev) = prev_count {
                prop_assert!(count >= prev, "observation_count decreased: {} -> {}", prev, count);
            }
            prev_count = Some(count);
            x += vx * 0.1;
            y += vy * 0.1;
            t_ns += 100_000_000;
        }
    }

    /// Invariant #5 (§8): once a track is reported in `deleted_track_ids`,
    /// its `track_id` never reappears in any later frame's `tracks`.
    #[test]
    fn deleted_track_never_reappears(
        extra_frames in 0usize..6,
        reintroduce in any::<bool>(),
    ) {
        let config = TrackingConfig {
            max_tentative_misses: 1,
            ..Default::default()
        };
        let mut mgr = TrackManager::new(config).unwrap();
        let mut t_ns = 0i64;

        // One cluster creates a Tentative track, then it stops matching and
        // must be deleted within a couple of empty frames.
        mgr.process_frame(1, t_ns, &[sized_cluster(1, t_ns, 0.0, 0.0, 1.0, 0.0)]).unwrap();
        t_ns += 100_000_000;

        let mut seen_deleted = Vec::new();
        for frame in 2..=4u64 {
            let out = mgr.process_frame(frame, t_ns, &[]).unwrap();
            seen_deleted.extend(out.deleted_track_ids.iter().copied());
            t_ns += 100_000_000;
        }
        prop_assume!(!seen_deleted.is_empty());

        for i in 0..extra_frames {
            let frame = 5 + i as u64;
            let clusters = if reintroduce {
                vec![sized_cluster(2, t_ns, 0.0, 0.0, 1.0, 0.0)]
            } else {
                vec![]
            };
            let out = mgr.process_frame(frame, t_ns, &clusters).unwrap();
            for snapshot in &out.tracks {
                prop_assert!(
                    !seen_deleted.contains(&snapshot.track_id),
                    "a deleted track_id reappeared in output"
                );
            }
            t_ns += 100_000_000;
        }
    }

    /// Invariant #2 (§8): within a single frame, the cluster-to-track match
    /// is a partial injection — every admitted cluster ends up claimed by
    /// exactly one track, and no two well-separated clusters are merged
    /// into, or swapped between, each other's tracks.
    #[test]
    fn cluster_to_track_match_is_partial_injection(
        n in 1usize..4,
        jitter in finite_f64(-2.0, 2.0),
    ) {
        let mut mgr = TrackManager::new(TrackingConfig::default()).unwrap();
        // Grid spacing far exceeds any plausible gating ellipse, so each
        // cluster can only ever match the track it originated.
        let spacing = 200.0;
        let clusters: Vec<Cluster> = (0..n)
            .map(|i| sized_cluster(i as u64, 0, i as f64 * spacing + jitter, 0.0, 1.0, 0.0))
            .collect();

        let out = mgr.process_frame(1, 0, &clusters).unwrap();
        prop_assert_eq!(out.tracks.len(), n);
        prop_assert_eq!(out.new_track_ids.len(), n);

        let mut ids: Vec<_> = out.tracks.iter().map(|t| t.track_id).collect();
        ids.sort_by_key(|id| id.0);
        ids.dedup();
        prop_assert_eq!(ids.len(), n, "duplicate track_id in a single frame's output");

        let mut t_ns = 100_000_000i64;
        let advanced: Vec<Cluster> = (0..n)
            .map(|i| sized_cluster(i as u64, t_ns, i as f64 * spacing + jitter + 0.1, 0.0, 1.0, 0.0))
            .collect();
        let out2 = mgr.process_frame(2, t_ns, &advanced).unwrap();
        prop_assert_eq!(out2.tracks.len(), n);
        prop_assert!(out2.new_track_ids.is_empty(), "second frame must match, not spawn new tracks");
        for snapshot in &out2.tracks {
            let nearest_slot = (snapshot.x / spacing).round();
            prop_assert!(
                (snapshot.x - nearest_slot * spacing).abs() < spacing / 2.0,
                "track drifted to a neighbouring cluster's slot"
            );
        }
    }

    /// Invariant #6 (§8): a disabled debug collector changes nothing about
    /// tracking behaviour and never emits artifacts, for any frame
    /// sequence.
    #[test]
    fn debug_disabled_is_a_no_op_on_tracking_output(
        vx in finite_f64(-10.0, 10.0),
        vy in finite_f64(-10.0, 10.0),
        frames in 2usize..6,
        enable_debug in any::<bool>(),
    ) {
        let mut mgr = TrackManager::new(TrackingConfig::default()).unwrap();
        mgr.set_debug_enabled(enable_debug);
        let mut t_ns = 0i64;
        let mut x = 0.0;
        let mut y = 0.0;

        for frame in 1..=(frames as u64) {
            let out = mgr
                .process_frame(frame, t_ns, &[sized_cluster(1, t_ns, x, y, vx, vy)])
                .unwrap();
            if !enable_debug {
                prop_assert!(out.debug.is_none(), "debug artifacts emitted while disabled");
            }
            x += vx * 0.1;
            y += vy * 0.1;
            t_ns += 100_000_000;
        }
    }
}
