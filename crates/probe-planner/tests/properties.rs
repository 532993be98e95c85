use probe_planner::{
    CalibrationStore, CollisionDetector, Correspondence, FootprintStore, MoveRequest,
    MovementSequencer, PlanOutcome, PlannerParams, PositionCache,
};
use probe_planner_core::{DeviceCoord, DeviceId, ImagePoint};
use proptest::prelude::*;

fn id(raw: u8) -> DeviceId {
    DeviceId::new(raw).unwrap()
}

/// Rotation, anisotropic scale and shift, like a tilted stage seen by the
/// camera.
fn stage_calibration(angle: f64, sx: f64, sy: f64, tx: f64, ty: f64) -> CalibrationStore {
    let map = |x: f64, y: f64| {
        let (sin, cos) = angle.sin_cos();
        ImagePoint::new(
            cos * sx * x - sin * sy * y + tx,
            sin * sx * x + cos * sy * y + ty,
        )
    };
    let mut store = CalibrationStore::new();
    store
        .calibrate(
            id(1),
            &[
                Correspondence::new(DeviceCoord::new(0.0, 0.0), map(0.0, 0.0)),
                Correspondence::new(DeviceCoord::new(3000.0, 0.0), map(3000.0, 0.0)),
                Correspondence::new(DeviceCoord::new(3000.0, 3000.0), map(3000.0, 3000.0)),
            ],
        )
        .unwrap();
    store
}

fn square(half: f64) -> [ImagePoint; 4] {
    [
        ImagePoint::new(-half, -half),
        ImagePoint::new(half, -half),
        ImagePoint::new(half, half),
        ImagePoint::new(-half, half),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn calibration_round_trips_both_ways(
        angle in -std::f64::consts::PI..std::f64::consts::PI,
        sx in 0.05..5.0f64,
        sy in 0.05..5.0f64,
        tx in -2000.0..2000.0f64,
        ty in -2000.0..2000.0f64,
        x in 0.0..25_000.0f64,
        y in 0.0..25_000.0f64,
    ) {
        let store = stage_calibration(angle, sx, sy, tx, ty);

        let p = DeviceCoord::new(x, y);
        let back = store.to_device(id(1), store.to_image(id(1), p).unwrap()).unwrap();
        prop_assert!(back.distance(p) < 1e-6 * (1.0 + x.hypot(y)));

        let q = ImagePoint::new(x, y);
        let again = store.to_image(id(1), store.to_device(id(1), q).unwrap()).unwrap();
        prop_assert!(again.distance(q) < 1e-6 * (1.0 + x.hypot(y)));
    }

    #[test]
    fn separated_trajectories_never_collide(
        static_half in 1.0..50.0f64,
        moving_half in 1.0..50.0f64,
        gap in 0.5..200.0f64,
        start_x in 0.0..500.0f64,
        end_x in 0.0..500.0f64,
        start_y in -1000.0..1000.0f64,
        end_y in -1000.0..1000.0f64,
        samples in 2usize..64,
    ) {
        let m1 = id(1);
        let m2 = id(2);
        let mut calibrations = CalibrationStore::new();
        for d in [m1, m2] {
            calibrations
                .calibrate(
                    d,
                    &[
                        Correspondence::new(DeviceCoord::new(0.0, 0.0), ImagePoint::new(0.0, 0.0)),
                        Correspondence::new(DeviceCoord::new(1.0, 0.0), ImagePoint::new(1.0, 0.0)),
                        Correspondence::new(DeviceCoord::new(0.0, 1.0), ImagePoint::new(0.0, 1.0)),
                    ],
                )
                .unwrap();
        }
        let mut footprints = FootprintStore::new();
        footprints.set_footprint(m1, &square(moving_half), ImagePoint::new(0.0, 0.0)).unwrap();
        footprints.set_footprint(m2, &square(static_half), ImagePoint::new(0.0, 0.0)).unwrap();

        // M1 stays entirely to the right of M2's polygon
        let clearance = static_half + moving_half + gap;
        let mut cache = PositionCache::new();
        cache.set(m2, DeviceCoord::new(0.0, 0.0));
        cache.set(m1, DeviceCoord::new(clearance + start_x, start_y));

        let params = PlannerParams {
            trajectory_samples: samples,
            ..PlannerParams::default()
        };
        let request = MoveRequest::new().with(m1, ImagePoint::new(clearance + end_x, end_y));
        let detector = CollisionDetector::new(&calibrations, &footprints, &cache, &params);
        let report = detector.detect(&request);
        prop_assert!(report.is_clear());

        let outcome = MovementSequencer::new(detector).plan(&request, &report);
        let is_direct = matches!(outcome, PlanOutcome::Direct { .. });
        prop_assert!(is_direct);
    }

    #[test]
    fn identical_squares_farther_than_their_diagonal_never_collide(
        side in 1.0..100.0f64,
        slack in 0.01..2.0f64,
        bearing in -std::f64::consts::PI..std::f64::consts::PI,
        t0 in -500.0..500.0f64,
        t1 in -500.0..500.0f64,
        samples in 2usize..64,
    ) {
        let m1 = id(1);
        let m2 = id(2);
        let mut calibrations = CalibrationStore::new();
        let mut footprints = FootprintStore::new();
        for d in [m1, m2] {
            calibrations
                .calibrate(
                    d,
                    &[
                        Correspondence::new(DeviceCoord::new(0.0, 0.0), ImagePoint::new(0.0, 0.0)),
                        Correspondence::new(DeviceCoord::new(1.0, 0.0), ImagePoint::new(1.0, 0.0)),
                        Correspondence::new(DeviceCoord::new(0.0, 1.0), ImagePoint::new(0.0, 1.0)),
                    ],
                )
                .unwrap();
            footprints.set_footprint(d, &square(side / 2.0), ImagePoint::new(0.0, 0.0)).unwrap();
        }

        // M1 slides along a line whose closest point to M2 is
        // `side * sqrt(2) * (1 + slack)` away, so every tip on it is too
        let clearance = side * std::f64::consts::SQRT_2 * (1.0 + slack);
        let (sin, cos) = bearing.sin_cos();
        let along = |t: f64| ImagePoint::new(clearance * cos - t * sin, clearance * sin + t * cos);
        let start = along(t0);

        let mut cache = PositionCache::new();
        cache.set(m2, DeviceCoord::new(0.0, 0.0));
        cache.set(m1, DeviceCoord::new(start.x, start.y));

        let params = PlannerParams {
            trajectory_samples: samples,
            ..PlannerParams::default()
        };
        let request = MoveRequest::new().with(m1, along(t1));
        let detector = CollisionDetector::new(&calibrations, &footprints, &cache, &params);
        prop_assert!(detector.detect(&request).is_clear());
    }
}
