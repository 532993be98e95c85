//! Turns a batch of moves into an executable, collision-free plan.
//!
//! A batch without conflicts runs as one simultaneous step. Otherwise the
//! sequencer searches orderings of one-at-a-time moves in lexicographic
//! device order and takes the first ordering whose every move is clear.
//! If none exists the batch is refused and no device moves.

use crate::collision::{
    CollisionDetector, CollisionPair, CollisionReport, ConfigurationError, MoveRequest,
    Placements, ResolvedMove,
};
use log::{debug, info, warn};
use probe_planner_core::{DeviceCoord, DeviceId, ImagePoint, MIN_MOTION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// One device move with both its image-space and device-space target.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub device: DeviceId,
    pub image_target: ImagePoint,
    pub device_target: DeviceCoord,
}

fn planned(m: &ResolvedMove<'_>) -> PlannedMove {
    PlannedMove {
        device: m.device,
        image_target: m.target,
        device_target: m.device_target,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStep {
    /// Moves issued together; their paths were verified not to conflict.
    Simultaneous(Vec<PlannedMove>),
    Single(PlannedMove),
}

impl PlanStep {
    pub fn moves(&self) -> &[PlannedMove] {
        match self {
            PlanStep::Simultaneous(moves) => moves,
            PlanStep::Single(m) => std::slice::from_ref(m),
        }
    }
}

/// Ordered steps; step `n + 1` starts only after step `n` completed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementPlan {
    steps: Vec<PlanStep>,
}

impl MovementPlan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All moves in execution order.
    pub fn moves(&self) -> impl Iterator<Item = &PlannedMove> {
        self.steps.iter().flat_map(|s| s.moves())
    }

    /// Device of each move in execution order; a device appears twice when
    /// its move was split into legs.
    pub fn device_order(&self) -> Vec<DeviceId> {
        self.moves().map(|m| m.device).collect()
    }
}

/// Why a batch without configuration problems was still refused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Refusal {
    /// Every ordering was tried and none is collision-free.
    CollisionUnresolved,
    /// The ordering budget ran out before the search finished.
    SearchLimitReached { explored: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanOutcome {
    /// Some requested device cannot be planned; nothing moves.
    Rejected {
        unresolvable: Vec<ConfigurationError>,
    },
    /// No conflicts; all devices move in one simultaneous step.
    Direct { plan: MovementPlan },
    /// Conflicts resolved by moving devices one at a time.
    Sequential { plan: MovementPlan },
    /// Conflicts found and no safe ordering; nothing moves.
    Unresolved {
        reason: Refusal,
        pairs: BTreeSet<CollisionPair>,
    },
}

impl PlanOutcome {
    /// The plan to execute, if the batch was accepted.
    pub fn plan(&self) -> Option<&MovementPlan> {
        match self {
            PlanOutcome::Direct { plan } | PlanOutcome::Sequential { plan } => Some(plan),
            PlanOutcome::Rejected { .. } | PlanOutcome::Unresolved { .. } => None,
        }
    }

    pub fn into_plan(self) -> Option<MovementPlan> {
        match self {
            PlanOutcome::Direct { plan } | PlanOutcome::Sequential { plan } => Some(plan),
            PlanOutcome::Rejected { .. } | PlanOutcome::Unresolved { .. } => None,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.plan().is_some()
    }
}

enum Search {
    Found(Vec<usize>),
    Exhausted { explored: usize },
    LimitReached { explored: usize },
}

/// Stateless planner over a borrowed [`CollisionDetector`].
pub struct MovementSequencer<'a> {
    detector: CollisionDetector<'a>,
}

impl<'a> MovementSequencer<'a> {
    pub fn new(detector: CollisionDetector<'a>) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &CollisionDetector<'a> {
        &self.detector
    }

    /// Run detection and planning in one call.
    pub fn plan_request(&self, request: &MoveRequest) -> PlanOutcome {
        let report = self.detector.detect(request);
        self.plan(request, &report)
    }

    /// Plan `request` given its collision `report`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(devices = request.len(), pairs = report.pairs.len()))
    )]
    pub fn plan(&self, request: &MoveRequest, report: &CollisionReport) -> PlanOutcome {
        if !report.unresolvable.is_empty() {
            warn!(
                "batch rejected: {} unresolvable device(s)",
                report.unresolvable.len()
            );
            return PlanOutcome::Rejected {
                unresolvable: report.unresolvable.clone(),
            };
        }

        let (moves, unresolvable) = self.detector.resolve_all(request);
        if !unresolvable.is_empty() {
            return PlanOutcome::Rejected { unresolvable };
        }
        if moves.is_empty() {
            return PlanOutcome::Direct {
                plan: MovementPlan::default(),
            };
        }
        if report.pairs.is_empty() {
            debug!("no conflicts; moving {} device(s) together", moves.len());
            let step = PlanStep::Simultaneous(moves.iter().map(planned).collect());
            return PlanOutcome::Direct {
                plan: MovementPlan::new(vec![step]),
            };
        }

        let world = self.detector.placements();
        let max_orderings = self.detector.params().max_orderings;

        let explored = match self.search(&moves, &world, max_orderings, |_| true) {
            Search::Found(order) => {
                info!("resolved {} conflict(s) sequentially", report.pairs.len());
                return sequential(&moves, &order);
            }
            Search::LimitReached { explored } => {
                return refuse(Refusal::SearchLimitReached { explored }, report);
            }
            Search::Exhausted { explored } => explored,
        };

        if !self.detector.params().segmented_fallback {
            return refuse(Refusal::CollisionUnresolved, report);
        }

        let (legs, predecessor) = self.split_legs(&moves);
        debug!("retrying with {} axis-aligned legs", legs.len());
        let admissible = |order: &[usize]| legs_in_order(order, &predecessor);
        match self.search(&legs, &world, max_orderings, admissible) {
            Search::Found(order) => {
                info!("resolved conflicts with axis-aligned legs");
                sequential(&legs, &order)
            }
            Search::LimitReached { explored: legs_explored } => refuse(
                Refusal::SearchLimitReached {
                    explored: explored + legs_explored,
                },
                report,
            ),
            Search::Exhausted { .. } => refuse(Refusal::CollisionUnresolved, report),
        }
    }

    /// Lexicographic search over orderings of `moves`, skipping orderings
    /// rejected by `admissible`.
    fn search(
        &self,
        moves: &[ResolvedMove<'_>],
        world: &Placements,
        max_orderings: usize,
        mut admissible: impl FnMut(&[usize]) -> bool,
    ) -> Search {
        let mut order: Vec<usize> = (0..moves.len()).collect();
        let mut explored = 0;
        loop {
            if admissible(&order) {
                if explored == max_orderings {
                    warn!("ordering search stopped after {explored} orderings");
                    return Search::LimitReached { explored };
                }
                explored += 1;
                if self.ordering_is_clear(moves, &order, world) {
                    return Search::Found(order);
                }
            }
            if !next_permutation(&mut order) {
                return Search::Exhausted { explored };
            }
        }
    }

    /// Simulate one-at-a-time moves; moved devices stay at their targets.
    fn ordering_is_clear(
        &self,
        moves: &[ResolvedMove<'_>],
        order: &[usize],
        world: &Placements,
    ) -> bool {
        let mut world = world.clone();
        for &i in order {
            let m = &moves[i];
            if !self.detector.path_is_clear(m.device, m.start, m.target, &world) {
                return false;
            }
            world.insert(m.device, m.target);
        }
        true
    }

    /// Split every move into an X leg then a Y leg along image axes.
    ///
    /// Returns the legs and, per leg, the index of the leg that must run
    /// before it.
    fn split_legs<'f>(
        &self,
        moves: &[ResolvedMove<'f>],
    ) -> (Vec<ResolvedMove<'f>>, Vec<Option<usize>>) {
        let calibrations = self.detector.calibrations();
        let mut legs = Vec::with_capacity(2 * moves.len());
        let mut predecessor = Vec::with_capacity(2 * moves.len());
        for m in moves {
            let corner = ImagePoint::new(m.target.x, m.start.y);
            let mut previous = None;
            for (from, to) in [(m.start, corner), (corner, m.target)] {
                if from.distance(to) < MIN_MOTION {
                    continue;
                }
                let device_target = if to == m.target {
                    m.device_target
                } else {
                    match calibrations.to_device(m.device, to) {
                        Some(c) => c,
                        None => continue,
                    }
                };
                predecessor.push(previous);
                previous = Some(legs.len());
                legs.push(ResolvedMove {
                    start: from,
                    target: to,
                    device_target,
                    ..*m
                });
            }
        }
        (legs, predecessor)
    }
}

fn legs_in_order(order: &[usize], predecessor: &[Option<usize>]) -> bool {
    let mut seen = vec![false; order.len()];
    for &leg in order {
        if let Some(before) = predecessor[leg] {
            if !seen[before] {
                return false;
            }
        }
        seen[leg] = true;
    }
    true
}

fn sequential(moves: &[ResolvedMove<'_>], order: &[usize]) -> PlanOutcome {
    let steps = order
        .iter()
        .map(|&i| PlanStep::Single(planned(&moves[i])))
        .collect();
    PlanOutcome::Sequential {
        plan: MovementPlan::new(steps),
    }
}

fn refuse(reason: Refusal, report: &CollisionReport) -> PlanOutcome {
    warn!("batch refused ({reason:?}); conflicting pairs:");
    for pair in &report.pairs {
        warn!("  {pair}");
    }
    PlanOutcome::Unresolved {
        reason,
        pairs: report.pairs.clone(),
    }
}

/// Advance to the next lexicographic permutation; `false` after the last.
fn next_permutation(order: &mut [usize]) -> bool {
    let Some(i) = order.windows(2).rposition(|w| w[0] < w[1]) else {
        return false;
    };
    let pivot = order[i];
    let Some(k) = order[i + 1..].iter().rposition(|&x| x > pivot) else {
        return false;
    };
    order.swap(i, i + 1 + k);
    order[i + 1..].reverse();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationStore, Correspondence};
    use crate::footprint::FootprintStore;
    use crate::params::PlannerParams;
    use crate::position::PositionCache;
    use approx::assert_relative_eq;

    fn id(raw: u8) -> DeviceId {
        DeviceId::new(raw).unwrap()
    }

    struct Bench {
        cals: CalibrationStore,
        fps: FootprintStore,
        cache: PositionCache,
    }

    impl Bench {
        /// Identity-calibrated devices with 10×10 footprints at `placements`.
        fn new(placements: &[(u8, f64, f64)]) -> Self {
            let mut cals = CalibrationStore::new();
            let mut fps = FootprintStore::new();
            let mut cache = PositionCache::new();
            let square = [
                ImagePoint::new(-5.0, -5.0),
                ImagePoint::new(5.0, -5.0),
                ImagePoint::new(5.0, 5.0),
                ImagePoint::new(-5.0, 5.0),
            ];
            for &(d, x, y) in placements {
                cals.calibrate(
                    id(d),
                    &[
                        Correspondence::new(DeviceCoord::new(0.0, 0.0), ImagePoint::new(0.0, 0.0)),
                        Correspondence::new(DeviceCoord::new(1.0, 0.0), ImagePoint::new(1.0, 0.0)),
                        Correspondence::new(DeviceCoord::new(0.0, 1.0), ImagePoint::new(0.0, 1.0)),
                    ],
                )
                .unwrap();
                fps.set_footprint(id(d), &square, ImagePoint::new(0.0, 0.0))
                    .unwrap();
                cache.set(id(d), DeviceCoord::new(x, y));
            }
            Self { cals, fps, cache }
        }

        fn plan(&self, params: &PlannerParams, request: &MoveRequest) -> PlanOutcome {
            let detector = CollisionDetector::new(&self.cals, &self.fps, &self.cache, params);
            MovementSequencer::new(detector).plan_request(request)
        }
    }

    fn crossing_request() -> MoveRequest {
        MoveRequest::new()
            .with(id(1), ImagePoint::new(100.0, 0.0))
            .with(id(2), ImagePoint::new(50.0, 100.0))
    }

    #[test]
    fn permutations_are_lexicographic() {
        let mut order = vec![0, 1, 2];
        let mut seen = vec![order.clone()];
        while next_permutation(&mut order) {
            seen.push(order.clone());
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 1, 2],
                vec![0, 2, 1],
                vec![1, 0, 2],
                vec![1, 2, 0],
                vec![2, 0, 1],
                vec![2, 1, 0],
            ]
        );
    }

    #[test]
    fn empty_and_unobstructed_batches_are_direct() {
        let bench = Bench::new(&[(1, 0.0, 0.0)]);
        let params = PlannerParams::default();

        let empty = bench.plan(&params, &MoveRequest::new());
        assert_eq!(
            empty,
            PlanOutcome::Direct {
                plan: MovementPlan::default()
            }
        );

        let single = bench.plan(&params, &MoveRequest::new().with(id(1), ImagePoint::new(80.0, 80.0)));
        let PlanOutcome::Direct { plan } = single else {
            panic!("expected a direct plan, got {single:?}");
        };
        assert_eq!(plan.len(), 1);
        let target = plan.moves().next().unwrap().device_target;
        assert_relative_eq!(target.x, 80.0, epsilon = 1e-9);
        assert_relative_eq!(target.y, 80.0, epsilon = 1e-9);
    }

    #[test]
    fn crossing_is_resolved_by_moving_the_blocker_first() {
        let bench = Bench::new(&[(1, 0.0, 0.0), (2, 50.0, 0.0)]);
        let outcome = bench.plan(&PlannerParams::default(), &crossing_request());
        let PlanOutcome::Sequential { plan } = outcome else {
            panic!("expected a sequential plan, got {outcome:?}");
        };
        assert_eq!(plan.device_order(), vec![id(2), id(1)]);
        assert!(plan.steps().iter().all(|s| matches!(s, PlanStep::Single(_))));
    }

    #[test]
    fn crossing_paths_clear_in_either_order_plan_directly() {
        let bench = Bench::new(&[(1, 0.0, 0.0), (2, 100.0, 0.0)]);
        let request = MoveRequest::new()
            .with(id(1), ImagePoint::new(100.0, 100.0))
            .with(id(2), ImagePoint::new(0.0, 100.0));
        let outcome = bench.plan(&PlannerParams::default(), &request);
        let PlanOutcome::Direct { plan } = outcome else {
            panic!("expected a direct plan, got {outcome:?}");
        };
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.device_order(), vec![id(1), id(2)]);
    }

    #[test]
    fn stationary_obstacle_without_escape_is_unresolved() {
        let bench = Bench::new(&[(1, 0.0, 0.0), (2, 50.0, 0.0)]);
        let request = MoveRequest::new().with(id(1), ImagePoint::new(100.0, 0.0));
        let outcome = bench.plan(&PlannerParams::default(), &request);
        assert_eq!(
            outcome,
            PlanOutcome::Unresolved {
                reason: Refusal::CollisionUnresolved,
                pairs: BTreeSet::from([CollisionPair::new(id(1), id(2))]),
            }
        );
        assert!(outcome.plan().is_none());
    }

    #[test]
    fn search_budget_is_enforced() {
        let bench = Bench::new(&[(1, 0.0, 0.0), (2, 50.0, 0.0)]);
        let params = PlannerParams {
            max_orderings: 1,
            ..PlannerParams::default()
        };
        let outcome = bench.plan(&params, &crossing_request());
        assert!(matches!(
            outcome,
            PlanOutcome::Unresolved {
                reason: Refusal::SearchLimitReached { explored: 1 },
                ..
            }
        ));
    }

    #[test]
    fn segmented_fallback_goes_around_a_corner() {
        let bench = Bench::new(&[(1, 0.0, 0.0), (2, 50.0, 50.0)]);
        let request = MoveRequest::new().with(id(1), ImagePoint::new(100.0, 100.0));

        let whole_only = bench.plan(&PlannerParams::default(), &request);
        assert!(matches!(
            whole_only,
            PlanOutcome::Unresolved {
                reason: Refusal::CollisionUnresolved,
                ..
            }
        ));

        let params = PlannerParams {
            segmented_fallback: true,
            ..PlannerParams::default()
        };
        let outcome = bench.plan(&params, &request);
        let PlanOutcome::Sequential { plan } = outcome else {
            panic!("expected legs, got {outcome:?}");
        };
        assert_eq!(plan.device_order(), vec![id(1), id(1)]);
        let legs: Vec<_> = plan.moves().collect();
        assert_relative_eq!(legs[0].image_target.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(legs[0].image_target.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(legs[0].device_target.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(legs[0].device_target.y, 0.0, epsilon = 1e-9);
        assert_eq!(legs[1].image_target, ImagePoint::new(100.0, 100.0));
    }

    #[test]
    fn legs_of_one_device_keep_their_order() {
        let predecessor = vec![None, Some(0), None];
        assert!(legs_in_order(&[0, 2, 1], &predecessor));
        assert!(legs_in_order(&[2, 0, 1], &predecessor));
        assert!(!legs_in_order(&[1, 0, 2], &predecessor));
    }

    #[test]
    fn configuration_problems_reject_the_whole_batch() {
        let bench = Bench::new(&[(1, 0.0, 0.0)]);
        let request = MoveRequest::new()
            .with(id(1), ImagePoint::new(10.0, 0.0))
            .with(id(3), ImagePoint::new(20.0, 0.0));
        let outcome = bench.plan(&PlannerParams::default(), &request);
        assert_eq!(
            outcome,
            PlanOutcome::Rejected {
                unresolvable: vec![ConfigurationError::MissingCalibration { device: id(3) }],
            }
        );
    }

    #[test]
    fn planning_is_deterministic() {
        let bench = Bench::new(&[(1, 0.0, 0.0), (2, 50.0, 0.0), (3, 200.0, 200.0)]);
        let request = crossing_request().with(id(3), ImagePoint::new(300.0, 300.0));
        let params = PlannerParams::default();
        let first = bench.plan(&params, &request);
        assert!(first.is_executable());
        for _ in 0..5 {
            assert_eq!(bench.plan(&params, &request), first);
        }
    }
}
