//! Last-known device coordinates.
//!
//! The cache is written only after a completed move or an explicit bulk
//! refresh. Planning reads it and never writes. There is no automatic
//! invalidation; see `PlannerParams::max_position_age` for an opt-in
//! freshness guard.

use crate::executor::{HardwareMoveError, MoveExecutor};
use log::debug;
use probe_planner_core::{DeviceCoord, DeviceId};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Observed position plus the time it was recorded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CachedPosition {
    pub coord: DeviceCoord,
    pub recorded_at: SystemTime,
}

impl CachedPosition {
    /// Age relative to `now`; a timestamp in the future counts as fresh.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.recorded_at).unwrap_or(Duration::ZERO)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PositionCache {
    entries: BTreeMap<DeviceId, CachedPosition>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device: DeviceId) -> Option<DeviceCoord> {
        self.entries.get(&device).map(|e| e.coord)
    }

    pub fn get_entry(&self, device: DeviceId) -> Option<&CachedPosition> {
        self.entries.get(&device)
    }

    pub fn set(&mut self, device: DeviceId, coord: DeviceCoord) {
        self.set_at(device, coord, SystemTime::now());
    }

    pub fn set_at(&mut self, device: DeviceId, coord: DeviceCoord, recorded_at: SystemTime) {
        debug!("{device} at ({:.2}, {:.2})", coord.x, coord.y);
        self.entries.insert(device, CachedPosition { coord, recorded_at });
    }

    pub fn remove(&mut self, device: DeviceId) -> Option<CachedPosition> {
        self.entries.remove(&device)
    }

    pub fn all(&self) -> BTreeMap<DeviceId, DeviceCoord> {
        self.entries.iter().map(|(id, e)| (*id, e.coord)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read the current position of every device in `devices` and commit
    /// them together.
    ///
    /// If any read fails the cache is left unchanged.
    pub fn refresh_from<E: MoveExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        devices: &[DeviceId],
    ) -> Result<usize, HardwareMoveError> {
        let mut fresh = Vec::with_capacity(devices.len());
        for &device in devices {
            fresh.push((device, executor.current_position(device)?));
        }
        let now = SystemTime::now();
        for (device, coord) in &fresh {
            self.set_at(*device, *coord, now);
        }
        Ok(fresh.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ManipulatorDriver, MockManipulator, TwoPhaseExecutor};

    fn id(raw: u8) -> DeviceId {
        DeviceId::new(raw).unwrap()
    }

    #[test]
    fn set_get_all() {
        let mut cache = PositionCache::new();
        assert!(cache.get(id(1)).is_none());
        cache.set(id(2), DeviceCoord::new(1.0, 2.0));
        cache.set(id(1), DeviceCoord::new(3.0, 4.0));
        assert_eq!(cache.get(id(2)), Some(DeviceCoord::new(1.0, 2.0)));
        let all: Vec<_> = cache.all().into_iter().collect();
        assert_eq!(all[0], (id(1), DeviceCoord::new(3.0, 4.0)));
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn age_is_measured_from_timestamp() {
        let mut cache = PositionCache::new();
        let then = SystemTime::now() - Duration::from_secs(120);
        cache.set_at(id(1), DeviceCoord::new(0.0, 0.0), then);
        let age = cache.get_entry(id(1)).unwrap().age(SystemTime::now());
        assert!(age >= Duration::from_secs(120));
    }

    #[test]
    fn bulk_refresh_reads_executor() {
        let mut driver = MockManipulator::new(2);
        driver.place(id(1), DeviceCoord::new(100.0, 200.0));
        driver.place(id(2), DeviceCoord::new(300.0, 400.0));
        let mut exec = TwoPhaseExecutor::new(driver);

        let mut cache = PositionCache::new();
        let n = cache.refresh_from(&mut exec, &[id(1), id(2)]).unwrap();
        assert_eq!(n, 2);
        assert_eq!(cache.get(id(2)), Some(DeviceCoord::new(300.0, 400.0)));
    }

    #[test]
    fn failed_refresh_leaves_cache_unchanged() {
        let mut driver = MockManipulator::new(2);
        driver.place(id(1), DeviceCoord::new(100.0, 200.0));
        let mut exec = TwoPhaseExecutor::new(driver);

        let mut cache = PositionCache::new();
        cache.set(id(1), DeviceCoord::new(1.0, 1.0));
        let before = cache.clone();
        // slot 3 is not connected on a two-device controller
        assert!(cache.refresh_from(&mut exec, &[id(1), id(3)]).is_err());
        assert_eq!(cache, before);
        assert!(exec.driver_mut().is_connected());
    }
}
