use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU8;

/// Number of manipulator slots on the reference controller.
pub const MAX_DEVICES: u8 = 4;

/// Identifier of one manipulator slot.
///
/// Ids are small positive integers (`1..=255`); `0` is never a valid slot.
/// Serialised as a plain integer so it can key JSON maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeviceId(NonZeroU8);

impl DeviceId {
    /// Build an id, returning `None` for slot `0`.
    pub const fn new(raw: u8) -> Option<Self> {
        match NonZeroU8::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0.get()
    }

    /// All slots of the reference controller, `1..=MAX_DEVICES`.
    pub fn reference_slots() -> impl Iterator<Item = DeviceId> {
        (1..=MAX_DEVICES).filter_map(DeviceId::new)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Error returned when converting `0` into a [`DeviceId`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("device id must be non-zero")]
pub struct InvalidDeviceId;

impl TryFrom<u8> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DeviceId::new(value).ok_or(InvalidDeviceId)
    }
}

impl From<DeviceId> for u8 {
    fn from(value: DeviceId) -> Self {
        value.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn zero_is_rejected() {
        assert!(DeviceId::new(0).is_none());
        assert_eq!(DeviceId::try_from(0u8), Err(InvalidDeviceId));
        assert_eq!(DeviceId::new(3).map(DeviceId::get), Some(3));
    }

    #[test]
    fn keys_json_maps_as_integers() {
        let mut map = BTreeMap::new();
        map.insert(DeviceId::new(2).unwrap(), 1.5_f64);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"2":1.5}"#);

        let back: BTreeMap<DeviceId, f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
        assert!(serde_json::from_str::<BTreeMap<DeviceId, f64>>(r#"{"0":1.0}"#).is_err());
    }

    #[test]
    fn reference_slots_cover_controller() {
        let slots: Vec<u8> = DeviceId::reference_slots().map(DeviceId::get).collect();
        assert_eq!(slots, vec![1, 2, 3, 4]);
        assert_eq!(DeviceId::new(1).unwrap().to_string(), "M1");
    }
}
