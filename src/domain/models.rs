use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// Physical hold location on the wall, assigned by the board database.
pub type PlacementId = u32;

/// Semantic hold role (start, foot, finish, ...), assigned by the board database.
pub type RoleId = u32;

/// Peripheral-native LED index. Distinct from [`PlacementId`].
pub type LedPosition = u32;

/// Which holds are lit, and with which role, for one climb.
///
/// Keys are unique and iteration is always ascending by placement id,
/// so serialized forms are deterministic. Persisted as an array of
/// `[placementId, roleId]` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(PlacementId, RoleId)>", into = "Vec<(PlacementId, RoleId)>")]
pub struct ClimbPlacements {
    entries: BTreeMap<PlacementId, RoleId>,
}

impl ClimbPlacements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `role` to `placement`, replacing any previous role.
    pub fn set_role(&mut self, placement: PlacementId, role: RoleId) -> Option<RoleId> {
        self.entries.insert(placement, role)
    }

    pub fn remove(&mut self, placement: PlacementId) -> Option<RoleId> {
        self.entries.remove(&placement)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, placement: PlacementId) -> Option<RoleId> {
        self.entries.get(&placement).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending placement order.
    pub fn iter(&self) -> impl Iterator<Item = (PlacementId, RoleId)> + '_ {
        self.entries.iter().map(|(p, r)| (*p, *r))
    }

    pub fn to_pairs(&self) -> Vec<(PlacementId, RoleId)> {
        self.iter().collect()
    }
}

impl FromIterator<(PlacementId, RoleId)> for ClimbPlacements {
    /// Later pairs win for a repeated placement id.
    fn from_iter<I: IntoIterator<Item = (PlacementId, RoleId)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<(PlacementId, RoleId)>> for ClimbPlacements {
    fn from(pairs: Vec<(PlacementId, RoleId)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl From<ClimbPlacements> for Vec<(PlacementId, RoleId)> {
    fn from(placements: ClimbPlacements) -> Self {
        placements.entries.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a ClimbPlacements {
    type Item = (&'a PlacementId, &'a RoleId);
    type IntoIter = btree_map::Iter<'a, PlacementId, RoleId>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Board geometry for one placement, as exported by the board database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementGeometry {
    pub placement_id: PlacementId,
    #[serde(rename = "x")]
    pub normalized_x: f64,
    #[serde(rename = "y")]
    pub normalized_y: f64,
    pub led_position: LedPosition,
}

/// LED color for one role. `led_color` is a 6-hex-digit RGB string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleColor {
    pub role_id: RoleId,
    pub led_color: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Full 8-bit RGB color before wire quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BleColorTriplet {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BleColorTriplet {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A resolved hold ready for the packet encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldLight {
    pub position: LedPosition,
    pub color: BleColorTriplet,
}

/// Opaque identifier of a BLE peripheral, stable for the platform adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral seen advertising the board service during the current scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self.id.as_str(),
        }
    }
}

/// Connection Manager state. Observed read-only by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    PoweredOff,
    PoweredOnIdle,
    Scanning,
    Connecting(DeviceId),
    Connected(DeviceId),
    DisconnectedError,
}

impl ConnectionState {
    pub fn is_powered_on(&self) -> bool {
        !matches!(self, Self::PoweredOff)
    }

    pub fn connected_device(&self) -> Option<&DeviceId> {
        match self {
            Self::Connected(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoweredOff => f.write_str("powered off"),
            Self::PoweredOnIdle => f.write_str("idle"),
            Self::Scanning => f.write_str("scanning"),
            Self::Connecting(id) => write!(f, "connecting to {}", id),
            Self::Connected(id) => write!(f, "connected to {}", id),
            Self::DisconnectedError => f.write_str("disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placements_iterate_ascending() {
        let mut placements = ClimbPlacements::new();
        placements.set_role(200, 7);
        placements.set_role(5, 12);
        placements.set_role(42, 13);

        assert_eq!(placements.to_pairs(), vec![(5, 12), (42, 13), (200, 7)]);
    }

    #[test]
    fn test_placements_authoring() {
        let mut placements = ClimbPlacements::new();
        assert_eq!(placements.set_role(5, 12), None);
        assert_eq!(placements.set_role(5, 14), Some(12));
        assert_eq!(placements.get(5), Some(14));
        assert_eq!(placements.remove(5), Some(14));
        assert!(placements.is_empty());

        placements.set_role(1, 1);
        placements.clear();
        assert_eq!(placements.len(), 0);
    }

    #[test]
    fn test_placements_persist_as_pairs() {
        let placements: ClimbPlacements = vec![(200, 7), (5, 12)].into();
        let json = serde_json::to_string(&placements).unwrap();
        assert_eq!(json, "[[5,12],[200,7]]");

        let restored: ClimbPlacements = serde_json::from_str("[[200,7],[5,12],[5,13]]").unwrap();
        assert_eq!(restored.get(5), Some(13));
        assert_eq!(restored.get(200), Some(7));
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let mut device = DiscoveredDevice {
            id: DeviceId::new("hci0/dev_AA_BB"),
            name: None,
            rssi: Some(-60),
        };
        assert_eq!(device.display_name(), "hci0/dev_AA_BB");

        device.name = Some("Kilter Board".to_string());
        assert_eq!(device.display_name(), "Kilter Board");
    }
}
