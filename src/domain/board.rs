use crate::domain::models::{PlacementGeometry, PlacementId, RoleColor, RoleId};
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Immutable snapshot of the board database tables the sender needs.
#[derive(Debug, Clone, Default)]
pub struct BoardData {
    pub geometry: HashMap<PlacementId, PlacementGeometry>,
    pub colors: HashMap<RoleId, RoleColor>,
}

#[derive(Debug, Deserialize)]
struct BoardExport {
    placements: Vec<PlacementGeometry>,
    roles: Vec<RoleColor>,
}

impl BoardData {
    pub fn new(
        placements: impl IntoIterator<Item = PlacementGeometry>,
        roles: impl IntoIterator<Item = RoleColor>,
    ) -> Self {
        Self {
            geometry: placements
                .into_iter()
                .map(|p| (p.placement_id, p))
                .collect(),
            colors: roles.into_iter().map(|r| (r.role_id, r)).collect(),
        }
    }

    /// Load a JSON export of the placement and role tables.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read board data {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Invalid board data in {}", path.display()))
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let export: BoardExport = serde_json::from_str(json)?;
        Ok(Self::new(export.placements, export.roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let board = BoardData::from_json(
            r#"{
                "placements": [
                    {"placement_id": 1073, "x": 0.1, "y": 0.9, "led_position": 4},
                    {"placement_id": 1090, "x": 0.2, "y": 0.8, "led_position": 17}
                ],
                "roles": [
                    {"role_id": 12, "led_color": "00FF00", "name": "start"},
                    {"role_id": 15, "led_color": "FFA500"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(board.geometry.len(), 2);
        assert_eq!(board.geometry[&1090].led_position, 17);
        assert_eq!(board.colors[&12].name.as_deref(), Some("start"));
        assert_eq!(board.colors[&15].led_color, "FFA500");
    }

    #[test]
    fn test_from_json_rejects_missing_tables() {
        assert!(BoardData::from_json(r#"{"placements": []}"#).is_err());
    }
}
