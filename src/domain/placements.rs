//! Placement resolution
//!
//! Joins a climb's placements against board geometry and role colors to
//! produce the `(led position, color)` list the packet encoder consumes.

use crate::domain::models::{
    BleColorTriplet, ClimbPlacements, HoldLight, PlacementGeometry, PlacementId, RoleColor,
    RoleId,
};
use crate::error::ColorFormatError;
use std::collections::HashMap;
use tracing::warn;

/// Why an entry was left out of a resolved climb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveIssue {
    MissingPlacement(PlacementId),
    MissingRole {
        placement: PlacementId,
        role: RoleId,
    },
    BadColor {
        placement: PlacementId,
        role: RoleId,
        error: ColorFormatError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedClimb {
    pub lights: Vec<HoldLight>,
    pub issues: Vec<ResolveIssue>,
}

/// Resolve every placement to a lit hold.
///
/// Lookup misses and bad colors drop only the affected entry; each one is
/// logged and reported in [`ResolvedClimb::issues`]. Lights come out in
/// ascending placement order.
pub fn resolve(
    placements: &ClimbPlacements,
    geometry: &HashMap<PlacementId, PlacementGeometry>,
    colors: &HashMap<RoleId, RoleColor>,
) -> ResolvedClimb {
    let mut resolved = ResolvedClimb {
        lights: Vec::with_capacity(placements.len()),
        issues: Vec::new(),
    };

    for (placement_id, role_id) in placements.iter() {
        let Some(placement) = geometry.get(&placement_id) else {
            warn!("Placement lookup failed: {}", placement_id);
            resolved
                .issues
                .push(ResolveIssue::MissingPlacement(placement_id));
            continue;
        };

        let Some(role) = colors.get(&role_id) else {
            warn!(
                "Role lookup failed: {} (placement {})",
                role_id, placement_id
            );
            resolved.issues.push(ResolveIssue::MissingRole {
                placement: placement_id,
                role: role_id,
            });
            continue;
        };

        match parse_led_color(&role.led_color) {
            Ok(color) => resolved.lights.push(HoldLight {
                position: placement.led_position,
                color,
            }),
            Err(error) => {
                warn!(
                    "Error converting color for role {}: {}",
                    role_id, error
                );
                resolved.issues.push(ResolveIssue::BadColor {
                    placement: placement_id,
                    role: role_id,
                    error,
                });
            }
        }
    }

    resolved
}

/// Decode a `RRGGBB` hex string.
pub fn parse_led_color(hex_color: &str) -> Result<BleColorTriplet, ColorFormatError> {
    if hex_color.len() != 6 {
        return Err(ColorFormatError::Length(hex_color.to_string()));
    }

    let mut rgb = [0u8; 3];
    hex::decode_to_slice(hex_color, &mut rgb)
        .map_err(|_| ColorFormatError::Digit(hex_color.to_string()))?;

    Ok(BleColorTriplet::new(rgb[0], rgb[1], rgb[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> HashMap<PlacementId, PlacementGeometry> {
        [(1073, 4), (1090, 17), (1134, 300)]
            .into_iter()
            .map(|(placement_id, led_position)| {
                (
                    placement_id,
                    PlacementGeometry {
                        placement_id,
                        normalized_x: 0.5,
                        normalized_y: 0.5,
                        led_position,
                    },
                )
            })
            .collect()
    }

    fn colors() -> HashMap<RoleId, RoleColor> {
        [(12, "00FF00"), (13, "00ffff"), (14, "FF00FF"), (99, "zz0000")]
            .into_iter()
            .map(|(role_id, led_color)| {
                (
                    role_id,
                    RoleColor {
                        role_id,
                        led_color: led_color.to_string(),
                        name: None,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_parse_led_color() {
        assert_eq!(
            parse_led_color("FF8000").unwrap(),
            BleColorTriplet::new(255, 128, 0)
        );
        assert_eq!(
            parse_led_color("00ffaa").unwrap(),
            BleColorTriplet::new(0, 255, 170)
        );
    }

    #[test]
    fn test_parse_led_color_rejects_bad_input() {
        assert!(matches!(
            parse_led_color("FFF"),
            Err(ColorFormatError::Length(_))
        ));
        assert!(matches!(
            parse_led_color("#FF8000"),
            Err(ColorFormatError::Length(_))
        ));
        assert!(matches!(
            parse_led_color("GG0000"),
            Err(ColorFormatError::Digit(_))
        ));
    }

    #[test]
    fn test_resolve_all_found() {
        let placements: ClimbPlacements = vec![(1090, 13), (1073, 12)].into();
        let resolved = resolve(&placements, &geometry(), &colors());

        assert!(resolved.issues.is_empty());
        assert_eq!(
            resolved.lights,
            vec![
                HoldLight {
                    position: 4,
                    color: BleColorTriplet::new(0, 255, 0)
                },
                HoldLight {
                    position: 17,
                    color: BleColorTriplet::new(0, 255, 255)
                },
            ]
        );
    }

    #[test]
    fn test_resolve_missing_placement_is_skipped() {
        let placements: ClimbPlacements = vec![(1073, 12), (5, 12)].into();
        let resolved = resolve(&placements, &geometry(), &colors());

        assert_eq!(resolved.lights.len(), 1);
        assert_eq!(resolved.lights[0].position, 4);
        assert_eq!(resolved.issues, vec![ResolveIssue::MissingPlacement(5)]);
    }

    #[test]
    fn test_resolve_missing_role_and_bad_color_are_skipped() {
        let placements: ClimbPlacements = vec![(1073, 42), (1090, 99), (1134, 14)].into();
        let resolved = resolve(&placements, &geometry(), &colors());

        assert_eq!(
            resolved.lights,
            vec![HoldLight {
                position: 300,
                color: BleColorTriplet::new(255, 0, 255)
            }]
        );
        assert_eq!(resolved.issues.len(), 2);
        assert_eq!(
            resolved.issues[0],
            ResolveIssue::MissingRole {
                placement: 1073,
                role: 42
            }
        );
        assert!(matches!(
            resolved.issues[1],
            ResolveIssue::BadColor {
                placement: 1090,
                role: 99,
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_empty() {
        let resolved = resolve(&ClimbPlacements::new(), &geometry(), &colors());
        assert_eq!(resolved, ResolvedClimb::default());
    }
}
