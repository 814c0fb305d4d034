// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Route model: waypoints, routes and teleport-delimited segments.
//!
//! Routes are authored ahead of time and loaded from JSON:
//!
//! ```json
//! {
//!   "info": { "name": "demo", "map_name": "teyvat", "map_match_method": "sift" },
//!   "positions": [
//!     { "x": 120.0, "y": 40.0, "type": "teleport" },
//!     { "x": 140.0, "y": 55.0, "type": "path", "move_mode": "run" },
//!     { "x": 150.0, "y": 70.0, "type": "target", "action": "pick_around" }
//!   ]
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Point2;

/// Actions that need the agent on top of the waypoint.
const TARGET_ACTIONS: &[&str] = &[
    "pick_around",
    "fight",
    "combat_script",
    "mining",
    "nahida_collect",
    "hydro_collect",
    "electro_collect",
    "anemo_collect",
    "pyro_collect",
];

/// Actions that run where the coarse approach stops.
const NO_CLOSE_APPROACH_ACTIONS: &[&str] = &["up_down_grab_leaf"];

fn has_tag(tags: &[&str], tag: &str) -> bool {
    tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

/// How the agent travels towards a waypoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveMode {
    #[default]
    Walk,
    Run,
    Dash,
    Jump,
    Fly,
    Climb,
}

/// Role of a waypoint within the route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointKind {
    /// Pass-through node; reaching the arrival radius is enough.
    #[default]
    Path,
    /// Precise node; finished with a pulsed close approach.
    Target,
    /// Segment boundary; position continuity is re-established here.
    Teleport,
    /// Face the bearing towards the node without moving.
    Orientation,
}

/// Recognition failures a waypoint tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisidentificationKind {
    /// The sensor returned no position.
    Unrecognized,
    /// The sensor returned a position implausibly far from the target.
    PathTooFar,
}

/// What to substitute when a tolerated recognition failure occurs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisidentificationHandling {
    #[default]
    PreviousDetectedPoint,
    /// Ask the sensor for a global (whole map) re-localisation.
    Relocate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Misidentification {
    pub kinds: Vec<MisidentificationKind>,
    pub handling: MisidentificationHandling,
}

impl Misidentification {
    pub fn covers(&self, kind: MisidentificationKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// A single route node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    #[serde(rename = "type", default)]
    pub kind: WaypointKind,
    #[serde(default)]
    pub move_mode: MoveMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_params: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misidentification: Option<Misidentification>,
}

impl Waypoint {
    pub fn new(x: f64, y: f64, kind: WaypointKind) -> Self {
        Self {
            x,
            y,
            kind,
            move_mode: MoveMode::Walk,
            action: None,
            action_params: None,
            log_info: None,
            misidentification: None,
        }
    }

    pub fn with_move_mode(mut self, mode: MoveMode) -> Self {
        self.move_mode = mode;
        self
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn point(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    /// Action tag, ignoring blank strings left behind by route editors.
    pub fn action_tag(&self) -> Option<&str> {
        self.action
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
    }

    pub fn is_teleport(&self) -> bool {
        self.kind == WaypointKind::Teleport
    }

    pub fn is_orientation_only(&self) -> bool {
        self.kind == WaypointKind::Orientation
    }

    /// Whether the waypoint ends with a pulsed close approach. A target-style
    /// action forces it regardless of the waypoint kind.
    pub fn needs_close_approach(&self) -> bool {
        if self.is_orientation_only() {
            return false;
        }
        match self.action_tag() {
            Some(tag) if has_tag(NO_CLOSE_APPROACH_ACTIONS, tag) => false,
            Some(tag) if has_tag(TARGET_ACTIONS, tag) => true,
            _ => self.kind == WaypointKind::Target,
        }
    }

    pub fn tolerates(&self, kind: MisidentificationKind) -> bool {
        self.misidentification
            .as_ref()
            .map(|m| m.covers(kind))
            .unwrap_or(false)
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.point())?;
        if let Some(tag) = self.action_tag() {
            write!(f, " [{}]", tag)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteInfo {
    pub name: String,
    /// Map identifier passed through to the sensor.
    pub map_name: String,
    /// Map-matching method identifier passed through to the sensor.
    pub map_match_method: String,
}

impl Default for RouteInfo {
    fn default() -> Self {
        Self {
            name: "unnamed".to_string(),
            map_name: "default".to_string(),
            map_match_method: "default".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Failed to read route file {0}: {1}")]
    Read(PathBuf, String),

    #[error("Failed to parse route: {0}")]
    Parse(String),

    #[error("Route has no waypoints")]
    Empty,

    #[error("Waypoint {0} has a non-finite coordinate")]
    InvalidCoordinate(usize),
}

/// An ordered, pre-authored list of waypoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub info: RouteInfo,
    pub positions: Vec<Waypoint>,
}

/// A maximal run of waypoints between teleports; the unit of retry.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub waypoints: Vec<Waypoint>,
}

impl Segment {
    pub fn starts_with_teleport(&self) -> bool {
        self.waypoints.first().map(Waypoint::is_teleport).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

impl Route {
    pub fn new(positions: Vec<Waypoint>) -> Self {
        Self {
            info: RouteInfo::default(),
            positions,
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, RouteError> {
        let route: Route =
            serde_json::from_str(content).map_err(|e| RouteError::Parse(e.to_string()))?;
        route.validate()?;
        Ok(route)
    }

    pub fn load(path: &Path) -> Result<Self, RouteError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RouteError::Read(path.to_path_buf(), e.to_string()))?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), RouteError> {
        if self.positions.is_empty() {
            return Err(RouteError::Empty);
        }
        if let Some(idx) = self.positions.iter().position(|w| !w.point().is_finite()) {
            return Err(RouteError::InvalidCoordinate(idx));
        }
        Ok(())
    }

    /// Split the route so every teleport waypoint opens a new segment.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut current: Vec<Waypoint> = Vec::new();
        for waypoint in &self.positions {
            if waypoint.is_teleport() && !current.is_empty() {
                segments.push(Segment {
                    index: segments.len(),
                    waypoints: std::mem::take(&mut current),
                });
            }
            current.push(waypoint.clone());
        }
        if !current.is_empty() {
            segments.push(Segment {
                index: segments.len(),
                waypoints: current,
            });
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "info": { "name": "sample", "map_name": "teyvat", "map_match_method": "sift" },
        "positions": [
            { "x": 10.0, "y": 10.0, "type": "teleport" },
            { "x": 20.0, "y": 10.0, "move_mode": "run" },
            { "x": 30.0, "y": 10.0, "type": "target", "action": "pick_around" },
            { "x": 100.0, "y": 100.0, "type": "teleport" },
            { "x": 110.0, "y": 100.0, "type": "orientation", "action": "" }
        ]
    }"#;

    #[test]
    fn test_parse_route() {
        let route = Route::from_json_str(SAMPLE).unwrap();
        assert_eq!(route.info.name, "sample");
        assert_eq!(route.info.map_name, "teyvat");
        assert_eq!(route.positions.len(), 5);
        assert_eq!(route.positions[1].kind, WaypointKind::Path);
        assert_eq!(route.positions[1].move_mode, MoveMode::Run);
        assert_eq!(route.positions[2].action_tag(), Some("pick_around"));
        assert!(route.positions[2].needs_close_approach());
        assert!(route.positions[4].is_orientation_only());
        assert_eq!(route.positions[4].action_tag(), None);
    }

    #[test]
    fn test_segments_split_at_teleports() {
        let route = Route::from_json_str(SAMPLE).unwrap();
        let segments = route.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].index, 0);
        assert_eq!(segments[0].len(), 3);
        assert!(segments[0].starts_with_teleport());
        assert_eq!(segments[1].index, 1);
        assert_eq!(segments[1].len(), 2);
        assert!(segments[1].starts_with_teleport());
    }

    #[test]
    fn test_route_without_leading_teleport() {
        let route = Route::new(vec![
            Waypoint::new(1.0, 1.0, WaypointKind::Path),
            Waypoint::new(2.0, 2.0, WaypointKind::Path),
            Waypoint::new(5.0, 5.0, WaypointKind::Teleport),
            Waypoint::new(6.0, 6.0, WaypointKind::Target),
        ]);
        let segments = route.segments();
        assert_eq!(segments.len(), 2);
        assert!(!segments[0].starts_with_teleport());
        assert_eq!(segments[0].len(), 2);
        assert!(segments[1].starts_with_teleport());
    }

    #[test]
    fn test_empty_route_rejected() {
        let err = Route::from_json_str(r#"{ "positions": [] }"#).unwrap_err();
        assert!(matches!(err, RouteError::Empty));
    }

    #[test]
    fn test_misidentification_parsing() {
        let json = r#"{
            "positions": [{
                "x": 1.0, "y": 2.0,
                "misidentification": { "kinds": ["unrecognized"], "handling": "relocate" }
            }]
        }"#;
        let route = Route::from_json_str(json).unwrap();
        let wp = &route.positions[0];
        assert!(wp.tolerates(MisidentificationKind::Unrecognized));
        assert!(!wp.tolerates(MisidentificationKind::PathTooFar));
        assert_eq!(
            wp.misidentification.as_ref().map(|m| m.handling),
            Some(MisidentificationHandling::Relocate)
        );
    }

    #[test]
    fn test_target_actions_force_close_approach() {
        let pick = Waypoint::new(1.0, 1.0, WaypointKind::Path).with_action("pick_around");
        assert!(pick.needs_close_approach());
        let fight = Waypoint::new(1.0, 1.0, WaypointKind::Path).with_action(" Fight ");
        assert!(fight.needs_close_approach());
        let mining = Waypoint::new(1.0, 1.0, WaypointKind::Path).with_action("mining");
        assert!(mining.needs_close_approach());

        let plain = Waypoint::new(1.0, 1.0, WaypointKind::Path).with_action("log_output");
        assert!(!plain.needs_close_approach());
        let target = Waypoint::new(1.0, 1.0, WaypointKind::Target).with_action("log_output");
        assert!(target.needs_close_approach());
    }

    #[test]
    fn test_orientation_and_leaf_grab_skip_close_approach() {
        let facing = Waypoint::new(1.0, 1.0, WaypointKind::Orientation).with_action("pick_around");
        assert!(!facing.needs_close_approach());
        let leaf = Waypoint::new(1.0, 1.0, WaypointKind::Target).with_action("up_down_grab_leaf");
        assert!(!leaf.needs_close_approach());
    }
}
