//! The virtual stat aggregate: a fixed set of named point slots.

use crate::models::point::{ACTIVE, Actor, INACTIVE, NOT_INITIALIZED, Point, PointKind, error_value, is_error_value};
use crate::models::representation::{self, ParseError, PointNode};
use crate::models::role::{self, PointRole};
use crate::models::status::SyncStatus;
use log::{debug, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Fan speed plus the override that tells auto from manual for analog fans.
/// Both are addressed remotely as distinct references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanPair {
    pub fan: Point,
    pub fan_override: Point,
}

impl FanPair {
    pub fn formatted(&self) -> String {
        role::format_fan(&self.fan, Some(&self.fan_override))
    }

    pub fn is_valid(&self) -> bool {
        match self.fan.kind() {
            PointKind::Multistate => true,
            PointKind::Analog => PointRole::FanOverride.accepts(self.fan_override.kind()),
            _ => false,
        }
    }

    pub fn is_manual(&self) -> bool {
        role::fan_is_manual(&self.fan, Some(&self.fan_override))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    name: String,
    temp: Point,
    temp_setpoint: Point,
    outdoor_temp: Point,
    lights: [Point; 4],
    fan: FanPair,
    blinds: Point,
    occupancy: Point,
    timed_override: Point,
}

impl Stat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn point(&self, role: PointRole) -> &Point {
        match role {
            PointRole::Temp => &self.temp,
            PointRole::TempSetpoint => &self.temp_setpoint,
            PointRole::OutdoorTemp => &self.outdoor_temp,
            PointRole::Lights1 => &self.lights[0],
            PointRole::Lights2 => &self.lights[1],
            PointRole::Lights3 => &self.lights[2],
            PointRole::Lights4 => &self.lights[3],
            PointRole::Fan => &self.fan.fan,
            PointRole::FanOverride => &self.fan.fan_override,
            PointRole::Blinds => &self.blinds,
            PointRole::Occupancy => &self.occupancy,
            PointRole::TimedOverride => &self.timed_override,
        }
    }

    pub fn point_mut(&mut self, role: PointRole) -> &mut Point {
        match role {
            PointRole::Temp => &mut self.temp,
            PointRole::TempSetpoint => &mut self.temp_setpoint,
            PointRole::OutdoorTemp => &mut self.outdoor_temp,
            PointRole::Lights1 => &mut self.lights[0],
            PointRole::Lights2 => &mut self.lights[1],
            PointRole::Lights3 => &mut self.lights[2],
            PointRole::Lights4 => &mut self.lights[3],
            PointRole::Fan => &mut self.fan.fan,
            PointRole::FanOverride => &mut self.fan.fan_override,
            PointRole::Blinds => &mut self.blinds,
            PointRole::Occupancy => &mut self.occupancy,
            PointRole::TimedOverride => &mut self.timed_override,
        }
    }

    /// All slots in fixed order, set up or not.
    pub fn slots(&self) -> impl Iterator<Item = (PointRole, &Point)> {
        PointRole::ALL.into_iter().map(move |role| (role, self.point(role)))
    }

    /// Write a value into a slot, translating it into the slot's remote vocabulary.
    pub fn apply(&mut self, role: PointRole, value: &str, actor: Actor) -> bool {
        let point = self.point_mut(role);
        let encoded = role.encode_value(point.kind(), value);
        point.set_value(&encoded, actor)
    }

    pub fn formatted(&self, role: PointRole) -> String {
        match role {
            PointRole::Fan => self.fan.formatted(),
            other => other.format(self.point(other)),
        }
    }

    pub fn is_valid(&self, role: PointRole) -> bool {
        match role {
            PointRole::Fan => self.fan.is_valid(),
            other => other.accepts(self.point(other).kind()),
        }
    }

    /// Reset every slot and reload from a representation document.
    ///
    /// A missing or malformed point node is logged and skipped; the rest of the
    /// stat still loads. Returns the aggregate status: the last point error
    /// seen wins, `Ok` otherwise.
    pub fn load_from_representation(&mut self, doc: &Value) -> SyncStatus {
        *self = Stat::default();

        let (name, points) = match representation::split_document(doc) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Stat load: {}", e);
                return SyncStatus::Ok;
            }
        };
        self.name = name;
        let Some(points) = points else {
            warn!("Stat load: {}", ParseError::MalformedStat(self.name.clone()));
            return SyncStatus::Ok;
        };

        let mut status = SyncStatus::Ok;
        for role in PointRole::ALL {
            let node = match representation::point_node(points, role.key()) {
                Ok(node) => node,
                Err(e) => {
                    warn!("Stat load \"{}\": {}", self.name, e);
                    continue;
                }
            };
            if let Some(error) = self.load_point(role, &node) {
                status = SyncStatus::Point(error);
            }
        }

        debug!("Stat \"{}\" loaded ({} point(s) set up)", self.name, self.get_points(false).len());
        status
    }

    /// Returns the point's error value, if it ended up carrying one.
    fn load_point(&mut self, role: PointRole, node: &PointNode) -> Option<String> {
        let point = self.point_mut(role);
        if let Some(reference) = node.reference.as_deref() {
            point.set_reference(reference);
        }
        point.set_display_name(node.display_name.clone());
        point.set_data_type(node.data_type.clone());

        if !node.value.is_empty() && node.value != NOT_INITIALIZED {
            self.apply(role, &node.value, Actor::System);
        }

        let point = self.point_mut(role);
        if point.is_error() {
            return Some(point.value().to_string());
        }
        if let Some(text) = node.error_text.as_deref() {
            let error = error_value(text);
            point.set_value(&error, Actor::System);
            return Some(error);
        }
        None
    }

    /// Serialize into the same shape `load_from_representation` consumes.
    pub fn to_representation(&self) -> Result<Value, ParseError> {
        let nodes = self.slots().map(|(role, point)| {
            let value = if point.is_initialized() { point.value().to_string() } else { String::new() };
            let node = PointNode {
                data_type: point.data_type().to_string(),
                value,
                reference: Some(point.reference().to_string()),
                display_name: point.display_name().to_string(),
                error_text: None,
            };
            (role.key(), node)
        });
        representation::build_document(&self.name, nodes)
    }

    /// Set-up points (non-empty reference), optionally only the dirty ones.
    /// Two slots sharing a reference both appear.
    pub fn get_points(&self, only_dirty: bool) -> Vec<(PointRole, &Point)> {
        self.slots()
            .filter(|(_, p)| p.is_set() && (!only_dirty || p.is_dirty()))
            .collect()
    }

    /// Distinct references of the set-up points.
    pub fn references(&self, only_dirty: bool) -> BTreeSet<String> {
        self.get_points(only_dirty)
            .into_iter()
            .map(|(_, p)| p.reference().to_string())
            .collect()
    }

    /// Wire payload: reference → value. Slots sharing a reference collapse,
    /// the later slot in iteration order wins.
    pub fn to_reference_value_map(&self, only_dirty: bool) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for (_, point) in self.get_points(only_dirty) {
            map.insert(point.reference().to_string(), point.value().to_string());
        }
        map
    }

    pub fn mark_all_dirty(&mut self) {
        for role in PointRole::ALL {
            self.point_mut(role).set_dirty(true);
        }
    }

    pub fn mark_all_non_dirty(&mut self) {
        for role in PointRole::ALL {
            self.point_mut(role).set_dirty(false);
        }
    }

    pub fn restore_all_if_not_dirty(&mut self) {
        for role in PointRole::ALL {
            self.point_mut(role).restore_if_not_dirty();
        }
    }

    /// Drop every pending edit and show the last confirmed values again.
    pub fn restore_all_to_last_known(&mut self) {
        self.mark_all_non_dirty();
        self.restore_all_if_not_dirty();
    }

    pub fn lights(&self) -> [&Point; 4] {
        [&self.lights[0], &self.lights[1], &self.lights[2], &self.lights[3]]
    }

    pub fn lights_summary(&self) -> String {
        role::lights_summary(&self.lights())
    }

    pub fn lights_any_valid(&self) -> bool {
        self.lights.iter().any(|l| PointRole::Lights1.accepts(l.kind()))
    }

    /// Lights are disabled when none of the four slots has a reference.
    pub fn lights_disabled(&self) -> bool {
        self.lights.iter().all(|l| !l.is_set())
    }

    pub fn fan(&self) -> &FanPair {
        &self.fan
    }

    /// Switch the fan between auto and manual as a user edit.
    ///
    /// A multistate fan changes its own state; an analog fan flips its
    /// override, which is then always sent with the next write.
    pub fn set_fan_manual(&mut self, manual: bool) -> bool {
        match self.fan.fan.kind() {
            PointKind::Multistate => {
                let state = role::fan_mode_state(self.fan.fan.value(), manual).to_string();
                self.fan.fan.set_value(&state, Actor::User)
            }
            PointKind::Analog => {
                let mode = if manual { ACTIVE } else { INACTIVE };
                self.apply(PointRole::FanOverride, mode, Actor::User);
                self.fan.fan_override.set_dirty(true);
                true
            }
            _ => false,
        }
    }

    /// Last point error among the set-up points, if any.
    pub fn point_error(&self) -> Option<&str> {
        self.get_points(false)
            .into_iter()
            .rev()
            .map(|(_, p)| p.value())
            .find(|v| is_error_value(v))
    }
}

/// Presentable stat name. NFC-tagged stats keep their tag in the name and the
/// readable name in the description.
pub fn friendly_stat_name(name: &str, description: Option<&str>) -> String {
    if name.starts_with("vs_nfc") {
        return description.unwrap_or_default().to_string();
    }
    name.replacen("vs_", "", 1).replace('_', " ")
}
