//! Roles of the fixed stat slots and their table-driven presentation rules.
//!
//! A [`Point`] carries no behavior of its own beyond dirty tracking; what a raw
//! value means (degrees, percent, fan speed, open/closed) depends on the slot
//! it sits in, so formatting and validity are pure functions of role, kind and value.

use crate::models::point::{ACTIVE, INACTIVE, Point, PointKind, is_error_value};

/// Shown in place of a value when the reference kind does not fit the role.
pub const UNKNOWN_OBJECT: &str = "QERR_CLASS_OBJECT::QERR_CODE_UNKNOWN_OBJECT";

pub const AUTO_LABEL: &str = "Auto";
pub const ON_LABEL: &str = "On";
pub const OFF_LABEL: &str = "Off";
const OPEN_LABEL: &str = "Open";
const CLOSED_LABEL: &str = "Closed";
const OCCUPIED_LABEL: &str = "Occupied";
const UNOCCUPIED_LABEL: &str = "Unoccupied";
const DEGREE: char = '\u{00B0}';

/// Multistate fan: state 1 is auto, the remaining states map to speed labels.
const FAN_AUTO_STATE: &str = "1";
const FAN_FIRST_MANUAL_STATE: &str = "2";
const FAN_SPEEDS: [(&str, &str); 4] = [("5", "III"), ("4", "II"), ("3", "I"), ("2", "0")];

/// Multistate override: state 1 = inactive (auto), state 2 = active (manual).
const OVERRIDE_INACTIVE_STATE: &str = "1";
const OVERRIDE_ACTIVE_STATE: &str = "2";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PointRole {
    Temp,
    TempSetpoint,
    OutdoorTemp,
    Lights1,
    Lights2,
    Lights3,
    Lights4,
    Fan,
    FanOverride,
    Blinds,
    Occupancy,
    TimedOverride,
}

impl PointRole {
    /// Slot order used for iteration, serialization and wire payloads.
    pub const ALL: [PointRole; 12] = [
        PointRole::Temp,
        PointRole::TempSetpoint,
        PointRole::OutdoorTemp,
        PointRole::Lights1,
        PointRole::Lights2,
        PointRole::Lights3,
        PointRole::Lights4,
        PointRole::Fan,
        PointRole::FanOverride,
        PointRole::Blinds,
        PointRole::Occupancy,
        PointRole::TimedOverride,
    ];

    /// Key of the role inside the stat representation.
    pub fn key(self) -> &'static str {
        match self {
            PointRole::Temp => "TEMP",
            PointRole::TempSetpoint => "TEMP_SP",
            PointRole::OutdoorTemp => "OUTDOOR_TEMP",
            PointRole::Lights1 => "LIGHTS1",
            PointRole::Lights2 => "LIGHTS2",
            PointRole::Lights3 => "LIGHTS3",
            PointRole::Lights4 => "LIGHTS4",
            PointRole::Fan => "FAN",
            PointRole::FanOverride => "FAN_OVERRIDE",
            PointRole::Blinds => "BLINDS",
            PointRole::Occupancy => "OCCUPANCY",
            PointRole::TimedOverride => "TIMED_OVERRIDE",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        PointRole::ALL
            .into_iter()
            .find(|role| role.key().eq_ignore_ascii_case(key.trim()))
    }

    /// Whether a reference of `kind` makes sense in this slot.
    pub fn accepts(self, kind: PointKind) -> bool {
        use PointKind::*;
        match self {
            PointRole::Temp | PointRole::TempSetpoint | PointRole::OutdoorTemp => kind == Analog,
            PointRole::Lights1
            | PointRole::Lights2
            | PointRole::Lights3
            | PointRole::Lights4
            | PointRole::Blinds => matches!(kind, Analog | Binary),
            PointRole::Fan => matches!(kind, Multistate | Analog),
            PointRole::FanOverride => matches!(kind, Multistate | Binary),
            PointRole::Occupancy => matches!(kind, Binary | Multistate),
            PointRole::TimedOverride => matches!(kind, Binary | Analog),
        }
    }

    /// Human readable value for the slot. Error values pass through untouched.
    ///
    /// The fan needs its override to tell auto from manual; use
    /// [`format_fan`] when the pair is at hand.
    pub fn format(self, point: &Point) -> String {
        match self {
            PointRole::Temp | PointRole::TempSetpoint | PointRole::OutdoorTemp => format_temperature(point),
            PointRole::Lights1 | PointRole::Lights2 | PointRole::Lights3 | PointRole::Lights4 => {
                format_lights(point)
            }
            PointRole::Fan => format_fan(point, None),
            PointRole::FanOverride => format_fan_override(point),
            PointRole::Blinds => format_blinds(point),
            PointRole::Occupancy => format_occupancy(point),
            PointRole::TimedOverride => format_timed_override(point),
        }
    }

    /// Translate a value from the UI vocabulary into what the slot's remote
    /// object expects. Only the multistate fan override needs this.
    pub fn encode_value(self, kind: PointKind, value: &str) -> String {
        if self == PointRole::FanOverride && kind == PointKind::Multistate {
            match value {
                INACTIVE => return OVERRIDE_INACTIVE_STATE.to_string(),
                ACTIVE => return OVERRIDE_ACTIVE_STATE.to_string(),
                _ => {}
            }
        }
        value.to_string()
    }
}

fn rounded(value: &str) -> Option<i64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.round() as i64)
}

fn percent(value: &str, clamp: bool) -> Option<String> {
    let mut pct = rounded(value)?;
    if clamp {
        pct = pct.clamp(0, 100);
    }
    Some(format!("{}%", pct))
}

pub fn format_temperature(point: &Point) -> String {
    let value = point.value();
    if is_error_value(value) {
        return value.to_string();
    }
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => format!("{:.1}{}", v, DEGREE),
        _ => value.to_string(),
    }
}

pub fn format_lights(point: &Point) -> String {
    let value = point.value();
    if is_error_value(value) {
        return value.to_string();
    }
    match point.kind() {
        PointKind::Analog => percent(value, true).unwrap_or_else(|| value.to_string()),
        PointKind::Binary => on_off(value).to_string(),
        _ => UNKNOWN_OBJECT.to_string(),
    }
}

pub fn format_blinds(point: &Point) -> String {
    let value = point.value();
    if is_error_value(value) {
        return value.to_string();
    }
    match point.kind() {
        PointKind::Binary if value == ACTIVE => OPEN_LABEL.to_string(),
        PointKind::Binary => CLOSED_LABEL.to_string(),
        PointKind::Analog => percent(value, true).unwrap_or_else(|| value.to_string()),
        _ => UNKNOWN_OBJECT.to_string(),
    }
}

pub fn format_fan_override(point: &Point) -> String {
    let value = point.value();
    if is_error_value(value) {
        return value.to_string();
    }
    match point.kind() {
        PointKind::Multistate if value == OVERRIDE_INACTIVE_STATE => INACTIVE.to_string(),
        PointKind::Multistate => ACTIVE.to_string(),
        PointKind::Binary => value.to_string(),
        _ => UNKNOWN_OBJECT.to_string(),
    }
}

/// Fan speed label. An analog fan reads "Auto" while its override is inactive.
pub fn format_fan(fan: &Point, fan_override: Option<&Point>) -> String {
    let value = fan.value();
    if is_error_value(value) {
        return value.to_string();
    }
    match fan.kind() {
        PointKind::Multistate if value == FAN_AUTO_STATE => AUTO_LABEL.to_string(),
        PointKind::Multistate => fan_speed_label(value).unwrap_or(value).to_string(),
        PointKind::Analog => {
            if fan_override.is_some_and(|o| format_fan_override(o) == INACTIVE) {
                AUTO_LABEL.to_string()
            } else {
                percent(value, false).unwrap_or_else(|| value.to_string())
            }
        }
        _ => UNKNOWN_OBJECT.to_string(),
    }
}

/// Manual mode: a multistate fan off state 1, or an analog fan whose override is active.
pub fn fan_is_manual(fan: &Point, fan_override: Option<&Point>) -> bool {
    match fan.kind() {
        PointKind::Multistate => !(fan.value() == FAN_AUTO_STATE || fan.is_error()),
        PointKind::Analog => fan_override.is_none_or(|o| format_fan_override(o) == ACTIVE),
        _ => false,
    }
}

/// Raw multistate value for a requested manual/auto mode of a multistate fan.
pub fn fan_mode_state(current: &str, manual: bool) -> &str {
    if !manual {
        FAN_AUTO_STATE
    } else if current == FAN_AUTO_STATE {
        FAN_FIRST_MANUAL_STATE
    } else {
        current
    }
}

pub fn fan_speed_label(state: &str) -> Option<&'static str> {
    FAN_SPEEDS.iter().find(|(s, _)| *s == state).map(|(_, label)| *label)
}

pub fn fan_speed_state(label: &str) -> Option<&'static str> {
    FAN_SPEEDS.iter().find(|(_, l)| *l == label).map(|(state, _)| *state)
}

pub fn format_occupancy(point: &Point) -> String {
    let value = point.value();
    if is_error_value(value) {
        return value.to_string();
    }
    match point.kind() {
        PointKind::Binary if value == ACTIVE => OCCUPIED_LABEL.to_string(),
        PointKind::Binary => UNOCCUPIED_LABEL.to_string(),
        PointKind::Multistate => match value {
            "1" => UNOCCUPIED_LABEL.to_string(),
            "2" => OCCUPIED_LABEL.to_string(),
            other => other.to_string(),
        },
        _ => UNKNOWN_OBJECT.to_string(),
    }
}

pub fn format_timed_override(point: &Point) -> String {
    let value = point.value();
    if is_error_value(value) {
        return value.to_string();
    }
    match point.kind() {
        PointKind::Binary => on_off(value).to_string(),
        PointKind::Analog => rounded(value)
            .map(|minutes| format!("{} min", minutes.max(0)))
            .unwrap_or_else(|| value.to_string()),
        _ => UNKNOWN_OBJECT.to_string(),
    }
}

fn on_off(value: &str) -> &'static str {
    if value == ACTIVE { ON_LABEL } else { OFF_LABEL }
}

/// Whether a single light counts as "on": analog above zero or binary active.
fn light_is_on(value: &str) -> bool {
    match value.trim().parse::<f64>() {
        Ok(v) => v > 0.0,
        Err(_) => value == ACTIVE,
    }
}

/// Summary across the four light slots. When every light is in error or not
/// yet initialised, the first light's raw value is surfaced as is.
pub fn lights_summary(lights: &[&Point]) -> String {
    let mut errors = 0;
    for light in lights {
        if !light.is_initialized() || light.is_error() {
            errors += 1;
            continue;
        }
        if light_is_on(light.value()) {
            return ON_LABEL.to_string();
        }
    }

    match lights.first() {
        Some(first) if errors == lights.len() => first.value().to_string(),
        _ => OFF_LABEL.to_string(),
    }
}
