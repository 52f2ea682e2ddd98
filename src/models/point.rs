//! A single named, remotely-backed value of the virtual stat.
//!
//! Points never talk to the network themselves. They only track what the user
//! changed locally (`dirty`) against what the remote side last confirmed
//! (`old_value`), so the sync cycles can decide what to send and what to keep.

/// Sentinel carried by `value`/`old_value` until the first set.
pub const NOT_INITIALIZED: &str = "VIRTUALSTAT_POINT_NOT_INITIALIZED";
/// Binary "on" vocabulary used by the remote object service.
pub const ACTIVE: &str = "active";
/// Binary "off" vocabulary used by the remote object service.
pub const INACTIVE: &str = "inactive";
/// Values starting with this prefix carry a point-level error code.
pub const ERROR_PREFIX: &str = "QERR";

// References shorter than this cannot hold `<site>/<device>/<type>,<instance>`.
const MIN_REFERENCE_LEN: usize = 10;

const ANALOG_TYPES: [&str; 3] = ["analog-input", "analog-output", "analog-value"];
const BINARY_TYPES: [&str; 3] = ["binary-input", "binary-output", "binary-value"];
const MULTISTATE_TYPES: [&str; 3] = ["multi-state-input", "multi-state-output", "multi-state-value"];

/// Object family of a point, derived from its reference only.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum PointKind {
    Analog,
    Binary,
    Multistate,
    #[default]
    Unknown,
}

impl PointKind {
    /// Parse the object-type segment of a reference such as
    /// `/.bacnet/MainSite/5601/multi-state-value,51`.
    pub fn from_reference(reference: &str) -> Self {
        if reference.len() < MIN_REFERENCE_LEN {
            return PointKind::Unknown;
        }

        let Some(segment) = reference.split('/').find(|s| s.contains(',')) else {
            return PointKind::Unknown;
        };
        let object_type = segment.split(',').next().unwrap_or_default();
        let object_type = object_type
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .to_lowercase();

        if ANALOG_TYPES.contains(&object_type.as_str()) {
            PointKind::Analog
        } else if BINARY_TYPES.contains(&object_type.as_str()) {
            PointKind::Binary
        } else if MULTISTATE_TYPES.contains(&object_type.as_str()) {
            PointKind::Multistate
        } else {
            PointKind::Unknown
        }
    }
}

/// Who is writing a value; governs the overwrite rules of [`Point::set_value`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Value arriving from the remote side (poll results, loaded documents).
    System,
    /// Local edit that still has to be written remotely.
    User,
}

/// Returns true when the raw value carries a point-level error code.
pub fn is_error_value(value: &str) -> bool {
    value.starts_with(ERROR_PREFIX)
}

/// Error value for a point annotated with `error_text`, e.g.
/// `CLASS_OS::QERR_CODE_DEVICE_OFFLINE` becomes `QERR_CLASS_OS::QERR_CODE_DEVICE_OFFLINE`.
pub fn error_value(error_text: &str) -> String {
    if is_error_value(error_text) {
        error_text.to_string()
    } else {
        format!("{}_{}", ERROR_PREFIX, error_text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    reference: String,
    kind: PointKind,
    value: String,
    old_value: String,
    dirty: bool,
    display_name: String,
    data_type: String,
}

impl Default for Point {
    fn default() -> Self {
        Point {
            reference: String::new(),
            kind: PointKind::Unknown,
            value: NOT_INITIALIZED.to_string(),
            old_value: NOT_INITIALIZED.to_string(),
            dirty: false,
            display_name: String::new(),
            data_type: String::new(),
        }
    }
}

impl Point {
    pub fn with_reference(reference: &str) -> Self {
        let mut point = Self::default();
        point.set_reference(reference);
        point
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Point to a new remote object. All state belonging to the previous
    /// reference is dropped and the kind is derived again.
    pub fn set_reference(&mut self, reference: &str) {
        *self = Point::default();
        self.reference = reference.trim().to_string();
        self.kind = PointKind::from_reference(&self.reference);
    }

    pub fn kind(&self) -> PointKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Last value confirmed by the remote side, or [`NOT_INITIALIZED`].
    pub fn old_value(&self) -> &str {
        &self.old_value
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn set_data_type(&mut self, data_type: impl Into<String>) {
        self.data_type = data_type.into();
    }

    /// A point is set up once it has a reference to read from.
    pub fn is_set(&self) -> bool {
        !self.reference.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.value != NOT_INITIALIZED
    }

    pub fn is_error(&self) -> bool {
        is_error_value(&self.value)
    }

    /// Apply a new value on behalf of `actor`.
    ///
    /// Returns whether the externally visible `value` changed. A system write
    /// always records the confirmed value but never clobbers a pending user edit.
    pub fn set_value(&mut self, new_value: &str, actor: Actor) -> bool {
        match actor {
            Actor::User => {
                if new_value == self.value {
                    return false;
                }
                self.dirty = true;
                self.value = new_value.to_string();
                if self.old_value == NOT_INITIALIZED {
                    self.old_value = self.value.clone();
                }
                true
            }
            Actor::System => {
                self.old_value = new_value.to_string();
                if self.dirty {
                    false
                } else {
                    self.value = new_value.to_string();
                    true
                }
            }
        }
    }

    /// Roll `value` back to the last confirmed value, unless a newer local
    /// edit is still waiting to be written.
    pub fn restore_if_not_dirty(&mut self) {
        if !self.dirty && self.old_value != NOT_INITIALIZED {
            self.value = self.old_value.clone();
        }
    }
}
