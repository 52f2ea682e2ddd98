//! In-memory gateway for running without a server.
//!
//! Serves one built-in stat and keeps every written value. Analog inputs drift
//! a little on each read so polling has something to show.

use crate::client::{BulkResponse, ClientError, Gateway, PointResult};
use crate::models::status::ConnectionError;
use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

pub const DEMO_STAT_NAME: &str = "vs_Demo_Office";
const SEED: u64 = 0x0420_1337_DEAD_BEEF;
const NOT_FOUND: &str = "Node Not Found";

const TEMP_REF: &str = "/.bacnet/DemoSite/1000/analog-input,1";
const SETPOINT_REF: &str = "/.bacnet/DemoSite/1000/analog-value,1";
const OUTDOOR_REF: &str = "/.bacnet/DemoSite/1000/analog-input,2";
const LIGHTS1_REF: &str = "/.bacnet/DemoSite/1000/binary-output,1";
const LIGHTS2_REF: &str = "/.bacnet/DemoSite/1000/analog-output,2";
const FAN_REF: &str = "/.bacnet/DemoSite/1000/multi-state-value,1";
const BLINDS_REF: &str = "/.bacnet/DemoSite/1000/analog-output,3";
const OCCUPANCY_REF: &str = "/.bacnet/DemoSite/1000/binary-input,4";

struct DemoState {
    values: BTreeMap<String, String>,
    rng: SmallRng,
}

pub struct DemoGateway {
    state: Mutex<DemoState>,
}

impl Default for DemoGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoGateway {
    pub fn new() -> Self {
        let values = [
            (TEMP_REF, "21.4"),
            (SETPOINT_REF, "22"),
            (OUTDOOR_REF, "8.5"),
            (LIGHTS1_REF, "active"),
            (LIGHTS2_REF, "35"),
            (FAN_REF, "1"),
            (BLINDS_REF, "60"),
            (OCCUPANCY_REF, "active"),
        ]
        .into_iter()
        .map(|(r, v)| (r.to_lowercase(), v.to_string()))
        .collect();
        DemoGateway {
            state: Mutex::new(DemoState {
                values,
                rng: SmallRng::seed_from_u64(SEED),
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut DemoState) -> T) -> T {
        // A panic while holding the lock leaves plain data behind; keep using it.
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

/// Representation of the built-in stat.
pub fn demo_document() -> Value {
    let node = |data_type: &str, reference: &str, name: &str| {
        json!({ "dataType": data_type, "value": "", "reference": reference, "displayName": name })
    };
    let empty = || json!({ "dataType": "", "value": "", "reference": "", "displayName": "" });
    json!({
        DEMO_STAT_NAME: {
            "TEMP": node("Real", TEMP_REF, "Space Temperature"),
            "TEMP_SP": node("Real", SETPOINT_REF, "Space Setpoint"),
            "OUTDOOR_TEMP": node("Real", OUTDOOR_REF, "Outdoor Air"),
            "LIGHTS1": node("Enumerated", LIGHTS1_REF, "Ceiling Lights"),
            "LIGHTS2": node("Real", LIGHTS2_REF, "Desk Lamp Dimmer"),
            "LIGHTS3": empty(),
            "LIGHTS4": empty(),
            "FAN": node("Unsigned", FAN_REF, "Fan Mode"),
            "FAN_OVERRIDE": empty(),
            "BLINDS": node("Real", BLINDS_REF, "Window Blinds"),
            "OCCUPANCY": node("Enumerated", OCCUPANCY_REF, "Occupancy Sensor"),
            "TIMED_OVERRIDE": empty()
        }
    })
}

fn drift(value: &str, rng: &mut SmallRng) -> Option<String> {
    let current: f64 = value.parse().ok()?;
    let next = current + rng.random_range(-0.2..=0.2);
    Some(format!("{:.1}", next))
}

impl Gateway for DemoGateway {
    fn connect(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn bulk_read(&self, references: &BTreeSet<String>) -> BulkResponse {
        self.with_state(|state| {
            let DemoState { values, rng } = state;
            let mut out = BTreeMap::new();
            for reference in references {
                let key = reference.to_lowercase();
                let result = match values.get_mut(&key) {
                    Some(value) => {
                        if key.contains("analog-input") {
                            if let Some(next) = drift(value, rng) {
                                *value = next;
                            }
                        }
                        PointResult {
                            value: Some(value.clone()),
                            error_text: None,
                        }
                    }
                    None => PointResult {
                        value: None,
                        error_text: Some(NOT_FOUND.to_string()),
                    },
                };
                out.insert(reference.clone(), result);
            }
            debug!("demo: read {} reference(s)", out.len());
            BulkResponse::ok(out)
        })
    }

    fn bulk_write(&self, values: &BTreeMap<String, String>) -> BulkResponse {
        self.with_state(|state| {
            let mut out = BTreeMap::new();
            for (reference, value) in values {
                let key = reference.to_lowercase();
                let result = if state.values.contains_key(&key) {
                    state.values.insert(key, value.clone());
                    PointResult {
                        value: Some(value.clone()),
                        error_text: None,
                    }
                } else {
                    PointResult {
                        value: None,
                        error_text: Some(NOT_FOUND.to_string()),
                    }
                };
                out.insert(reference.clone(), result);
            }
            debug!("demo: wrote {} reference(s)", out.len());
            BulkResponse::ok(out)
        })
    }

    fn get_stat(&self, name: &str) -> Result<Value, ClientError> {
        if name == DEMO_STAT_NAME {
            Ok(demo_document())
        } else {
            Err(ClientError::Http {
                status: 404,
                message: format!("no stat named {}", name),
            })
        }
    }
}
