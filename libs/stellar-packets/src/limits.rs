//! Limits evaluation
//!
//! Each item carries a `Limits` record. Numeric items map their CONVERTED
//! value onto a zone of the active limits set; state-valued items map their
//! state straight onto its configured color. Zone changes on numeric items are
//! held back until they have been observed `persistence_setting + 1` times in
//! a row.

use crate::error::{PacketError, Result};
use crate::item::PacketItem;
use crate::packet::Packet;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Name of the limits set every item with limits must define
pub const DEFAULT_LIMITS_SET: &str = "DEFAULT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitsState {
    Red,
    RedHigh,
    RedLow,
    Yellow,
    YellowHigh,
    YellowLow,
    Green,
    GreenHigh,
    GreenLow,
    Blue,
    Stale,
}

impl LimitsState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "RED",
            Self::RedHigh => "RED_HIGH",
            Self::RedLow => "RED_LOW",
            Self::Yellow => "YELLOW",
            Self::YellowHigh => "YELLOW_HIGH",
            Self::YellowLow => "YELLOW_LOW",
            Self::Green => "GREEN",
            Self::GreenHigh => "GREEN_HIGH",
            Self::GreenLow => "GREEN_LOW",
            Self::Blue => "BLUE",
            Self::Stale => "STALE",
        }
    }

    /// Red and yellow zones
    pub fn is_out_of_limits(&self) -> bool {
        matches!(
            self,
            Self::Red
                | Self::RedHigh
                | Self::RedLow
                | Self::Yellow
                | Self::YellowHigh
                | Self::YellowLow
        )
    }
}

impl fmt::Display for LimitsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitsState {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self> {
        let state = match s.to_uppercase().as_str() {
            "RED" => Self::Red,
            "RED_HIGH" => Self::RedHigh,
            "RED_LOW" => Self::RedLow,
            "YELLOW" => Self::Yellow,
            "YELLOW_HIGH" => Self::YellowHigh,
            "YELLOW_LOW" => Self::YellowLow,
            "GREEN" => Self::Green,
            "GREEN_HIGH" => Self::GreenHigh,
            "GREEN_LOW" => Self::GreenLow,
            "BLUE" => Self::Blue,
            "STALE" => Self::Stale,
            _ => return Err(PacketError::UnknownLimitsState(s.to_string())),
        };
        Ok(state)
    }
}

/// Color assigned to an item state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateColor {
    Green,
    Yellow,
    Red,
}

impl From<StateColor> for LimitsState {
    fn from(color: StateColor) -> Self {
        match color {
            StateColor::Green => LimitsState::Green,
            StateColor::Yellow => LimitsState::Yellow,
            StateColor::Red => LimitsState::Red,
        }
    }
}

/// One limits tuple: red/yellow thresholds plus an optional green (operational) band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitsValues {
    pub red_low: f64,
    pub yellow_low: f64,
    pub yellow_high: f64,
    pub red_high: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub green_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub green_high: Option<f64>,
}

impl LimitsValues {
    pub fn new(red_low: f64, yellow_low: f64, yellow_high: f64, red_high: f64) -> Self {
        Self {
            red_low,
            yellow_low,
            yellow_high,
            red_high,
            green_low: None,
            green_high: None,
        }
    }

    pub fn with_green(mut self, green_low: f64, green_high: f64) -> Self {
        self.green_low = Some(green_low);
        self.green_high = Some(green_high);
        self
    }

    /// Build from a 4 or 6 element tuple (rl, yl, yh, rh[, gl, gh])
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [rl, yl, yh, rh] => Ok(Self::new(*rl, *yl, *yh, *rh)),
            [rl, yl, yh, rh, gl, gh] => Ok(Self::new(*rl, *yl, *yh, *rh).with_green(*gl, *gh)),
            _ => Err(PacketError::InvalidItem(format!(
                "limits must have 4 or 6 values but {} were given",
                values.len()
            ))),
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let mut out = vec![self.red_low, self.yellow_low, self.yellow_high, self.red_high];
        if let (Some(gl), Some(gh)) = (self.green_low, self.green_high) {
            out.push(gl);
            out.push(gh);
        }
        out
    }

    /// Zone of a numeric value
    pub fn zone(&self, value: f64) -> LimitsState {
        if value < self.red_low {
            LimitsState::RedLow
        } else if value < self.yellow_low {
            LimitsState::YellowLow
        } else if value > self.red_high {
            LimitsState::RedHigh
        } else if value > self.yellow_high {
            LimitsState::YellowHigh
        } else {
            match (self.green_low, self.green_high) {
                (Some(gl), Some(gh)) if value >= gl && value <= gh => LimitsState::Blue,
                (Some(gl), _) if value < gl => LimitsState::GreenLow,
                (_, Some(gh)) if value > gh => LimitsState::GreenHigh,
                _ => LimitsState::Green,
            }
        }
    }
}

/// Hook run whenever an item's committed limits state changes
pub trait LimitsResponse: Send + Sync + fmt::Debug {
    fn call(&self, packet: &Packet, item: &PacketItem, old_state: Option<LimitsState>);
}

/// Receives every committed limits change of a packet
pub trait LimitsCallback: Send + Sync {
    fn limits_change(
        &self,
        packet: &Packet,
        item: &PacketItem,
        old_state: Option<LimitsState>,
        value: &Value,
        should_log: bool,
    );
}

/// Outcome of feeding one observation into the state machine
#[derive(Debug, Clone, PartialEq)]
pub struct LimitsTransition {
    pub old_state: Option<LimitsState>,
    pub new_state: Option<LimitsState>,
    pub should_log: bool,
}

/// Per-item limits configuration and live state
#[derive(Debug, Clone, Default)]
pub struct Limits {
    pub enabled: bool,
    values: Option<BTreeMap<String, LimitsValues>>,
    state: Option<LimitsState>,
    persistence_setting: u32,
    persistence_count: u32,
    candidate: Option<LimitsState>,
    response: Option<Arc<dyn LimitsResponse>>,
}

impl Limits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> Option<&BTreeMap<String, LimitsValues>> {
        self.values.as_ref()
    }

    /// Install the limits sets; `DEFAULT` must be present
    pub fn set_values(&mut self, values: BTreeMap<String, LimitsValues>) -> Result<()> {
        if !values.contains_key(DEFAULT_LIMITS_SET) {
            return Err(PacketError::InvalidItem(
                "limits values must include a DEFAULT set".to_string(),
            ));
        }
        self.values = Some(values);
        Ok(())
    }

    pub fn clear_values(&mut self) {
        self.values = None;
    }

    /// Values for the named set, falling back to `DEFAULT`
    pub fn values_for(&self, limits_set: &str) -> Option<&LimitsValues> {
        let values = self.values.as_ref()?;
        values
            .get(limits_set)
            .or_else(|| values.get(DEFAULT_LIMITS_SET))
    }

    pub fn state(&self) -> Option<LimitsState> {
        self.state
    }

    pub fn set_state(&mut self, state: Option<LimitsState>) {
        self.state = state;
        self.candidate = None;
    }

    pub fn persistence_setting(&self) -> u32 {
        self.persistence_setting
    }

    pub fn set_persistence_setting(&mut self, setting: u32) {
        self.persistence_setting = setting;
    }

    pub fn persistence_count(&self) -> u32 {
        self.persistence_count
    }

    pub fn response(&self) -> Option<&Arc<dyn LimitsResponse>> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: Option<Arc<dyn LimitsResponse>>) {
        self.response = response;
    }

    /// Enable checking; any half-confirmed candidate zone is discarded
    pub fn enable(&mut self) {
        self.enabled = true;
        self.persistence_count = 0;
        self.candidate = None;
    }

    /// Disable checking; returns a transition when a non-STALE state was cleared
    pub fn disable(&mut self) -> Option<LimitsTransition> {
        self.enabled = false;
        self.persistence_count = 0;
        self.candidate = None;
        if self.state == Some(LimitsState::Stale) {
            return None;
        }
        let old_state = self.state.take();
        Some(LimitsTransition {
            old_state,
            new_state: None,
            should_log: false,
        })
    }

    /// Feed one computed zone for a numeric item
    pub fn observe_zone(
        &mut self,
        zone: LimitsState,
        ignore_persistence: bool,
    ) -> Option<LimitsTransition> {
        match self.state {
            None | Some(LimitsState::Stale) => {
                let old_state = self.state;
                self.commit(zone);
                Some(LimitsTransition {
                    old_state,
                    new_state: Some(zone),
                    should_log: true,
                })
            },
            Some(current) if current == zone => {
                self.candidate = None;
                self.persistence_count = 0;
                None
            },
            Some(current) => {
                if self.candidate == Some(zone) {
                    self.persistence_count += 1;
                } else {
                    self.candidate = Some(zone);
                    self.persistence_count = 1;
                }
                if ignore_persistence || self.persistence_count > self.persistence_setting {
                    self.commit(zone);
                    Some(LimitsTransition {
                        old_state: Some(current),
                        new_state: Some(zone),
                        should_log: true,
                    })
                } else {
                    None
                }
            },
        }
    }

    /// Feed the color of a state-valued item; no persistence applies
    pub fn observe_color(&mut self, color: Option<LimitsState>) -> Option<LimitsTransition> {
        if self.state == color {
            return None;
        }
        let old_state = self.state;
        self.state = color;
        self.candidate = None;
        self.persistence_count = 0;
        Some(LimitsTransition {
            old_state,
            new_state: color,
            should_log: color.is_some(),
        })
    }

    fn commit(&mut self, zone: LimitsState) {
        self.state = Some(zone);
        self.candidate = None;
        self.persistence_count = 0;
    }
}

/// Registry of known limits sets and the one currently in force
#[derive(Debug, Clone)]
pub struct LimitsSets {
    sets: BTreeSet<String>,
    current: String,
}

impl Default for LimitsSets {
    fn default() -> Self {
        let mut sets = BTreeSet::new();
        sets.insert(DEFAULT_LIMITS_SET.to_string());
        Self {
            sets,
            current: DEFAULT_LIMITS_SET.to_string(),
        }
    }
}

impl LimitsSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str) {
        self.sets.insert(name.to_uppercase());
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sets.iter().map(String::as_str)
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn set_current(&mut self, name: &str) -> Result<()> {
        let name = name.to_uppercase();
        if !self.sets.contains(&name) {
            return Err(PacketError::InvalidItem(format!(
                "Unknown limits set requested: {}",
                name
            )));
        }
        self.current = name;
        Ok(())
    }
}
