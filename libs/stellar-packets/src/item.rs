//! Packet item definitions
//!
//! ```text
//!   PacketItem
//!   ├── layout     name, bit_offset, bit_size, data_type, endianness, array_size, overflow
//!   ├── rendering  format_string, units, states
//!   ├── conversion read_conversion, write_conversion
//!   ├── command    default, range, required, hazardous (via states)
//!   └── limits     live limits state (mutates at runtime)
//! ```
//!
//! Layout is validated once in `PacketItem::new` and never changes afterwards.

use crate::accessor::{is_little_endian_bitfield, little_endian_lower_byte, MAX_INTEGER_BITS};
use crate::conversion::Conversion;
use crate::error::{PacketError, Result};
use crate::format::is_valid_format;
use crate::limits::{Limits, LimitsState, StateColor};
use crate::types::{DataType, Endianness, Overflow};
use crate::value::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// One named state of an item
#[derive(Debug, Clone, PartialEq)]
pub struct ItemState {
    pub name: String,
    pub value: Value,
    pub color: Option<StateColor>,
    pub hazardous: Option<String>,
}

impl ItemState {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into().to_uppercase(),
            value: value.into(),
            color: None,
            hazardous: None,
        }
    }

    pub fn with_color(mut self, color: StateColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_hazardous(mut self, description: impl Into<String>) -> Self {
        self.hazardous = Some(description.into());
        self
    }
}

/// Inclusive valid range for command parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRange {
    pub min: Value,
    pub max: Value,
}

#[derive(Debug, Clone)]
pub struct PacketItem {
    name: String,
    bit_offset: i64,
    bit_size: i64,
    data_type: DataType,
    endianness: Endianness,
    array_size: Option<i64>,
    overflow: Overflow,
    format_string: Option<String>,
    pub read_conversion: Option<Arc<dyn Conversion>>,
    pub write_conversion: Option<Arc<dyn Conversion>>,
    id_value: Option<Value>,
    states: Option<Vec<ItemState>>,
    pub description: Option<String>,
    pub units: Option<String>,
    pub units_full: Option<String>,
    default: Option<Value>,
    range: Option<ItemRange>,
    pub required: bool,
    pub hidden: bool,
    pub limits: Limits,
    pub(crate) create_index: usize,
}

impl PacketItem {
    pub fn new(
        name: &str,
        bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        endianness: Endianness,
        array_size: Option<i64>,
        overflow: Overflow,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(PacketError::InvalidItem(
                "name must contain at least one character".to_string(),
            ));
        }
        let item = Self {
            name: name.to_uppercase(),
            bit_offset,
            bit_size,
            data_type,
            endianness,
            array_size,
            overflow,
            format_string: None,
            read_conversion: None,
            write_conversion: None,
            id_value: None,
            states: None,
            description: None,
            units: None,
            units_full: None,
            default: None,
            range: None,
            required: false,
            hidden: false,
            limits: Limits::new(),
            create_index: 0,
        };
        item.validate()?;
        Ok(item)
    }

    fn invalid(&self, message: String) -> PacketError {
        PacketError::InvalidItem(format!("{}: {}", self.name, message))
    }

    fn validate(&self) -> Result<()> {
        let dt = self.data_type;
        let (offset, size) = (self.bit_offset, self.bit_size);

        if matches!(dt, DataType::Float | DataType::String | DataType::Block) && offset % 8 != 0 {
            return Err(self.invalid(
                "bit_offset for FLOAT, STRING, and BLOCK items must be byte aligned".to_string(),
            ));
        }
        if dt == DataType::Derived {
            if offset != 0 {
                return Err(self.invalid("DERIVED items must have bit_offset of zero".to_string()));
            }
            if size != 0 {
                return Err(self.invalid("DERIVED items must have bit_size of zero".to_string()));
            }
        }
        if size <= 0 && matches!(dt, DataType::Int | DataType::Uint | DataType::Float) {
            return Err(self.invalid(format!(
                "bit_size cannot be negative or zero for INT, UINT, and FLOAT items: {}",
                size
            )));
        }
        if dt.is_bytes() && size % 8 != 0 {
            return Err(self.invalid(
                "bit_size for STRING and BLOCK items must be byte multiples".to_string(),
            ));
        }
        if dt == DataType::Float && size != 32 && size != 64 {
            return Err(self.invalid(format!(
                "bit_size for FLOAT items must be 32 or 64. Given: {}",
                size
            )));
        }
        if dt.is_integer() && size > MAX_INTEGER_BITS {
            return Err(self.invalid(format!(
                "bit_size for INT and UINT items must not exceed {}. Given: {}",
                MAX_INTEGER_BITS, size
            )));
        }
        if let Some(array_size) = self.array_size {
            if size <= 0 {
                return Err(self.invalid("bit_size cannot be negative or zero for array items".to_string()));
            }
            if array_size > 0 && array_size % size != 0 {
                return Err(self.invalid("array_size must be a multiple of bit_size".to_string()));
            }
        }

        if offset < 0 {
            if size < 0 {
                return Err(self.invalid(format!(
                    "Can't define an item with negative bit_size {} and negative bit_offset {}",
                    size, offset
                )));
            }
            if let Some(array_size) = self.array_size {
                if array_size < 0 {
                    return Err(self.invalid(format!(
                        "Can't define an item with negative array_size {} and negative bit_offset {}",
                        array_size, offset
                    )));
                }
                if array_size > offset.abs() {
                    return Err(self.invalid(format!(
                        "Can't define an item with array_size {} greater than negative bit_offset {}",
                        array_size, offset
                    )));
                }
            } else if size > offset.abs() {
                return Err(self.invalid(format!(
                    "Can't define an item with bit_size {} greater than negative bit_offset {}",
                    size, offset
                )));
            }
        } else if is_little_endian_bitfield(offset, size, dt, self.endianness)
            && little_endian_lower_byte(offset, size) < 0
        {
            return Err(self.invalid(format!(
                "LITTLE_ENDIAN bitfield with bit_offset {} and bit_size {} is invalid",
                offset, size
            )));
        }
        Ok(())
    }

    // ========== Layout ==========

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bit_offset(&self) -> i64 {
        self.bit_offset
    }

    pub fn bit_size(&self) -> i64 {
        self.bit_size
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn array_size(&self) -> Option<i64> {
        self.array_size
    }

    pub fn overflow(&self) -> Overflow {
        self.overflow
    }

    pub fn create_index(&self) -> usize {
        self.create_index
    }

    /// True when the item's extent depends on the buffer length
    pub fn is_variable(&self) -> bool {
        (self.data_type != DataType::Derived && self.bit_size <= 0)
            || self.array_size.is_some_and(|a| a <= 0)
    }

    /// Layout order used for the sorted item view
    pub fn layout_cmp(&self, other: &PacketItem) -> Ordering {
        let (a, b) = (self.bit_offset, other.bit_offset);
        if a == 0 && b == 0 {
            return self
                .bit_size
                .cmp(&other.bit_size)
                .then(self.create_index.cmp(&other.create_index));
        }
        match (a < 0, b < 0) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => a.cmp(&b).then(self.create_index.cmp(&other.create_index)),
        }
    }

    /// Set the bit offset during `append`; the layout is re-validated
    pub(crate) fn relocate(&mut self, bit_offset: i64) -> Result<()> {
        let previous = self.bit_offset;
        self.bit_offset = bit_offset;
        if let Err(err) = self.validate() {
            self.bit_offset = previous;
            return Err(err);
        }
        Ok(())
    }

    // ========== Rendering ==========

    pub fn format_string(&self) -> Option<&str> {
        self.format_string.as_deref()
    }

    pub fn set_format_string(&mut self, format: Option<&str>) -> Result<()> {
        match format {
            Some(f) if !is_valid_format(f) => {
                Err(self.invalid(format!("format_string invalid '{}'", f)))
            },
            Some(f) => {
                self.format_string = Some(f.to_string());
                Ok(())
            },
            None => {
                self.format_string = None;
                Ok(())
            },
        }
    }

    pub fn states(&self) -> Option<&[ItemState]> {
        self.states.as_deref()
    }

    pub fn set_states(&mut self, states: Option<Vec<ItemState>>) {
        self.states = states;
    }

    /// State name whose value matches `value`
    pub fn state_name(&self, value: &Value) -> Option<&str> {
        self.states
            .as_ref()?
            .iter()
            .find(|s| s.value.loose_eq(value))
            .map(|s| s.name.as_str())
    }

    /// Raw value of the named state (case-insensitive)
    pub fn state_value(&self, name: &str) -> Option<&Value> {
        let upper = name.to_uppercase();
        self.states
            .as_ref()?
            .iter()
            .find(|s| s.name == upper)
            .map(|s| &s.value)
    }

    /// Limits color for a CONVERTED state name
    pub fn state_color(&self, name: &str) -> Option<LimitsState> {
        self.states
            .as_ref()?
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.color)
            .map(LimitsState::from)
    }

    pub fn has_state_colors(&self) -> bool {
        self.states
            .as_ref()
            .is_some_and(|states| states.iter().any(|s| s.color.is_some()))
    }

    /// Hazardous description attached to the state matching `raw`
    pub fn hazardous_for(&self, raw: &Value) -> Option<&str> {
        self.states
            .as_ref()?
            .iter()
            .find(|s| s.value.loose_eq(raw))
            .and_then(|s| s.hazardous.as_deref())
    }

    // ========== Identification ==========

    pub fn id_value(&self) -> Option<&Value> {
        self.id_value.as_ref()
    }

    pub fn set_id_value(&mut self, id_value: Option<Value>) -> Result<()> {
        self.id_value = match id_value {
            Some(v) => Some(self.coerce(v)?),
            None => None,
        };
        Ok(())
    }

    // ========== Command parameters ==========

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn range(&self) -> Option<&ItemRange> {
        self.range.as_ref()
    }

    /// Set default and range, checking them against the data type
    ///
    /// Items with a write conversion accept any default since it is converted
    /// before being written.
    pub fn set_default_and_range(
        &mut self,
        default: Option<Value>,
        range: Option<ItemRange>,
    ) -> Result<()> {
        if let Some(value) = &default {
            if self.write_conversion.is_none() {
                self.check_default(value)?;
            }
        }
        if let Some(range) = &range {
            for (label, bound) in [("minimum", &range.min), ("maximum", &range.max)] {
                if !bound.is_numeric() {
                    return Err(self.invalid(format!(
                        "{} must be numeric but is {}",
                        label, bound
                    )));
                }
            }
        }
        self.default = match (default, self.data_type) {
            (Some(Value::Int(v)), DataType::Float) => Some(Value::Float(v as f64)),
            (Some(Value::UInt(v)), DataType::Float) => Some(Value::Float(v as f64)),
            (other, _) => other,
        };
        self.range = range;
        Ok(())
    }

    fn check_default(&self, value: &Value) -> Result<()> {
        if self.array_size.is_some() {
            if !matches!(value, Value::Array(_)) {
                return Err(self.invalid(format!("default must be an Array but is {}", value)));
            }
            return Ok(());
        }
        let ok = match self.data_type {
            DataType::Int | DataType::Uint => {
                matches!(value, Value::Int(_) | Value::UInt(_))
                    || (self.states.is_some() && matches!(value, Value::String(_)))
            },
            DataType::Float => value.is_numeric(),
            DataType::String | DataType::Block => {
                matches!(value, Value::String(_) | Value::Block(_))
            },
            DataType::Derived => true,
        };
        if ok {
            Ok(())
        } else {
            Err(self.invalid(format!(
                "default {} does not match data_type {}",
                value, self.data_type
            )))
        }
    }

    /// Reject values outside the configured range
    pub fn check_range(&self, value: &Value) -> Result<()> {
        let (Some(range), Some(v)) = (&self.range, value.as_f64()) else {
            return Ok(());
        };
        let (min, max) = (
            range.min.as_f64().unwrap_or(f64::MIN),
            range.max.as_f64().unwrap_or(f64::MAX),
        );
        if v < min || v > max {
            return Err(PacketError::InvalidItem(format!(
                "Command parameter '{}' = {} not in valid range of {} to {}",
                self.name, value, range.min, range.max
            )));
        }
        Ok(())
    }

    fn coerce(&self, value: Value) -> Result<Value> {
        let coerced = match (self.data_type, value) {
            (DataType::Int, v) => v.as_i128().map(|i| Value::Int(i as i64)),
            (DataType::Uint, v) => v.as_i128().map(|i| Value::UInt(i as u64)),
            (DataType::Float, v) => v.as_f64().map(Value::Float),
            (DataType::String, v @ Value::String(_)) => Some(v),
            (DataType::String, Value::Block(b)) => {
                Some(Value::String(String::from_utf8_lossy(&b).into_owned()))
            },
            (DataType::Block, v) => v.as_bytes().map(|b| Value::Block(b.into_owned())),
            (_, v) => Some(v),
        };
        coerced.ok_or_else(|| {
            self.invalid(format!("Invalid id value for data type {}", self.data_type))
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn item(offset: i64, size: i64, dt: DataType) -> Result<PacketItem> {
        PacketItem::new("test", offset, size, dt, Endianness::BigEndian, None, Overflow::Error)
    }

    #[test]
    fn test_layout_invariants() {
        assert_eq!(item(0, 8, DataType::Uint).unwrap().name(), "TEST");
        assert!(item(4, 32, DataType::Float).is_err());
        assert!(item(0, 33, DataType::Float).is_err());
        assert!(item(0, 0, DataType::Int).is_err());
        assert!(item(0, 12, DataType::String).is_err());
        assert!(item(8, 0, DataType::Derived).is_err());
        assert!(item(0, 65, DataType::Uint).is_err());
        assert!(item(-8, 16, DataType::Uint).is_err());
        assert!(item(-16, -8, DataType::Block).is_err());
        assert!(item(0, -8, DataType::Block).is_ok());

        let err = PacketItem::new("bf", 3, 7, DataType::Uint, Endianness::LittleEndian, None, Overflow::Error)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "BF: LITTLE_ENDIAN bitfield with bit_offset 3 and bit_size 7 is invalid"
        );
    }

    #[test]
    fn test_array_invariants() {
        let arr = |size, array| {
            PacketItem::new("a", 0, size, DataType::Uint, Endianness::BigEndian, Some(array), Overflow::Error)
        };
        assert!(arr(8, 32).is_ok());
        assert!(arr(8, -8).is_ok());
        assert!(arr(8, 12).is_err());
        let neg = PacketItem::new("a", -32, 8, DataType::Uint, Endianness::BigEndian, Some(64), Overflow::Error);
        assert!(neg.is_err());
    }

    #[test]
    fn test_states_lookup() {
        let mut it = item(0, 8, DataType::Uint).unwrap();
        it.set_states(Some(vec![
            ItemState::new("off", 0u64).with_color(StateColor::Green),
            ItemState::new("on", 1u64).with_hazardous("Powers the heater"),
        ]));
        assert_eq!(it.state_name(&Value::Int(1)), Some("ON"));
        assert_eq!(it.state_value("Off"), Some(&Value::UInt(0)));
        assert_eq!(it.state_color("OFF"), Some(LimitsState::Green));
        assert_eq!(it.hazardous_for(&Value::UInt(1)), Some("Powers the heater"));
        assert!(it.has_state_colors());
    }

    #[test]
    fn test_default_and_range() {
        let mut it = item(0, 32, DataType::Float).unwrap();
        it.set_default_and_range(
            Some(Value::Int(1)),
            Some(ItemRange {
                min: Value::Int(0),
                max: Value::Int(10),
            }),
        )
        .unwrap();
        assert_eq!(it.default_value(), Some(&Value::Float(1.0)));
        assert!(it.check_range(&Value::Float(11.0)).is_err());
        assert!(it.check_range(&Value::Float(5.0)).is_ok());

        let mut s = item(0, 64, DataType::String).unwrap();
        assert!(s.set_default_and_range(Some(Value::Int(1)), None).is_err());
    }

    #[test]
    fn test_format_string_validation() {
        let mut it = item(0, 8, DataType::Uint).unwrap();
        assert!(it.set_format_string(Some("0x%02X")).is_ok());
        assert!(it.set_format_string(Some("plain")).is_err());
    }

    #[test]
    fn test_layout_order() {
        let mut a = item(0, 8, DataType::Uint).unwrap();
        let mut b = item(0, 16, DataType::Uint).unwrap();
        a.create_index = 1;
        b.create_index = 0;
        assert_eq!(a.layout_cmp(&b), Ordering::Less);
        let neg = item(-8, 8, DataType::Uint).unwrap();
        let far = item(800, 8, DataType::Uint).unwrap();
        assert_eq!(neg.layout_cmp(&far), Ordering::Greater);
    }
}
