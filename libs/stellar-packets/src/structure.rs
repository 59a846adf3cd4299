//! Item layout bound to a byte buffer
//!
//! `Structure` owns the sorted item view, the name index and the buffer. It
//! only knows RAW access; representations live in `Packet`.

use crate::accessor;
use crate::error::{PacketError, Result};
use crate::item::PacketItem;
use crate::types::{DataType, Endianness, Overflow};
use crate::value::Value;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct Structure {
    default_endianness: Endianness,
    items: Vec<PacketItem>,
    index: FxHashMap<String, usize>,
    buffer: Vec<u8>,
    defined_length_bits: i64,
    pos_bit_size: i64,
    neg_bit_size: i64,
    fixed_size: bool,
    next_create_index: usize,
    pub short_buffer_allowed: bool,
}

impl Structure {
    pub fn new(default_endianness: Endianness) -> Self {
        Self {
            default_endianness,
            items: Vec::new(),
            index: FxHashMap::default(),
            buffer: Vec::new(),
            defined_length_bits: 0,
            pos_bit_size: 0,
            neg_bit_size: 0,
            fixed_size: true,
            next_create_index: 0,
            short_buffer_allowed: false,
        }
    }

    pub fn default_endianness(&self) -> Endianness {
        self.default_endianness
    }

    /// Items in layout order
    pub fn sorted_items(&self) -> &[PacketItem] {
        &self.items
    }

    pub(crate) fn sorted_items_mut(&mut self) -> &mut [PacketItem] {
        &mut self.items
    }

    pub fn is_defined(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn defined_length_bits(&self) -> i64 {
        self.defined_length_bits
    }

    /// Defined length in bytes, rounded up
    pub fn defined_length(&self) -> usize {
        ((self.defined_length_bits + 7) / 8) as usize
    }

    pub fn fixed_size(&self) -> bool {
        self.fixed_size
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    // ========== Definition ==========

    /// Add an item, replacing any item of the same name
    pub fn define(&mut self, mut item: PacketItem) -> &PacketItem {
        if let Some(pos) = self.items.iter().position(|i| i.name() == item.name()) {
            self.items.remove(pos);
        }
        item.create_index = self.next_create_index;
        self.next_create_index += 1;

        if item.is_variable() {
            self.fixed_size = false;
        }
        self.track_extent(&item);

        let name = item.name().to_string();
        self.items.push(item);
        self.items.sort_by(|a, b| a.layout_cmp(b));
        self.rebuild_index();
        self.resize_buffer();

        let pos = self.index.get(&name).copied().unwrap_or(0);
        &self.items[pos]
    }

    #[allow(clippy::too_many_arguments)]
    pub fn define_item(
        &mut self,
        name: &str,
        bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        array_size: Option<i64>,
        endianness: Option<Endianness>,
        overflow: Overflow,
    ) -> Result<&PacketItem> {
        let item = PacketItem::new(
            name,
            bit_offset,
            bit_size,
            data_type,
            endianness.unwrap_or(self.default_endianness),
            array_size,
            overflow,
        )?;
        Ok(self.define(item))
    }

    /// Define an item directly after the current defined length
    pub fn append_item(
        &mut self,
        name: &str,
        bit_size: i64,
        data_type: DataType,
        array_size: Option<i64>,
        endianness: Option<Endianness>,
        overflow: Overflow,
    ) -> Result<&PacketItem> {
        if !self.fixed_size {
            return Err(PacketError::AppendAfterVariable);
        }
        let offset = if data_type == DataType::Derived {
            0
        } else {
            self.defined_length_bits
        };
        self.define_item(name, offset, bit_size, data_type, array_size, endianness, overflow)
    }

    /// Append a prebuilt item, moving it to the current defined length
    pub fn append(&mut self, mut item: PacketItem) -> Result<&PacketItem> {
        if !self.fixed_size {
            return Err(PacketError::AppendAfterVariable);
        }
        let offset = if item.data_type() == DataType::Derived {
            0
        } else {
            self.defined_length_bits
        };
        item.relocate(offset)?;
        Ok(self.define(item))
    }

    fn track_extent(&mut self, item: &PacketItem) {
        let offset = item.bit_offset();
        let mut changed = false;
        if offset >= 0 {
            let end = if item.bit_size() > 0 {
                match item.array_size() {
                    Some(array) if array >= 0 => offset + array,
                    Some(_) => offset,
                    None => offset + item.bit_size(),
                }
            } else {
                offset
            };
            if end > self.pos_bit_size {
                self.pos_bit_size = end;
                changed = true;
            }
        } else if offset.abs() > self.neg_bit_size {
            self.neg_bit_size = offset.abs();
            changed = true;
        }
        if changed {
            self.defined_length_bits = self.pos_bit_size + self.neg_bit_size;
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (pos, item) in self.items.iter().enumerate() {
            self.index.insert(item.name().to_string(), pos);
        }
    }

    fn resize_buffer(&mut self) {
        let defined = self.defined_length();
        if self.buffer.len() < defined {
            self.buffer.resize(defined, 0);
        }
    }

    // ========== Lookup ==========

    pub fn get_item(&self, name: &str) -> Option<&PacketItem> {
        self.position(name).map(|pos| &self.items[pos])
    }

    pub(crate) fn get_item_mut(&mut self, name: &str) -> Option<&mut PacketItem> {
        self.position(name).map(move |pos| &mut self.items[pos])
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        match self.index.get(name) {
            Some(pos) => Some(*pos),
            None => self.index.get(&name.to_uppercase()).copied(),
        }
    }

    // ========== RAW access ==========

    /// RAW read of `item` from `buffer`; DERIVED items have no RAW value
    pub fn read_item_raw(item: &PacketItem, buffer: &[u8]) -> Result<Value> {
        if item.data_type() == DataType::Derived {
            return Ok(Value::Null);
        }
        match item.array_size() {
            Some(array_size) => accessor::read_array(
                item.bit_offset(),
                item.bit_size(),
                item.data_type(),
                array_size,
                buffer,
                item.endianness(),
            )
            .map(Value::Array),
            None => accessor::read(
                item.bit_offset(),
                item.bit_size(),
                item.data_type(),
                buffer,
                item.endianness(),
            ),
        }
    }

    /// RAW write of `value` for `item` into `buffer`
    pub fn write_item_raw(item: &PacketItem, value: &Value, buffer: &mut Vec<u8>) -> Result<Value> {
        if item.data_type() == DataType::Derived {
            return Ok(Value::Null);
        }
        match item.array_size() {
            Some(array_size) => {
                let values = match value {
                    Value::Array(values) => values.as_slice(),
                    other => {
                        return Err(PacketError::Access(format!(
                            "{}: array items must be written with an array but got {}",
                            item.name(),
                            other
                        )))
                    },
                };
                accessor::write_array(
                    values,
                    item.bit_offset(),
                    item.bit_size(),
                    item.data_type(),
                    array_size,
                    buffer,
                    item.endianness(),
                    item.overflow(),
                )
                .map(Value::Array)
            },
            None => accessor::write(
                value,
                item.bit_offset(),
                item.bit_size(),
                item.data_type(),
                buffer,
                item.endianness(),
                item.overflow(),
            ),
        }
    }

    /// Replace the buffer
    ///
    /// A short buffer is zero-extended to the defined length; the returned
    /// error describes the mismatch but the buffer is installed regardless.
    pub fn set_buffer(&mut self, buffer: Vec<u8>) -> std::result::Result<(), PacketError> {
        let actual = buffer.len();
        let defined = self.defined_length();
        self.buffer = buffer;
        if actual < defined {
            self.resize_buffer();
            if !self.short_buffer_allowed {
                return Err(PacketError::BufferLength { actual, defined });
            }
        } else if actual > defined && self.fixed_size && defined != 0 {
            return Err(PacketError::BufferLength { actual, defined });
        }
        Ok(())
    }
}
