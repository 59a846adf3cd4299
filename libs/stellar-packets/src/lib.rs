//! Stellar packet model
//!
//! Bit-level item access, packets with RAW/CONVERTED/FORMATTED/WITH_UNITS
//! representations, limits evaluation, the packet dictionary and the current
//! value table shared by the decom pipeline and the rule engine.

pub mod accessor;
pub mod conversion;
pub mod cvt;
pub mod dictionary;
pub mod error;
pub mod format;
pub mod item;
pub mod limits;
pub mod packet;
pub mod processor;
pub mod structure;
pub mod types;
pub mod value;

pub use conversion::{Conversion, ConversionSpec, FnConversion, PolynomialConversion};
pub use cvt::CurrentValueTable;
pub use dictionary::{CommandParams, Dictionary, DictionaryDefinition, PacketDefinition};
pub use error::{PacketError, Result};
pub use item::{ItemRange, ItemState, PacketItem};
pub use limits::{
    Limits, LimitsCallback, LimitsResponse, LimitsSets, LimitsState, LimitsValues, StateColor,
    DEFAULT_LIMITS_SET,
};
pub use packet::Packet;
pub use processor::Processor;
pub use structure::Structure;
pub use types::{DataType, Endianness, Overflow, ValueType};
pub use value::{Value, ValueMap};
