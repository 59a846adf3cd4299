//! Stellar rule engine
//!
//! Triggers compare telemetry (or other triggers) and reactions run commands
//! and scripts when a trigger turns true. The engine follows decoded packets
//! on the bus, evaluates on a worker pool and snoozes reactions after a run.
//!
//! # Example
//!
//! ```ignore
//! let engine = RuleEngine::new(keys, RuleEngineConfig::default(), deps);
//! engine.start()?;
//! engine.create_trigger(&definition)?;
//! ```

pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod executor;
pub mod packet_cache;
pub mod reaction_base;
pub mod trigger_base;
pub mod types;

pub use engine::{EngineDeps, RuleEngine, RuleEngineConfig};
pub use error::{Result, RuleError};
pub use evaluator::{evaluate_trigger, TriggerTable, ValueSource, Visited};
pub use events::{ActionRecord, Notification, ReactionEvent, ReactionRun, TriggerEvent};
pub use executor::{ActionExecutor, CommandSender, ScriptClient, ScriptRunner};
pub use packet_cache::PacketCache;
pub use reaction_base::{ReactionBase, SnoozeBase};
pub use trigger_base::{TriggerBase, TriggerSnapshot};
pub use types::{
    Action, Operand, Operator, Reaction, ReactionDefinition, Trigger, TriggerDefinition,
    TriggerRef, TriggerResult, DEFAULT_MIN_SNOOZE_SECS,
};
