//! Command and Telemetry Service (cmdtlm)
//!
//! Moves raw packets between interfaces and the message bus, decommutates
//! telemetry against the packet dictionary and runs the rule engine over the
//! decoded values.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌──────────────────┐    ┌───────────────┐
//! │  Interface  │───►│ ConnectionManager│───►│  TELEMETRY__  │
//! │ (TCP / Sim) │◄───│ reader + handler │◄───│  CMD__        │
//! └─────────────┘    └──────────────────┘    └───────┬───────┘
//!                                                    │
//!                    ┌──────────────────┐    ┌───────▼───────┐
//!                    │    RuleEngine    │◄───│ DecomPipeline │
//!                    │ triggers/actions │    │ CVT + limits  │
//!                    └──────────────────┘    └───────────────┘
//! ```
//!
//! - **`manager`**: connect/read/reconnect loop per interface or router
//! - **`handler`**: directives (connect, commands, raw writes) and acks
//! - **`protocols`**: burst and length framing between link and packets
//! - **`decom`**: current-value table updates, limits events, decoded JSON
//! - **`service`**: wiring and lifecycle

pub mod config;
pub mod decom;
pub mod diagnostics;
pub mod error;
pub mod handler;
pub mod interface;
pub mod link;
pub mod manager;
pub mod protocols;
pub mod raw_logger;
pub mod reconnect;
pub mod service;
pub mod sim;
pub mod status;
pub mod tcp;

pub use config::{ConnectionConfig, InterfaceConfig, ServiceConfig};
pub use decom::{DecomPipeline, LimitsPublisher};
pub use error::{CmdTlmError, Result};
pub use handler::{BusCommandSender, DirectiveAck, DirectiveEnvelope, InterfaceDirective, SUCCESS};
pub use interface::{ConnectionState, Interface, InterfaceInfo, RawPacket, ReadResult};
pub use link::InterfaceLink;
pub use manager::{ConnectionManager, ManagerContext, Role};
pub use protocols::{Protocol, ProtocolConfig, ProtocolResult};
pub use reconnect::ReconnectPolicy;
pub use service::{Backends, CmdTlmService};
pub use sim::SimInterface;
pub use tcp::TcpClientInterface;
