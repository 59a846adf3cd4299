//! Service configuration
//!
//! Loaded with the shared figment layering: `ServiceConfig::default()`, then
//! the config file, then `STELLAR_*` environment overrides. For example
//! `STELLAR_SCOPE=OPS` or `STELLAR_RULES__WORKER_COUNT=5`.

use crate::error::{CmdTlmError, Result};
use crate::interface::InterfaceInfo;
use crate::protocols::ProtocolConfig;
use crate::reconnect::ReconnectPolicy;
use common::config_loader::load_config;
use common::logging::LogConfig;
use common::Scope;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stellar_rules::RuleEngineConfig;
use tracing::warn;

pub const SERVICE_NAME: &str = "cmdtlm";

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> f64 {
    5.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Filter such as `info` or `info,cmdtlm=debug`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub enable_file: bool,
    #[serde(default)]
    pub enable_json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: None,
            dir: None,
            enable_file: true,
            enable_json: false,
        }
    }
}

impl LogSettings {
    pub fn to_log_config(&self) -> LogConfig {
        let mut config = LogConfig {
            service_name: SERVICE_NAME.to_string(),
            level: self.level.clone(),
            enable_file: self.enable_file,
            enable_json: self.enable_json,
            ..Default::default()
        };
        if let Some(dir) = &self.dir {
            config.log_dir.clone_from(dir);
        }
        config
    }
}

/// Physical side of an interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionConfig {
    #[serde(alias = "tcp")]
    TcpClient {
        host: String,
        port: u16,
        /// Seconds
        #[serde(default = "default_connect_timeout")]
        connect_timeout: f64,
        /// Seconds; absent blocks until data or disconnect
        #[serde(default, skip_serializing_if = "Option::is_none")]
        read_timeout: Option<f64>,
    },
    /// In-process interface fed by [`crate::sim::SimInterface::inject`]
    Sim {
        #[serde(default)]
        loopback: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    #[serde(flatten)]
    pub info: InterfaceInfo,
    pub connection: ConnectionConfig,
    /// Read chain order; writes run it in reverse
    #[serde(default)]
    pub protocols: Vec<ProtocolConfig>,
    /// Backoff on top of `reconnect_delay`; absent keeps the delay fixed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectPolicy>,
}

impl InterfaceConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let delay = Duration::from_secs_f64(self.info.reconnect_delay.max(0.0));
        match &self.reconnect {
            Some(policy) => policy.clone().with_delay(delay),
            None => ReconnectPolicy::fixed(delay),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub log: LogSettings,
    /// Pre-built dictionary JSON; absent starts with an empty dictionary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictionary: Option<PathBuf>,
    #[serde(default)]
    pub rules: RuleEngineConfig,
    /// Script runner host, also settable as `STELLAR_SCRIPT_HOSTNAME`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_hostname: Option<String>,
    /// Where unexpected connection errors are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics_dir: Option<PathBuf>,
    /// Enables raw stream logging directives when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_log_dir: Option<PathBuf>,
    /// Command acknowledgement timeout for rule-engine commands, seconds
    #[serde(default = "default_connect_timeout")]
    pub command_timeout: f64,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub routers: Vec<InterfaceConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            log: LogSettings::default(),
            dictionary: None,
            rules: RuleEngineConfig::default(),
            script_hostname: None,
            diagnostics_dir: None,
            raw_log_dir: None,
            command_timeout: default_connect_timeout(),
            interfaces: Vec::new(),
            routers: Vec::new(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: Self =
            load_config(path).map_err(|e| CmdTlmError::config(e.to_string()))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Uppercase every interface and target name
    pub fn normalize(&mut self) {
        for config in self.interfaces.iter_mut().chain(self.routers.iter_mut()) {
            config.info.name = config.info.name.to_uppercase();
            for target in &mut config.info.target_names {
                *target = target.to_uppercase();
            }
        }
    }

    /// Names unique, protocol chains buildable
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for config in self.interfaces.iter().chain(&self.routers) {
            let name = config.info.name.to_uppercase();
            if name.is_empty() {
                return Err(CmdTlmError::config("interface name must not be empty"));
            }
            if !names.insert(name.clone()) {
                return Err(CmdTlmError::config(format!("duplicate interface name {}", name)));
            }
            for protocol in &config.protocols {
                protocol.build().map_err(|e| {
                    CmdTlmError::config(format!("{}: invalid protocol: {}", name, e))
                })?;
            }
        }
        if self.rules.worker_count == 0 {
            return Err(CmdTlmError::config("rules.worker_count must be at least 1"));
        }
        Ok(())
    }

    /// Command target -> interface; the first interface listing a target owns it
    pub fn routes(&self) -> BTreeMap<String, String> {
        let mut routes = BTreeMap::new();
        for config in &self.interfaces {
            for target in &config.info.target_names {
                let target = target.to_uppercase();
                let name = config.info.name.to_uppercase();
                if let Some(owner) = routes.get(&target) {
                    warn!("Target {} already mapped to {}, ignoring {}", target, owner, name);
                    continue;
                }
                routes.insert(target, name);
            }
        }
        routes
    }
}
