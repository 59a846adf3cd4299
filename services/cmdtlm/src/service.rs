//! Service wiring
//!
//! Builds the shared backends, the decom pipeline, one connection manager per
//! configured interface and router, and the rule engine. `start` and `stop`
//! bring them up and down in dependency order.

use crate::config::{ConnectionConfig, InterfaceConfig, ServiceConfig};
use crate::decom::DecomPipeline;
use crate::diagnostics::Diagnostics;
use crate::error::{CmdTlmError, Result};
use crate::handler::BusCommandSender;
use crate::interface::Interface;
use crate::link::InterfaceLink;
use crate::manager::{ConnectionManager, ManagerContext};
use crate::sim::SimInterface;
use crate::tcp::TcpClientInterface;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stellar_bus::{
    Bus, MemoryBus, MemoryStatusStore, StatusStore, SystemTimeProvider, TimeProvider, TopicKeys,
};
use stellar_packets::{CurrentValueTable, Dictionary};
use stellar_rules::{EngineDeps, RuleEngine, ScriptClient, ScriptRunner};
use tracing::{info, warn};

/// Bus, status store and clock shared by every component
#[derive(Clone)]
pub struct Backends {
    pub bus: Arc<dyn Bus>,
    pub status: Arc<dyn StatusStore>,
    pub clock: Arc<dyn TimeProvider>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            bus: Arc::new(MemoryBus::new()),
            status: Arc::new(MemoryStatusStore::new()),
            clock: Arc::new(SystemTimeProvider),
        }
    }
}

pub struct CmdTlmService {
    config: ServiceConfig,
    ctx: ManagerContext,
    decom: Arc<DecomPipeline>,
    rules: RuleEngine,
    interfaces: Vec<ConnectionManager>,
    routers: Vec<ConnectionManager>,
    sims: HashMap<String, Arc<SimInterface>>,
}

fn load_dictionary(config: &ServiceConfig) -> Result<Dictionary> {
    let Some(path) = &config.dictionary else {
        warn!("No dictionary configured, all telemetry will be UNKNOWN");
        return Ok(Dictionary::default());
    };
    let dictionary = Dictionary::load(path)?;
    for warning in dictionary.warnings() {
        warn!("{}", warning);
    }
    info!(
        "Loaded dictionary {} with {} targets",
        path.display(),
        dictionary.target_names().len()
    );
    Ok(dictionary)
}

impl CmdTlmService {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let dictionary = load_dictionary(&config)?;
        Self::with_backends(config, dictionary, Backends::default())
    }

    pub fn with_backends(
        mut config: ServiceConfig,
        dictionary: Dictionary,
        backends: Backends,
    ) -> Result<Self> {
        config.normalize();
        config.validate()?;

        let keys = TopicKeys::new(config.scope.clone());
        let dictionary = Arc::new(dictionary);
        let cvt = Arc::new(CurrentValueTable::from_dictionary(&dictionary));
        let ctx = ManagerContext {
            keys: keys.clone(),
            bus: Arc::clone(&backends.bus),
            status: Arc::clone(&backends.status),
            dictionary: Arc::clone(&dictionary),
            clock: Arc::clone(&backends.clock),
            diagnostics: Arc::new(Diagnostics::new(config.diagnostics_dir.clone())),
        };

        let decom = Arc::new(DecomPipeline::new(
            keys.clone(),
            Arc::clone(&backends.bus),
            dictionary,
            cvt,
            Arc::clone(&backends.clock),
        ));

        let routes = config.routes();
        let mut sims = HashMap::new();
        let mut interfaces = Vec::with_capacity(config.interfaces.len());
        for interface_config in &config.interfaces {
            let link = build_link(&config, interface_config, &mut sims)?;
            interfaces.push(
                ConnectionManager::interface(link, ctx.clone())
                    .with_reconnect_policy(interface_config.reconnect_policy()),
            );
        }
        let mut routers = Vec::with_capacity(config.routers.len());
        for router_config in &config.routers {
            let link = build_link(&config, router_config, &mut sims)?;
            routers.push(
                ConnectionManager::router(link, ctx.clone(), routes.clone())
                    .with_reconnect_policy(router_config.reconnect_policy()),
            );
        }

        let scripts: Arc<dyn ScriptRunner> = Arc::new(
            match &config.script_hostname {
                Some(host) => ScriptClient::new(config.scope.clone(), host.clone()),
                None => ScriptClient::from_env(config.scope.clone()),
            }
            .map_err(CmdTlmError::config)?,
        );
        let commands = BusCommandSender::new(keys.clone(), Arc::clone(&backends.bus), routes)
            .with_timeout(Duration::from_secs_f64(config.command_timeout.max(0.0)));
        let rules = RuleEngine::new(
            keys,
            config.rules.clone(),
            EngineDeps {
                bus: Arc::clone(&backends.bus),
                status: Arc::clone(&backends.status),
                commands: Arc::new(commands),
                scripts,
                clock: backends.clock,
            },
        );

        Ok(Self {
            config,
            ctx,
            decom,
            rules,
            interfaces,
            routers,
            sims,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn context(&self) -> &ManagerContext {
        &self.ctx
    }

    pub fn decom(&self) -> &Arc<DecomPipeline> {
        &self.decom
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn interfaces(&self) -> &[ConnectionManager] {
        &self.interfaces
    }

    pub fn routers(&self) -> &[ConnectionManager] {
        &self.routers
    }

    pub fn interface(&self, name: &str) -> Option<&ConnectionManager> {
        let name = name.to_uppercase();
        self.interfaces.iter().find(|m| m.name() == name)
    }

    pub fn router(&self, name: &str) -> Option<&ConnectionManager> {
        let name = name.to_uppercase();
        self.routers.iter().find(|m| m.name() == name)
    }

    /// Handle on a simulated interface or router, for injecting traffic
    pub fn sim(&self, name: &str) -> Option<Arc<SimInterface>> {
        self.sims.get(&name.to_uppercase()).cloned()
    }

    /// Consumers first so nothing published at connect time is missed
    pub fn start(&self) -> Result<()> {
        self.decom.start()?;
        self.rules.start()?;
        for manager in self.interfaces.iter().chain(&self.routers) {
            manager.start()?;
        }
        info!(
            "{} started: {} interfaces, {} routers",
            self.config.scope,
            self.interfaces.len(),
            self.routers.len()
        );
        Ok(())
    }

    pub fn stop(&self) {
        for manager in self.routers.iter().chain(&self.interfaces) {
            manager.stop();
        }
        self.rules.stop();
        self.decom.stop();
        info!("{} stopped", self.config.scope);
    }
}

fn build_link(
    config: &ServiceConfig,
    interface_config: &InterfaceConfig,
    sims: &mut HashMap<String, Arc<SimInterface>>,
) -> Result<InterfaceLink> {
    let info = interface_config.info.clone();
    let interface: Arc<dyn Interface> = match &interface_config.connection {
        ConnectionConfig::TcpClient {
            host,
            port,
            connect_timeout,
            read_timeout,
        } => Arc::new(TcpClientInterface::new(
            info,
            host,
            *port,
            Duration::from_secs_f64(connect_timeout.max(0.0)),
            read_timeout.map(|t| Duration::from_secs_f64(t.max(0.0))),
        )),
        ConnectionConfig::Sim { loopback } => {
            let sim = Arc::new(SimInterface::new(info, *loopback));
            sims.insert(sim.info().name.clone(), Arc::clone(&sim));
            sim
        },
    };
    let mut link = InterfaceLink::new(interface).with_protocols(&interface_config.protocols)?;
    if let Some(dir) = &config.raw_log_dir {
        link = link.with_raw_logging(dir);
    }
    Ok(link)
}
