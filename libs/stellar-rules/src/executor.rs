//! Reaction actions
//!
//! Commands go out through a [`CommandSender`]; scripts are started over HTTP
//! on the script runner. One failing action never stops the ones after it.

use crate::events::{ActionRecord, ReactionRun};
use crate::types::{Action, Reaction};
use common::config_loader::env_or;
use common::Scope;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stellar_bus::TimeProvider;
use stellar_packets::{CommandParams, Value};
use tracing::{error, info};

pub const SCRIPT_HOST_ENV: &str = "STELLAR_SCRIPT_HOSTNAME";
pub const DEFAULT_SCRIPT_HOST: &str = "stellar-script-runner-api";
pub const SCRIPT_PORT: u16 = 2902;

/// Sends a command to whichever interface owns `target`
pub trait CommandSender: Send + Sync {
    fn send_command(
        &self,
        target: &str,
        packet: &str,
        params: &CommandParams,
    ) -> std::result::Result<(), String>;
}

/// Starts a named script
pub trait ScriptRunner: Send + Sync {
    fn run_script(
        &self,
        name: &str,
        environment: &serde_json::Value,
        reaction: &str,
        now_secs: i64,
    ) -> std::result::Result<(), String>;
}

/// Script runner API client
pub struct ScriptClient {
    scope: Scope,
    host: String,
    client: reqwest::blocking::Client,
}

impl ScriptClient {
    /// Host from `STELLAR_SCRIPT_HOSTNAME`, 10 s request timeout
    pub fn from_env(scope: Scope) -> std::result::Result<Self, String> {
        Self::new(scope, env_or(SCRIPT_HOST_ENV, DEFAULT_SCRIPT_HOST))
    }

    pub fn new(scope: Scope, host: impl Into<String>) -> std::result::Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("failed to build script client: {}", e))?;
        Ok(Self {
            scope,
            host: host.into(),
            client,
        })
    }

    pub fn run_url(&self, name: &str) -> String {
        format!(
            "http://{}:{}/script-api/scripts/{}/run?scope={}",
            self.host, SCRIPT_PORT, name, self.scope
        )
    }
}

impl ScriptRunner for ScriptClient {
    fn run_script(
        &self,
        name: &str,
        environment: &serde_json::Value,
        reaction: &str,
        now_secs: i64,
    ) -> std::result::Result<(), String> {
        let body = json!({
            "scope": self.scope.as_str(),
            "environment": environment,
            "reaction": reaction,
            "id": now_secs,
            "timestamp": now_secs,
        });
        let response = self
            .client
            .post(self.run_url(name))
            .json(&body)
            .send()
            .map_err(|e| format!("failed to call {}, for script: {}, error: {}", self.host, name, e))?;
        let code = response.status().as_u16();
        if code != 200 {
            return Err(format!(
                "failed to call {}, for script: {}, response code: {}",
                self.host, name, code
            ));
        }
        Ok(())
    }
}

pub struct ActionExecutor {
    commands: Arc<dyn CommandSender>,
    scripts: Arc<dyn ScriptRunner>,
    clock: Arc<dyn TimeProvider>,
}

impl ActionExecutor {
    pub fn new(
        commands: Arc<dyn CommandSender>,
        scripts: Arc<dyn ScriptRunner>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            commands,
            scripts,
            clock,
        }
    }

    /// Run every action of `reaction` in order
    pub fn run(&self, reaction: &Reaction) -> ReactionRun {
        let now = self.clock.now_secs();
        let results = reaction
            .actions
            .iter()
            .map(|action| {
                let outcome = self.run_action(reaction, action, now);
                match &outcome {
                    Ok(()) => info!("{} ran {}", reaction.name, action),
                    Err(e) => error!("{} failed to run {}: {}", reaction.name, action, e),
                }
                ActionRecord {
                    action: action.to_string(),
                    success: outcome.is_ok(),
                    message: outcome.err().unwrap_or_default(),
                }
            })
            .collect();
        ReactionRun {
            reaction: reaction.name.clone(),
            time: now,
            results,
        }
    }

    fn run_action(
        &self,
        reaction: &Reaction,
        action: &Action,
        now: i64,
    ) -> std::result::Result<(), String> {
        match action {
            Action::Command {
                target,
                packet,
                params,
            } => {
                let params: CommandParams = params
                    .iter()
                    .map(|(k, v)| (k.to_uppercase(), Value::from_json(v)))
                    .collect();
                self.commands.send_command(target, packet, &params)
            },
            Action::Script { value, environment } => {
                self.scripts.run_script(value, environment, &reaction.name, now)
            },
        }
    }
}
