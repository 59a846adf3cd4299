//! Rule engine runtime
//!
//! Thread layout:
//! - manager: follows the decom topics referenced by triggers, feeds the
//!   packet cache and queues one job per message
//! - workers: evaluate triggers, fire reactions, dispatch events
//! - sweep: once a second, handles reactions whose snooze ran out and
//!   writes the engine status record
//!
//! All threads share one unbounded job queue and stop on a [`CancelSignal`].

use crate::error::{Result, RuleError};
use crate::evaluator::{evaluate_trigger, Visited};
use crate::events::{Notification, ReactionEvent, ReactionRun, TriggerEvent};
use crate::executor::{ActionExecutor, CommandSender, ScriptRunner};
use crate::packet_cache::PacketCache;
use crate::reaction_base::{ReactionBase, SnoozeBase};
use crate::trigger_base::TriggerBase;
use crate::types::{
    Reaction, ReactionDefinition, Trigger, TriggerDefinition, TriggerRef, DEFAULT_MIN_SNOOZE_SECS,
};
use common::CancelSignal;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use stellar_bus::{Bus, BusError, BusExt, Bytes, StatusStore, Subscription, TimeProvider, TopicKeys};
use tracing::{debug, error, info, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const STATUS_FIELD: &str = "RULE_ENGINE";

fn default_worker_count() -> usize {
    3
}

fn default_min_snooze() -> u64 {
    DEFAULT_MIN_SNOOZE_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEngineConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Smallest reaction snooze accepted, in seconds
    #[serde(default = "default_min_snooze")]
    pub min_snooze: u64,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            min_snooze: default_min_snooze(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Job {
    /// Evaluate the triggers listening on a topic
    Topic(String),
    /// Fire the reactions of a trigger that just became true
    Trigger(String),
    /// Run a reaction regardless of its snooze
    Reaction(String),
    Shutdown,
}

/// External services the engine talks to
pub struct EngineDeps {
    pub bus: Arc<dyn Bus>,
    pub status: Arc<dyn StatusStore>,
    pub commands: Arc<dyn CommandSender>,
    pub scripts: Arc<dyn ScriptRunner>,
    pub clock: Arc<dyn TimeProvider>,
}

struct Shared {
    keys: TopicKeys,
    config: RuleEngineConfig,
    bus: Arc<dyn Bus>,
    status: Arc<dyn StatusStore>,
    clock: Arc<dyn TimeProvider>,
    triggers: TriggerBase,
    reactions: ReactionBase,
    snoozes: SnoozeBase,
    cache: PacketCache,
    executor: ActionExecutor,
    jobs: Sender<Job>,
    subscribed: RwLock<Vec<String>>,
}

pub struct RuleEngine {
    shared: Arc<Shared>,
    receiver: Receiver<Job>,
    cancel: CancelSignal,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RuleEngine {
    pub fn new(keys: TopicKeys, config: RuleEngineConfig, deps: EngineDeps) -> Self {
        let (jobs, receiver) = unbounded();
        let executor = ActionExecutor::new(deps.commands, deps.scripts, Arc::clone(&deps.clock));
        let shared = Shared {
            triggers: TriggerBase::new(keys.clone()),
            keys,
            config,
            bus: deps.bus,
            status: deps.status,
            clock: deps.clock,
            reactions: ReactionBase::new(),
            snoozes: SnoozeBase::new(),
            cache: PacketCache::new(),
            executor,
            jobs,
            subscribed: RwLock::new(Vec::new()),
        };
        Self {
            shared: Arc::new(shared),
            receiver,
            cancel: CancelSignal::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool, the manager and the sweep
    pub fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return Err(RuleError::SchedulerError("rule engine already running".to_string()));
        }
        for i in 0..self.shared.config.worker_count.max(1) {
            let shared = Arc::clone(&self.shared);
            let receiver = self.receiver.clone();
            handles.push(spawn(format!("rule-worker-{}", i), move || {
                run_worker(i, &shared, &receiver)
            })?);
        }
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        handles.push(spawn("rule-manager".to_string(), move || {
            run_manager(&shared, &cancel)
        })?);
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        handles.push(spawn("rule-sweep".to_string(), move || {
            run_sweep(&shared, &cancel)
        })?);
        info!(
            "Rule engine started with {} workers",
            self.shared.config.worker_count.max(1)
        );
        Ok(())
    }

    /// Cancel every thread and wait for it
    pub fn stop(&self) {
        self.cancel.cancel();
        let mut handles = self.handles.lock();
        for _ in 0..self.shared.config.worker_count.max(1) {
            let _ = self.shared.jobs.send(Job::Shutdown);
        }
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                error!("Rule engine thread panicked");
            }
        }
        info!("Rule engine stopped");
    }

    /// Decom topics the manager is currently following
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.shared.subscribed.read().clone()
    }

    pub fn packet_cache(&self) -> &PacketCache {
        &self.shared.cache
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    pub fn create_trigger(&self, definition: &TriggerDefinition) -> Result<Trigger> {
        let event = self
            .shared
            .triggers
            .create(definition, self.shared.clock.now_nanos())?;
        let trigger = event.trigger().clone();
        self.shared.dispatch_trigger_event(event);
        for topic in trigger.generate_topics(&self.shared.keys) {
            self.shared.queue(Job::Topic(topic));
        }
        Ok(trigger)
    }

    pub fn update_trigger(&self, definition: &TriggerDefinition) -> Result<Trigger> {
        let event = self
            .shared
            .triggers
            .update(definition, self.shared.clock.now_nanos())?;
        let trigger = event.trigger().clone();
        self.shared.dispatch_trigger_event(event);
        for topic in trigger.generate_topics(&self.shared.keys) {
            self.shared.queue(Job::Topic(topic));
        }
        Ok(trigger)
    }

    pub fn delete_trigger(&self, name: &str) -> Result<Trigger> {
        let event = self.shared.triggers.delete(name)?;
        let trigger = event.trigger().clone();
        self.shared.dispatch_trigger_event(event);
        Ok(trigger)
    }

    pub fn activate_trigger(&self, name: &str) -> Result<Trigger> {
        let event = self
            .shared
            .triggers
            .activate(name, self.shared.clock.now_nanos())?;
        let trigger = event.trigger().clone();
        self.shared.dispatch_trigger_event(event);
        for topic in trigger.generate_topics(&self.shared.keys) {
            self.shared.queue(Job::Topic(topic));
        }
        Ok(trigger)
    }

    pub fn deactivate_trigger(&self, name: &str) -> Result<Trigger> {
        let event = self
            .shared
            .triggers
            .deactivate(name, self.shared.clock.now_nanos())?;
        let trigger = event.trigger().clone();
        self.shared.dispatch_trigger_event(event);
        Ok(trigger)
    }

    pub fn trigger(&self, name: &str) -> Option<Trigger> {
        self.shared.triggers.snapshot().get(name).cloned()
    }

    /// Triggers of one group, or all when `group` is None
    pub fn triggers(&self, group: Option<&str>) -> Vec<Trigger> {
        self.shared
            .triggers
            .snapshot()
            .iter()
            .filter(|t| group.map_or(true, |g| t.group == g))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    pub fn create_reaction(&self, definition: &ReactionDefinition) -> Result<Reaction> {
        let mut reaction = definition.validate(self.shared.config.min_snooze)?;
        if self.shared.reactions.snapshot().get(&reaction.name).is_some() {
            return Err(RuleError::AlreadyExists(reaction.name));
        }
        reaction.updated_at = self.shared.clock.now_secs();
        self.shared.link(&reaction, &[])?;
        let reaction = match self.shared.reactions.insert(reaction.clone()) {
            Ok(r) => r,
            Err(e) => {
                self.shared.unlink(&reaction, &[]);
                return Err(e);
            },
        };
        self.shared
            .publish_reaction_event(ReactionEvent::Created(reaction.clone()));
        Ok(reaction)
    }

    pub fn update_reaction(&self, definition: &ReactionDefinition) -> Result<Reaction> {
        let mut reaction = definition.validate(self.shared.config.min_snooze)?;
        let Some(old) = self.shared.reactions.snapshot().get(&reaction.name).cloned() else {
            return Err(RuleError::NotFound(reaction.name));
        };
        reaction.updated_at = self.shared.clock.now_secs();
        self.shared.link(&reaction, &old.triggers)?;
        let (old, new) = self.shared.reactions.replace(reaction)?;
        self.shared.unlink(&old, &new.triggers);
        self.shared
            .publish_reaction_event(ReactionEvent::Updated(new.clone()));
        Ok(new)
    }

    pub fn delete_reaction(&self, name: &str) -> Result<Reaction> {
        let reaction = self.shared.reactions.remove(name)?;
        self.shared.unlink(&reaction, &[]);
        self.shared
            .publish_reaction_event(ReactionEvent::Deleted(reaction.clone()));
        Ok(reaction)
    }

    pub fn activate_reaction(&self, name: &str) -> Result<Reaction> {
        let reaction = self
            .shared
            .reactions
            .set_active(name, true, self.shared.clock.now_secs())?;
        self.shared
            .publish_reaction_event(ReactionEvent::Activated(reaction.clone()));
        Ok(reaction)
    }

    pub fn deactivate_reaction(&self, name: &str) -> Result<Reaction> {
        let reaction = self
            .shared
            .reactions
            .set_active(name, false, self.shared.clock.now_secs())?;
        self.shared
            .publish_reaction_event(ReactionEvent::Deactivated(reaction.clone()));
        Ok(reaction)
    }

    /// End a snooze early
    pub fn wake_reaction(&self, name: &str) -> Result<Reaction> {
        let reaction = self
            .shared
            .reactions
            .wake(name, self.shared.clock.now_secs())?;
        self.shared
            .publish_reaction_event(ReactionEvent::Awakened(reaction.clone()));
        Ok(reaction)
    }

    /// Queue a manual run of a reaction's actions
    pub fn execute_reaction(&self, name: &str) -> Result<()> {
        let Some(reaction) = self.shared.reactions.snapshot().get(name).cloned() else {
            return Err(RuleError::NotFound(name.to_string()));
        };
        if !reaction.active {
            return Err(RuleError::InvalidReaction(format!(
                "{} is not active",
                reaction.name
            )));
        }
        self.shared.queue(Job::Reaction(name.to_string()));
        Ok(())
    }

    pub fn reaction(&self, name: &str) -> Option<Reaction> {
        self.shared.reactions.snapshot().get(name).cloned()
    }

    pub fn reactions(&self) -> Vec<Reaction> {
        self.shared.reactions.snapshot().iter().cloned().collect()
    }

    /// Past runs, newest first
    pub fn reaction_history(&self, name: &str) -> Vec<ReactionRun> {
        self.shared.reactions.history(name)
    }
}

impl Drop for RuleEngine {
    fn drop(&mut self) {
        if !self.handles.lock().is_empty() {
            self.stop();
        }
    }
}

fn spawn(name: String, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| RuleError::SchedulerError(format!("failed to spawn {}: {}", name, e)))
}

impl Shared {
    fn queue(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!("Rule engine job queue closed");
        }
    }

    /// Register `reaction` as a dependent of its triggers
    ///
    /// Triggers in `keep` are already linked; on failure every link added
    /// here is undone.
    fn link(&self, reaction: &Reaction, keep: &[TriggerRef]) -> Result<()> {
        let mut added: Vec<&TriggerRef> = Vec::new();
        for t in &reaction.triggers {
            if keep.contains(t) {
                continue;
            }
            if let Err(e) = self
                .triggers
                .set_dependent(&t.name, &t.group, &reaction.name, true)
            {
                for r in added {
                    let _ = self.triggers.set_dependent(&r.name, &r.group, &reaction.name, false);
                }
                return Err(match e {
                    RuleError::NotFound(name) => RuleError::InvalidReaction(format!(
                        "failed to find trigger: {}",
                        name
                    )),
                    other => other,
                });
            }
            added.push(t);
        }
        Ok(())
    }

    /// Remove `reaction` from its triggers' dependents, except those in `keep`
    fn unlink(&self, reaction: &Reaction, keep: &[TriggerRef]) {
        for t in &reaction.triggers {
            if keep.contains(t) {
                continue;
            }
            let _ = self
                .triggers
                .set_dependent(&t.name, &t.group, &reaction.name, false);
        }
    }

    fn publish_reaction_event(&self, event: ReactionEvent) {
        let topic = self.keys.reaction_events();
        if let Err(e) = self
            .bus
            .publish_json(&topic, &Notification::Reaction(event))
        {
            warn!("Failed to publish reaction event: {}", e);
        }
    }

    /// Publish a trigger event and act on it locally
    fn dispatch_trigger_event(&self, event: TriggerEvent) {
        let trigger = event.trigger();
        let topic = self.keys.trigger_events(&trigger.group);
        debug!("{} {}", event.kind(), trigger);
        if let Err(e) = self
            .bus
            .publish_json(&topic, &Notification::Trigger(event.clone()))
        {
            warn!("Failed to publish trigger event: {}", e);
        }
        match &event {
            TriggerEvent::Enabled(t) => {
                self.queue(Job::Trigger(t.name.clone()));
                self.queue(Job::Topic(topic));
            },
            TriggerEvent::Disabled(_) | TriggerEvent::Deactivated(_) => {
                self.queue(Job::Topic(topic));
            },
            _ => {},
        }
    }

    fn handle(&self, job: Job) {
        match job {
            Job::Topic(topic) => self.evaluate_topic(&topic),
            Job::Trigger(name) => self.fire_reactions(&name),
            Job::Reaction(name) => self.rerun_reaction(&name),
            Job::Shutdown => {},
        }
    }

    fn evaluate_topic(&self, topic: &str) {
        let snapshot = self.triggers.snapshot();
        let active = snapshot.active();
        for trigger in snapshot.triggers_for(topic) {
            let mut visited = Visited::new();
            let result = evaluate_trigger(trigger, trigger, &mut visited, &active, &self.cache);
            debug!("{} evaluated to {:?}", trigger.name, result);
            if let Some(event) =
                self.triggers
                    .update_state(&trigger.name, result, self.clock.now_nanos())
            {
                self.dispatch_trigger_event(event);
            }
        }
    }

    fn fire_reactions(&self, trigger: &str) {
        let snapshot = self.reactions.snapshot();
        for reaction in snapshot.reactions_for(trigger) {
            // claim first so a concurrent worker cannot run it too
            let Some(claimed) = self
                .reactions
                .try_sleep(&reaction.name, self.clock.now_secs(), true)
            else {
                continue;
            };
            info!("{} fired by {}", claimed.name, trigger);
            self.run_reaction(claimed);
        }
    }

    fn rerun_reaction(&self, name: &str) {
        let Some(reaction) = self.reactions.snapshot().get(name).cloned() else {
            return;
        };
        if !reaction.active {
            debug!("{} is not active, skipping rerun", reaction.name);
            return;
        }
        let Some(claimed) = self
            .reactions
            .try_sleep(&reaction.name, self.clock.now_secs(), false)
        else {
            return;
        };
        self.run_reaction(claimed);
    }

    fn run_reaction(&self, reaction: Reaction) {
        let run = self.executor.run(&reaction);
        self.reactions.record_run(run.clone());
        self.publish_reaction_event(ReactionEvent::Run(run));
        self.publish_reaction_event(ReactionEvent::Snoozed(reaction));
    }

    /// One pass over expired snoozes
    fn sweep(&self) {
        let now = self.clock.now_secs();
        let reactions = self.reactions.snapshot();
        let triggers = self.triggers.snapshot();
        for reaction in reactions.expired(now) {
            if !self.snoozes.not_queued(reaction) {
                continue;
            }
            let still_true = reaction
                .triggers
                .iter()
                .any(|t| triggers.get(&t.name).is_some_and(|t| t.state));
            if reaction.review && reaction.active && still_true {
                debug!("{} snooze ended with a true trigger, rerunning", reaction.name);
                self.queue(Job::Reaction(reaction.name.clone()));
            } else if let Ok(woken) = self.reactions.wake(&reaction.name, now) {
                self.publish_reaction_event(ReactionEvent::Awakened(woken));
            }
        }
        self.write_status(now);
    }

    fn write_status(&self, now: i64) {
        let reactions = self.reactions.snapshot();
        let status = serde_json::json!({
            "name": STATUS_FIELD,
            "workers": self.config.worker_count.max(1),
            "triggers": self.triggers.snapshot().len(),
            "reactions": reactions.len(),
            "snoozed": reactions.iter().filter(|r| r.snoozed_until.is_some()).count(),
            "queued": self.jobs.len(),
            "topics": self.subscribed.read().len(),
            "updated_at": now,
        });
        let bytes = match serde_json::to_vec(&status) {
            Ok(b) => Bytes::from(b),
            Err(e) => {
                warn!("Failed to encode rule engine status: {}", e);
                return;
            },
        };
        if let Err(e) = self
            .status
            .hash_set(&self.keys.rules_status(), STATUS_FIELD, bytes)
        {
            warn!("Failed to write rule engine status: {}", e);
        }
    }
}

fn run_worker(index: usize, shared: &Shared, receiver: &Receiver<Job>) {
    info!("RuleWorker-{} running", index);
    loop {
        match receiver.recv() {
            Ok(Job::Shutdown) | Err(_) => break,
            Ok(job) => shared.handle(job),
        }
    }
    info!("RuleWorker-{} exiting", index);
}

fn run_manager(shared: &Shared, cancel: &CancelSignal) {
    let mut version = u64::MAX;
    let mut subscription = Subscription::latest(Arc::clone(&shared.bus), &[]);
    while !cancel.is_cancelled() {
        let snapshot = shared.triggers.snapshot();
        if snapshot.version() != version {
            version = snapshot.version();
            let wanted = snapshot.topics();
            let current: Vec<String> = subscription.topics().map(str::to_string).collect();
            for topic in current.iter().filter(|t| !wanted.contains(t)) {
                subscription.remove_topic(topic);
            }
            for topic in &wanted {
                subscription.add_topic(topic);
            }
            debug!("Rule manager following {} topics", wanted.len());
            *shared.subscribed.write() = wanted;
        }
        match subscription.poll(POLL_TIMEOUT) {
            Ok(messages) => {
                for msg in messages {
                    match msg.json::<serde_json::Value>() {
                        Ok(decom) if shared.cache.add(&decom) => {
                            shared.queue(Job::Topic(msg.topic));
                        },
                        Ok(_) => warn!("Malformed decom message on {}", msg.topic),
                        Err(e) => warn!("Failed to parse message on {}: {}", msg.topic, e),
                    }
                }
            },
            Err(BusError::Closed) => {
                info!("Bus closed, rule manager exiting");
                break;
            },
            Err(e) => {
                error!("Rule manager read failed: {}", e);
                if cancel.sleep(Duration::from_secs(1)) {
                    break;
                }
            },
        }
    }
}

fn run_sweep(shared: &Shared, cancel: &CancelSignal) {
    while !cancel.sleep(SWEEP_INTERVAL) {
        shared.sweep();
    }
}
