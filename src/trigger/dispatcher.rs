//! Per-cycle trigger dispatch.
//!
//! Triggers run one after another in ascending `(order, id)` order. For each
//! trigger the candidate containers are filtered by update availability,
//! threshold and the `once` memory, then handed to the provider one by one
//! (`simple`) or all at once (`batch`). A provider failure is logged and
//! surfaced as `container-update-failed`; it never stops the other triggers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{resolve_typed, DispatcherConfig, Mode, RawConfig, TriggerSettings};
use crate::container::{Container, UpdateKindType};
use crate::error::{TriggerError, ValidationError};
use crate::events::{ContainerReport, EventBus, HandlerOptions, Unregister, UpdateFailed};

use super::provider::{build_provider, Notification, ProviderContext, ProviderKind, TriggerProvider};
use super::threshold;

/// Handler id used when attached to the bus.
pub const DISPATCHER_HANDLER_ID: &str = "trigger-dispatcher";

/// Why a container was not handed to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// No update available.
    NoUpdate,
    /// The update is less severe than the trigger's threshold.
    BelowThreshold,
    /// Already notified for the same remote value.
    AlreadyNotified,
}

/// What one trigger did in one cycle.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub trigger: String,
    /// Container names handed to the provider successfully.
    pub fired: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    /// Container names with the provider's error message.
    pub failed: Vec<(String, String)>,
}

/// Summary of a dispatch cycle, one entry per automatic trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Per-trigger outcomes in execution order.
    pub triggers: Vec<TriggerOutcome>,
}

impl DispatchReport {
    /// Outcome of one trigger.
    #[must_use]
    pub fn outcome(&self, trigger: &str) -> Option<&TriggerOutcome> {
        self.triggers.iter().find(|o| o.trigger == trigger)
    }

    /// Total successful provider deliveries, counted per container.
    #[must_use]
    pub fn fired(&self) -> usize {
        self.triggers.iter().map(|o| o.fired.len()).sum()
    }

    /// Total failed deliveries, counted per container.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.triggers.iter().map(|o| o.failed.len()).sum()
    }
}

/// A provider with its resolved settings.
pub struct RegisteredTrigger {
    id: String,
    sequence: u64,
    settings: TriggerSettings,
    provider: Arc<dyn TriggerProvider>,
    gate: tokio::sync::Mutex<()>,
}

impl RegisteredTrigger {
    /// `provider.name`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolved settings.
    #[must_use]
    pub const fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    /// The provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn TriggerProvider> {
        &self.provider
    }

    fn sort_key(&self) -> (i64, &str, u64) {
        (self.settings.order, self.id.as_str(), self.sequence)
    }
}

impl std::fmt::Debug for RegisteredTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTrigger")
            .field("id", &self.id)
            .field("provider", &self.provider.provider_type())
            .field("order", &self.settings.order)
            .finish_non_exhaustive()
    }
}

type OnceKey = (String, String);

/// Bounded `(trigger, container) -> "kind:remote"` memory.
#[derive(Debug, Default)]
struct OnceMemory {
    seen: HashMap<OnceKey, String>,
    insertion: VecDeque<OnceKey>,
}

impl OnceMemory {
    fn contains(&self, key: &OnceKey, value: &str) -> bool {
        self.seen.get(key).is_some_and(|v| v == value)
    }

    fn remember(&mut self, key: OnceKey, value: String, limit: usize) {
        if self.seen.insert(key.clone(), value).is_none() {
            self.insertion.push_back(key);
        }
        while self.seen.len() > limit.max(1) {
            match self.insertion.pop_front() {
                Some(oldest) => {
                    self.seen.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

fn once_value(container: &Container) -> String {
    let kind = &container.update_kind;
    let remote = match kind.kind {
        UpdateKindType::Digest => kind
            .remote_value
            .clone()
            .or_else(|| container.result.as_ref().and_then(|r| r.digest.clone())),
        _ => kind.remote_value.clone(),
    };
    format!("{}:{}", kind.kind.as_str(), remote.unwrap_or_default())
}

/// Runs triggers against the containers of a watch cycle.
pub struct TriggerDispatcher {
    config: DispatcherConfig,
    bus: Arc<EventBus>,
    triggers: RwLock<Vec<Arc<RegisteredTrigger>>>,
    sequence: AtomicU64,
    notified: Mutex<OnceMemory>,
}

impl std::fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDispatcher")
            .field("config", &self.config)
            .field("triggers", &self.trigger_ids())
            .finish_non_exhaustive()
    }
}

impl TriggerDispatcher {
    /// A dispatcher with no triggers.
    #[must_use]
    pub fn new(config: DispatcherConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            bus,
            triggers: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            notified: Mutex::new(OnceMemory::default()),
        }
    }

    /// Resolves `raw` and builds one provider per instance.
    ///
    /// # Errors
    ///
    /// The first invalid instance (bad common setting, unknown provider, bad
    /// provider-specific setting).
    pub fn from_config(
        config: DispatcherConfig,
        raw: &RawConfig,
        ctx: &ProviderContext,
    ) -> Result<Self, ValidationError> {
        let dispatcher = Self::new(config, Arc::clone(&ctx.bus));
        for (instance, settings) in resolve_typed(raw, &ProviderKind::names())? {
            let provider = build_provider(&instance, &settings, ctx)?;
            info!(
                trigger = %instance.id(),
                provider = %provider.provider_type(),
                threshold = %settings.threshold,
                mode = %settings.mode,
                "registered trigger"
            );
            dispatcher.add_trigger(instance.id(), settings, provider);
        }
        Ok(dispatcher)
    }

    /// Registers a provider under `id`.
    pub fn add_trigger(&self, id: impl Into<String>, settings: TriggerSettings, provider: Arc<dyn TriggerProvider>) {
        let registered = Arc::new(RegisteredTrigger {
            id: id.into(),
            sequence: self.sequence.fetch_add(1, Ordering::AcqRel),
            settings,
            provider,
            gate: tokio::sync::Mutex::new(()),
        });
        let mut triggers = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        triggers.push(registered);
        triggers.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    /// Ids of every registered trigger, in execution order.
    #[must_use]
    pub fn trigger_ids(&self) -> Vec<String> {
        self.snapshot().iter().map(|t| t.id.clone()).collect()
    }

    /// Looks up a trigger by id.
    #[must_use]
    pub fn trigger(&self, id: &str) -> Option<Arc<RegisteredTrigger>> {
        self.snapshot().into_iter().find(|t| t.id == id)
    }

    /// Registers this dispatcher on the bus's `container-reports` event.
    ///
    /// The bus holds only a weak reference; once the dispatcher is dropped the
    /// handler does nothing.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Unregister {
        let weak = Arc::downgrade(self);
        bus.register_container_reports(HandlerOptions::with_id(DISPATCHER_HANDLER_ID), move |reports| {
            let weak = weak.clone();
            async move {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.dispatch_reports(&reports).await;
                }
                Ok(())
            }
        })
    }

    /// Dispatches the containers of a cycle's reports.
    pub async fn dispatch_reports(&self, reports: &[ContainerReport]) -> DispatchReport {
        let containers: Vec<Container> = reports.iter().map(|r| r.container.clone()).collect();
        self.dispatch(&containers).await
    }

    /// Runs every automatic trigger against `containers`.
    pub async fn dispatch(&self, containers: &[Container]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for trigger in self.snapshot() {
            if !trigger.settings.auto {
                debug!(trigger = %trigger.id, "skipping manual-only trigger");
                continue;
            }
            report.triggers.push(self.run_automatic(&trigger, containers).await);
        }
        report
    }

    /// Runs one trigger for one container on explicit request.
    ///
    /// Ignores `auto`, threshold and `once`, and always uses simple mode.
    ///
    /// # Errors
    ///
    /// `UnknownTrigger` for an unregistered id, otherwise the provider error.
    pub async fn run_trigger(&self, id: &str, container: &Container) -> Result<(), TriggerError> {
        let trigger = self.trigger(id).ok_or_else(|| TriggerError::UnknownTrigger {
            trigger: id.to_string(),
        })?;
        let notification = Notification::simple(&trigger.settings, container);
        let result = {
            let _gate = Self::enter(&trigger).await;
            trigger.provider.trigger(container, &notification).await
        };
        match &result {
            Ok(()) => self.remember(&trigger, container),
            Err(e) => self.report_failure(&trigger, container, e).await,
        }
        result
    }

    async fn run_automatic(&self, trigger: &RegisteredTrigger, containers: &[Container]) -> TriggerOutcome {
        let mut outcome = TriggerOutcome {
            trigger: trigger.id.clone(),
            ..TriggerOutcome::default()
        };

        let mut eligible = Vec::new();
        for container in containers {
            match self.eligibility(trigger, container) {
                Ok(()) => eligible.push(container),
                Err(reason) => {
                    debug!(trigger = %trigger.id, container = %container.name, reason = ?reason, "skipping container");
                    outcome.skipped.push((container.name.clone(), reason));
                }
            }
        }
        if eligible.is_empty() {
            return outcome;
        }

        match trigger.settings.mode {
            Mode::Simple => {
                for container in eligible {
                    let notification = Notification::simple(&trigger.settings, container);
                    let result = {
                        let _gate = Self::enter(trigger).await;
                        trigger.provider.trigger(container, &notification).await
                    };
                    match result {
                        Ok(()) => {
                            self.remember(trigger, container);
                            outcome.fired.push(container.name.clone());
                        }
                        Err(e) => {
                            self.report_failure(trigger, container, &e).await;
                            outcome.failed.push((container.name.clone(), e.to_string()));
                        }
                    }
                }
            }
            Mode::Batch => {
                let batch: Vec<Container> = eligible.iter().map(|c| (*c).clone()).collect();
                let notification = Notification::batch(&trigger.settings, &batch);
                let result = {
                    let _gate = Self::enter(trigger).await;
                    trigger.provider.trigger_batch(&batch, &notification).await
                };
                match result {
                    Ok(()) => {
                        for container in &batch {
                            self.remember(trigger, container);
                            outcome.fired.push(container.name.clone());
                        }
                    }
                    Err(e) => {
                        for container in &batch {
                            self.report_failure(trigger, container, &e).await;
                            outcome.failed.push((container.name.clone(), e.to_string()));
                        }
                    }
                }
            }
        }
        outcome
    }

    fn eligibility(&self, trigger: &RegisteredTrigger, container: &Container) -> Result<(), SkipReason> {
        if !container.update_available || container.update_kind.kind == UpdateKindType::Unknown {
            return Err(SkipReason::NoUpdate);
        }
        if !threshold::meets(trigger.settings.threshold, &container.update_kind) {
            return Err(SkipReason::BelowThreshold);
        }
        if trigger.settings.once {
            let key = (trigger.id.clone(), container.id.clone());
            if self.lock_notified().contains(&key, &once_value(container)) {
                return Err(SkipReason::AlreadyNotified);
            }
        }
        Ok(())
    }

    fn remember(&self, trigger: &RegisteredTrigger, container: &Container) {
        if !trigger.settings.once {
            return;
        }
        self.lock_notified().remember(
            (trigger.id.clone(), container.id.clone()),
            once_value(container),
            self.config.once_memory_limit,
        );
    }

    async fn report_failure(&self, trigger: &RegisteredTrigger, container: &Container, error: &TriggerError) {
        warn!(trigger = %trigger.id, container = %container.name, error = %error, "trigger failed");
        let event = UpdateFailed {
            trigger: trigger.id.clone(),
            container: container.clone(),
            error: error.to_string(),
        };
        if let Err(e) = self.bus.emit_container_update_failed(event).await {
            warn!(trigger = %trigger.id, container = %container.name, error = %e, "container-update-failed handler failed");
        }
    }

    async fn enter(trigger: &RegisteredTrigger) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        if trigger.provider.is_reentrant() {
            None
        } else {
            Some(trigger.gate.lock().await)
        }
    }

    fn snapshot(&self) -> Vec<Arc<RegisteredTrigger>> {
        self.triggers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn lock_notified(&self) -> MutexGuard<'_, OnceMemory> {
        self.notified.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
