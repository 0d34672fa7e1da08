//! Maps [`ExecutorConfig`] records to runnable [`Executor`] instances
//! into runnable instances.
//!
//! Holds two maps — atomic creators by `type`, orchestrator creators by
//! `mode` — and an instance cache keyed by config id. `create` looks the
//! config up in whichever map its `kind` selects, instantiates through
//! the matching creator, and caches the result; repeat calls for the
//! same id within one registry return the cached instance (config ids,
//! "Lifecycles").
//!
//! Orchestrators receive a clone of the factory so they can resolve their
//! own children. Cloning is a cheap `Arc` bump, not a deep copy: per the
//! not instance identity). The factory owns instances and orchestrators
//! only hold a non-owning reference back to it, so there is no
//! shared-ownership cycle to break.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::model::{ExecutorConfig, OrchestratorMode};

/// Builds an atomic [`Executor`] from a fully-resolved config.
pub type AtomicCreator = Arc<dyn Fn(&ExecutorConfig) -> crate::Result<Arc<dyn super::Executor>> + Send + Sync>;

/// Builds an orchestrator [`Executor`], given the factory it should use
/// to resolve its own children.
pub type OrchestratorCreator =
    Arc<dyn Fn(&ExecutorConfig, Factory) -> crate::Result<Arc<dyn super::Executor>> + Send + Sync>;

fn mode_key(mode: OrchestratorMode) -> &'static str {
    match mode {
        OrchestratorMode::Serial => "serial",
        OrchestratorMode::Parallel => "parallel",
        OrchestratorMode::Router => "router",
        OrchestratorMode::Loop => "loop",
        OrchestratorMode::Dag => "dag",
    }
}

struct Inner {
    atomic: DashMap<String, AtomicCreator>,
    orchestrator: DashMap<String, OrchestratorCreator>,
    cache: DashMap<String, Arc<dyn super::Executor>>,
}

/// The executor factory/registry. Cheap to clone; clones share the same
/// underlying maps.
#[derive(Clone)]
pub struct Factory {
    inner: Arc<Inner>,
}

impl Default for Factory {
    fn default() -> Self {
        Self::new()
    }
}

impl Factory {
    /// An empty factory with no creators registered. Useful for tests
    /// that want to control exactly which types are supported.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                atomic: DashMap::new(),
                orchestrator: DashMap::new(),
                cache: DashMap::new(),
            }),
        }
    }

    /// A factory preloaded with the five built-in orchestrator modes
    /// (serial/parallel/router/loop/dag) and the `script` atomic type,
    /// which — unlike `agent`/`http`/`tool` — needs no externally
    /// supplied transport and so can ship by default.
    pub fn with_default_orchestrators() -> Self {
        let factory = Self::new();
        factory.register_orchestrator(OrchestratorMode::Serial, Arc::new(crate::orchestrator::serial::create));
        factory.register_orchestrator(OrchestratorMode::Parallel, Arc::new(crate::orchestrator::parallel::create));
        factory.register_orchestrator(OrchestratorMode::Router, Arc::new(crate::orchestrator::router::create));
        factory.register_orchestrator(OrchestratorMode::Loop, Arc::new(crate::orchestrator::loop_orchestrator::create));
        factory.register_orchestrator(OrchestratorMode::Dag, Arc::new(crate::orchestrator::dag::create));
        factory.register_atomic(
            "script",
            Arc::new(|config: &ExecutorConfig| {
                let template = config
                    .extra
                    .get("template")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(Arc::new(crate::executor::script::ScriptExecutor::new(config.id.clone(), template))
                    as Arc<dyn super::Executor>)
            }),
        );
        factory
    }

    /// Register (or replace) the creator for an atomic `type`.
    pub fn register_atomic(&self, type_name: impl Into<String>, creator: AtomicCreator) {
        self.inner.atomic.insert(type_name.into(), creator);
    }

    /// Register (or replace) the creator for a composite `mode`.
    pub fn register_orchestrator(&self, mode: OrchestratorMode, creator: OrchestratorCreator) {
        self.inner.orchestrator.insert(mode_key(mode).to_string(), creator);
    }

    /// Whether an atomic type or, for `"composite"`/a mode name, an
    /// orchestrator mode has a registered creator.
    pub fn supports(&self, type_or_mode: &str) -> bool {
        self.inner.atomic.contains_key(type_or_mode) || self.inner.orchestrator.contains_key(type_or_mode)
    }

    /// Drop every cached instance. Creators remain registered.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Resolve `config` into a runnable executor, instantiating and
    /// caching it by id on first use.
    pub fn create(&self, config: &ExecutorConfig) -> crate::Result<Arc<dyn super::Executor>> {
        if let Some(cached) = self.inner.cache.get(&config.id) {
            return Ok(cached.clone());
        }

        let instance = if config.kind.is_composite() {
            let orch = config.orchestrator.as_ref().ok_or_else(|| {
                crate::KernelError::Validation(format!("composite '{}' is missing orchestrator fields", config.id))
            })?;
            let key = mode_key(orch.mode);
            let creator = self
                .inner
                .orchestrator
                .get(key)
                .ok_or_else(|| crate::KernelError::UnsupportedType(key.to_string()))?
                .clone();
            creator(config, self.clone())?
        } else {
            let key = config.kind.as_str();
            let creator = self
                .inner
                .atomic
                .get(key)
                .ok_or_else(|| crate::KernelError::UnsupportedType(key.to_string()))?
                .clone();
            creator(config)?
        };

        self.inner.cache.insert(config.id.clone(), instance.clone());
        Ok(instance)
    }
}
