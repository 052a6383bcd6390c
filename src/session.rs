//! The session: the one handle a host holds.
//!
//! A [`Session`] owns every store the pipeline updates. Hosts push module
//! text and library references in, then run a pass either on the calling
//! thread ([`Session::run_blocking`]) or in the background
//! ([`Session::begin_pass`]). Both go through the same coordinator and are
//! serialized.
//!
//! ```ignore
//! use vbscope::{ComponentKind, Session, SessionConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let session = Session::new(SessionConfig::default())?;
//! let text = "Sub Main()\nEnd Sub\n";
//! session.upsert_module("VBAProject", "Module1", ComponentKind::Standard, text)?;
//! session.parse_blocking(&CancellationToken::new());
//!
//! let finder = session.finder();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;

use crate::base::{Interner, ModuleId, ProjectId};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::hir::{
    ChangeSet, ComponentKind, Declaration, DeclarationFinder, DeclarationGraph,
    ModuleDependencyTracker, ModuleSet, ModuleSource, ParserState, StateChangedEvent, StateManager,
};
use crate::pipeline::coordinator::{self, PassOutcome};
use crate::pipeline::{
    Carryover, Engine, ImplicitDeclarationGenerator, ParseCache, StateListener,
    default_generators,
};
use crate::project::{LibraryProvider, LibraryRegistry};
use crate::syntax::{Grammar, VbaGrammar};

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles a [`Session`] with non-default plug-ins.
#[derive(Debug)]
pub struct SessionBuilder {
    config: SessionConfig,
    grammar: Arc<dyn Grammar>,
    provider: Arc<dyn LibraryProvider>,
    generators: Vec<Arc<dyn ImplicitDeclarationGenerator>>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            grammar: Arc::new(VbaGrammar),
            provider: Arc::new(LibraryRegistry::new()),
            generators: default_generators(),
        }
    }

    pub fn with_grammar(mut self, grammar: Arc<dyn Grammar>) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn LibraryProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Add a generator after the defaults.
    pub fn with_generator(mut self, generator: Arc<dyn ImplicitDeclarationGenerator>) -> Self {
        self.generators.push(generator);
        self
    }

    pub fn build(self) -> Result<Session, SessionError> {
        let thread_prefix = self.config.pass_thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .thread_name(move |i| format!("{}-worker-{}", thread_prefix, i))
            .build()?;
        let interner = Arc::new(Interner::new());

        tracing::debug!(
            "session created: parallelism={}, builtin={}",
            pool.current_num_threads(),
            self.config.include_builtin_library
        );

        let engine = Engine {
            config: self.config,
            grammar: self.grammar,
            provider: self.provider,
            generators: self.generators,
            modules: ModuleSet::new(),
            finder: RwLock::new(Arc::new(DeclarationFinder::empty(interner.clone()))),
            interner,
            graph: RwLock::new(DeclarationGraph::new()),
            parse_cache: RwLock::new(ParseCache::default()),
            dependencies: RwLock::new(ModuleDependencyTracker::new()),
            states: StateManager::new(),
            listeners: RwLock::new(Vec::new()),
            pool,
            generation: AtomicU64::new(0),
            pass_lock: Mutex::new(()),
            carryover: Mutex::new(Carryover::default()),
        };

        Ok(Session {
            engine: Arc::new(engine),
            pending: Arc::new(Mutex::new(ChangeSet::none())),
            in_flight: Mutex::new(None),
            next_listener: AtomicU64::new(1),
        })
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// A background pass that has not been superseded yet.
#[derive(Debug)]
struct InFlight {
    token: CancellationToken,
    changes: ChangeSet,
    completed: Arc<AtomicBool>,
}

/// Process-wide handle over one set of projects.
///
/// Dropping the session drops every store; a background pass still running
/// keeps the engine alive until it notices its token or finishes.
#[derive(Debug)]
pub struct Session {
    engine: Arc<Engine>,
    /// Edits recorded since the last pass started, plus the change sets of
    /// passes that were cancelled.
    pending: Arc<Mutex<ChangeSet>>,
    in_flight: Mutex<Option<InFlight>>,
    next_listener: AtomicU64,
}

impl Session {
    /// A session with the bundled grammar, an empty library registry and
    /// the default implicit-declaration generators.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        SessionBuilder::new(config).build()
    }

    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.engine.config
    }

    // ------------------------------------------------------------------------
    // Host input
    // ------------------------------------------------------------------------

    /// Add or replace a module's text. Nothing is resolved until the next
    /// pass.
    pub fn upsert_module(
        &self,
        project: &str,
        component: &str,
        kind: ComponentKind,
        text: impl Into<Arc<str>>,
    ) -> Result<ModuleId, SessionError> {
        let upserted = self.engine.modules.upsert(project, component, kind, text)?;
        if upserted.changed {
            tracing::trace!("{}.{} changed", project, component);
            self.pending.lock().insert(upserted.module);
        }
        Ok(upserted.module)
    }

    pub fn remove_module(&self, project: &str, component: &str) -> Result<ModuleId, SessionError> {
        let module = self.engine.modules.remove(project, component)?;
        tracing::trace!("{}.{} removed", project, component);
        Ok(module)
    }

    /// Replace a project's library references, in priority order.
    pub fn set_library_references(
        &self,
        project: &str,
        refs: impl IntoIterator<Item = impl Into<SmolStr>>,
    ) -> Result<ProjectId, SessionError> {
        let (id, changed) = self.engine.modules.set_library_references(project, refs)?;
        if changed {
            tracing::trace!("{} library references changed", project);
        }
        Ok(id)
    }

    pub fn module_id(&self, project: &str, component: &str) -> Option<ModuleId> {
        self.engine.modules.find(project, component)
    }

    pub fn module_source(&self, module: ModuleId) -> Option<ModuleSource> {
        self.engine.modules.get(module)
    }

    pub fn modules(&self) -> Vec<ModuleSource> {
        self.engine.modules.modules()
    }

    // ------------------------------------------------------------------------
    // Passes
    // ------------------------------------------------------------------------

    /// Run a pass on the calling thread.
    ///
    /// Edits recorded since the last pass are folded into `changes`. If the
    /// token fires, the change set is kept for the next pass.
    pub fn run_blocking(&self, changes: ChangeSet, token: &CancellationToken) -> PassOutcome {
        let changes = self.take_pending(changes);
        let outcome = coordinator::run_pass(&self.engine, &changes, token);
        if outcome == PassOutcome::Cancelled {
            self.pending.lock().merge(changes);
        }
        outcome
    }

    /// Reparse and re-resolve everything on the calling thread.
    pub fn parse_blocking(&self, token: &CancellationToken) -> PassOutcome {
        self.run_blocking(ChangeSet::all(), token)
    }

    /// Start a pass on a background thread.
    ///
    /// A pass still in flight is cancelled and its change set carried into
    /// this one.
    pub fn begin_pass(&self, changes: ChangeSet) -> Result<PassTicket, SessionError> {
        let mut in_flight = self.in_flight.lock();
        let mut changes = self.take_pending(changes);
        if let Some(previous) = in_flight.take() {
            previous.token.cancel();
            if !previous.completed.load(Ordering::Acquire) {
                tracing::debug!("superseding the pass in flight");
                changes.merge(previous.changes);
            }
        }

        let token = CancellationToken::new();
        let completed = Arc::new(AtomicBool::new(false));
        let handle = {
            let engine = self.engine.clone();
            let pending = self.pending.clone();
            let token = token.clone();
            let completed = completed.clone();
            let changes = changes.clone();
            std::thread::Builder::new()
                .name(self.engine.config.pass_thread_name.clone())
                .spawn(move || {
                    let outcome = coordinator::run_pass(&engine, &changes, &token);
                    match outcome {
                        PassOutcome::Completed => completed.store(true, Ordering::Release),
                        PassOutcome::Cancelled => pending.lock().merge(changes),
                    }
                    outcome
                })
                .map_err(SessionError::Spawn)?
        };

        *in_flight = Some(InFlight {
            token: token.clone(),
            changes,
            completed,
        });
        Ok(PassTicket { handle, token })
    }

    fn take_pending(&self, changes: ChangeSet) -> ChangeSet {
        let mut merged = std::mem::take(&mut *self.pending.lock());
        merged.merge(changes);
        merged
    }

    // ------------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------------

    /// Query surface of the last completed pass.
    pub fn finder(&self) -> Arc<DeclarationFinder> {
        self.engine.finder.read().clone()
    }

    /// Every declaration, library ones included, as of the last completed
    /// pass.
    pub fn all_declarations(&self) -> Vec<Declaration> {
        self.finder().all_declarations().cloned().collect()
    }

    /// Declarations of user projects only.
    pub fn user_declarations(&self) -> Vec<Declaration> {
        self.finder().user_declarations().cloned().collect()
    }

    /// Aggregate state across every module.
    pub fn state(&self) -> ParserState {
        self.engine.states.aggregate()
    }

    pub fn module_state(&self, module: ModuleId) -> ParserState {
        self.engine.states.state(module)
    }

    /// Modules `module` references.
    pub fn dependencies_of(&self, module: ModuleId) -> Vec<ModuleId> {
        self.engine.dependencies.read().dependencies_of(module)
    }

    /// Modules referencing `module`.
    pub fn dependents_of(&self, module: ModuleId) -> Vec<ModuleId> {
        self.engine.dependencies.read().modules_depending_on(module)
    }

    /// Register a callback run at the end of every completed pass. Returns a
    /// handle for [`Session::unsubscribe`].
    pub fn subscribe(
        &self,
        listener: impl Fn(&StateChangedEvent) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener: StateListener = Arc::new(listener);
        self.engine.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.engine.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn interner(&self) -> &Arc<Interner> {
        &self.engine.interner
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.get_mut().take() {
            in_flight.token.cancel();
        }
    }
}

// ============================================================================
// TICKET
// ============================================================================

/// Handle on a background pass.
#[derive(Debug)]
pub struct PassTicket {
    handle: JoinHandle<PassOutcome>,
    token: CancellationToken,
}

impl PassTicket {
    /// Ask the pass to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the pass ends. A pass thread that panicked counts as
    /// cancelled.
    pub fn wait(self) -> PassOutcome {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!("pass thread panicked");
                PassOutcome::Cancelled
            }
        }
    }
}
