//! The resolution pipeline.
//!
//! A pass runs these stages in order, with a barrier between each:
//!
//! 1. [`sync`] - project declarations and external libraries
//! 2. [`parse`] - dirty modules to trees, in parallel
//! 3. [`declarations`] - trees to per-module declaration sets, in parallel,
//!    then supertypes across modules
//! 4. [`references`] - types, then bodies, of every affected module
//! 5. finalize - library failure states, a fresh finder, state publication
//!
//! [`coordinator`] drives the stages; everything a pass reads and writes
//! lives in [`Engine`].

pub mod builtins;
pub mod coordinator;
pub mod declarations;
pub mod parse;
pub mod references;
pub mod sync;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::{Mutex, RwLock};

use crate::base::Interner;
use crate::config::SessionConfig;
use crate::hir::{
    DeclarationFinder, DeclarationGraph, ModuleDependencyTracker, ModuleSet, StateChangedEvent,
    StateManager,
};
use crate::project::LibraryProvider;
use crate::syntax::Grammar;

pub use builtins::{ImplicitDeclaration, ImplicitDeclarationGenerator, default_generators};
pub use coordinator::{Carryover, PassOutcome};
pub use parse::{ParseCache, ParsedModule};

/// Callback run after every completed pass.
pub type StateListener = Arc<dyn Fn(&StateChangedEvent) + Send + Sync>;

/// Shared state of one session: host input, plug-ins and the stores every
/// pass updates.
pub struct Engine {
    pub config: SessionConfig,
    pub grammar: Arc<dyn Grammar>,
    pub provider: Arc<dyn LibraryProvider>,
    pub generators: Vec<Arc<dyn ImplicitDeclarationGenerator>>,
    pub modules: ModuleSet,
    pub interner: Arc<Interner>,
    pub graph: RwLock<DeclarationGraph>,
    pub parse_cache: RwLock<ParseCache>,
    pub dependencies: RwLock<ModuleDependencyTracker>,
    pub states: StateManager,
    /// Finder of the last completed pass.
    pub finder: RwLock<Arc<DeclarationFinder>>,
    pub listeners: RwLock<Vec<(u64, StateListener)>>,
    pub pool: rayon::ThreadPool,
    /// Declaration pass counter; a module's declarations remember the value
    /// they were built under.
    pub generation: AtomicU64,
    /// Serializes passes.
    pub pass_lock: Mutex<()>,
    /// What the last cancelled pass left undone.
    pub carryover: Mutex<Carryover>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("grammar", &self.grammar)
            .field("provider", &self.provider)
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}
