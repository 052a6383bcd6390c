//! Per-module pipeline states and the aggregate the host sees.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::dependencies::ModuleDependencyTracker;
use crate::base::ModuleId;

/// Where a module (or the whole session) stands in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParserState {
    Unparsed,
    Parsing,
    Parsed,
    ResolvingDeclarations,
    ResolvedDeclarations,
    ResolvingReferences,
    Ready,
    /// The last parse reported syntax errors.
    Error,
    /// The module could not be resolved this pass.
    ResolverError,
}

impl ParserState {
    /// Position along the happy path; `None` for the failure states.
    pub fn progress(self) -> Option<u8> {
        match self {
            ParserState::Unparsed => Some(0),
            ParserState::Parsing => Some(1),
            ParserState::Parsed => Some(2),
            ParserState::ResolvingDeclarations => Some(3),
            ParserState::ResolvedDeclarations => Some(4),
            ParserState::ResolvingReferences => Some(5),
            ParserState::Ready => Some(6),
            ParserState::Error | ParserState::ResolverError => None,
        }
    }

    pub fn is_failed(self) -> bool {
        self.progress().is_none()
    }

    /// Whether a pass is finished with the module.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ParserState::Ready | ParserState::Error | ParserState::ResolverError
        )
    }

    /// Whether a module in this state no longer holds back dependents that
    /// want to enter `target`. Failed modules never block.
    pub fn is_at_or_past(self, target: ParserState) -> bool {
        match (self.progress(), target.progress()) {
            (None, _) => true,
            (Some(mine), Some(wanted)) => mine >= wanted,
            (Some(_), None) => false,
        }
    }
}

/// The aggregate published at the end of a pass, with the one before it,
/// so listeners can tell a fresh failure from a lingering one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChangedEvent {
    pub previous: ParserState,
    pub current: ParserState,
}

impl StateChangedEvent {
    /// The session was already in this failure state last pass.
    pub fn is_still_broken(&self) -> bool {
        self.current.is_failed() && self.previous == self.current
    }

    /// The session just entered a failure state.
    pub fn is_freshly_broken(&self) -> bool {
        self.current.is_failed() && self.previous != self.current
    }
}

/// Tracks every module's state and the last published aggregate.
#[derive(Debug)]
pub struct StateManager {
    inner: RwLock<StateInner>,
}

#[derive(Debug)]
struct StateInner {
    modules: FxHashMap<ModuleId, ParserState>,
    published: ParserState,
    has_completed_pass: bool,
}

impl Default for StateManager {
    fn default() -> Self {
        Self {
            inner: RwLock::new(StateInner {
                modules: FxHashMap::default(),
                published: ParserState::Unparsed,
                has_completed_pass: false,
            }),
        }
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of one module; unknown modules are `Unparsed`.
    pub fn state(&self, module: ModuleId) -> ParserState {
        self.inner
            .read()
            .modules
            .get(&module)
            .copied()
            .unwrap_or(ParserState::Unparsed)
    }

    pub fn set(&self, module: ModuleId, state: ParserState) {
        self.inner.write().modules.insert(module, state);
    }

    pub fn set_many(&self, modules: impl IntoIterator<Item = ModuleId>, state: ParserState) {
        let mut inner = self.inner.write();
        for module in modules {
            inner.modules.insert(module, state);
        }
    }

    pub fn remove(&self, module: ModuleId) {
        self.inner.write().modules.remove(&module);
    }

    /// Move a batch of modules to `target`.
    ///
    /// A module only advances once every dependency outside the batch is at
    /// or past `target`; dependencies inside the batch advance together.
    /// Failed modules keep their state. Returns the modules that may do the
    /// stage's work: everything advanced plus `Error` modules, which are
    /// still resolved. `ResolverError` modules are left out.
    pub fn advance_batch(
        &self,
        modules: &[ModuleId],
        target: ParserState,
        deps: &ModuleDependencyTracker,
    ) -> Vec<ModuleId> {
        let mut inner = self.inner.write();
        let in_batch: rustc_hash::FxHashSet<ModuleId> = modules.iter().copied().collect();
        let mut ready = Vec::with_capacity(modules.len());

        for &module in modules {
            let current = inner
                .modules
                .get(&module)
                .copied()
                .unwrap_or(ParserState::Unparsed);
            match current {
                ParserState::ResolverError => continue,
                ParserState::Error => {
                    ready.push(module);
                    continue;
                }
                _ => {}
            }

            let laggard = deps.dependencies_of(module).into_iter().find(|dep| {
                !in_batch.contains(dep)
                    && !inner
                        .modules
                        .get(dep)
                        .copied()
                        .unwrap_or(ParserState::Ready)
                        .is_at_or_past(target)
            });
            if let Some(dep) = laggard {
                tracing::warn!(
                    "holding {} at {:?}: dependency {} has not reached {:?}",
                    module,
                    current,
                    dep,
                    target
                );
                continue;
            }

            inner.modules.insert(module, target);
            ready.push(module);
        }
        ready
    }

    /// Aggregate over the current module states.
    pub fn aggregate(&self) -> ParserState {
        let inner = self.inner.read();
        aggregate_of(inner.modules.values().copied(), inner.has_completed_pass)
    }

    /// Modules a pass left before a terminal state.
    pub fn unfinished_modules(&self) -> Vec<ModuleId> {
        let mut out: Vec<ModuleId> = self
            .inner
            .read()
            .modules
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(&m, _)| m)
            .collect();
        out.sort();
        out
    }

    /// Modules currently in `state`.
    pub fn modules_in(&self, state: ParserState) -> Vec<ModuleId> {
        let mut out: Vec<ModuleId> = self
            .inner
            .read()
            .modules
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(&m, _)| m)
            .collect();
        out.sort();
        out
    }

    /// Publish the aggregate at the end of a completed pass.
    pub fn publish(&self) -> StateChangedEvent {
        let mut inner = self.inner.write();
        inner.has_completed_pass = true;
        let current = aggregate_of(inner.modules.values().copied(), true);
        let previous = std::mem::replace(&mut inner.published, current);
        StateChangedEvent { previous, current }
    }

    /// The aggregate as of the last completed pass.
    pub fn published(&self) -> ParserState {
        self.inner.read().published
    }
}

fn aggregate_of(
    states: impl Iterator<Item = ParserState>,
    has_completed_pass: bool,
) -> ParserState {
    let mut any = false;
    let mut has_error = false;
    let mut earliest = ParserState::Ready;
    for state in states {
        any = true;
        match state {
            ParserState::ResolverError => return ParserState::ResolverError,
            ParserState::Error => has_error = true,
            other => {
                if other.progress() < earliest.progress() {
                    earliest = other;
                }
            }
        }
    }
    if !any {
        return if has_completed_pass {
            ParserState::Ready
        } else {
            ParserState::Unparsed
        };
    }
    if has_error { ParserState::Error } else { earliest }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn m(i: u32) -> ModuleId {
        ModuleId::new(i)
    }

    #[rstest]
    #[case(&[ParserState::Ready, ParserState::Parsed], ParserState::Parsed)]
    #[case(&[ParserState::Ready, ParserState::Error, ParserState::Parsing], ParserState::Error)]
    #[case(&[ParserState::Error, ParserState::ResolverError], ParserState::ResolverError)]
    #[case(&[ParserState::Ready, ParserState::Ready], ParserState::Ready)]
    fn test_aggregate_is_worst(#[case] states: &[ParserState], #[case] expected: ParserState) {
        let manager = StateManager::new();
        for (i, state) in states.iter().enumerate() {
            manager.set(m(i as u32), *state);
        }
        assert_eq!(manager.aggregate(), expected);
    }

    #[test]
    fn test_empty_session_is_ready_after_a_pass() {
        let manager = StateManager::new();
        assert_eq!(manager.aggregate(), ParserState::Unparsed);

        let event = manager.publish();
        assert_eq!(event.previous, ParserState::Unparsed);
        assert_eq!(event.current, ParserState::Ready);
        assert_eq!(manager.published(), ParserState::Ready);
    }

    #[test]
    fn test_failed_dependencies_never_block() {
        assert!(ParserState::Error.is_at_or_past(ParserState::ResolvingReferences));
        assert!(ParserState::Ready.is_at_or_past(ParserState::Parsed));
        assert!(!ParserState::Parsing.is_at_or_past(ParserState::Parsed));
    }

    #[test]
    fn test_advance_batch_holds_back_on_lagging_dependency() {
        let manager = StateManager::new();
        let mut deps = ModuleDependencyTracker::new();
        deps.record_reference(m(1), m(0));
        manager.set(m(0), ParserState::Parsing);
        manager.set(m(1), ParserState::Parsed);

        let ready = manager.advance_batch(&[m(1)], ParserState::ResolvingReferences, &deps);
        assert!(ready.is_empty());
        assert_eq!(manager.state(m(1)), ParserState::Parsed);

        let ready = manager.advance_batch(&[m(0), m(1)], ParserState::ResolvingReferences, &deps);
        assert_eq!(ready, vec![m(0), m(1)]);
    }

    #[test]
    fn test_advance_batch_keeps_failed_states() {
        let manager = StateManager::new();
        let deps = ModuleDependencyTracker::new();
        manager.set(m(0), ParserState::Error);
        manager.set(m(1), ParserState::ResolverError);

        let ready = manager.advance_batch(&[m(0), m(1)], ParserState::ResolvingReferences, &deps);
        assert_eq!(ready, vec![m(0)]);
        assert_eq!(manager.state(m(0)), ParserState::Error);
        assert_eq!(manager.state(m(1)), ParserState::ResolverError);
    }

    #[test]
    fn test_state_changed_event_flags() {
        let fresh = StateChangedEvent {
            previous: ParserState::Ready,
            current: ParserState::Error,
        };
        let still = StateChangedEvent {
            previous: ParserState::Error,
            current: ParserState::Error,
        };
        assert!(fresh.is_freshly_broken() && !fresh.is_still_broken());
        assert!(still.is_still_broken() && !still.is_freshly_broken());
    }
}
