//! Module dependency tracking.
//!
//! An edge `from → to` means code in `from` references a declaration that
//! lives in `to`. When `to` changes, `from` has to be re-resolved. Cycles
//! are ordinary (two modules calling each other) and every traversal keeps
//! a visited set.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::base::ModuleId;

/// Directed graph of module-to-module references.
#[derive(Clone, Debug, Default)]
pub struct ModuleDependencyTracker {
    /// from → modules it references
    forward: FxHashMap<ModuleId, FxHashSet<ModuleId>>,
    /// to → modules referencing it
    reverse: FxHashMap<ModuleId, FxHashSet<ModuleId>>,
}

impl ModuleDependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` references something declared in `to`.
    /// Self edges carry no information and are ignored.
    pub fn record_reference(&mut self, from: ModuleId, to: ModuleId) {
        if from == to {
            return;
        }
        self.forward.entry(from).or_default().insert(to);
        self.reverse.entry(to).or_default().insert(from);
    }

    /// Drop every outgoing edge of `module`.
    pub fn remove_all_references_from(&mut self, module: ModuleId) {
        let Some(targets) = self.forward.remove(&module) else {
            return;
        };
        for to in targets {
            if let Some(sources) = self.reverse.get_mut(&to) {
                sources.remove(&module);
                if sources.is_empty() {
                    self.reverse.remove(&to);
                }
            }
        }
    }

    /// Modules that reference `module` directly, sorted.
    pub fn modules_depending_on(&self, module: ModuleId) -> Vec<ModuleId> {
        sorted(self.reverse.get(&module))
    }

    /// Modules that `module` references directly, sorted.
    pub fn dependencies_of(&self, module: ModuleId) -> Vec<ModuleId> {
        sorted(self.forward.get(&module))
    }

    pub fn has_edge(&self, from: ModuleId, to: ModuleId) -> bool {
        self.forward.get(&from).is_some_and(|t| t.contains(&to))
    }

    /// Everything that has to be re-resolved when `changed` modules change:
    /// the inputs plus every module that transitively depends on them.
    pub fn affected_set(&self, changed: impl IntoIterator<Item = ModuleId>) -> FxHashSet<ModuleId> {
        let mut visited = FxHashSet::default();
        let mut stack: Vec<ModuleId> = changed.into_iter().collect();
        while let Some(module) = stack.pop() {
            if !visited.insert(module) {
                continue;
            }
            if let Some(sources) = self.reverse.get(&module) {
                stack.extend(sources.iter().copied().filter(|m| !visited.contains(m)));
            }
        }
        visited
    }

    /// Remove a module and all edges touching it.
    pub fn remove_module(&mut self, module: ModuleId) {
        self.remove_all_references_from(module);
        if let Some(sources) = self.reverse.remove(&module) {
            for from in sources {
                if let Some(targets) = self.forward.get_mut(&from) {
                    targets.remove(&module);
                    if targets.is_empty() {
                        self.forward.remove(&from);
                    }
                }
            }
        }
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(FxHashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

fn sorted(set: Option<&FxHashSet<ModuleId>>) -> Vec<ModuleId> {
    let mut out: Vec<ModuleId> = set.into_iter().flatten().copied().collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(i: u32) -> ModuleId {
        ModuleId::new(i)
    }

    #[test]
    fn test_record_and_query() {
        let mut deps = ModuleDependencyTracker::new();
        deps.record_reference(m(1), m(0));
        deps.record_reference(m(2), m(0));
        deps.record_reference(m(1), m(0));

        assert_eq!(deps.modules_depending_on(m(0)), vec![m(1), m(2)]);
        assert_eq!(deps.dependencies_of(m(1)), vec![m(0)]);
        assert_eq!(deps.edge_count(), 2);
    }

    #[test]
    fn test_self_edges_ignored() {
        let mut deps = ModuleDependencyTracker::new();
        deps.record_reference(m(3), m(3));
        assert!(deps.is_empty());
    }

    #[test]
    fn test_affected_set_is_transitive_and_survives_cycles() {
        let mut deps = ModuleDependencyTracker::new();
        // 2 → 1 → 0, and 0 → 2 closes a cycle
        deps.record_reference(m(1), m(0));
        deps.record_reference(m(2), m(1));
        deps.record_reference(m(0), m(2));
        deps.record_reference(m(4), m(3));

        let affected = deps.affected_set([m(0)]);
        assert_eq!(affected.len(), 3);
        assert!(affected.contains(&m(0)) && affected.contains(&m(1)) && affected.contains(&m(2)));
        assert!(!affected.contains(&m(4)));
    }

    #[test]
    fn test_remove_all_references_from() {
        let mut deps = ModuleDependencyTracker::new();
        deps.record_reference(m(1), m(0));
        deps.record_reference(m(1), m(2));
        deps.record_reference(m(3), m(0));

        deps.remove_all_references_from(m(1));

        assert!(deps.dependencies_of(m(1)).is_empty());
        assert_eq!(deps.modules_depending_on(m(0)), vec![m(3)]);
        assert!(deps.modules_depending_on(m(2)).is_empty());
    }

    #[test]
    fn test_remove_module_drops_both_directions() {
        let mut deps = ModuleDependencyTracker::new();
        deps.record_reference(m(1), m(0));
        deps.record_reference(m(0), m(2));

        deps.remove_module(m(0));

        assert!(deps.is_empty());
        assert!(!deps.has_edge(m(1), m(0)));
    }
}
