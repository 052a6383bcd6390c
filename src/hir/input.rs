//! Change sets handed to a resolution pass.

use indexmap::IndexSet;

use crate::base::ModuleId;

/// The modules a pass is asked to re-process.
///
/// This is an input to the pipeline: the host says what it touched, and
/// the orchestrator widens it to everything that depends on those modules.
/// [`ChangeSet::all`] requests a full reparse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    all: bool,
    modules: IndexSet<ModuleId>,
}

impl ChangeSet {
    /// Nothing explicitly changed; the pass still picks up edits recorded
    /// through version numbers and resumes interrupted work.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every module.
    pub fn all() -> Self {
        Self {
            all: true,
            modules: IndexSet::new(),
        }
    }

    pub fn modules(modules: impl IntoIterator<Item = ModuleId>) -> Self {
        Self {
            all: false,
            modules: modules.into_iter().collect(),
        }
    }

    /// Add a module to the change set.
    pub fn insert(&mut self, module: ModuleId) {
        if !self.all {
            self.modules.insert(module);
        }
    }

    /// Union with another change set.
    pub fn merge(&mut self, other: ChangeSet) {
        if other.all {
            self.all = true;
            self.modules.clear();
        } else if !self.all {
            self.modules.extend(other.modules);
        }
    }

    /// Check if a module is covered by the change set.
    pub fn contains(&self, module: ModuleId) -> bool {
        self.all || self.modules.contains(&module)
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.modules.is_empty()
    }

    /// Iterate over explicitly listed modules (empty for [`ChangeSet::all`]).
    pub fn iter(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_set_basic() {
        let mut changes = ChangeSet::none();
        assert!(changes.is_empty());

        changes.insert(ModuleId::new(0));
        changes.insert(ModuleId::new(1));
        changes.insert(ModuleId::new(0));

        assert_eq!(changes.iter().count(), 2);
        assert!(changes.contains(ModuleId::new(1)));
        assert!(!changes.contains(ModuleId::new(2)));
    }

    #[test]
    fn test_merge_is_a_union() {
        let mut changes = ChangeSet::modules([ModuleId::new(0)]);
        changes.merge(ChangeSet::modules([ModuleId::new(3)]));
        assert!(changes.contains(ModuleId::new(0)));
        assert!(changes.contains(ModuleId::new(3)));

        changes.merge(ChangeSet::all());
        assert!(changes.is_all());
        assert!(changes.contains(ModuleId::new(42)));

        changes.merge(ChangeSet::modules([ModuleId::new(5)]));
        assert!(changes.is_all());
        assert_eq!(changes.iter().count(), 0);
    }
}
