//! Module set management for tracking host components.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::base::{ModuleId, ProjectId, fold, is_identifier};
use crate::error::SessionError;

/// What sort of VBA component a module is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// A standard (`.bas`) module.
    Standard,
    /// A class (`.cls`) module.
    Class,
    /// A user form (`.frm`).
    UserForm,
    /// A host document module such as `ThisWorkbook` or `Sheet1`.
    Document,
}

impl ComponentKind {
    /// Class modules, forms and documents all declare a class.
    pub fn is_class_like(self) -> bool {
        !matches!(self, ComponentKind::Standard)
    }

    /// Kind implied by an exported file's extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match fold(ext).as_str() {
            "bas" => Some(ComponentKind::Standard),
            "cls" => Some(ComponentKind::Class),
            "frm" => Some(ComponentKind::UserForm),
            "doccls" => Some(ComponentKind::Document),
            _ => None,
        }
    }
}

/// A snapshot of one module as last reported by the host.
#[derive(Clone, Debug)]
pub struct ModuleSource {
    pub id: ModuleId,
    pub project: ProjectId,
    /// Component name as written by the host.
    pub name: SmolStr,
    pub kind: ComponentKind,
    pub text: Arc<str>,
    /// Bumped whenever the text or kind changes; starts at 1.
    pub version: u64,
}

/// A user project and the libraries it references.
#[derive(Clone, Debug)]
pub struct ProjectEntry {
    pub id: ProjectId,
    pub name: SmolStr,
    /// Library names in priority order, as the host gave them.
    pub library_refs: Vec<SmolStr>,
    /// Bumped whenever `library_refs` changes.
    pub refs_version: u64,
}

/// Result of [`ModuleSet::upsert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Upserted {
    pub module: ModuleId,
    pub project: ProjectId,
    /// `false` when the host re-sent identical text and kind.
    pub changed: bool,
}

/// Manages the mapping between host component identities and ModuleIds.
///
/// This is the "module database" that assigns stable IDs to
/// `(project, component)` pairs and tracks their text. Names compare
/// case-insensitively.
#[derive(Debug, Default)]
pub struct ModuleSet {
    inner: RwLock<ModuleSetInner>,
}

#[derive(Debug, Default)]
struct ModuleSetInner {
    projects: IndexMap<ProjectId, ProjectEntry>,
    /// Folded project name → ProjectId
    project_ids: FxHashMap<SmolStr, ProjectId>,
    modules: IndexMap<ModuleId, ModuleSource>,
    /// (project, folded component name) → ModuleId
    module_ids: FxHashMap<(ProjectId, SmolStr), ModuleId>,
    next_module: u32,
    next_project: u32,
}

impl ModuleSetInner {
    fn ensure_project(&mut self, name: &str) -> Result<ProjectId, SessionError> {
        if !is_identifier(name) {
            return Err(SessionError::InvalidName(SmolStr::new(name)));
        }
        let key = fold(name);
        if let Some(&id) = self.project_ids.get(&key) {
            return Ok(id);
        }
        let id = ProjectId::new(self.next_project);
        self.next_project += 1;
        self.project_ids.insert(key, id);
        self.projects.insert(
            id,
            ProjectEntry {
                id,
                name: SmolStr::new(name),
                library_refs: Vec::new(),
                refs_version: 0,
            },
        );
        Ok(id)
    }
}

impl ModuleSet {
    /// Create a new empty module set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a module.
    ///
    /// The version only moves when the text or kind actually changed, so
    /// re-sending an unchanged module does not dirty it.
    pub fn upsert(
        &self,
        project: &str,
        component: &str,
        kind: ComponentKind,
        text: impl Into<Arc<str>>,
    ) -> Result<Upserted, SessionError> {
        if !is_identifier(component) {
            return Err(SessionError::InvalidName(SmolStr::new(component)));
        }
        let text = text.into();
        let mut inner = self.inner.write();
        let project_id = inner.ensure_project(project)?;
        let key = (project_id, fold(component));

        if let Some(&id) = inner.module_ids.get(&key) {
            let module = &mut inner.modules[&id];
            let changed = module.kind != kind || module.text != text;
            if changed {
                module.kind = kind;
                module.text = text;
                module.version += 1;
            }
            module.name = SmolStr::new(component);
            return Ok(Upserted {
                module: id,
                project: project_id,
                changed,
            });
        }

        let id = ModuleId::new(inner.next_module);
        inner.next_module += 1;
        inner.module_ids.insert(key, id);
        inner.modules.insert(
            id,
            ModuleSource {
                id,
                project: project_id,
                name: SmolStr::new(component),
                kind,
                text,
                version: 1,
            },
        );
        Ok(Upserted {
            module: id,
            project: project_id,
            changed: true,
        })
    }

    /// Remove a module, returning the id it had.
    pub fn remove(&self, project: &str, component: &str) -> Result<ModuleId, SessionError> {
        let mut inner = self.inner.write();
        let project_id = *inner
            .project_ids
            .get(&fold(project))
            .ok_or_else(|| SessionError::UnknownProject(SmolStr::new(project)))?;
        let id = inner
            .module_ids
            .remove(&(project_id, fold(component)))
            .ok_or_else(|| SessionError::UnknownModule {
                project: SmolStr::new(project),
                component: SmolStr::new(component),
            })?;
        inner.modules.shift_remove(&id);
        Ok(id)
    }

    /// Replace a project's library references, creating the project if it
    /// is new. Returns whether the list changed.
    pub fn set_library_references(
        &self,
        project: &str,
        refs: impl IntoIterator<Item = impl Into<SmolStr>>,
    ) -> Result<(ProjectId, bool), SessionError> {
        let refs: Vec<SmolStr> = refs.into_iter().map(Into::into).collect();
        let mut inner = self.inner.write();
        let id = inner.ensure_project(project)?;
        let entry = &mut inner.projects[&id];
        let same = entry.library_refs.len() == refs.len()
            && entry
                .library_refs
                .iter()
                .zip(&refs)
                .all(|(a, b)| fold(a) == fold(b));
        if !same {
            entry.library_refs = refs;
            entry.refs_version += 1;
        }
        Ok((id, !same))
    }

    /// Get a module snapshot.
    pub fn get(&self, id: ModuleId) -> Option<ModuleSource> {
        self.inner.read().modules.get(&id).cloned()
    }

    /// Find a module by its host identity.
    pub fn find(&self, project: &str, component: &str) -> Option<ModuleId> {
        let inner = self.inner.read();
        let project_id = inner.project_ids.get(&fold(project))?;
        inner
            .module_ids
            .get(&(*project_id, fold(component)))
            .copied()
    }

    pub fn find_project(&self, name: &str) -> Option<ProjectId> {
        self.inner.read().project_ids.get(&fold(name)).copied()
    }

    pub fn project(&self, id: ProjectId) -> Option<ProjectEntry> {
        self.inner.read().projects.get(&id).cloned()
    }

    /// All modules in insertion order.
    pub fn modules(&self) -> Vec<ModuleSource> {
        self.inner.read().modules.values().cloned().collect()
    }

    /// Iterate over all module IDs.
    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.inner.read().modules.keys().copied().collect()
    }

    /// Modules of one project in insertion order.
    pub fn modules_of(&self, project: ProjectId) -> Vec<ModuleId> {
        self.inner
            .read()
            .modules
            .values()
            .filter(|m| m.project == project)
            .map(|m| m.id)
            .collect()
    }

    pub fn projects(&self) -> Vec<ProjectEntry> {
        self.inner.read().projects.values().cloned().collect()
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.inner.read().modules.contains_key(&id)
    }

    /// Get the number of modules.
    pub fn len(&self) -> usize {
        self.inner.read().modules.len()
    }

    /// Check if the module set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
