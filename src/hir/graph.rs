//! The declaration graph: the shared mutable store behind every pass.
//!
//! Declarations are owned per module (and per library), so a re-parse
//! replaces one module's set wholesale without renumbering anything else.
//! References live on their target declarations; `referenced_from` records
//! which targets a module has written to so they can be cleared in one
//! sweep before the module is re-resolved.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use super::declaration::{Declaration, IdentifierReference, UnboundReference};
use super::diagnostics::Diagnostic;
use super::ids::{DeclId, DeclOwner, LocalDeclId};
use crate::base::{LibraryId, ModuleId, Name, ProjectId, fold};
use crate::project::ExternalLibrary;
use crate::syntax::TypePath;

// ============================================================================
// DECLARATION SET
// ============================================================================

/// Declarations of one owner, indexed by local id and by name.
#[derive(Clone, Debug, Default)]
pub struct DeclarationSet {
    /// Indexed by `LocalDeclId`.
    decls: Vec<Declaration>,
    by_name: FxHashMap<Name, Vec<LocalDeclId>>,
    children: FxHashMap<LocalDeclId, Vec<LocalDeclId>>,
}

impl DeclarationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local id the next pushed declaration must carry.
    pub fn next_local(&self) -> LocalDeclId {
        LocalDeclId::new(self.decls.len() as u32)
    }

    /// Append a declaration. Its local id must be [`Self::next_local`].
    pub fn push(&mut self, decl: Declaration) -> LocalDeclId {
        let local = self.next_local();
        debug_assert_eq!(decl.id.local, local);
        self.by_name.entry(decl.key).or_default().push(local);
        if let Some(parent) = decl.parent.filter(|p| p.owner == decl.id.owner) {
            self.children.entry(parent.local).or_default().push(local);
        }
        self.decls.push(decl);
        local
    }

    pub fn get(&self, local: LocalDeclId) -> Option<&Declaration> {
        self.decls.get(local.index() as usize)
    }

    pub fn get_mut(&mut self, local: LocalDeclId) -> Option<&mut Declaration> {
        self.decls.get_mut(local.index() as usize)
    }

    /// The owner's root declaration (module or library project).
    pub fn root(&self) -> Option<&Declaration> {
        self.decls.first()
    }

    /// Declarations with the given name, in declaration order.
    pub fn named(&self, name: Name) -> &[LocalDeclId] {
        self.by_name.get(&name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct children of a declaration, in declaration order.
    pub fn children_of(&self, local: LocalDeclId) -> &[LocalDeclId] {
        self.children.get(&local).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Declaration> {
        self.decls.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Declaration> {
        self.decls.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

// ============================================================================
// MODULE AND LIBRARY ENTRIES
// ============================================================================

/// Everything the pipeline knows about one user module.
#[derive(Clone, Debug)]
pub struct ModuleDeclarations {
    pub module: ModuleId,
    pub project: ProjectId,
    pub set: DeclarationSet,
    /// `Implements` paths, resolved into supertypes after every
    /// declaration barrier.
    pub implements: Vec<TypePath>,
    /// Folded `Prefix_Event` handler names → implicit event declarations.
    pub handlers: FxHashMap<SmolStr, LocalDeclId>,
    /// Procedures that implement an interface member or handle an event,
    /// with their target. Filled by reference resolution.
    pub handler_links: Vec<(LocalDeclId, DeclId)>,
    /// Assignments to a function's own name inside its body. They set the
    /// return value and are kept apart from the function's references.
    pub return_assignments: Vec<(LocalDeclId, IdentifierReference)>,
    pub unbound: Vec<UnboundReference>,
    pub syntax_diagnostics: Vec<Diagnostic>,
    pub resolution_diagnostics: Vec<Diagnostic>,
    /// Declaration pass that built this set; later wins public-name clashes.
    pub generation: u64,
    /// Folded names visible outside the module, sorted.
    pub exported: Vec<SmolStr>,
}

impl ModuleDeclarations {
    pub fn new(module: ModuleId, project: ProjectId) -> Self {
        Self {
            module,
            project,
            set: DeclarationSet::new(),
            implements: Vec::new(),
            handlers: FxHashMap::default(),
            handler_links: Vec::new(),
            return_assignments: Vec::new(),
            unbound: Vec::new(),
            syntax_diagnostics: Vec::new(),
            resolution_diagnostics: Vec::new(),
            generation: 0,
            exported: Vec::new(),
        }
    }

    pub fn root(&self) -> Option<&Declaration> {
        self.set.root()
    }

    /// Recompute [`Self::exported`] from the declarations.
    pub fn compute_exported(&mut self) {
        let mut names: Vec<SmolStr> = self
            .set
            .iter()
            .filter(|d| d.is_exported())
            .map(|d| fold(&d.name))
            .collect();
        names.sort();
        names.dedup();
        self.exported = names;
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.syntax_diagnostics
            .iter()
            .chain(self.resolution_diagnostics.iter())
    }
}

/// The declarations of one loaded external library.
#[derive(Clone, Debug)]
pub struct LibraryDeclarations {
    pub id: LibraryId,
    pub name: SmolStr,
    pub source: Arc<ExternalLibrary>,
    pub set: DeclarationSet,
}

// ============================================================================
// GRAPH
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct DeclarationGraph {
    projects: IndexMap<ProjectId, Declaration>,
    modules: IndexMap<ModuleId, ModuleDeclarations>,
    libraries: IndexMap<LibraryId, LibraryDeclarations>,
    /// Folded library name → id
    library_ids: FxHashMap<SmolStr, LibraryId>,
    /// Module → declarations holding references written in that module
    referenced_from: FxHashMap<ModuleId, FxHashSet<DeclId>>,
    /// Loaded libraries per project, in reference-priority order
    project_libraries: FxHashMap<ProjectId, Vec<LibraryId>>,
    /// Library load failures per project
    library_diagnostics: FxHashMap<ProjectId, Vec<Diagnostic>>,
    next_library: u32,
}

impl DeclarationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn declaration(&self, id: DeclId) -> Option<&Declaration> {
        match id.owner {
            DeclOwner::Project(project) if id.is_root() => self.projects.get(&project),
            DeclOwner::Project(_) => None,
            DeclOwner::Module(module) => self.modules.get(&module)?.set.get(id.local),
            DeclOwner::Library(library) => self.libraries.get(&library)?.set.get(id.local),
        }
    }

    pub fn declaration_mut(&mut self, id: DeclId) -> Option<&mut Declaration> {
        match id.owner {
            DeclOwner::Project(project) if id.is_root() => self.projects.get_mut(&project),
            DeclOwner::Project(_) => None,
            DeclOwner::Module(module) => self.modules.get_mut(&module)?.set.get_mut(id.local),
            DeclOwner::Library(library) => {
                self.libraries.get_mut(&library)?.set.get_mut(id.local)
            }
        }
    }

    /// Every declaration: projects, then user modules, then libraries.
    pub fn all_declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.projects
            .values()
            .chain(self.modules.values().flat_map(|m| m.set.iter()))
            .chain(self.libraries.values().flat_map(|l| l.set.iter()))
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub fn insert_project(&mut self, decl: Declaration) {
        if let DeclOwner::Project(project) = decl.id.owner {
            self.projects.insert(project, decl);
        }
    }

    pub fn remove_project(&mut self, project: ProjectId) -> Option<Declaration> {
        self.library_diagnostics.remove(&project);
        self.project_libraries.remove(&project);
        self.projects.shift_remove(&project)
    }

    pub fn project(&self, project: ProjectId) -> Option<&Declaration> {
        self.projects.get(&project)
    }

    pub fn projects(&self) -> impl Iterator<Item = &Declaration> {
        self.projects.values()
    }

    pub fn set_project_libraries(&mut self, project: ProjectId, libraries: Vec<LibraryId>) {
        self.project_libraries.insert(project, libraries);
    }

    /// Loaded libraries a project references, highest priority first.
    pub fn project_libraries(&self, project: ProjectId) -> &[LibraryId] {
        self.project_libraries
            .get(&project)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn set_library_diagnostics(&mut self, project: ProjectId, diagnostics: Vec<Diagnostic>) {
        if diagnostics.is_empty() {
            self.library_diagnostics.remove(&project);
        } else {
            self.library_diagnostics.insert(project, diagnostics);
        }
    }

    pub fn library_diagnostics(&self, project: ProjectId) -> &[Diagnostic] {
        self.library_diagnostics
            .get(&project)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_library_diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.library_diagnostics.values().flatten()
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    pub fn module(&self, module: ModuleId) -> Option<&ModuleDeclarations> {
        self.modules.get(&module)
    }

    pub fn module_mut(&mut self, module: ModuleId) -> Option<&mut ModuleDeclarations> {
        self.modules.get_mut(&module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleDeclarations> {
        self.modules.values()
    }

    pub fn modules_mut(&mut self) -> impl Iterator<Item = &mut ModuleDeclarations> {
        self.modules.values_mut()
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.modules.keys().copied().collect()
    }

    /// Install a freshly built module, discarding its old declarations.
    pub fn replace_module(&mut self, decls: ModuleDeclarations) -> Option<ModuleDeclarations> {
        self.modules.insert(decls.module, decls)
    }

    /// Remove a module with its declarations and every reference written
    /// from it.
    pub fn remove_module(&mut self, module: ModuleId) -> Option<ModuleDeclarations> {
        self.clear_references_from(module);
        self.modules.shift_remove(&module)
    }

    // ------------------------------------------------------------------
    // Libraries
    // ------------------------------------------------------------------

    pub fn library_id(&self, name: &str) -> Option<LibraryId> {
        self.library_ids.get(&fold(name)).copied()
    }

    pub fn library(&self, library: LibraryId) -> Option<&LibraryDeclarations> {
        self.libraries.get(&library)
    }

    pub fn libraries(&self) -> impl Iterator<Item = &LibraryDeclarations> {
        self.libraries.values()
    }

    /// Reserve an id for a library about to be built.
    pub fn allocate_library_id(&mut self) -> LibraryId {
        let id = LibraryId::new(self.next_library);
        self.next_library += 1;
        id
    }

    pub fn insert_library(&mut self, library: LibraryDeclarations) {
        self.library_ids.insert(fold(&library.name), library.id);
        self.libraries.insert(library.id, library);
    }

    pub fn remove_library(&mut self, library: LibraryId) -> Option<LibraryDeclarations> {
        let removed = self.libraries.shift_remove(&library)?;
        self.library_ids.remove(&fold(&removed.name));
        Some(removed)
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// Forget everything reference resolution wrote for `module`: its
    /// references on every target, unbound references, resolution
    /// diagnostics, handler links and the resolved types of its own
    /// declarations.
    pub fn clear_references_from(&mut self, module: ModuleId) {
        if let Some(targets) = self.referenced_from.remove(&module) {
            for target in targets {
                if let Some(decl) = self.declaration_mut(target) {
                    decl.references.retain(|r| r.module != module);
                }
            }
        }
        if let Some(entry) = self.modules.get_mut(&module) {
            entry.unbound.clear();
            entry.resolution_diagnostics.clear();
            entry.handler_links.clear();
            entry.return_assignments.clear();
            for decl in entry.set.iter_mut() {
                decl.as_type.clear_resolution();
            }
        }
    }

    /// Append a reference to `target`. Returns `false` if the target no
    /// longer exists.
    pub fn add_reference(&mut self, target: DeclId, reference: IdentifierReference) -> bool {
        let from = reference.module;
        let Some(decl) = self.declaration_mut(target) else {
            return false;
        };
        decl.references.push(reference);
        self.referenced_from.entry(from).or_default().insert(target);
        true
    }

    /// Children of any declaration, in declaration order. A project's
    /// children are its module declarations.
    pub fn children(&self, id: DeclId) -> Vec<DeclId> {
        match id.owner {
            DeclOwner::Project(project) => self
                .modules
                .values()
                .filter(|m| m.project == project)
                .map(|m| DeclId::module(m.module))
                .collect(),
            DeclOwner::Module(module) => self
                .modules
                .get(&module)
                .map(|m| {
                    m.set
                        .children_of(id.local)
                        .iter()
                        .map(|&local| DeclId::new(id.owner, local))
                        .collect()
                })
                .unwrap_or_default(),
            DeclOwner::Library(library) => self
                .libraries
                .get(&library)
                .map(|l| {
                    l.set
                        .children_of(id.local)
                        .iter()
                        .map(|&local| DeclId::new(id.owner, local))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Targets `module` currently holds references on.
    pub fn targets_referenced_from(&self, module: ModuleId) -> Vec<DeclId> {
        let mut out: Vec<DeclId> = self
            .referenced_from
            .get(&module)
            .into_iter()
            .flatten()
            .copied()
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{Interner, Selection, TextRange};
    use crate::hir::declaration::DeclarationKind;

    fn module_with(
        interner: &Interner,
        module: ModuleId,
        names: &[&str],
    ) -> ModuleDeclarations {
        let project = ProjectId::new(0);
        let mut entry = ModuleDeclarations::new(module, project);
        let owner = DeclOwner::Module(module);
        let root = Declaration::new(
            DeclId::new(owner, LocalDeclId::ROOT),
            format!("Mod{}", module.index()),
            interner.intern(&format!("Mod{}", module.index())),
            DeclarationKind::ProceduralModule,
            DeclId::project(project),
        );
        entry.set.push(root);
        for name in names {
            let mut decl = Declaration::new(
                DeclId::new(owner, entry.set.next_local()),
                *name,
                interner.intern(name),
                DeclarationKind::Procedure,
                DeclId::project(project),
            );
            decl.parent = Some(DeclId::module(module));
            entry.set.push(decl);
        }
        entry
    }

    fn reference(module: ModuleId, name: &str) -> IdentifierReference {
        IdentifierReference {
            module,
            parent_scope: DeclId::module(module),
            range: TextRange::default(),
            selection: Selection::default(),
            identifier: name.into(),
            is_assignment: false,
            is_member_access: false,
            is_ambiguous: false,
        }
    }

    #[test]
    fn test_declaration_set_indexes() {
        let interner = Interner::new();
        let entry = module_with(&interner, ModuleId::new(0), &["Foo", "Bar", "foo"]);

        assert_eq!(entry.set.len(), 4);
        assert_eq!(entry.set.named(interner.intern("FOO")).len(), 2);
        assert_eq!(entry.set.children_of(LocalDeclId::ROOT).len(), 3);
        assert!(entry.set.named(interner.intern("missing")).is_empty());
    }

    #[test]
    fn test_clear_references_from_only_touches_that_module() {
        let interner = Interner::new();
        let mut graph = DeclarationGraph::new();
        let a = ModuleId::new(0);
        let b = ModuleId::new(1);
        let c = ModuleId::new(2);
        graph.replace_module(module_with(&interner, a, &["Foo"]));
        graph.replace_module(module_with(&interner, b, &[]));
        graph.replace_module(module_with(&interner, c, &[]));

        let foo = DeclId::new(DeclOwner::Module(a), LocalDeclId::new(1));
        assert!(graph.add_reference(foo, reference(b, "Foo")));
        assert!(graph.add_reference(foo, reference(c, "Foo")));
        assert_eq!(graph.targets_referenced_from(b), vec![foo]);

        graph.clear_references_from(b);

        let refs = &graph.declaration(foo).unwrap().references;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].module, c);
        assert!(graph.targets_referenced_from(b).is_empty());
    }

    #[test]
    fn test_remove_module_drops_its_references() {
        let interner = Interner::new();
        let mut graph = DeclarationGraph::new();
        let a = ModuleId::new(0);
        let b = ModuleId::new(1);
        graph.replace_module(module_with(&interner, a, &["Foo"]));
        graph.replace_module(module_with(&interner, b, &[]));
        let foo = DeclId::new(DeclOwner::Module(a), LocalDeclId::new(1));
        graph.add_reference(foo, reference(b, "Foo"));

        graph.remove_module(b);

        assert!(graph.module(b).is_none());
        assert!(graph.declaration(foo).unwrap().references.is_empty());
        assert!(graph.declaration(DeclId::module(b)).is_none());
    }

    #[test]
    fn test_reference_to_missing_target_is_refused() {
        let mut graph = DeclarationGraph::new();
        let ghost = DeclId::module(ModuleId::new(9));
        assert!(!graph.add_reference(ghost, reference(ModuleId::new(0), "x")));
        assert!(graph.targets_referenced_from(ModuleId::new(0)).is_empty());
    }

    #[test]
    fn test_exported_signature_ignores_private_members() {
        let interner = Interner::new();
        let mut entry = module_with(&interner, ModuleId::new(0), &["Shown", "Hidden"]);
        if let Some(hidden) = entry.set.get_mut(LocalDeclId::new(2)) {
            hidden.accessibility = crate::hir::declaration::Accessibility::Private;
        }
        entry.compute_exported();
        assert_eq!(entry.exported, vec![SmolStr::new("mod0"), SmolStr::new("shown")]);
    }
}
