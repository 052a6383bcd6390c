//! Name resolution: resolving identifiers to their declarations.
//!
//! # Architecture
//!
//! Resolution is split the same way in every pass:
//!
//! 1. **Declaration building** produces per-module [`DeclarationSet`]s
//! 2. **Scope maps** ([`ResolutionIndex`]) are rebuilt from the graph once
//!    the declaration barrier is passed: per project the module names,
//!    public standard-module members, public enum members and types, and
//!    the libraries in priority order
//! 3. **Query-time resolution** ([`Resolver`]) walks procedure → module →
//!    project → libraries using those maps
//!
//! VBA scoping is flat: there are no nested blocks, so the chain for any
//! usage site is just the enclosing procedure, its module and the project.
//!
//! [`DeclarationSet`]: super::graph::DeclarationSet

use rustc_hash::FxHashMap;

use super::declaration::{Declaration, DeclarationKind};
use super::graph::DeclarationGraph;
use super::ids::{DeclId, DeclOwner};
use super::source::ComponentKind;
use crate::base::{Interner, LibraryId, ModuleId, Name, ProjectId, fold};
use crate::syntax::TypePath;

// ============================================================================
// SCOPE MAPS (Pre-computed after the declaration barrier)
// ============================================================================

/// What one user project makes visible without qualification.
#[derive(Clone, Debug, Default)]
pub struct ProjectScope {
    /// Module name → module declaration.
    pub modules: FxHashMap<Name, DeclId>,
    /// Non-private members of standard modules.
    pub std_members: FxHashMap<Name, Vec<DeclId>>,
    /// Members of non-private enums in any module.
    pub enum_members: FxHashMap<Name, Vec<DeclId>>,
    /// Classes, and non-private user-defined types and enums.
    pub types: FxHashMap<Name, Vec<DeclId>>,
    /// Loaded libraries, highest priority first.
    pub libraries: Vec<LibraryId>,
}

/// What one library makes visible to the projects referencing it.
#[derive(Clone, Debug, Default)]
pub struct LibraryScope {
    pub root: Option<DeclId>,
    pub modules: FxHashMap<Name, DeclId>,
    pub std_members: FxHashMap<Name, Vec<DeclId>>,
    pub enum_members: FxHashMap<Name, Vec<DeclId>>,
    pub types: FxHashMap<Name, DeclId>,
}

/// Scope maps for every project and library.
#[derive(Clone, Debug, Default)]
pub struct ResolutionIndex {
    projects: FxHashMap<ProjectId, ProjectScope>,
    project_names: FxHashMap<Name, ProjectId>,
    libraries: FxHashMap<LibraryId, LibraryScope>,
    library_names: FxHashMap<Name, LibraryId>,
}

impl ResolutionIndex {
    /// Build the scope maps from the current graph.
    pub fn build(graph: &DeclarationGraph) -> Self {
        let mut index = ResolutionIndex::default();

        for project in graph.projects() {
            let DeclOwner::Project(pid) = project.id.owner else {
                continue;
            };
            index.project_names.insert(project.key, pid);
            index.projects.insert(
                pid,
                ProjectScope {
                    libraries: graph.project_libraries(pid).to_vec(),
                    ..ProjectScope::default()
                },
            );
        }

        for entry in graph.modules() {
            let Some(root) = entry.root() else {
                continue;
            };
            let scope = index.projects.entry(entry.project).or_default();
            scope.modules.insert(root.key, root.id);
            let is_standard = root.component_kind == Some(ComponentKind::Standard);
            if !is_standard {
                scope.types.entry(root.key).or_default().push(root.id);
            }

            for &local in entry.set.children_of(root.id.local) {
                let Some(decl) = entry.set.get(local) else {
                    continue;
                };
                if decl.accessibility.is_private() || decl.is_default_instance {
                    continue;
                }
                if matches!(
                    decl.kind,
                    DeclarationKind::UserDefinedType | DeclarationKind::Enumeration
                ) {
                    scope.types.entry(decl.key).or_default().push(decl.id);
                }
                if decl.kind == DeclarationKind::Enumeration {
                    for &member in entry.set.children_of(local) {
                        if let Some(member) = entry.set.get(member) {
                            scope
                                .enum_members
                                .entry(member.key)
                                .or_default()
                                .push(member.id);
                        }
                    }
                }
                if is_standard && decl.kind != DeclarationKind::Event {
                    scope.std_members.entry(decl.key).or_default().push(decl.id);
                }
            }
        }

        for library in graph.libraries() {
            let mut scope = LibraryScope::default();
            let Some(root) = library.set.root() else {
                continue;
            };
            scope.root = Some(root.id);
            index.library_names.insert(root.key, library.id);

            for &module_local in library.set.children_of(root.id.local) {
                let Some(module) = library.set.get(module_local) else {
                    continue;
                };
                scope.modules.insert(module.key, module.id);
                match module.kind {
                    DeclarationKind::ClassModule | DeclarationKind::Enumeration => {
                        scope.types.entry(module.key).or_insert(module.id);
                    }
                    _ => {}
                }
                for &member_local in library.set.children_of(module_local) {
                    let Some(member) = library.set.get(member_local) else {
                        continue;
                    };
                    match module.kind {
                        DeclarationKind::ProceduralModule => {
                            scope.std_members.entry(member.key).or_default().push(member.id)
                        }
                        DeclarationKind::Enumeration => scope
                            .enum_members
                            .entry(member.key)
                            .or_default()
                            .push(member.id),
                        _ => {}
                    }
                }
            }
            index.libraries.insert(library.id, scope);
        }

        index
    }

    pub fn project(&self, project: ProjectId) -> Option<&ProjectScope> {
        self.projects.get(&project)
    }

    pub fn library(&self, library: LibraryId) -> Option<&LibraryScope> {
        self.libraries.get(&library)
    }

    pub fn project_named(&self, name: Name) -> Option<ProjectId> {
        self.project_names.get(&name).copied()
    }

    pub fn library_named(&self, name: Name) -> Option<LibraryId> {
        self.library_names.get(&name).copied()
    }
}

// ============================================================================
// RESOLUTION RESULT
// ============================================================================

/// Result of resolving a name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveResult {
    /// Successfully resolved to a single declaration.
    Found(DeclId),
    /// Several equally ranked candidates; `chosen` won the tie-break.
    Ambiguous {
        chosen: DeclId,
        candidates: Vec<DeclId>,
    },
    /// Could not resolve the name.
    NotFound,
}

impl ResolveResult {
    /// The declaration the name binds to, ambiguous or not.
    pub fn decl(&self) -> Option<DeclId> {
        match self {
            ResolveResult::Found(id) => Some(*id),
            ResolveResult::Ambiguous { chosen, .. } => Some(*chosen),
            ResolveResult::NotFound => None,
        }
    }

    /// Check if resolution was successful.
    pub fn is_found(&self) -> bool {
        !matches!(self, ResolveResult::NotFound)
    }

    /// Check if the name was ambiguous.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ResolveResult::Ambiguous { .. })
    }

    fn or_else(self, f: impl FnOnce() -> ResolveResult) -> ResolveResult {
        match self {
            ResolveResult::NotFound => f(),
            found => found,
        }
    }
}

/// How the identifier is used; picks between Property Get, Let and Set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    /// Plain assignment target.
    Let,
    /// `Set` assignment target.
    Set,
}

impl AccessKind {
    pub fn is_assignment(self) -> bool {
        !matches!(self, AccessKind::Read)
    }
}

/// A dotted type path: what each qualifier segment bound to, and the type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathResolution {
    /// One entry per leading segment that resolved, in order.
    pub qualifiers: Vec<DeclId>,
    pub target: ResolveResult,
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Resolver for lookups from one usage site.
#[derive(Clone, Copy, Debug)]
pub struct Resolver<'a> {
    graph: &'a DeclarationGraph,
    index: &'a ResolutionIndex,
    interner: &'a Interner,
    /// The module the usage is written in.
    module: ModuleId,
    project: ProjectId,
    /// Enclosing procedure, if the usage is inside one.
    procedure: Option<DeclId>,
}

impl<'a> Resolver<'a> {
    /// Create a resolver for module-level code of `module`.
    pub fn new(
        graph: &'a DeclarationGraph,
        index: &'a ResolutionIndex,
        interner: &'a Interner,
        module: ModuleId,
        project: ProjectId,
    ) -> Self {
        Self {
            graph,
            index,
            interner,
            module,
            project,
            procedure: None,
        }
    }

    /// Set the enclosing procedure.
    pub fn with_procedure(mut self, procedure: Option<DeclId>) -> Self {
        self.procedure = procedure;
        self
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn procedure(&self) -> Option<DeclId> {
        self.procedure
    }

    /// The declaration references from this site are attributed to.
    pub fn parent_scope(&self) -> DeclId {
        self.procedure.unwrap_or(DeclId::module(self.module))
    }

    pub fn decl(&self, id: DeclId) -> Option<&'a Declaration> {
        self.graph.declaration(id)
    }

    fn name(&self, text: &str) -> Option<Name> {
        self.interner.get(text)
    }

    // ------------------------------------------------------------------
    // Value context
    // ------------------------------------------------------------------

    /// Resolve an unqualified identifier in value context.
    pub fn resolve_value(&self, text: &str, access: AccessKind) -> ResolveResult {
        let Some(name) = self.name(text) else {
            return ResolveResult::NotFound;
        };

        // 1. Parameters and locals of the enclosing procedure
        if let Some(procedure) = self.procedure {
            if let Some(local) = self.first_child_named(procedure, name, |d| {
                matches!(
                    d.kind,
                    DeclarationKind::Parameter
                        | DeclarationKind::Variable
                        | DeclarationKind::Constant
                )
            }) {
                return ResolveResult::Found(local);
            }
            // Assigning to a function's own name sets its return value
            if access.is_assignment()
                && self
                    .decl(procedure)
                    .is_some_and(|d| d.key == name && d.kind.returns_value())
            {
                return ResolveResult::Found(procedure);
            }
        }

        // 2. Members of the enclosing module
        let members = self.module_members_named(DeclId::module(self.module), name, true);
        if let Some(found) = self.pick_within_module(members, access) {
            return ResolveResult::Found(found);
        }

        // 3. Same project, then 4. libraries
        self.resolve_in_project(self.project, name, access)
            .or_else(|| self.resolve_in_libraries(name, access))
    }

    fn resolve_in_project(
        &self,
        project: ProjectId,
        name: Name,
        access: AccessKind,
    ) -> ResolveResult {
        let Some(scope) = self.index.project(project) else {
            return ResolveResult::NotFound;
        };
        if let Some(&module) = scope.modules.get(&name) {
            return ResolveResult::Found(module);
        }

        let mut candidates: Vec<DeclId> = Vec::new();
        candidates.extend(
            scope
                .std_members
                .get(&name)
                .into_iter()
                .flatten()
                .filter(|id| id.owner != DeclOwner::Module(self.module)),
        );
        candidates.extend(scope.enum_members.get(&name).into_iter().flatten());
        if !candidates.is_empty() {
            return self.pick_across_modules(prefer_accessor(self.graph, candidates, access));
        }

        if self.graph.project(project).is_some_and(|d| d.key == name) {
            return ResolveResult::Found(DeclId::project(project));
        }
        ResolveResult::NotFound
    }

    fn resolve_in_libraries(&self, name: Name, access: AccessKind) -> ResolveResult {
        let Some(scope) = self.index.project(self.project) else {
            return ResolveResult::NotFound;
        };
        for library in &scope.libraries {
            let Some(lib) = self.index.library(*library) else {
                continue;
            };
            if let Some(root) = lib.root.filter(|r| self.decl(*r).is_some_and(|d| d.key == name)) {
                return ResolveResult::Found(root);
            }
            if let Some(&module) = lib.modules.get(&name) {
                return ResolveResult::Found(module);
            }
            let members: Vec<DeclId> = lib
                .std_members
                .get(&name)
                .into_iter()
                .flatten()
                .chain(lib.enum_members.get(&name).into_iter().flatten())
                .copied()
                .collect();
            if let Some(&first) = prefer_accessor(self.graph, members, access).first() {
                return ResolveResult::Found(first);
            }
        }
        ResolveResult::NotFound
    }

    // ------------------------------------------------------------------
    // Type context
    // ------------------------------------------------------------------

    /// Resolve a type name as written after `As`, `New`, `Implements` or
    /// `TypeOf ... Is`.
    pub fn resolve_type(&self, path: &TypePath) -> PathResolution {
        let names: Option<Vec<Name>> = path.segments.iter().map(|s| self.name(&s.name)).collect();
        let not_found = PathResolution {
            qualifiers: Vec::new(),
            target: ResolveResult::NotFound,
        };
        let Some(names) = names else {
            return not_found;
        };
        match names.as_slice() {
            [] => not_found,
            [single] => PathResolution {
                qualifiers: Vec::new(),
                target: self.resolve_simple_type(*single),
            },
            [first, rest @ ..] => {
                let Some(container) = self.resolve_type_qualifier(*first) else {
                    return not_found;
                };
                let mut qualifiers = vec![container];
                let mut current = container;
                for (i, segment) in rest.iter().enumerate() {
                    let is_last = i + 1 == rest.len();
                    match self.type_in_container(current, *segment, is_last) {
                        Some(next) if is_last => {
                            return PathResolution {
                                qualifiers,
                                target: ResolveResult::Found(next),
                            };
                        }
                        Some(next) => {
                            qualifiers.push(next);
                            current = next;
                        }
                        None => break,
                    }
                }
                PathResolution {
                    qualifiers,
                    target: ResolveResult::NotFound,
                }
            }
        }
    }

    fn resolve_simple_type(&self, name: Name) -> ResolveResult {
        // Module-level UDTs and enums, private ones included
        let own = self.module_members_named(DeclId::module(self.module), name, true);
        if let Some(&found) = own.iter().find(|id| {
            self.decl(**id).is_some_and(|d| {
                matches!(
                    d.kind,
                    DeclarationKind::UserDefinedType | DeclarationKind::Enumeration
                )
            })
        }) {
            return ResolveResult::Found(found);
        }

        if let Some(candidates) = self
            .index
            .project(self.project)
            .and_then(|s| s.types.get(&name))
            .filter(|c| !c.is_empty())
        {
            return self.pick_across_modules(candidates.clone());
        }

        for library in self.libraries() {
            if let Some(&found) = self.index.library(library).and_then(|l| l.types.get(&name)) {
                return ResolveResult::Found(found);
            }
        }
        ResolveResult::NotFound
    }

    /// First segment of a dotted type: a project, a library, or a module.
    fn resolve_type_qualifier(&self, name: Name) -> Option<DeclId> {
        if let Some(project) = self.index.project_named(name) {
            return Some(DeclId::project(project));
        }
        if let Some(root) = self
            .index
            .library_named(name)
            .and_then(|l| self.index.library(l))
            .and_then(|l| l.root)
        {
            return Some(root);
        }
        if let Some(&module) = self
            .index
            .project(self.project)
            .and_then(|s| s.modules.get(&name))
        {
            return Some(module);
        }
        self.libraries()
            .find_map(|l| self.index.library(l).and_then(|l| l.modules.get(&name).copied()))
    }

    fn type_in_container(&self, container: DeclId, name: Name, is_last: bool) -> Option<DeclId> {
        let decl = self.decl(container)?;
        match decl.kind {
            DeclarationKind::Project => match container.owner {
                DeclOwner::Project(project) => {
                    let scope = self.index.project(project)?;
                    if is_last {
                        scope
                            .types
                            .get(&name)
                            .and_then(|c| self.pick_across_modules(c.clone()).decl())
                            .or_else(|| scope.modules.get(&name).copied())
                    } else {
                        scope.modules.get(&name).copied()
                    }
                }
                DeclOwner::Library(library) => {
                    let scope = self.index.library(library)?;
                    if is_last {
                        scope.types.get(&name).copied()
                    } else {
                        scope.modules.get(&name).copied()
                    }
                }
                DeclOwner::Module(_) => None,
            },
            kind if kind.is_module() => self
                .graph
                .children(container)
                .into_iter()
                .find(|id| {
                    self.decl(*id).is_some_and(|d| {
                        d.key == name
                            && matches!(
                                d.kind,
                                DeclarationKind::UserDefinedType | DeclarationKind::Enumeration
                            )
                            && (container == DeclId::module(self.module)
                                || !d.accessibility.is_private())
                    })
                }),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Member access
    // ------------------------------------------------------------------

    /// The declaration whose members `a.b` looks into once `a` resolved to
    /// `decl`. `None` means the receiver is late bound.
    pub fn member_container(&self, decl: DeclId) -> Option<DeclId> {
        let d = self.decl(decl)?;
        match d.kind {
            DeclarationKind::Project
            | DeclarationKind::ProceduralModule
            | DeclarationKind::ClassModule
            | DeclarationKind::Enumeration
            | DeclarationKind::UserDefinedType => Some(decl),
            _ => {
                let ty = d.as_type.resolved()?;
                let target = self.decl(ty)?;
                matches!(
                    target.kind,
                    DeclarationKind::ClassModule
                        | DeclarationKind::UserDefinedType
                        | DeclarationKind::Enumeration
                )
                .then_some(ty)
            }
        }
    }

    /// Resolve `name` as a member of `container` (see [`Self::member_container`]).
    pub fn resolve_member(
        &self,
        container: DeclId,
        text: &str,
        access: AccessKind,
    ) -> ResolveResult {
        let Some(name) = self.name(text) else {
            return ResolveResult::NotFound;
        };
        let Some(decl) = self.decl(container) else {
            return ResolveResult::NotFound;
        };
        match (decl.kind, container.owner) {
            (DeclarationKind::Project, DeclOwner::Project(project)) => {
                self.resolve_in_project(project, name, access)
            }
            (DeclarationKind::Project, DeclOwner::Library(library)) => {
                let Some(scope) = self.index.library(library) else {
                    return ResolveResult::NotFound;
                };
                if let Some(&module) = scope.modules.get(&name) {
                    return ResolveResult::Found(module);
                }
                let members = scope.std_members.get(&name).cloned().unwrap_or_default();
                prefer_accessor(self.graph, members, access)
                    .first()
                    .map_or(ResolveResult::NotFound, |&id| ResolveResult::Found(id))
            }
            _ => {
                let own = container.owner == DeclOwner::Module(self.module);
                let members = self.module_members_named(container, name, own);
                self.pick_within_module(members, access)
                    .map_or(ResolveResult::NotFound, ResolveResult::Found)
            }
        }
    }

    /// The parameter `name` of a callee, for `Foo(Item:=x)`.
    pub fn resolve_parameter(&self, callee: DeclId, text: &str) -> Option<DeclId> {
        let name = self.name(text)?;
        self.first_child_named(callee, name, |d| d.kind == DeclarationKind::Parameter)
    }

    /// The current module's declaration, if it declares a class (`Me`).
    pub fn current_class(&self) -> Option<DeclId> {
        let id = DeclId::module(self.module);
        self.decl(id)
            .filter(|d| d.kind == DeclarationKind::ClassModule)
            .map(|_| id)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn libraries(&self) -> impl Iterator<Item = LibraryId> + '_ {
        self.index
            .project(self.project)
            .into_iter()
            .flat_map(|s| s.libraries.iter().copied())
    }

    fn first_child_named(
        &self,
        parent: DeclId,
        name: Name,
        filter: impl Fn(&Declaration) -> bool,
    ) -> Option<DeclId> {
        self.graph
            .children(parent)
            .into_iter()
            .find(|id| self.decl(*id).is_some_and(|d| d.key == name && filter(d)))
    }

    /// Members of a module, enum or UDT named `name`. Enum members of
    /// enums declared in a module count as members of that module.
    fn module_members_named(
        &self,
        container: DeclId,
        name: Name,
        include_private: bool,
    ) -> Vec<DeclId> {
        let Some(container_decl) = self.decl(container) else {
            return Vec::new();
        };
        let is_module = container_decl.kind.is_module();
        let mut out = Vec::new();
        for child in self.graph.children(container) {
            let Some(decl) = self.decl(child) else {
                continue;
            };
            if decl.is_default_instance || (!include_private && decl.accessibility.is_private()) {
                continue;
            }
            if decl.key == name && decl.kind != DeclarationKind::Parameter {
                out.push(child);
            }
            if is_module && decl.kind == DeclarationKind::Enumeration {
                out.extend(
                    self.graph
                        .children(child)
                        .into_iter()
                        .filter(|id| self.decl(*id).is_some_and(|d| d.key == name)),
                );
            }
        }
        out
    }

    /// Pick among candidates of one module: accessor by access kind, then
    /// private first, then declaration order.
    fn pick_within_module(&self, candidates: Vec<DeclId>, access: AccessKind) -> Option<DeclId> {
        let mut candidates = prefer_accessor(self.graph, candidates, access);
        candidates.sort_by_key(|id| {
            let private = self.decl(*id).is_some_and(|d| d.accessibility.is_private());
            (!private, *id)
        });
        candidates.first().copied()
    }

    /// Pick among candidates from several modules: the module whose
    /// declarations were built most recently wins, then the component name
    /// in ascending order. More than one contributing module is ambiguous.
    fn pick_across_modules(&self, candidates: Vec<DeclId>) -> ResolveResult {
        let mut ranked: Vec<(u64, String, DeclId)> = candidates
            .iter()
            .map(|&id| {
                let (generation, component) = match id.owner {
                    DeclOwner::Module(module) => {
                        self.graph.module(module).map_or((0, String::new()), |m| {
                            (
                                m.generation,
                                m.root().map(|r| fold(&r.name).to_string()).unwrap_or_default(),
                            )
                        })
                    }
                    _ => (0, String::new()),
                };
                (generation, component, id)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let Some(&(_, _, chosen)) = ranked.first() else {
            return ResolveResult::NotFound;
        };
        let mut owners: Vec<DeclOwner> = candidates.iter().map(|id| id.owner).collect();
        owners.sort();
        owners.dedup();
        if owners.len() > 1 {
            tracing::debug!(
                "ambiguous resolution: {} candidates, chose {:?}",
                candidates.len(),
                chosen
            );
            ResolveResult::Ambiguous {
                chosen,
                candidates: ranked.into_iter().map(|(_, _, id)| id).collect(),
            }
        } else {
            ResolveResult::Found(chosen)
        }
    }
}

/// Keep only the property accessor matching `access` when the candidates
/// are a Get/Let/Set group; other candidates pass through unchanged.
fn prefer_accessor(
    graph: &DeclarationGraph,
    candidates: Vec<DeclId>,
    access: AccessKind,
) -> Vec<DeclId> {
    let wanted = match access {
        AccessKind::Read => DeclarationKind::PropertyGet,
        AccessKind::Let => DeclarationKind::PropertyLet,
        AccessKind::Set => DeclarationKind::PropertySet,
    };
    let kind_of = |id: &DeclId| graph.declaration(*id).map(|d| d.kind);
    if !candidates
        .iter()
        .any(|id| kind_of(id).is_some_and(DeclarationKind::is_property))
    {
        return candidates;
    }
    let filtered: Vec<DeclId> = candidates
        .iter()
        .copied()
        .filter(|id| kind_of(id).is_some_and(|k| !k.is_property() || k == wanted))
        .collect();
    if filtered.is_empty() { candidates } else { filtered }
}
