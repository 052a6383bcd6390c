//! Declaration finder: the immutable query surface published after each
//! completed pass.
//!
//! A finder owns a snapshot of the declaration graph plus the indexes that
//! position and name queries need. Hosts hold it through an `Arc` and may
//! keep querying an old snapshot while the next pass runs.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use super::declaration::{
    Declaration, DeclarationKind, IdentifierReference, ScopeLevel, UnboundReference,
};
use super::diagnostics::Diagnostic;
use super::graph::DeclarationGraph;
use super::ids::{DeclId, DeclOwner};
use super::resolve::ResolutionIndex;
use super::source::ComponentKind;
use crate::base::{Interner, LineCol, ModuleId, Selection, fold};

/// Immutable per-pass index over every declaration and reference.
#[derive(Debug)]
pub struct DeclarationFinder {
    graph: DeclarationGraph,
    index: ResolutionIndex,
    interner: Arc<Interner>,
    by_qualified: FxHashMap<SmolStr, Vec<DeclId>>,
    /// Module → (target, index into the target's references)
    refs_by_module: FxHashMap<ModuleId, Vec<(DeclId, usize)>>,
    /// Interface member or event → procedures implementing/handling it
    implementations: FxHashMap<DeclId, Vec<DeclId>>,
}

impl DeclarationFinder {
    /// A finder with nothing in it, published before the first pass.
    pub fn empty(interner: Arc<Interner>) -> Self {
        Self::build(DeclarationGraph::new(), ResolutionIndex::default(), interner)
    }

    /// Build the indexes over a graph snapshot.
    pub fn build(graph: DeclarationGraph, index: ResolutionIndex, interner: Arc<Interner>) -> Self {
        let mut by_qualified: FxHashMap<SmolStr, Vec<DeclId>> = FxHashMap::default();
        let mut refs_by_module: FxHashMap<ModuleId, Vec<(DeclId, usize)>> = FxHashMap::default();

        for decl in graph.all_declarations() {
            by_qualified
                .entry(fold(&decl.qualified_name))
                .or_default()
                .push(decl.id);
            for (i, reference) in decl.references.iter().enumerate() {
                refs_by_module
                    .entry(reference.module)
                    .or_default()
                    .push((decl.id, i));
            }
        }

        let mut implementations: FxHashMap<DeclId, Vec<DeclId>> = FxHashMap::default();
        for entry in graph.modules() {
            for &(procedure, target) in &entry.handler_links {
                let procs = implementations.entry(target).or_default();
                let procedure = DeclId::new(DeclOwner::Module(entry.module), procedure);
                if !procs.contains(&procedure) {
                    procs.push(procedure);
                }
            }
        }
        for procs in implementations.values_mut() {
            procs.sort();
        }

        tracing::debug!(
            "declaration finder built: {} modules, {} libraries",
            graph.modules().count(),
            graph.libraries().count()
        );

        Self {
            graph,
            index,
            interner,
            by_qualified,
            refs_by_module,
            implementations,
        }
    }

    pub fn graph(&self) -> &DeclarationGraph {
        &self.graph
    }

    pub fn resolution_index(&self) -> &ResolutionIndex {
        &self.index
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    // ========================================================================
    // LOOKUP HELPERS
    // ========================================================================

    pub fn declaration(&self, id: DeclId) -> Option<&Declaration> {
        self.graph.declaration(id)
    }

    pub fn all_declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.graph.all_declarations()
    }

    /// Declarations of user projects and modules (not libraries).
    pub fn user_declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.graph
            .all_declarations()
            .filter(|d| d.is_user_defined())
    }

    pub fn declarations_with_kind(&self, kind: DeclarationKind) -> Vec<&Declaration> {
        self.graph
            .all_declarations()
            .filter(|d| d.kind == kind)
            .collect()
    }

    /// Declarations named `name`, compared case-insensitively.
    pub fn declarations_named(&self, name: &str) -> Vec<&Declaration> {
        let Some(key) = self.interner.get(name) else {
            return Vec::new();
        };
        self.graph
            .all_declarations()
            .filter(|d| d.key == key)
            .collect()
    }

    /// Direct children (a project's modules, a module's members, a
    /// procedure's parameters and locals).
    pub fn members_of(&self, id: DeclId) -> Vec<&Declaration> {
        self.graph
            .children(id)
            .into_iter()
            .filter_map(|c| self.graph.declaration(c))
            .collect()
    }

    pub fn module_declaration(&self, module: ModuleId) -> Option<&Declaration> {
        self.graph.declaration(DeclId::module(module))
    }

    /// A module declaration by host identity.
    pub fn find_module(&self, project: &str, component: &str) -> Option<&Declaration> {
        self.find_by_qualified_name(&format!("{}.{}", project, component))
            .into_iter()
            .find(|d| d.kind.is_module() && d.is_user_defined())
    }

    /// Declarations whose qualified name matches, case-insensitively.
    pub fn find_by_qualified_name(&self, qualified: &str) -> Vec<&Declaration> {
        self.by_qualified
            .get(&fold(qualified))
            .into_iter()
            .flatten()
            .filter_map(|id| self.graph.declaration(*id))
            .collect()
    }

    pub fn references_to(&self, id: DeclId) -> &[IdentifierReference] {
        self.graph
            .declaration(id)
            .map(|d| d.references.as_slice())
            .unwrap_or(&[])
    }

    /// References written in `module`, with their targets, in source order.
    pub fn references_in(&self, module: ModuleId) -> Vec<(DeclId, &IdentifierReference)> {
        let mut out: Vec<(DeclId, &IdentifierReference)> = self
            .refs_by_module
            .get(&module)
            .into_iter()
            .flatten()
            .filter_map(|&(target, i)| {
                self.graph
                    .declaration(target)
                    .and_then(|d| d.references.get(i))
                    .map(|r| (target, r))
            })
            .collect();
        out.sort_by_key(|(target, r)| (r.range.start(), *target));
        out
    }

    /// Assignments that set `procedure`'s return value inside its own body.
    pub fn return_assignments_of(&self, procedure: DeclId) -> Vec<&IdentifierReference> {
        let Some(module) = procedure.owner.module() else {
            return Vec::new();
        };
        self.graph
            .module(module)
            .into_iter()
            .flat_map(|m| m.return_assignments.iter())
            .filter(|(local, _)| *local == procedure.local)
            .map(|(_, reference)| reference)
            .collect()
    }

    pub fn unbound_references(&self, module: ModuleId) -> &[UnboundReference] {
        self.graph
            .module(module)
            .map(|m| m.unbound.as_slice())
            .unwrap_or(&[])
    }

    pub fn all_unbound_references(&self) -> impl Iterator<Item = &UnboundReference> {
        self.graph.modules().flat_map(|m| m.unbound.iter())
    }

    /// Every diagnostic: per-module syntax and resolution problems, then
    /// library load failures.
    pub fn diagnostics(&self) -> Vec<&Diagnostic> {
        self.graph
            .modules()
            .flat_map(|m| m.diagnostics())
            .chain(self.graph.all_library_diagnostics())
            .collect()
    }

    pub fn diagnostics_for_module(&self, module: ModuleId) -> Vec<&Diagnostic> {
        self.graph
            .module(module)
            .into_iter()
            .flat_map(|m| m.diagnostics())
            .collect()
    }

    /// Innermost procedure whose body contains `position`, else the module.
    pub fn enclosing_scope_at(&self, module: ModuleId, position: LineCol) -> Option<DeclId> {
        let entry = self.graph.module(module)?;
        let procedure = entry
            .set
            .iter()
            .filter(|d| d.kind.is_procedure() && d.parent == Some(DeclId::module(module)))
            .filter(|d| d.body.is_some_and(|b| b.contains(position)))
            .min_by_key(|d| d.body.map(|b| b.extent()))
            .map(|d| d.id);
        Some(procedure.unwrap_or(DeclId::module(module)))
    }

    // ========================================================================
    // POSITION QUERIES
    // ========================================================================

    /// The declaration whose identifier, or one of whose references,
    /// covers `position` in `module`.
    ///
    /// When several spans match, the declaration in the smallest scope
    /// wins (parameter/local, member, module, project), then the narrower
    /// span, then declaration order.
    pub fn find_declaration_at(&self, module: ModuleId, position: LineCol) -> Option<&Declaration> {
        self.best_match(module, |span| span.contains(position))
    }

    /// Like [`Self::find_declaration_at`], for a selection that must lie
    /// within the identifier or reference span.
    pub fn find_selected_declaration(
        &self,
        module: ModuleId,
        selection: Selection,
    ) -> Option<&Declaration> {
        self.best_match(module, |span| span.contains_selection(&selection))
    }

    fn best_match(
        &self,
        module: ModuleId,
        matches: impl Fn(&Selection) -> bool,
    ) -> Option<&Declaration> {
        let mut candidates: Vec<(&Declaration, Selection)> = Vec::new();

        if let Some(entry) = self.graph.module(module) {
            candidates.extend(
                entry
                    .set
                    .iter()
                    .filter(|d| d.has_identifier() && matches(&d.selection))
                    .map(|d| (d, d.selection)),
            );
        }
        if let Some(entry) = self.graph.module(module) {
            for (local, assignment) in &entry.return_assignments {
                let target = DeclId::new(DeclOwner::Module(module), *local);
                if !matches(&assignment.selection) {
                    continue;
                }
                if let Some(decl) = self.graph.declaration(target) {
                    candidates.push((decl, assignment.selection));
                }
            }
        }
        for (target, reference) in self.references_in(module) {
            if reference.range.is_empty() || !matches(&reference.selection) {
                continue;
            }
            if let Some(decl) = self.graph.declaration(target) {
                candidates.push((decl, reference.selection));
            }
        }

        candidates
            .into_iter()
            .min_by_key(|(decl, span)| (decl.scope_rank(), span.extent(), decl.id))
            .map(|(decl, _)| decl)
    }

    // ========================================================================
    // INTERFACES
    // ========================================================================

    /// Class modules listing `interface` in their supertypes, each once.
    pub fn implementers_of(&self, interface: DeclId) -> Vec<&Declaration> {
        self.graph
            .modules()
            .filter_map(|m| m.root())
            .filter(|root| root.supertypes.contains(&interface))
            .collect()
    }

    /// Procedures implementing members of `interface`. A class that lists
    /// the same interface in several `Implements` statements contributes
    /// its members once.
    pub fn interface_members_of(&self, interface: DeclId) -> Vec<&Declaration> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for member in self.graph.children(interface) {
            for procedure in self.implementations.get(&member).into_iter().flatten() {
                if !seen.insert(*procedure) {
                    continue;
                }
                out.extend(self.graph.declaration(*procedure));
            }
        }
        out
    }

    /// Members of every class used as an interface somewhere.
    pub fn find_all_interface_members(&self) -> Vec<&Declaration> {
        let mut interfaces: Vec<DeclId> = self
            .graph
            .modules()
            .filter_map(|m| m.root())
            .flat_map(|root| root.supertypes.iter().copied())
            .collect();
        interfaces.sort();
        interfaces.dedup();
        interfaces
            .into_iter()
            .flat_map(|iface| self.members_of(iface))
            .filter(|d| d.kind.is_procedure())
            .collect()
    }

    // ========================================================================
    // SCOPE QUERIES
    // ========================================================================

    /// Every declaration an identifier in `scope` (a procedure or module)
    /// could bind to.
    pub fn declarations_visible_from(&self, scope: DeclId) -> Vec<&Declaration> {
        let mut ids: Vec<DeclId> = Vec::new();
        let Some(scope_decl) = self.graph.declaration(scope) else {
            return Vec::new();
        };
        let Some(module) = scope.owner.module() else {
            return Vec::new();
        };

        if scope_decl.kind.is_procedure() {
            ids.extend(self.graph.children(scope));
        }
        let module_id = DeclId::module(module);
        for member in self.graph.children(module_id) {
            ids.push(member);
            if self
                .graph
                .declaration(member)
                .is_some_and(|d| d.kind == DeclarationKind::Enumeration)
            {
                ids.extend(self.graph.children(member));
            }
        }

        let project = self.graph.module(module).map(|m| m.project);
        if let Some(scope) = project.and_then(|p| self.index.project(p)) {
            ids.extend(scope.modules.values().copied());
            for members in scope.std_members.values().chain(scope.enum_members.values()) {
                ids.extend(members.iter().copied());
            }
            for library in &scope.libraries {
                if let Some(lib) = self.index.library(*library) {
                    ids.extend(lib.root);
                    ids.extend(lib.modules.values().copied());
                    for members in lib.std_members.values().chain(lib.enum_members.values()) {
                        ids.extend(members.iter().copied());
                    }
                }
            }
        }
        if let Some(project) = project {
            ids.push(DeclId::project(project));
        }

        self.collect_unique(ids, |d| !d.is_default_instance)
    }

    /// Declarations a new name for `target` must not collide with.
    pub fn identifiers_to_avoid(&self, target: DeclId) -> Vec<&Declaration> {
        let Some(decl) = self.graph.declaration(target) else {
            return Vec::new();
        };
        let Some(module) = decl.module() else {
            return Vec::new();
        };
        let mut ids: Vec<DeclId> = Vec::new();

        // Members of the target's own module
        ids.extend(self.graph.children(DeclId::module(module)));
        // Locals of the target's own procedure, or its own locals
        if decl.kind.is_procedure() {
            ids.extend(self.graph.children(target));
        }
        if let Some(parent) = decl.parent.filter(|p| !p.is_root()) {
            ids.extend(self.graph.children(parent));
        }

        // Procedures and modules referencing the target
        for reference in &decl.references {
            if reference.parent_scope != DeclId::module(reference.module) {
                ids.extend(self.graph.children(reference.parent_scope));
            }
            if !reference.is_member_access {
                ids.extend(self.graph.children(DeclId::module(reference.module)));
            }
        }

        let project = self.graph.module(module).map(|m| m.project);
        let module_is_standard = self
            .module_declaration(module)
            .is_some_and(|m| m.component_kind == Some(ComponentKind::Standard));
        if let Some(scope) = project.and_then(|p| self.index.project(p)) {
            let is_public_member =
                decl.level == ScopeLevel::Member && !decl.accessibility.is_private();
            if module_is_standard && is_public_member {
                for members in scope.std_members.values() {
                    ids.extend(members.iter().copied());
                }
            }
            ids.extend(scope.modules.values().copied());
        }
        if let Some(project) = project {
            ids.push(DeclId::project(project));
        }

        self.collect_unique(ids, |d| d.id != target)
    }

    fn collect_unique(
        &self,
        mut ids: Vec<DeclId>,
        keep: impl Fn(&Declaration) -> bool,
    ) -> Vec<&Declaration> {
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| self.graph.declaration(id))
            .filter(|d| keep(d))
            .collect()
    }
}
