//! Project and library synchronization, the first step of every pass.
//!
//! Brings the graph's project declarations and loaded libraries in line
//! with the [`ModuleSet`]. Libraries are loaded once and shared by every
//! project that references them; a library nobody references any more is
//! dropped. Failed loads are retried on every pass until they succeed.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use smol_str::SmolStr;

use crate::base::{Interner, LibraryId, ProjectId, fold};
use crate::error::LibraryError;
use crate::hir::{
    Accessibility, Declaration, DeclarationGraph, DeclarationKind, DeclarationSet, DeclaredType,
    DeclId, DeclOwner, Diagnostic, LibraryDeclarations, LocalDeclId, ModuleSet, ScopeLevel,
};
use crate::project::{
    ExternalLibrary, LibraryMemberKind, LibraryModuleKind, LibraryProvider, VBA_LIBRARY,
    vba_library,
};
use crate::syntax::{Ident, TypePath};

/// What synchronization changed.
#[derive(Clone, Debug, Default)]
pub struct SyncOutcome {
    /// Projects whose effective library list changed; every module in them
    /// is re-parsed.
    pub changed_projects: Vec<ProjectId>,
    /// Projects with at least one library that failed to load.
    pub failed_projects: Vec<ProjectId>,
    pub removed_projects: Vec<ProjectId>,
}

/// Loads libraries by name, serving the built-in `VBA` library itself.
pub struct LibraryLoader<'a> {
    pub provider: &'a dyn LibraryProvider,
    pub include_builtin: bool,
}

impl LibraryLoader<'_> {
    pub fn load(&self, name: &str) -> Result<Arc<ExternalLibrary>, LibraryError> {
        match self.provider.load(name) {
            Err(LibraryError::NotFound { .. })
                if self.include_builtin && name.eq_ignore_ascii_case(VBA_LIBRARY) =>
            {
                Ok(Arc::new(vba_library()))
            }
            other => other,
        }
    }

    /// Library names a project resolves against, in priority order, with
    /// the built-in library first and duplicates removed.
    pub fn effective_references(&self, refs: &[SmolStr]) -> Vec<SmolStr> {
        let mut seen = FxHashSet::default();
        let builtin = self
            .include_builtin
            .then(|| SmolStr::new_static(VBA_LIBRARY));
        builtin
            .into_iter()
            .chain(refs.iter().cloned())
            .filter(|name| seen.insert(fold(name)))
            .collect()
    }
}

/// Reconcile project declarations and libraries with the module set.
pub fn synchronize(
    graph: &mut DeclarationGraph,
    modules: &ModuleSet,
    loader: &LibraryLoader<'_>,
    interner: &Interner,
) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();
    let projects = modules.projects();

    let live: FxHashSet<ProjectId> = projects.iter().map(|p| p.id).collect();
    let stale: Vec<ProjectId> = graph
        .projects()
        .filter_map(|d| match d.id.owner {
            DeclOwner::Project(p) if !live.contains(&p) => Some(p),
            _ => None,
        })
        .collect();
    for project in stale {
        tracing::debug!("dropping project {:?}", project);
        graph.remove_project(project);
        outcome.removed_projects.push(project);
    }

    for entry in &projects {
        let is_new = graph.project(entry.id).is_none();
        if is_new {
            graph.insert_project(project_declaration(entry.id, &entry.name, interner));
        }

        let mut loaded = Vec::new();
        let mut diagnostics = Vec::new();
        for name in loader.effective_references(&entry.library_refs) {
            if let Some(id) = graph.library_id(&name) {
                loaded.push(id);
                continue;
            }
            match loader.load(&name) {
                Ok(library) => {
                    let id = graph.allocate_library_id();
                    let set = build_library(id, &library, interner);
                    tracing::debug!(
                        "loaded library {} ({} declarations)",
                        library.name,
                        set.len()
                    );
                    graph.insert_library(LibraryDeclarations {
                        id,
                        name: name.clone(),
                        source: library,
                        set,
                    });
                    loaded.push(id);
                }
                Err(err) => {
                    tracing::warn!("project {}: {}", entry.name, err);
                    diagnostics.push(Diagnostic::unresolved_library(
                        entry.id,
                        &name,
                        &err.to_string(),
                    ));
                }
            }
        }

        if !diagnostics.is_empty() {
            outcome.failed_projects.push(entry.id);
        }
        if !is_new && graph.project_libraries(entry.id) != loaded.as_slice() {
            outcome.changed_projects.push(entry.id);
        }
        graph.set_project_libraries(entry.id, loaded);
        graph.set_library_diagnostics(entry.id, diagnostics);
    }

    let referenced: FxHashSet<LibraryId> = projects
        .iter()
        .flat_map(|p| graph.project_libraries(p.id).to_vec())
        .collect();
    let unreferenced: Vec<LibraryId> = graph
        .libraries()
        .map(|l| l.id)
        .filter(|id| !referenced.contains(id))
        .collect();
    for library in unreferenced {
        if let Some(removed) = graph.remove_library(library) {
            tracing::debug!("unloaded library {}", removed.name);
        }
    }

    outcome
}

fn project_declaration(project: ProjectId, name: &str, interner: &Interner) -> Declaration {
    let id = DeclId::project(project);
    let mut decl = Declaration::new(id, name, interner.intern(name), DeclarationKind::Project, id);
    decl.accessibility = Accessibility::Public;
    decl.level = ScopeLevel::Project;
    decl.qualified_name = SmolStr::new(name);
    decl
}

// ============================================================================
// LIBRARY DECLARATIONS
// ============================================================================

/// Lay out a library as declarations: the library project at local 0,
/// then each module followed by its members and their parameters.
pub fn build_library(
    id: LibraryId,
    library: &ExternalLibrary,
    interner: &Interner,
) -> DeclarationSet {
    let owner = DeclOwner::Library(id);
    let root_id = DeclId::new(owner, LocalDeclId::ROOT);
    let mut set = DeclarationSet::new();

    let mut root = Declaration::new(
        root_id,
        library.name.clone(),
        interner.intern(&library.name),
        DeclarationKind::Project,
        root_id,
    );
    root.accessibility = Accessibility::Public;
    root.level = ScopeLevel::Project;
    root.qualified_name = library.name.clone();
    set.push(root);

    for module in &library.modules {
        let module_kind = match module.kind {
            LibraryModuleKind::Standard => DeclarationKind::ProceduralModule,
            LibraryModuleKind::Class => DeclarationKind::ClassModule,
            LibraryModuleKind::Enum => DeclarationKind::Enumeration,
        };
        let module_qualified = SmolStr::new(format!("{}.{}", library.name, module.name));
        let module_id = DeclId::new(owner, set.next_local());
        let mut decl = Declaration::new(
            module_id,
            module.name.clone(),
            interner.intern(&module.name),
            module_kind,
            root_id,
        );
        decl.accessibility = Accessibility::Public;
        decl.level = ScopeLevel::Module;
        decl.parent = Some(root_id);
        decl.scope = library.name.clone();
        decl.qualified_name = module_qualified.clone();
        set.push(decl);

        for member in &module.members {
            let kind = match (module.kind, member.kind) {
                (LibraryModuleKind::Enum, _) => DeclarationKind::EnumerationMember,
                (_, LibraryMemberKind::Procedure) => DeclarationKind::LibraryProcedure,
                (_, LibraryMemberKind::Function) => DeclarationKind::LibraryFunction,
                (_, LibraryMemberKind::PropertyGet) => DeclarationKind::PropertyGet,
                (_, LibraryMemberKind::Variable) => DeclarationKind::Variable,
                (_, LibraryMemberKind::Constant) => DeclarationKind::Constant,
                (_, LibraryMemberKind::Event) => DeclarationKind::Event,
            };
            let member_qualified = SmolStr::new(format!("{}.{}", module_qualified, member.name));
            let member_id = DeclId::new(owner, set.next_local());
            let mut decl = Declaration::new(
                member_id,
                member.name.clone(),
                interner.intern(&member.name),
                kind,
                root_id,
            );
            decl.accessibility = Accessibility::Public;
            decl.parent = Some(module_id);
            decl.scope = module_qualified.clone();
            decl.qualified_name = member_qualified.clone();
            decl.as_type = library_type(member.as_type.as_deref(), library, owner);
            set.push(decl);

            for param in &member.params {
                let mut decl = Declaration::new(
                    DeclId::new(owner, set.next_local()),
                    param.name.clone(),
                    interner.intern(&param.name),
                    DeclarationKind::Parameter,
                    root_id,
                );
                decl.accessibility = Accessibility::Implicit;
                decl.level = ScopeLevel::Local;
                decl.parent = Some(member_id);
                decl.scope = member_qualified.clone();
                decl.qualified_name = SmolStr::new(format!("{}.{}", member_qualified, param.name));
                decl.is_optional = param.optional;
                decl.as_type = library_type(param.as_type.as_deref(), library, owner);
                set.push(decl);
            }
        }
    }

    set
}

/// A library type name, resolved against the library's own classes and
/// enums.
fn library_type(name: Option<&str>, library: &ExternalLibrary, owner: DeclOwner) -> DeclaredType {
    let Some(name) = name else {
        return DeclaredType::Variant;
    };
    let path = TypePath {
        segments: vec![Ident::new(name, Default::default())],
    };
    let mut ty = DeclaredType::from_path(path, false);
    if let DeclaredType::Named { resolved, .. } = &mut ty {
        *resolved = library_module_local(library, name).map(|local| DeclId::new(owner, local));
    }
    ty
}

/// Local id a module of `library` ends up with in [`build_library`].
fn library_module_local(library: &ExternalLibrary, name: &str) -> Option<LocalDeclId> {
    let mut next = 1u32;
    for module in &library.modules {
        if module.name.eq_ignore_ascii_case(name) && module.kind != LibraryModuleKind::Standard {
            return Some(LocalDeclId::new(next));
        }
        next += 1;
        next += module
            .members
            .iter()
            .map(|m| 1 + m.params.len() as u32)
            .sum::<u32>();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{LibraryModule, LibraryRegistry};

    fn loader(registry: &LibraryRegistry) -> LibraryLoader<'_> {
        LibraryLoader {
            provider: registry,
            include_builtin: true,
        }
    }

    #[test]
    fn test_builtin_library_is_referenced_first() {
        let registry = LibraryRegistry::new();
        let refs = loader(&registry).effective_references(&["Excel".into(), "vba".into()]);
        assert_eq!(refs, vec![SmolStr::new("VBA"), SmolStr::new("Excel")]);
    }

    #[test]
    fn test_library_types_resolve_within_the_library() {
        let interner = Interner::new();
        let library = vba_library();
        let set = build_library(LibraryId::new(0), &library, &interner);
        assert_eq!(set.len(), library.declaration_count());

        let msgbox = set
            .iter()
            .find(|d| d.name == "MsgBox")
            .expect("MsgBox is declared");
        let result_type = msgbox.as_type.resolved().expect("return type resolves");
        let target = set.get(result_type.local).unwrap();
        assert_eq!(target.name, "VbMsgBoxResult");
        assert_eq!(target.kind, DeclarationKind::Enumeration);
    }

    #[test]
    fn test_synchronize_reports_failed_library_and_recovers() {
        let interner = Interner::new();
        let modules = ModuleSet::new();
        let registry = LibraryRegistry::new();
        let mut graph = DeclarationGraph::new();
        modules
            .upsert("P", "M", crate::hir::ComponentKind::Standard, "")
            .unwrap();
        let (project, _) = modules
            .set_library_references("P", vec![smol_str::SmolStr::from("Excel")])
            .unwrap();

        let first = synchronize(&mut graph, &modules, &loader(&registry), &interner);
        assert_eq!(first.failed_projects, vec![project]);
        assert_eq!(graph.library_diagnostics(project).len(), 1);
        assert_eq!(graph.project_libraries(project).len(), 1);

        registry.register(ExternalLibrary::new("Excel").with_module(LibraryModule::class("Range")));
        let second = synchronize(&mut graph, &modules, &loader(&registry), &interner);
        assert!(second.failed_projects.is_empty());
        assert_eq!(second.changed_projects, vec![project]);
        assert_eq!(graph.project_libraries(project).len(), 2);

        let third = synchronize(&mut graph, &modules, &loader(&registry), &interner);
        assert!(third.changed_projects.is_empty());
    }

    #[test]
    fn test_unreferenced_library_is_unloaded() {
        let interner = Interner::new();
        let modules = ModuleSet::new();
        let registry = LibraryRegistry::new();
        registry.register(ExternalLibrary::new("Excel"));
        let mut graph = DeclarationGraph::new();
        modules
            .upsert("P", "M", crate::hir::ComponentKind::Standard, "")
            .unwrap();
        modules
            .set_library_references("P", vec![smol_str::SmolStr::from("Excel")])
            .unwrap();
        synchronize(&mut graph, &modules, &loader(&registry), &interner);
        assert!(graph.library_id("excel").is_some());

        modules.set_library_references("P", Vec::<smol_str::SmolStr>::new()).unwrap();
        synchronize(&mut graph, &modules, &loader(&registry), &interner);
        assert!(graph.library_id("excel").is_none());
        assert!(graph.library_id("VBA").is_some());
    }
}
