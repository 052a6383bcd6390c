//! Declaration stage: one module tree to a [`ModuleDeclarations`].
//!
//! Building a module's declarations only needs its own tree, so modules
//! are built in parallel and merged into the graph behind a barrier.
//! Cross-module work (supertypes, types, references) happens after.

use std::sync::Arc;

use rayon::prelude::*;
use smol_str::SmolStr;

use super::builtins::ImplicitDeclarationGenerator;
use crate::base::{Interner, LineIndex, ModuleId, ProjectId, Selection, TextRange, fold};
use crate::hir::{
    Accessibility, ComponentKind, Declaration, DeclarationKind, DeclaredType, DeclId, DeclOwner,
    Diagnostic, LocalDeclId, ModuleDeclarations, ScopeLevel, intrinsic_for_hint,
};
use crate::syntax::{
    AsType, Ident, ModuleItem, ModuleTree, Param, Procedure, ProcedureKind, Stmt, TypePath,
    VarSpec, Visibility,
};

/// Everything needed to build one module.
pub struct BuildInput<'a> {
    pub module: ModuleId,
    pub project: ProjectId,
    pub project_name: &'a str,
    pub name: &'a str,
    pub kind: ComponentKind,
    pub tree: &'a ModuleTree,
    pub text: &'a str,
    pub line_index: &'a LineIndex,
    pub syntax_diagnostics: Vec<Diagnostic>,
    pub generation: u64,
}

/// Build a batch on the current rayon pool.
pub fn build_batch(
    inputs: Vec<BuildInput<'_>>,
    generators: &[Arc<dyn ImplicitDeclarationGenerator>],
    interner: &Interner,
) -> Vec<ModuleDeclarations> {
    inputs
        .into_par_iter()
        .map(|input| build_module(input, generators, interner))
        .collect()
}

/// Build the declarations of one module.
pub fn build_module(
    input: BuildInput<'_>,
    generators: &[Arc<dyn ImplicitDeclarationGenerator>],
    interner: &Interner,
) -> ModuleDeclarations {
    let mut builder = DeclarationBuilder::new(&input, interner);
    builder.module_root();
    for item in &input.tree.items {
        builder.item(item);
    }
    builder.implicit(generators);
    builder.default_instance();

    let mut entry = builder.entry;
    entry.implements = input.tree.implements.clone();
    entry.syntax_diagnostics = input.syntax_diagnostics;
    entry.generation = input.generation;
    entry.compute_exported();
    tracing::debug!(
        "built {} declarations for {}.{}",
        entry.set.len(),
        input.project_name,
        input.name
    );
    entry
}

struct DeclarationBuilder<'a> {
    input: &'a BuildInput<'a>,
    interner: &'a Interner,
    entry: ModuleDeclarations,
    owner: DeclOwner,
    module_id: DeclId,
    module_qualified: SmolStr,
}

/// Where a declaration sits, for naming and scope.
#[derive(Clone)]
struct Scope {
    parent: DeclId,
    qualified: SmolStr,
    level: ScopeLevel,
}

impl<'a> DeclarationBuilder<'a> {
    fn new(input: &'a BuildInput<'a>, interner: &'a Interner) -> Self {
        Self {
            input,
            interner,
            entry: ModuleDeclarations::new(input.module, input.project),
            owner: DeclOwner::Module(input.module),
            module_id: DeclId::module(input.module),
            module_qualified: SmolStr::new(format!("{}.{}", input.project_name, input.name)),
        }
    }

    fn member_scope(&self) -> Scope {
        Scope {
            parent: self.module_id,
            qualified: self.module_qualified.clone(),
            level: ScopeLevel::Member,
        }
    }

    /// Push a declaration named `name` under `scope`.
    fn push(
        &mut self,
        name: &str,
        kind: DeclarationKind,
        scope: &Scope,
        configure: impl FnOnce(&mut Declaration),
    ) -> DeclId {
        let id = DeclId::new(self.owner, self.entry.set.next_local());
        let mut decl = Declaration::new(
            id,
            name,
            self.interner.intern(name),
            kind,
            DeclId::project(self.input.project),
        );
        decl.parent = Some(scope.parent);
        decl.scope = scope.qualified.clone();
        decl.qualified_name = SmolStr::new(format!("{}.{}", scope.qualified, name));
        decl.level = scope.level;
        configure(&mut decl);
        self.entry.set.push(decl);
        id
    }

    /// Push a declaration for a written identifier.
    fn push_ident(
        &mut self,
        ident: &Ident,
        kind: DeclarationKind,
        scope: &Scope,
        configure: impl FnOnce(&mut Declaration),
    ) -> DeclId {
        let selection = self.selection(ident.range);
        self.push(&ident.name, kind, scope, |decl| {
            decl.range = ident.range;
            decl.selection = selection;
            configure(decl);
        })
    }

    fn selection(&self, range: TextRange) -> Selection {
        self.input.line_index.selection(range)
    }

    /// `As` clause if written, else the type-hint suffix, else Variant.
    fn declared_type(&self, ident: &Ident, as_type: Option<&AsType>) -> DeclaredType {
        if let Some(as_type) = as_type {
            return DeclaredType::from_path(as_type.path.clone(), as_type.is_new);
        }
        let written = self
            .input
            .text
            .get(usize::from(ident.range.start())..usize::from(ident.range.end()))
            .unwrap_or_default();
        written
            .chars()
            .last()
            .and_then(intrinsic_for_hint)
            .map_or(DeclaredType::Variant, |t| DeclaredType::Intrinsic(SmolStr::new(t)))
    }

    // ------------------------------------------------------------------
    // Module level
    // ------------------------------------------------------------------

    fn module_root(&mut self) {
        let input = self.input;
        let kind = match input.kind {
            ComponentKind::Standard => DeclarationKind::ProceduralModule,
            _ => DeclarationKind::ClassModule,
        };
        let project = DeclId::project(input.project);
        let mut root = Declaration::new(
            self.module_id,
            input.name,
            self.interner.intern(input.name),
            kind,
            project,
        );
        root.accessibility = Accessibility::Public;
        root.level = ScopeLevel::Module;
        root.parent = Some(project);
        root.scope = SmolStr::new(input.project_name);
        root.qualified_name = self.module_qualified.clone();
        root.component_kind = Some(input.kind);
        root.body = Some(self.selection(TextRange::up_to((input.text.len() as u32).into())));
        self.entry.set.push(root);
    }

    fn item(&mut self, item: &ModuleItem) {
        let scope = self.member_scope();
        match item {
            ModuleItem::Variables(decl) => {
                let accessibility = member_accessibility(decl.visibility, Accessibility::Private);
                for var in &decl.vars {
                    self.variable(var, &scope, accessibility, decl.is_static);
                }
            }
            ModuleItem::Constants(decl) => {
                let accessibility = member_accessibility(decl.visibility, Accessibility::Private);
                for spec in &decl.consts {
                    let as_type = self.declared_type(&spec.name, spec.as_type.as_ref());
                    self.push_ident(&spec.name, DeclarationKind::Constant, &scope, |d| {
                        d.accessibility = accessibility;
                        d.as_type = as_type;
                    });
                }
            }
            ModuleItem::Procedure(procedure) => self.procedure(procedure, &scope),
            ModuleItem::Enum(decl) => {
                let accessibility = member_accessibility(decl.visibility, Accessibility::Implicit);
                let kind = DeclarationKind::Enumeration;
                let enum_id = self.push_ident(&decl.name, kind, &scope, |d| {
                    d.accessibility = accessibility;
                });
                let inner = self.nested_scope(enum_id, &decl.name.name, ScopeLevel::Member);
                for member in &decl.members {
                    self.push_ident(&member.name, DeclarationKind::EnumerationMember, &inner, |d| {
                        d.accessibility = accessibility;
                        d.as_type = DeclaredType::Intrinsic(SmolStr::new_static("Long"));
                    });
                }
            }
            ModuleItem::Type(decl) => {
                let accessibility = member_accessibility(decl.visibility, Accessibility::Implicit);
                let type_id =
                    self.push_ident(&decl.name, DeclarationKind::UserDefinedType, &scope, |d| {
                        d.accessibility = accessibility;
                    });
                let inner = self.nested_scope(type_id, &decl.name.name, ScopeLevel::Member);
                for member in &decl.members {
                    let as_type = self.declared_type(&member.name, member.as_type.as_ref());
                    self.push_ident(
                        &member.name,
                        DeclarationKind::UserDefinedTypeMember,
                        &inner,
                        |d| {
                            d.accessibility = accessibility;
                            d.is_array = member.is_array;
                            d.as_type = as_type;
                        },
                    );
                }
            }
            ModuleItem::Event(decl) => {
                let accessibility = member_accessibility(decl.visibility, Accessibility::Implicit);
                let event = self.push_ident(&decl.name, DeclarationKind::Event, &scope, |d| {
                    d.accessibility = accessibility;
                });
                self.params(event, &decl.name.name, &decl.params);
            }
            ModuleItem::Declare(decl) => {
                let accessibility = member_accessibility(decl.visibility, Accessibility::Implicit);
                let kind = if decl.is_function {
                    DeclarationKind::LibraryFunction
                } else {
                    DeclarationKind::LibraryProcedure
                };
                let as_type = self.declared_type(&decl.name, decl.as_type.as_ref());
                let declared = self.push_ident(&decl.name, kind, &scope, |d| {
                    d.accessibility = accessibility;
                    d.as_type = as_type;
                });
                self.params(declared, &decl.name.name, &decl.params);
            }
        }
    }

    fn nested_scope(&self, parent: DeclId, name: &str, level: ScopeLevel) -> Scope {
        Scope {
            parent,
            qualified: SmolStr::new(format!("{}.{}", self.module_qualified, name)),
            level,
        }
    }

    fn variable(
        &mut self,
        var: &VarSpec,
        scope: &Scope,
        accessibility: Accessibility,
        is_static: bool,
    ) {
        let as_type = self.declared_type(&var.name, var.as_type.as_ref());
        self.push_ident(&var.name, DeclarationKind::Variable, scope, |d| {
            d.accessibility = accessibility;
            d.as_type = as_type;
            d.is_array = var.is_array;
            d.is_with_events = var.with_events;
            d.is_static = is_static;
        });
    }

    fn params(&mut self, owner: DeclId, owner_name: &str, params: &[Param]) {
        let scope = self.nested_scope(owner, owner_name, ScopeLevel::Local);
        for param in params {
            let as_type = self.declared_type(&param.name, param.as_type.as_ref());
            self.push_ident(&param.name, DeclarationKind::Parameter, &scope, |d| {
                d.as_type = as_type;
                d.is_optional = param.optional;
                d.is_param_array = param.param_array;
                d.is_array = param.is_array;
            });
        }
    }

    fn procedure(&mut self, procedure: &Procedure, scope: &Scope) {
        let kind = match procedure.kind {
            ProcedureKind::Sub => DeclarationKind::Procedure,
            ProcedureKind::Function => DeclarationKind::Function,
            ProcedureKind::PropertyGet => DeclarationKind::PropertyGet,
            ProcedureKind::PropertyLet => DeclarationKind::PropertyLet,
            ProcedureKind::PropertySet => DeclarationKind::PropertySet,
        };
        let accessibility = member_accessibility(procedure.visibility, Accessibility::Implicit);
        let as_type = if kind.returns_value() {
            self.declared_type(&procedure.name, procedure.as_type.as_ref())
        } else {
            DeclaredType::Variant
        };
        let body = self.selection(procedure.range);
        let id = self.push_ident(&procedure.name, kind, scope, |d| {
            d.accessibility = accessibility;
            d.as_type = as_type;
            d.is_static = procedure.is_static;
            d.body = Some(body);
        });

        self.params(id, &procedure.name.name, &procedure.params);
        let locals = self.nested_scope(id, &procedure.name.name, ScopeLevel::Local);
        self.locals(&procedure.body, &locals, procedure.is_static);
    }

    /// Locals declared anywhere in a procedure body, nested blocks included.
    fn locals(&mut self, body: &[Stmt], scope: &Scope, procedure_static: bool) {
        for stmt in body {
            match stmt {
                Stmt::Dim(local) => {
                    for var in &local.vars {
                        self.variable(
                            var,
                            scope,
                            Accessibility::Implicit,
                            local.is_static || procedure_static,
                        );
                    }
                }
                Stmt::Const(specs) => {
                    for spec in specs {
                        let as_type = self.declared_type(&spec.name, spec.as_type.as_ref());
                        self.push_ident(&spec.name, DeclarationKind::Constant, scope, |d| {
                            d.as_type = as_type;
                        });
                    }
                }
                Stmt::If { branches, else_body } => {
                    for (_, body) in branches {
                        self.locals(body, scope, procedure_static);
                    }
                    if let Some(body) = else_body {
                        self.locals(body, scope, procedure_static);
                    }
                }
                Stmt::Select { cases, else_body, .. } => {
                    for case in cases {
                        self.locals(&case.body, scope, procedure_static);
                    }
                    if let Some(body) = else_body {
                        self.locals(body, scope, procedure_static);
                    }
                }
                Stmt::For { body, .. }
                | Stmt::ForEach { body, .. }
                | Stmt::Do { body, .. }
                | Stmt::While { body, .. }
                | Stmt::With { body, .. } => self.locals(body, scope, procedure_static),
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Synthesized declarations
    // ------------------------------------------------------------------

    fn implicit(&mut self, generators: &[Arc<dyn ImplicitDeclarationGenerator>]) {
        let scope = self.member_scope();
        for generator in generators.iter().filter(|g| g.applies_to(self.input.kind)) {
            for implicit in generator.generate(self.input.name, self.input.tree) {
                let id = self.push(&implicit.name, implicit.kind, &scope, |d| {
                    d.is_implicit = true;
                });
                for prefix in &implicit.handler_prefixes {
                    let handler = fold(&format!("{}_{}", prefix, implicit.name));
                    self.entry.handlers.entry(handler).or_insert(id.local);
                }
                let inner = self.nested_scope(id, &implicit.name, ScopeLevel::Local);
                for param in &implicit.params {
                    self.push(param, DeclarationKind::Parameter, &inner, |d| {
                        d.is_implicit = true;
                    });
                }
            }
        }
    }

    /// Forms and documents always have a predeclared instance; classes
    /// only with `VB_PredeclaredId = True`.
    fn default_instance(&mut self) {
        let input = self.input;
        let predeclared = match input.kind {
            ComponentKind::UserForm | ComponentKind::Document => true,
            ComponentKind::Class => input.tree.has_predeclared_id(),
            ComponentKind::Standard => false,
        };
        if !predeclared {
            return;
        }
        let scope = self.member_scope();
        let path = TypePath {
            segments: vec![Ident::new(input.name, TextRange::default())],
        };
        self.push(input.name, DeclarationKind::Variable, &scope, |d| {
            d.accessibility = Accessibility::Global;
            d.is_implicit = true;
            d.is_default_instance = true;
            d.as_type = DeclaredType::Named {
                path,
                is_new: false,
                resolved: None,
            };
        });
    }
}

fn member_accessibility(visibility: Option<Visibility>, default: Accessibility) -> Accessibility {
    match visibility {
        Some(Visibility::Public) => Accessibility::Public,
        Some(Visibility::Global) => Accessibility::Global,
        Some(Visibility::Friend) => Accessibility::Friend,
        Some(Visibility::Private) | Some(Visibility::Dim) => Accessibility::Private,
        None => default,
    }
}

/// The procedure whose name matches a `Prefix_Member` handler, split at
/// the first underscore after `prefix`.
pub(crate) fn split_handler_name<'n>(name: &'n str, prefix: &str) -> Option<&'n str> {
    let split = match name.char_indices().nth(prefix.chars().count()) {
        Some((at, _)) => at,
        None => name.len(),
    };
    if fold(&name[..split]) != fold(prefix) {
        return None;
    }
    name[split..].strip_prefix('_').filter(|rest| !rest.is_empty())
}

/// Local id of the declaration whose identifier is exactly `range`.
pub(crate) fn declaration_at(entry: &ModuleDeclarations, range: TextRange) -> Option<LocalDeclId> {
    entry
        .set
        .iter()
        .find(|d| d.range == range && !d.is_implicit)
        .map(|d| d.id.local)
}
