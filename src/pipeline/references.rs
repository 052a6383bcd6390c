//! Reference stage: bind every identifier in a module to a declaration.
//!
//! Runs in two phases over the same batch. Phase one resolves declared
//! types and `Implements` clauses so that phase two, which walks procedure
//! bodies, can follow `a.b` through early-bound receivers. Each module is
//! resolved against a read-only graph and produces a [`ModuleResolution`];
//! results are applied behind a barrier.

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use smol_str::SmolStr;

use super::declarations::{declaration_at, split_handler_name};
use super::parse::ParsedModule;
use crate::base::{Interner, LineIndex, ModuleId, Selection, TextRange, TextSize, fold};
use crate::hir::{
    AccessKind, DeclarationGraph, DeclarationKind, DeclaredType, DeclId, DeclOwner, Diagnostic,
    DiagnosticCollector, IdentifierReference, LocalDeclId, ModuleDeclarations,
    ModuleDependencyTracker, ResolutionIndex, ResolveResult, Resolver, UnboundReference,
};
use crate::syntax::{Arg, Expr, Ident, ModuleItem, Param, Stmt, TypePath};

/// Shared inputs of one reference phase.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub graph: &'a DeclarationGraph,
    pub index: &'a ResolutionIndex,
    pub interner: &'a Interner,
    pub report_ambiguity: bool,
}

/// Everything one module's resolution writes back to the graph.
#[derive(Debug, Default)]
pub struct ModuleResolution {
    pub module: Option<ModuleId>,
    pub references: Vec<(DeclId, IdentifierReference)>,
    /// Declarations of the module whose `As` type resolved.
    pub type_resolutions: Vec<(LocalDeclId, DeclId)>,
    pub unbound: Vec<UnboundReference>,
    pub diagnostics: Vec<Diagnostic>,
    pub handler_links: Vec<(LocalDeclId, DeclId)>,
    pub return_assignments: Vec<(LocalDeclId, IdentifierReference)>,
}

impl ModuleResolution {
    fn new(module: ModuleId) -> Self {
        Self {
            module: Some(module),
            ..Self::default()
        }
    }

    /// Other user modules this module now depends on.
    pub fn dependencies(&self) -> FxHashSet<ModuleId> {
        let own = self.module;
        self.references
            .iter()
            .map(|(target, _)| *target)
            .chain(self.type_resolutions.iter().map(|(_, target)| *target))
            .filter_map(|target| target.owner.module())
            .filter(|m| Some(*m) != own)
            .collect()
    }
}

/// Run `phase` over `modules` on the current rayon pool. Modules reached
/// after `cancelled` turned true are skipped.
pub fn resolve_batch(
    ctx: ResolveContext<'_>,
    modules: &[(ModuleId, ParsedModule)],
    phase: Phase,
    cancelled: &(dyn Fn() -> bool + Sync),
) -> Vec<ModuleResolution> {
    modules
        .par_iter()
        .filter_map(|(module, parsed)| {
            if cancelled() {
                return None;
            }
            match phase {
                Phase::Types => resolve_types(ctx, *module, parsed),
                Phase::Bodies => resolve_bodies(ctx, *module, parsed),
            }
        })
        .collect()
}

/// The two reference phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Types,
    Bodies,
}

/// Write one module's results into the graph and dependency tracker.
pub fn apply(
    graph: &mut DeclarationGraph,
    deps: &mut ModuleDependencyTracker,
    result: ModuleResolution,
) {
    let Some(module) = result.module else {
        return;
    };
    for dependency in result.dependencies() {
        deps.record_reference(module, dependency);
    }
    for (target, reference) in result.references {
        graph.add_reference(target, reference);
    }
    for (local, target) in result.type_resolutions {
        let Some(decl) = graph.declaration_mut(DeclId::new(DeclOwner::Module(module), local)) else {
            continue;
        };
        if let DeclaredType::Named { resolved, .. } = &mut decl.as_type {
            *resolved = Some(target);
        }
    }
    if let Some(entry) = graph.module_mut(module) {
        entry.unbound.extend(result.unbound);
        entry.resolution_diagnostics.extend(result.diagnostics);
        entry.handler_links.extend(result.handler_links);
        entry.return_assignments.extend(result.return_assignments);
    }
}

// ============================================================================
// PHASE ONE: TYPES
// ============================================================================

/// Resolve every `As` type and `Implements` clause of a module.
pub fn resolve_types(
    ctx: ResolveContext<'_>,
    module: ModuleId,
    parsed: &ParsedModule,
) -> Option<ModuleResolution> {
    let entry = ctx.graph.module(module)?;
    let mut recorder = Recorder::new(ctx, entry, &parsed.line_index);
    let resolver = Resolver::new(ctx.graph, ctx.index, ctx.interner, module, entry.project);

    for decl in entry.set.iter() {
        let Some(path) = decl.as_type.path() else {
            continue;
        };
        let procedure = (decl.level == crate::hir::ScopeLevel::Local)
            .then_some(decl.parent)
            .flatten();
        let site = resolver.with_procedure(procedure);
        let resolution = site.resolve_type(path);
        let target = if decl.is_implicit {
            resolution.target.decl()
        } else {
            recorder.type_path(site, path, resolution)
        };
        if let Some(target) = target {
            recorder.out.type_resolutions.push((decl.id.local, target));
        }
    }

    for path in &entry.implements {
        let resolution = resolver.resolve_type(path);
        recorder.type_path(resolver, path, resolution);
    }

    Some(recorder.finish())
}

// ============================================================================
// PHASE TWO: BODIES
// ============================================================================

/// Resolve expressions, member accesses, named arguments and handler
/// procedures of a module.
pub fn resolve_bodies(
    ctx: ResolveContext<'_>,
    module: ModuleId,
    parsed: &ParsedModule,
) -> Option<ModuleResolution> {
    let entry = ctx.graph.module(module)?;
    let resolver = Resolver::new(ctx.graph, ctx.index, ctx.interner, module, entry.project);
    let mut walker = BodyWalker {
        recorder: Recorder::new(ctx, entry, &parsed.line_index),
        entry,
        module_site: resolver,
        with_stack: Vec::new(),
    };

    for item in &parsed.tree.items {
        walker.item(item);
    }
    Some(walker.recorder.finish())
}

struct BodyWalker<'a> {
    recorder: Recorder<'a>,
    entry: &'a ModuleDeclarations,
    module_site: Resolver<'a>,
    /// Receivers of enclosing `With` blocks; `None` when late bound.
    with_stack: Vec<Option<DeclId>>,
}

impl<'a> BodyWalker<'a> {
    fn owned(&self, local: LocalDeclId) -> DeclId {
        DeclId::new(DeclOwner::Module(self.entry.module), local)
    }

    fn declared(&self, ident: &Ident) -> Option<DeclId> {
        declaration_at(self.entry, ident.range).map(|local| self.owned(local))
    }

    fn item(&mut self, item: &ModuleItem) {
        let site = self.module_site;
        match item {
            ModuleItem::Variables(decl) => {
                for var in &decl.vars {
                    self.exprs(site, &var.bounds);
                }
            }
            ModuleItem::Constants(decl) => {
                for spec in &decl.consts {
                    self.expr(site, &spec.value, AccessKind::Read);
                }
            }
            ModuleItem::Enum(decl) => {
                for member in &decl.members {
                    if let Some(value) = &member.value {
                        self.expr(site, value, AccessKind::Read);
                    }
                }
            }
            ModuleItem::Type(decl) => {
                for member in &decl.members {
                    self.exprs(site, &member.bounds);
                }
            }
            ModuleItem::Event(decl) => {
                let site = site.with_procedure(self.declared(&decl.name));
                self.param_defaults(site, &decl.params);
            }
            ModuleItem::Declare(decl) => {
                let site = site.with_procedure(self.declared(&decl.name));
                self.param_defaults(site, &decl.params);
            }
            ModuleItem::Procedure(procedure) => {
                let declared = self.declared(&procedure.name);
                let site = site.with_procedure(declared);
                self.param_defaults(site, &procedure.params);
                self.with_stack.clear();
                self.stmts(site, &procedure.body);
                if let Some(id) = declared {
                    self.handler(site, id, &procedure.name);
                }
            }
        }
    }

    fn param_defaults(&mut self, site: Resolver<'a>, params: &[Param]) {
        for param in params {
            if let Some(default) = &param.default {
                self.expr(site, default, AccessKind::Read);
            }
        }
    }

    fn stmts(&mut self, site: Resolver<'a>, body: &[Stmt]) {
        for stmt in body {
            self.stmt(site, stmt);
        }
    }

    fn stmt(&mut self, site: Resolver<'a>, stmt: &Stmt) {
        match stmt {
            Stmt::Dim(local) => {
                for var in &local.vars {
                    self.exprs(site, &var.bounds);
                }
            }
            Stmt::Const(specs) => {
                for spec in specs {
                    self.expr(site, &spec.value, AccessKind::Read);
                }
            }
            Stmt::Assign {
                is_set,
                target,
                value,
            } => {
                let access = if *is_set { AccessKind::Set } else { AccessKind::Let };
                self.expr(site, target, access);
                self.expr(site, value, AccessKind::Read);
            }
            Stmt::Call { callee, args } => {
                let callee = self.expr(site, callee, AccessKind::Read);
                self.args(site, callee, args);
            }
            Stmt::If {
                branches,
                else_body,
            } => {
                for (condition, body) in branches {
                    self.expr(site, condition, AccessKind::Read);
                    self.stmts(site, body);
                }
                if let Some(body) = else_body {
                    self.stmts(site, body);
                }
            }
            Stmt::For {
                counter,
                from,
                to,
                step,
                body,
            } => {
                self.expr(site, counter, AccessKind::Let);
                self.expr(site, from, AccessKind::Read);
                self.expr(site, to, AccessKind::Read);
                if let Some(step) = step {
                    self.expr(site, step, AccessKind::Read);
                }
                self.stmts(site, body);
            }
            Stmt::ForEach {
                element,
                collection,
                body,
            } => {
                self.expr(site, element, AccessKind::Let);
                self.expr(site, collection, AccessKind::Read);
                self.stmts(site, body);
            }
            Stmt::Do { condition, body } => {
                if let Some(condition) = condition {
                    self.expr(site, condition, AccessKind::Read);
                }
                self.stmts(site, body);
            }
            Stmt::While { condition, body } => {
                self.expr(site, condition, AccessKind::Read);
                self.stmts(site, body);
            }
            Stmt::With { object, body } => {
                let receiver = self
                    .expr(site, object, AccessKind::Read)
                    .and_then(|d| site.member_container(d));
                self.with_stack.push(receiver);
                self.stmts(site, body);
                self.with_stack.pop();
            }
            Stmt::Select {
                subject,
                cases,
                else_body,
            } => {
                self.expr(site, subject, AccessKind::Read);
                for case in cases {
                    self.exprs(site, &case.tests);
                    self.stmts(site, &case.body);
                }
                if let Some(body) = else_body {
                    self.stmts(site, body);
                }
            }
            Stmt::ReDim { targets, .. } => {
                for target in targets {
                    self.expr(site, target, AccessKind::Let);
                }
            }
            Stmt::RaiseEvent { event, args } => {
                let result = site.resolve_value(&event.name, AccessKind::Read);
                let event = self
                    .recorder
                    .record(site, event, result, AccessKind::Read, false, true);
                self.args(site, event, args);
            }
            Stmt::Keyword { operands } => self.exprs(site, operands),
            Stmt::Jump => {}
        }
    }

    fn exprs(&mut self, site: Resolver<'a>, exprs: &[Expr]) {
        for expr in exprs {
            self.expr(site, expr, AccessKind::Read);
        }
    }

    /// Resolve an expression; returns the declaration it evaluates to when
    /// that is known statically.
    fn expr(&mut self, site: Resolver<'a>, expr: &Expr, access: AccessKind) -> Option<DeclId> {
        match expr {
            Expr::Literal(_) => None,
            Expr::Name(ident) => {
                let result = site.resolve_value(&ident.name, access);
                self.recorder.record(site, ident, result, access, false, true)
            }
            Expr::Me(_) => site.current_class(),
            Expr::Member { object, member } => {
                let receiver = match object {
                    Some(object) => self.expr(site, object, AccessKind::Read),
                    None => self.with_stack.last().copied().flatten(),
                };
                let container = match object {
                    Some(_) => receiver.and_then(|d| site.member_container(d)),
                    None => receiver,
                }?;
                let result = site.resolve_member(container, &member.name, access);
                let report_unbound = container.owner.is_user();
                self.recorder
                    .record(site, member, result, access, true, report_unbound)
            }
            Expr::Call { callee, args } => {
                let callee = self.expr(site, callee, access);
                self.args(site, callee, args);
                callee
            }
            Expr::New(path) => {
                let resolution = site.resolve_type(path);
                self.recorder.type_path(site, path, resolution)
            }
            Expr::TypeOf { operand, type_path } => {
                self.expr(site, operand, AccessKind::Read);
                let resolution = site.resolve_type(type_path);
                self.recorder.type_path(site, type_path, resolution);
                None
            }
            Expr::Unary { operand, .. } => {
                self.expr(site, operand, AccessKind::Read);
                None
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(site, lhs, AccessKind::Read);
                self.expr(site, rhs, AccessKind::Read);
                None
            }
            Expr::Paren(inner) => self.expr(site, inner, AccessKind::Read),
        }
    }

    fn args(&mut self, site: Resolver<'a>, callee: Option<DeclId>, args: &[Arg]) {
        let callable = callee.filter(|c| {
            site.decl(*c)
                .is_some_and(|d| d.kind.is_procedure() || d.kind == DeclarationKind::Event)
        });
        for arg in args {
            if let (Some(name), Some(callee)) = (&arg.name, callable) {
                let result = site
                    .resolve_parameter(callee, &name.name)
                    .map_or(ResolveResult::NotFound, ResolveResult::Found);
                self.recorder.record(
                    site,
                    name,
                    result,
                    AccessKind::Read,
                    false,
                    callee.owner.is_user(),
                );
            }
            if let Some(value) = &arg.value {
                self.expr(site, value, AccessKind::Read);
            }
        }
    }

    // ------------------------------------------------------------------
    // Handlers and interface implementations
    // ------------------------------------------------------------------

    /// Bind a `Prefix_Member` procedure to the implicit event, interface
    /// member or `WithEvents` event it handles.
    fn handler(&mut self, site: Resolver<'a>, procedure: DeclId, name: &Ident) {
        if let Some(&event) = self.entry.handlers.get(&fold(&name.name)) {
            let event = self.owned(event);
            self.recorder.reference(site, event, name.range, &name.name, false, false, false);
            self.recorder.out.handler_links.push((procedure.local, event));
            return;
        }

        let access = match site.decl(procedure).map(|d| d.kind) {
            Some(DeclarationKind::PropertyLet) => AccessKind::Let,
            Some(DeclarationKind::PropertySet) => AccessKind::Set,
            _ => AccessKind::Read,
        };
        let supertypes = self.entry.root().map(|r| r.supertypes.clone()).unwrap_or_default();
        for interface in supertypes {
            let Some(interface_decl) = site.decl(interface) else {
                continue;
            };
            let Some(member_name) = split_handler_name(&name.name, &interface_decl.name) else {
                continue;
            };
            let member = site
                .resolve_member(interface, member_name, access)
                .decl()
                .filter(|m| site.decl(*m).is_some_and(|d| d.kind.is_procedure()));
            if let Some(member) = member {
                let prefix_len = name.name.len() - member_name.len() - 1;
                self.link_split(site, procedure, name, interface, member, prefix_len);
                return;
            }
        }

        let entry = self.entry;
        for &child in entry.set.children_of(LocalDeclId::ROOT) {
            let Some(var) = entry.set.get(child).filter(|d| d.is_with_events) else {
                continue;
            };
            let Some(event_name) = split_handler_name(&name.name, &var.name) else {
                continue;
            };
            let Some(class) = var.as_type.resolved() else {
                continue;
            };
            let event = site
                .resolve_member(class, event_name, AccessKind::Read)
                .decl()
                .filter(|e| site.decl(*e).is_some_and(|d| d.kind == DeclarationKind::Event));
            if let Some(event) = event {
                let prefix_len = name.name.len() - event_name.len() - 1;
                self.link_split(site, procedure, name, var.id, event, prefix_len);
                return;
            }
        }
    }

    /// Record `Prefix_Member` as a reference to the prefix declaration and
    /// one to the member, each over its part of the identifier.
    fn link_split(
        &mut self,
        site: Resolver<'a>,
        procedure: DeclId,
        name: &Ident,
        prefix: DeclId,
        member: DeclId,
        prefix_len: usize,
    ) {
        let start = name.range.start();
        let prefix_end = start + TextSize::from(prefix_len as u32);
        let member_start = (prefix_end + TextSize::from(1)).min(name.range.end());
        let prefix_range = TextRange::new(start, prefix_end.min(name.range.end()));
        let member_range = TextRange::new(member_start, name.range.end());
        let (prefix_text, member_text) = name
            .name
            .split_at(prefix_len.min(name.name.len()));
        let member_text = member_text.trim_start_matches('_');

        self.recorder
            .reference(site, prefix, prefix_range, prefix_text, false, false, false);
        self.recorder
            .reference(site, member, member_range, member_text, false, true, false);
        self.recorder.out.handler_links.push((procedure.local, member));
    }
}

// ============================================================================
// RECORDING
// ============================================================================

struct Recorder<'a> {
    ctx: ResolveContext<'a>,
    module: ModuleId,
    line_index: &'a LineIndex,
    diagnostics: DiagnosticCollector,
    out: ModuleResolution,
}

impl<'a> Recorder<'a> {
    fn new(ctx: ResolveContext<'a>, entry: &ModuleDeclarations, line_index: &'a LineIndex) -> Self {
        Self {
            ctx,
            module: entry.module,
            line_index,
            diagnostics: DiagnosticCollector::new(),
            out: ModuleResolution::new(entry.module),
        }
    }

    fn finish(mut self) -> ModuleResolution {
        self.out.diagnostics = self.diagnostics.take();
        self.out
    }

    #[allow(clippy::too_many_arguments)]
    fn reference(
        &mut self,
        site: Resolver<'_>,
        target: DeclId,
        range: TextRange,
        identifier: &str,
        is_assignment: bool,
        is_member_access: bool,
        is_ambiguous: bool,
    ) {
        let reference = IdentifierReference {
            module: self.module,
            parent_scope: site.parent_scope(),
            range,
            selection: self.line_index.selection(range),
            identifier: SmolStr::new(identifier),
            is_assignment,
            is_member_access,
            is_ambiguous,
        };
        let sets_return_value = is_assignment
            && !is_member_access
            && site.procedure() == Some(target)
            && target.owner == DeclOwner::Module(self.module)
            && site.decl(target).is_some_and(|d| d.kind.returns_value());
        if sets_return_value {
            self.out.return_assignments.push((target.local, reference));
        } else {
            self.out.references.push((target, reference));
        }
    }

    fn unbound(&mut self, site: Resolver<'_>, ident: &Ident, is_assignment: bool) {
        let selection = self.line_index.selection(ident.range);
        self.out.unbound.push(UnboundReference {
            module: self.module,
            parent_scope: site.parent_scope(),
            range: ident.range,
            selection,
            identifier: ident.name.clone(),
            is_assignment,
        });
        self.diagnostics
            .add(Diagnostic::unbound(self.module, selection, &ident.name));
    }

    /// Record the outcome of one lookup; returns the bound declaration.
    fn record(
        &mut self,
        site: Resolver<'_>,
        ident: &Ident,
        result: ResolveResult,
        access: AccessKind,
        is_member_access: bool,
        report_unbound: bool,
    ) -> Option<DeclId> {
        let is_assignment = access.is_assignment();
        match result {
            ResolveResult::Found(target) => {
                self.reference(
                    site,
                    target,
                    ident.range,
                    &ident.name,
                    is_assignment,
                    is_member_access,
                    false,
                );
                Some(target)
            }
            ResolveResult::Ambiguous { chosen, candidates } => {
                self.reference(
                    site,
                    chosen,
                    ident.range,
                    &ident.name,
                    is_assignment,
                    is_member_access,
                    true,
                );
                if self.ctx.report_ambiguity {
                    self.ambiguity(ident, chosen, &candidates);
                }
                Some(chosen)
            }
            ResolveResult::NotFound => {
                if report_unbound {
                    self.unbound(site, ident, is_assignment);
                }
                None
            }
        }
    }

    fn ambiguity(&mut self, ident: &Ident, chosen: DeclId, candidates: &[DeclId]) {
        let graph = self.ctx.graph;
        let describe = |id: &DeclId| {
            graph.declaration(*id).map(|d| (d.module(), d.selection, d.qualified_name.clone()))
        };
        let chosen_name = describe(&chosen).map(|(_, _, q)| q).unwrap_or_default();
        let others: Vec<(Option<ModuleId>, Selection, SmolStr)> =
            candidates.iter().filter_map(describe).collect();
        let related: Vec<(Option<ModuleId>, Selection, &str)> = others
            .iter()
            .map(|(m, s, q)| (*m, *s, q.as_str()))
            .collect();
        self.diagnostics.ambiguous_resolution(
            self.module,
            self.line_index.selection(ident.range),
            &ident.name,
            &chosen_name,
            &related,
        );
    }

    /// References for each segment of a type path; returns the type.
    fn type_path(
        &mut self,
        site: Resolver<'_>,
        path: &TypePath,
        resolution: crate::hir::PathResolution,
    ) -> Option<DeclId> {
        let segments = path.segments.iter().zip(&resolution.qualifiers);
        for (i, (segment, qualifier)) in segments.enumerate() {
            self.reference(
                site,
                *qualifier,
                segment.range,
                &segment.name,
                false,
                i > 0,
                false,
            );
        }
        let last_index = resolution.qualifiers.len();
        let segment = path.segments.get(last_index)?;
        let is_member_access = last_index > 0;
        if segment.range.is_empty() {
            return resolution.target.decl();
        }
        self.record(
            site,
            segment,
            resolution.target,
            AccessKind::Read,
            is_member_access,
            true,
        )
    }
}
