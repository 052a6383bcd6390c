//! Pass coordinator: decides what is dirty and drives the stages.
//!
//! # Dirty sets
//!
//! - **parse**: modules named by the change set, modules whose text or kind
//!   moved past the cached tree, modules of projects whose library list
//!   changed, and modules an interrupted pass left before their
//!   declarations were rebuilt
//! - **declarations**: parsed modules with a new tree
//! - **references**: everything depending on the parse set or on a removed
//!   module; every module holding unbound references once anything was
//!   re-declared; every module of a project whose exported names changed;
//!   whatever an interrupted pass left unresolved
//!
//! Cancellation is checked between stages and before each module inside a
//! stage. Parsing and declaration building are one unit: whatever was
//! parsed gets its declarations before the pass may stop, so a tree and its
//! declarations never diverge. Modules whose work was skipped go back to the
//! last stage they completed, and the work they still need is kept in a
//! [`Carryover`] for the next pass.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use rustc_hash::FxHashSet;
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;

use super::Engine;
use super::declarations::{self, BuildInput};
use super::parse::{self, ParseOutcome, ParsedModule};
use super::references::{self, Phase, ResolveContext};
use super::sync::{self, LibraryLoader, SyncOutcome};
use crate::base::{LineIndex, ModuleId, ProjectId, Selection};
use crate::hir::{
    ChangeSet, DeclId, DeclarationFinder, DeclarationGraph, DeclarationKind, Diagnostic,
    DiagnosticKind, ModuleSource, ParserState, ResolutionIndex, Resolver, StateChangedEvent,
};
use crate::syntax::ModuleTree;

/// How a pass ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every stage ran; a new finder and state were published.
    Completed,
    /// The token fired; nothing was published.
    Cancelled,
}

impl PassOutcome {
    pub fn is_completed(self) -> bool {
        self == PassOutcome::Completed
    }
}

/// Work a cancelled pass leaves for the next one.
///
/// Removing modules and synchronizing libraries change the graph before
/// the first cancellation check, and the next pass cannot rediscover what
/// they implied by diffing. It is kept here until a pass completes.
#[derive(Clone, Debug, Default)]
pub struct Carryover {
    /// Projects whose library list changed.
    pub projects: FxHashSet<ProjectId>,
    /// Modules whose references still have to be resolved.
    pub modules: FxHashSet<ModuleId>,
    /// A module was removed, so unbound names get another try.
    pub modules_removed: bool,
}

impl Carryover {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.modules.is_empty() && !self.modules_removed
    }

    fn merge(&mut self, other: Carryover) {
        self.projects.extend(other.projects);
        self.modules.extend(other.modules);
        self.modules_removed |= other.modules_removed;
    }
}

/// Run one resolution pass.
pub fn run_pass(engine: &Engine, changes: &ChangeSet, token: &CancellationToken) -> PassOutcome {
    run_pass_with(engine, changes, &|| token.is_cancelled())
}

/// [`run_pass`] with an arbitrary cancellation check.
pub(crate) fn run_pass_with(
    engine: &Engine,
    changes: &ChangeSet,
    cancelled: &(dyn Fn() -> bool + Sync),
) -> PassOutcome {
    let _pass = engine.pass_lock.lock();
    let mut owed = std::mem::take(&mut *engine.carryover.lock());
    tracing::debug!(
        "resolution pass starting: {} modules, all={}, {} modules carried over",
        engine.modules.len(),
        changes.is_all(),
        owed.modules.len()
    );

    let live: FxHashSet<ModuleId> = engine.modules.module_ids().into_iter().collect();
    let (removed, removed_dependents) = remove_stale_modules(engine, &live);
    owed.modules.extend(removed_dependents);
    owed.modules_removed |= !removed.is_empty();

    // 1. Projects and libraries
    let mut sync = {
        let loader = LibraryLoader {
            provider: &*engine.provider,
            include_builtin: engine.config.include_builtin_library,
        };
        let mut graph = engine.graph.write();
        sync::synchronize(&mut graph, &engine.modules, &loader, &engine.interner)
    };
    owed.projects.extend(sync.changed_projects.iter().copied());
    sync.changed_projects = owed.projects.iter().copied().collect();
    sync.changed_projects.sort();
    if cancelled() {
        return cancel(engine, owed, "after library synchronization");
    }

    // 2. Parse
    let to_parse = parse_set(engine, changes, &sync);
    let parse_ids: Vec<ModuleId> = to_parse.iter().map(|s| s.id).collect();
    let prior: Vec<(ModuleId, ParserState)> = parse_ids
        .iter()
        .map(|&module| (module, engine.states.state(module)))
        .collect();
    engine.states.set_many(parse_ids.iter().copied(), ParserState::Parsing);
    let outcomes = {
        let cache = engine.parse_cache.read();
        engine
            .pool
            .install(|| parse::parse_batch(&*engine.grammar, &to_parse, &cache, cancelled))
    };
    let skipped: FxHashSet<ModuleId> = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_none())
        .map(|(module, _)| *module)
        .collect();
    for (module, state) in prior {
        if skipped.contains(&module) {
            engine.states.set(module, state);
        }
    }
    let pending = apply_parse(engine, outcomes);

    // 3. Declarations
    let rebuilt = build_declarations(engine, &to_parse, pending);

    // 4. References
    let mut seeds = parse_ids;
    seeds.extend(owed.modules.iter().copied());
    seeds.extend(
        engine
            .states
            .unfinished_modules()
            .into_iter()
            .filter(|m| engine.states.state(*m).is_at_or_past(ParserState::ResolvedDeclarations)),
    );
    let wanted = references_wanted(engine, seeds, &rebuilt, owed.modules_removed, &sync);
    if cancelled() {
        owed.modules.extend(wanted);
        return cancel(engine, owed, "after declarations");
    }
    let batch = enter_reference_stage(engine, &wanted, &sync);
    if let Err(unfinished) = resolve_references(engine, &batch, cancelled) {
        let entered: FxHashSet<ModuleId> = batch.iter().copied().collect();
        owed.modules.extend(unfinished);
        owed.modules
            .extend(wanted.iter().copied().filter(|m| !entered.contains(m)));
        return cancel(engine, owed, "during reference resolution");
    }

    // 5. Finalize
    let event = finalize(engine, &sync);
    tracing::debug!(
        "resolution pass completed: {:?} -> {:?}",
        event.previous,
        event.current
    );
    PassOutcome::Completed
}

fn cancel(engine: &Engine, owed: Carryover, stage: &str) -> PassOutcome {
    tracing::debug!(
        "resolution pass cancelled {}: {} projects, {} modules carried over",
        stage,
        owed.projects.len(),
        owed.modules.len()
    );
    engine.carryover.lock().merge(owed);
    PassOutcome::Cancelled
}

// ============================================================================
// REMOVAL AND DIRTY SETS
// ============================================================================

/// Drop everything held for modules the host removed. Returns the removed
/// modules and the live modules that depended on them.
fn remove_stale_modules(
    engine: &Engine,
    live: &FxHashSet<ModuleId>,
) -> (Vec<ModuleId>, Vec<ModuleId>) {
    let mut graph = engine.graph.write();
    let mut deps = engine.dependencies.write();
    let mut cache = engine.parse_cache.write();

    let mut stale: Vec<ModuleId> = graph
        .module_ids()
        .into_iter()
        .chain(cache.module_ids())
        .chain(engine.states.unfinished_modules())
        .filter(|m| !live.contains(m))
        .collect();
    stale.sort();
    stale.dedup();

    let mut dependents = Vec::new();
    for &module in &stale {
        dependents.extend(deps.modules_depending_on(module));
        deps.remove_module(module);
        graph.remove_module(module);
        cache.remove(module);
        engine.states.remove(module);
        tracing::debug!("removed {}", module);
    }
    dependents.retain(|m| live.contains(m));
    (stale, dependents)
}

/// Modules to (re)parse. Modules an interrupted pass left at or past
/// `ResolvedDeclarations` only need their references and are not here.
fn parse_set(engine: &Engine, changes: &ChangeSet, sync: &SyncOutcome) -> Vec<ModuleSource> {
    let unfinished: FxHashSet<ModuleId> = engine
        .states
        .unfinished_modules()
        .into_iter()
        .filter(|m| !engine.states.state(*m).is_at_or_past(ParserState::ResolvedDeclarations))
        .collect();
    let cache = engine.parse_cache.read();
    engine
        .modules
        .modules()
        .into_iter()
        .filter(|source| {
            changes.contains(source.id)
                || unfinished.contains(&source.id)
                || sync.changed_projects.contains(&source.project)
                || !cache.get(source.id).is_some_and(|p| p.is_current(source))
        })
        .collect()
}

// ============================================================================
// PARSE
// ============================================================================

/// A module whose declarations must be (re)built after parsing.
struct PendingBuild {
    module: ModuleId,
    diagnostics: Vec<Diagnostic>,
    /// Set for modules the grammar could not produce a module tree for.
    unresolvable: bool,
}

fn apply_parse(
    engine: &Engine,
    outcomes: Vec<(ModuleId, Option<ParseOutcome>)>,
) -> Vec<PendingBuild> {
    let mut graph = engine.graph.write();
    let mut cache = engine.parse_cache.write();
    let mut pending = Vec::new();

    for (module, outcome) in outcomes {
        let Some(outcome) = outcome else {
            continue;
        };
        match outcome {
            ParseOutcome::Parsed(parsed) => {
                cache.insert(module, parsed);
                engine.states.set(module, ParserState::Parsed);
                pending.push(PendingBuild {
                    module,
                    diagnostics: Vec::new(),
                    unresolvable: false,
                });
            }
            ParseOutcome::Failed {
                parsed,
                diagnostics,
                rebuild,
            } => {
                tracing::debug!("{}: {} syntax errors", module, parsed.errors.len());
                cache.insert(module, parsed);
                engine.states.set(module, ParserState::Error);
                match graph.module_mut(module).filter(|_| !rebuild) {
                    Some(entry) => entry.syntax_diagnostics = diagnostics,
                    None => pending.push(PendingBuild {
                        module,
                        diagnostics,
                        unresolvable: false,
                    }),
                }
            }
            ParseOutcome::Unresolvable(err) => {
                tracing::warn!("{}: {}", module, err);
                engine.states.set(module, ParserState::ResolverError);
                let diagnostic = Diagnostic::new(
                    DiagnosticKind::ResolverError,
                    Some(module),
                    Selection::default(),
                    err.to_string(),
                );
                if let Some(source) = engine.modules.get(module) {
                    let placeholder = match cache.get(module) {
                        Some(previous) => ParsedModule {
                            attempted_version: source.version,
                            ..previous.clone()
                        },
                        None => empty_parse(&source),
                    };
                    cache.insert(module, placeholder);
                }
                match graph.module_mut(module) {
                    Some(entry) => entry.syntax_diagnostics = vec![diagnostic],
                    None => pending.push(PendingBuild {
                        module,
                        diagnostics: vec![diagnostic],
                        unresolvable: true,
                    }),
                }
            }
        }
    }
    pending
}

fn empty_parse(source: &ModuleSource) -> ParsedModule {
    ParsedModule {
        tree: Arc::new(ModuleTree::default()),
        text: source.text.clone(),
        line_index: Arc::new(LineIndex::new(&source.text)),
        kind: source.kind,
        version: source.version,
        attempted_version: source.version,
        errors: Vec::new(),
    }
}

// ============================================================================
// DECLARATIONS
// ============================================================================

/// What the declaration stage changed.
#[derive(Debug, Default)]
struct Rebuilt {
    modules: Vec<ModuleId>,
    /// Projects where a module's exported names changed (or a module
    /// appeared), requiring every module in them to be re-resolved.
    exported_changed: FxHashSet<crate::base::ProjectId>,
}

fn build_declarations(
    engine: &Engine,
    sources: &[ModuleSource],
    pending: Vec<PendingBuild>,
) -> Rebuilt {
    let candidates: Vec<ModuleId> = pending
        .iter()
        .filter(|p| !p.unresolvable)
        .map(|p| p.module)
        .collect();
    let advanced: FxHashSet<ModuleId> = {
        let deps = engine.dependencies.read();
        engine
            .states
            .advance_batch(&candidates, ParserState::ResolvingDeclarations, &deps)
            .into_iter()
            .collect()
    };

    let generation = engine.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let mut work: Vec<(ModuleSource, SmolStr, ParsedModule, Vec<Diagnostic>)> = Vec::new();
    {
        let cache = engine.parse_cache.read();
        for build in pending {
            if !build.unresolvable && !advanced.contains(&build.module) {
                continue;
            }
            let Some(source) = sources.iter().find(|s| s.id == build.module) else {
                continue;
            };
            let Some(parsed) = cache.get(build.module) else {
                continue;
            };
            let project_name = engine
                .modules
                .project(source.project)
                .map(|p| p.name)
                .unwrap_or_default();
            work.push((source.clone(), project_name, parsed.clone(), build.diagnostics));
        }
    }

    let inputs: Vec<BuildInput<'_>> = work
        .iter_mut()
        .map(|(source, project_name, parsed, diagnostics)| BuildInput {
            module: source.id,
            project: source.project,
            project_name: project_name.as_str(),
            name: source.name.as_str(),
            kind: parsed.kind,
            tree: &parsed.tree,
            text: &parsed.text,
            line_index: &parsed.line_index,
            syntax_diagnostics: std::mem::take(diagnostics),
            generation,
        })
        .collect();
    let built = engine.pool.install(|| {
        declarations::build_batch(inputs, &engine.generators, &engine.interner)
    });

    let mut rebuilt = Rebuilt::default();
    let mut graph = engine.graph.write();
    for decls in built {
        let module = decls.module;
        let project = decls.project;
        let exported = decls.exported.clone();
        let previous = graph.replace_module(decls);
        if previous.is_none_or(|p| p.exported != exported) {
            rebuilt.exported_changed.insert(project);
        }
        if !engine.states.state(module).is_failed() {
            engine.states.set(module, ParserState::ResolvedDeclarations);
        }
        rebuilt.modules.push(module);
    }
    compute_supertypes(&mut graph, engine);
    tracing::debug!(
        "declarations rebuilt for {} modules (generation {})",
        rebuilt.modules.len(),
        generation
    );
    rebuilt
}

/// Resolve every module's `Implements` clauses to interface classes.
fn compute_supertypes(graph: &mut DeclarationGraph, engine: &Engine) {
    let index = ResolutionIndex::build(graph);
    let updates: Vec<(ModuleId, Vec<DeclId>)> = graph
        .modules()
        .map(|entry| {
            let resolver =
                Resolver::new(graph, &index, &engine.interner, entry.module, entry.project);
            let mut supertypes = Vec::new();
            for path in &entry.implements {
                let target = resolver.resolve_type(path).target.decl().filter(|t| {
                    graph
                        .declaration(*t)
                        .is_some_and(|d| d.kind == DeclarationKind::ClassModule)
                });
                if let Some(target) = target.filter(|t| !supertypes.contains(t)) {
                    supertypes.push(target);
                }
            }
            (entry.module, supertypes)
        })
        .collect();
    for (module, supertypes) in updates {
        if let Some(root) = graph.declaration_mut(DeclId::module(module)) {
            root.supertypes = supertypes;
        }
    }
}

// ============================================================================
// REFERENCES
// ============================================================================

/// Modules whose references this pass has to (re)build, sorted.
fn references_wanted(
    engine: &Engine,
    seeds: Vec<ModuleId>,
    rebuilt: &Rebuilt,
    modules_removed: bool,
    sync: &SyncOutcome,
) -> Vec<ModuleId> {
    let graph = engine.graph.read();
    let deps = engine.dependencies.read();

    let mut wanted = deps.affected_set(seeds);
    wanted.extend(rebuilt.modules.iter().copied());
    if !rebuilt.modules.is_empty() || modules_removed {
        wanted.extend(
            graph
                .modules()
                .filter(|entry| !entry.unbound.is_empty())
                .map(|entry| entry.module),
        );
    }
    for project in rebuilt
        .exported_changed
        .iter()
        .chain(&sync.changed_projects)
    {
        wanted.extend(engine.modules.modules_of(*project));
    }

    let mut wanted: Vec<ModuleId> = wanted
        .into_iter()
        .filter(|m| graph.module(*m).is_some())
        .collect();
    wanted.sort();
    wanted
}

/// Move `wanted` into the reference stage. Returns the modules that may
/// be resolved now; the rest are held back by their dependencies.
fn enter_reference_stage(
    engine: &Engine,
    wanted: &[ModuleId],
    sync: &SyncOutcome,
) -> Vec<ModuleId> {
    let graph = engine.graph.read();
    let deps = engine.dependencies.read();

    // Modules held at ResolverError only because a library failed to load
    // are still resolved; finalize flags them again.
    for &module in wanted {
        let library_blocked = engine.states.state(module) == ParserState::ResolverError
            && graph.module(module).is_some_and(|entry| {
                sync.failed_projects.contains(&entry.project)
                    && !entry
                        .syntax_diagnostics
                        .iter()
                        .any(|d| d.kind == DiagnosticKind::ResolverError)
            });
        if library_blocked {
            engine.states.set(module, ParserState::ResolvedDeclarations);
        }
    }

    engine
        .states
        .advance_batch(wanted, ParserState::ResolvingReferences, &deps)
}

/// Resolve types, then bodies, of `batch`.
///
/// On cancellation every module of the batch whose bodies were not applied
/// goes back to `ResolvedDeclarations` (failed modules keep their state) and
/// is returned as the error.
fn resolve_references(
    engine: &Engine,
    batch: &[ModuleId],
    cancelled: &(dyn Fn() -> bool + Sync),
) -> Result<(), Vec<ModuleId>> {
    {
        let mut graph = engine.graph.write();
        let mut deps = engine.dependencies.write();
        for &module in batch {
            graph.clear_references_from(module);
            deps.remove_all_references_from(module);
        }
    }
    let inputs: Vec<(ModuleId, ParsedModule)> = {
        let cache = engine.parse_cache.read();
        batch
            .iter()
            .filter_map(|m| cache.get(*m).map(|p| (*m, p.clone())))
            .collect()
    };

    let mut finished: FxHashSet<ModuleId> = FxHashSet::default();
    for phase in [Phase::Types, Phase::Bodies] {
        let results = {
            let graph = engine.graph.read();
            let index = ResolutionIndex::build(&graph);
            let ctx = ResolveContext {
                graph: &graph,
                index: &index,
                interner: &engine.interner,
                report_ambiguity: engine.config.report_ambiguity,
            };
            engine
                .pool
                .install(|| references::resolve_batch(ctx, &inputs, phase, cancelled))
        };

        let mut graph = engine.graph.write();
        let mut deps = engine.dependencies.write();
        for result in results {
            let module = result.module;
            references::apply(&mut graph, &mut deps, result);
            if let Some(module) = module.filter(|_| phase == Phase::Bodies) {
                finished.insert(module);
                if !engine.states.state(module).is_failed() {
                    engine.states.set(module, ParserState::Ready);
                }
            }
        }
        drop(deps);
        drop(graph);

        if cancelled() {
            let unfinished: Vec<ModuleId> = batch
                .iter()
                .copied()
                .filter(|m| !finished.contains(m))
                .collect();
            for &module in &unfinished {
                if !engine.states.state(module).is_failed() {
                    engine.states.set(module, ParserState::ResolvedDeclarations);
                }
            }
            return Err(unfinished);
        }
    }
    tracing::debug!("references resolved for {} modules", batch.len());
    Ok(())
}

// ============================================================================
// FINALIZE
// ============================================================================

fn finalize(engine: &Engine, sync: &SyncOutcome) -> StateChangedEvent {
    let graph = engine.graph.read();
    for &project in &sync.failed_projects {
        for module in engine.modules.modules_of(project) {
            engine.states.set(module, ParserState::ResolverError);
        }
    }

    let index = ResolutionIndex::build(&graph);
    let finder = DeclarationFinder::build(graph.clone(), index, engine.interner.clone());
    drop(graph);
    *engine.finder.write() = Arc::new(finder);

    let event = engine.states.publish();
    let listeners: Vec<_> = engine
        .listeners
        .read()
        .iter()
        .map(|(_, listener)| listener.clone())
        .collect();
    for listener in listeners {
        listener(&event);
    }
    event
}
