//! Incremental passes: edits, removals, cancellation, coalescing and
//! library failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use vbscope::project::{ExternalLibrary, LibraryModule, LibraryProvider};
use vbscope::syntax::{Grammar, ParseOutput, StartRule, VbaGrammar};
use vbscope::{
    CancellationToken, ChangeSet, ComponentKind, DeclarationFinder, DiagnosticKind, LibraryError,
    LibraryRegistry, ModuleId, ParserState, PassOutcome, Session, SessionConfig,
    StateChangedEvent,
};

const PROJECT: &str = "VBAProject";
const MOD_A: &str = "Public Sub Foo()\nEnd Sub\n";
const MOD_B: &str = "Public Sub Bar()\n    Foo\nEnd Sub\n";

fn session() -> Session {
    Session::new(SessionConfig::default().with_parallelism(2)).unwrap()
}

fn upsert(session: &Session, name: &str, text: &str) -> ModuleId {
    session
        .upsert_module(PROJECT, name, ComponentKind::Standard, text)
        .unwrap()
}

fn run(session: &Session) -> PassOutcome {
    session.run_blocking(ChangeSet::none(), &CancellationToken::new())
}

/// Everything a pass produced, in a comparable form.
fn snapshot(finder: &DeclarationFinder) -> Vec<(String, usize, Vec<(u32, u32)>)> {
    let mut out: Vec<_> = finder
        .user_declarations()
        .map(|d| {
            let refs = finder
                .references_to(d.id)
                .iter()
                .map(|r| (r.selection.start.line, r.selection.start.col))
                .collect();
            (d.qualified_name.to_string(), d.kind as usize, refs)
        })
        .collect();
    out.sort();
    out
}

fn references_to(session: &Session, qualified: &str) -> usize {
    let finder = session.finder();
    finder
        .find_by_qualified_name(qualified)
        .iter()
        .map(|d| finder.references_to(d.id).len())
        .sum()
}

#[test]
fn test_repeated_passes_are_idempotent() {
    let session = session();
    upsert(&session, "ModA", MOD_A);
    upsert(&session, "ModB", MOD_B);
    assert_eq!(session.parse_blocking(&CancellationToken::new()), PassOutcome::Completed);
    let first = snapshot(&session.finder());

    assert_eq!(run(&session), PassOutcome::Completed);
    assert_eq!(snapshot(&session.finder()), first);

    assert_eq!(session.parse_blocking(&CancellationToken::new()), PassOutcome::Completed);
    assert_eq!(snapshot(&session.finder()), first);
    assert_eq!(session.state(), ParserState::Ready);
}

#[test]
fn test_unchanged_upsert_does_not_dirty_the_module() {
    let session = session();
    let a = upsert(&session, "ModA", MOD_A);
    run(&session);
    let version = session.module_source(a).unwrap().version;

    upsert(&session, "ModA", MOD_A);
    assert_eq!(session.module_source(a).unwrap().version, version);
    upsert(&session, "ModA", "Public Sub Foo()\n    ' edited\nEnd Sub\n");
    assert_eq!(session.module_source(a).unwrap().version, version + 1);
}

#[test]
fn test_edits_leave_no_stale_references() {
    let session = session();
    upsert(&session, "ModA", MOD_A);
    let b = upsert(&session, "ModB", MOD_B);
    run(&session);
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 1);

    upsert(&session, "ModB", "Public Sub Bar()\nEnd Sub\n");
    run(&session);
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 0);
    assert!(session.dependencies_of(b).is_empty());

    upsert(&session, "ModB", MOD_B);
    run(&session);
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 1);

    session.remove_module(PROJECT, "ModB").unwrap();
    run(&session);
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 0);
    assert!(session.finder().find_module(PROJECT, "ModB").is_none());
    assert_eq!(session.module_state(b), ParserState::Unparsed);
}

#[test]
fn test_renamed_target_rebinds_dependents() {
    let session = session();
    upsert(&session, "ModA", MOD_A);
    let b = upsert(&session, "ModB", MOD_B);
    run(&session);

    upsert(&session, "ModA", "Public Sub Foo2()\nEnd Sub\n");
    run(&session);
    let finder = session.finder();
    assert!(finder.find_by_qualified_name("VBAProject.ModA.Foo").is_empty());
    let unbound: Vec<&str> = finder
        .unbound_references(b)
        .iter()
        .map(|u| u.identifier.as_str())
        .collect();
    assert_eq!(unbound, vec!["Foo"]);
    assert!(session.dependencies_of(b).is_empty());

    upsert(&session, "ModA", MOD_A);
    run(&session);
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 1);
    assert!(session.finder().unbound_references(b).is_empty());
}

#[test]
fn test_body_edit_rebuilds_dependent_references() {
    let session = session();
    let a = upsert(&session, "ModA", MOD_A);
    let b = upsert(&session, "ModB", MOD_B);
    run(&session);
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 1);

    // Same exported names; only the body moved.
    upsert(&session, "ModA", "Public Sub Foo()\n    Dim y As Long\nEnd Sub\n");
    assert_eq!(run(&session), PassOutcome::Completed);
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 1);
    assert!(session.finder().unbound_references(b).is_empty());
    assert_eq!(session.dependents_of(a), vec![b]);
    assert_eq!(session.dependencies_of(b), vec![a]);
    assert_eq!(session.module_state(b), ParserState::Ready);
}

#[test]
fn test_new_module_binds_previously_unbound_names() {
    let session = session();
    let b = upsert(&session, "ModB", MOD_B);
    run(&session);
    assert_eq!(session.finder().unbound_references(b).len(), 1);

    let a = upsert(&session, "ModA", MOD_A);
    run(&session);
    assert!(session.finder().unbound_references(b).is_empty());
    assert_eq!(session.dependencies_of(b), vec![a]);
}

// ============================================================================
// CANCELLATION AND COALESCING
// ============================================================================

#[test]
fn test_cancelled_pass_publishes_nothing_and_resumes() {
    let session = session();
    upsert(&session, "ModA", MOD_A);
    upsert(&session, "ModB", MOD_B);

    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(session.run_blocking(ChangeSet::none(), &token), PassOutcome::Cancelled);
    assert_eq!(session.finder().user_declarations().count(), 0);

    assert_eq!(run(&session), PassOutcome::Completed);
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 1);
    assert_eq!(session.state(), ParserState::Ready);
}

/// Cancels a token the first time it parses anything.
#[derive(Debug)]
struct CancelOnFirstParse {
    token: CancellationToken,
    armed: AtomicBool,
}

impl Grammar for CancelOnFirstParse {
    fn parse(&self, text: &str, rule: StartRule) -> ParseOutput {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.token.cancel();
        }
        VbaGrammar.parse(text, rule)
    }
}

#[test]
fn test_pass_cancelled_mid_parse_leaves_modules_unfinished() {
    let token = CancellationToken::new();
    let grammar = Arc::new(CancelOnFirstParse {
        token: token.clone(),
        armed: AtomicBool::new(true),
    });
    let session = Session::builder(SessionConfig::default().with_parallelism(1))
        .with_grammar(grammar)
        .build()
        .unwrap();
    let a = upsert(&session, "ModA", MOD_A);
    let b = upsert(&session, "ModB", MOD_B);

    assert_eq!(session.run_blocking(ChangeSet::none(), &token), PassOutcome::Cancelled);
    // Whatever got parsed also got its declarations; the rest went back.
    for module in [a, b] {
        let state = session.module_state(module);
        assert!(
            matches!(state, ParserState::Unparsed | ParserState::ResolvedDeclarations),
            "{module} left at {state:?}"
        );
    }
    assert_eq!(session.finder().user_declarations().count(), 0);

    assert_eq!(run(&session), PassOutcome::Completed);
    for module in [a, b] {
        assert_eq!(session.module_state(module), ParserState::Ready);
    }
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 1);
}

#[test]
fn test_superseded_background_pass_is_covered_by_the_next() {
    let session = session();
    let a = upsert(&session, "ModA", MOD_A);
    let first = session.begin_pass(ChangeSet::modules([a])).unwrap();

    let b = upsert(&session, "ModB", MOD_B);
    let second = session.begin_pass(ChangeSet::modules([b])).unwrap();
    assert!(first.token().is_cancelled());

    first.wait();
    assert_eq!(second.wait(), PassOutcome::Completed);
    assert_eq!(references_to(&session, "VBAProject.ModA.Foo"), 1);
    assert_eq!(session.module_state(a), ParserState::Ready);
    assert_eq!(session.module_state(b), ParserState::Ready);
}

#[test]
fn test_listeners_see_previous_and_current_state() {
    let session = session();
    let events: Arc<Mutex<Vec<StateChangedEvent>>> = Arc::default();
    let sink = events.clone();
    session.subscribe(move |event| sink.lock().push(*event));

    upsert(&session, "ModA", MOD_A);
    run(&session);
    upsert(&session, "ModA", "Public Sub Foo()\n    x = \nEnd Sub\n");
    run(&session);
    run(&session);
    upsert(&session, "ModA", MOD_A);
    run(&session);

    let events = events.lock();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].current, ParserState::Ready);
    assert_eq!(events[1].current, ParserState::Error);
    assert!(events[1].is_freshly_broken());
    assert!(events[2].is_still_broken());
    assert_eq!(events[3].previous, ParserState::Error);
    assert_eq!(events[3].current, ParserState::Ready);
}

// ============================================================================
// LIBRARIES
// ============================================================================

fn excel() -> ExternalLibrary {
    ExternalLibrary::new("Excel").with_module(
        LibraryModule::standard("Global").function("Range", &["Cell1", "Cell2?"], "Object"),
    )
}

#[test]
fn test_missing_library_degrades_to_resolver_error_and_recovers() {
    let registry = Arc::new(LibraryRegistry::new());
    let session = Session::builder(SessionConfig::default())
        .with_provider(registry.clone())
        .build()
        .unwrap();
    let m = upsert(&session, "Module1", "Public Sub A()\n    Range \"A1\"\nEnd Sub\n");
    session.set_library_references(PROJECT, ["Excel"]).unwrap();

    assert_eq!(run(&session), PassOutcome::Completed);
    assert_eq!(session.module_state(m), ParserState::ResolverError);
    assert_eq!(session.state(), ParserState::ResolverError);
    let finder = session.finder();
    let library_diagnostics: Vec<_> = finder
        .diagnostics()
        .into_iter()
        .filter(|d| d.kind == DiagnosticKind::UnresolvedExternalLibrary)
        .collect();
    assert_eq!(library_diagnostics.len(), 1);
    assert!(library_diagnostics[0].message.contains("Excel"));

    // Still failing: the state holds without reparsing anything.
    assert_eq!(run(&session), PassOutcome::Completed);
    assert_eq!(session.module_state(m), ParserState::ResolverError);

    registry.register(excel());
    assert_eq!(run(&session), PassOutcome::Completed);
    assert_eq!(session.module_state(m), ParserState::Ready);
    let finder = session.finder();
    let range = finder.declarations_named("Range");
    assert_eq!(range.len(), 1);
    assert_eq!(finder.references_to(range[0].id).len(), 1);
    assert!(finder.diagnostics().is_empty());
}

#[test]
fn test_library_sync_is_idempotent() {
    let registry = Arc::new(LibraryRegistry::new());
    registry.register(excel());
    let session = Session::builder(SessionConfig::default())
        .with_provider(registry)
        .build()
        .unwrap();
    upsert(&session, "Module1", "Public Sub A()\n    Range \"A1\"\nEnd Sub\n");
    session.set_library_references(PROJECT, ["Excel", "excel"]).unwrap();

    run(&session);
    let first = session.all_declarations().len();
    run(&session);
    assert_eq!(session.all_declarations().len(), first);
    assert_eq!(session.finder().declarations_named("Range").len(), 1);

    session.set_library_references(PROJECT, Vec::<&str>::new()).unwrap();
    run(&session);
    assert!(session.finder().declarations_named("Range").is_empty());
    assert_eq!(session.finder().all_unbound_references().count(), 1);
}

/// Cancels a token whenever a named library is requested.
#[derive(Debug)]
struct CancelOnLoad {
    library: &'static str,
    token: CancellationToken,
    inner: LibraryRegistry,
}

impl LibraryProvider for CancelOnLoad {
    fn load(&self, name: &str) -> Result<Arc<ExternalLibrary>, LibraryError> {
        if name.eq_ignore_ascii_case(self.library) {
            self.token.cancel();
        }
        self.inner.load(name)
    }
}

#[test]
fn test_library_change_survives_a_cancelled_pass() {
    let token = CancellationToken::new();
    let provider = Arc::new(CancelOnLoad {
        library: "Excel",
        token: token.clone(),
        inner: LibraryRegistry::new(),
    });
    provider.inner.register(excel());
    let session = Session::builder(SessionConfig::default())
        .with_provider(provider)
        .build()
        .unwrap();
    let m = upsert(&session, "Module1", "Public Sub A()\n    Range \"A1\"\nEnd Sub\n");
    assert_eq!(run(&session), PassOutcome::Completed);
    assert_eq!(session.finder().unbound_references(m).len(), 1);

    session.set_library_references(PROJECT, ["Excel"]).unwrap();
    assert_eq!(session.run_blocking(ChangeSet::none(), &token), PassOutcome::Cancelled);

    assert_eq!(run(&session), PassOutcome::Completed);
    let finder = session.finder();
    let range = finder.declarations_named("Range");
    assert_eq!(range.len(), 1);
    assert_eq!(finder.references_to(range[0].id).len(), 1);
    assert!(finder.unbound_references(m).is_empty());
    assert_eq!(session.module_state(m), ParserState::Ready);
}
