//! End-to-end name resolution through a session.
//!
//! Each test loads a few modules into project `VBAProject`, runs a full
//! pass and checks what the finder reports.

use rstest::rstest;
use vbscope::{
    CancellationToken, ComponentKind, DeclarationFinder, DeclarationKind, Declaration,
    DiagnosticKind, LineCol, ModuleId, ParserState, PassOutcome, Session, SessionConfig,
};

const PROJECT: &str = "VBAProject";

fn resolve(modules: &[(&str, ComponentKind, &str)]) -> (Session, Vec<ModuleId>) {
    let session = Session::new(SessionConfig::default().with_parallelism(2)).unwrap();
    let ids = modules
        .iter()
        .map(|(name, kind, text)| session.upsert_module(PROJECT, name, *kind, *text).unwrap())
        .collect();
    assert_eq!(
        session.parse_blocking(&CancellationToken::new()),
        PassOutcome::Completed
    );
    (session, ids)
}

fn single<'f>(finder: &'f DeclarationFinder, qualified: &str) -> &'f Declaration {
    let found = finder.find_by_qualified_name(qualified);
    assert_eq!(found.len(), 1, "expected one declaration named {}", qualified);
    found[0]
}

use ComponentKind::{Class, Standard};

#[test]
fn test_call_across_modules_records_reference_and_edge() {
    let (session, ids) = resolve(&[
        ("ModA", Standard, "Public Sub Foo()\nEnd Sub\n"),
        ("ModB", Standard, "Public Sub Bar()\n    Foo\nEnd Sub\n"),
    ]);
    let (mod_a, mod_b) = (ids[0], ids[1]);
    let finder = session.finder();

    let foo = single(&finder, "VBAProject.ModA.Foo");
    let bar = single(&finder, "VBAProject.ModB.Bar");
    let refs = finder.references_to(foo.id);
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].module, mod_b);
    assert_eq!(refs[0].parent_scope, bar.id);
    assert_eq!(refs[0].selection.start, LineCol::new(1, 4));
    assert!(!refs[0].is_assignment);

    assert_eq!(session.dependencies_of(mod_b), vec![mod_a]);
    assert!(session.dependencies_of(mod_a).is_empty());
    assert_eq!(session.dependents_of(mod_a), vec![mod_b]);
    assert_eq!(session.state(), ParserState::Ready);
}

#[rstest]
#[case("Public Function Foo() As Long\n    Foo = 1\nEnd Function\n", LineCol::new(1, 4))]
#[case("Public Function Foo() As Long: Foo = 1: End Function\n", LineCol::new(0, 31))]
fn test_return_value_assignment_is_not_a_reference(
    #[case] mod_a: &str,
    #[case] assignment_at: LineCol,
) {
    let (session, ids) = resolve(&[
        ("ModA", Standard, mod_a),
        (
            "ModB",
            Standard,
            "Public Sub Bar()\n    Dim x As Long\n    x = Foo()\nEnd Sub\n",
        ),
    ]);
    let (mod_a, mod_b) = (ids[0], ids[1]);
    let finder = session.finder();

    let foo = single(&finder, "VBAProject.ModA.Foo");
    let bar = single(&finder, "VBAProject.ModB.Bar");
    let refs = finder.references_to(foo.id);
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].module, mod_b);
    assert_eq!(refs[0].parent_scope, bar.id);
    assert_eq!(refs[0].selection.start, LineCol::new(2, 8));
    assert_eq!(session.dependencies_of(mod_b), vec![mod_a]);

    let assignments = finder.return_assignments_of(foo.id);
    assert_eq!(assignments.len(), 1);
    assert!(assignments[0].is_assignment);
    assert_eq!(assignments[0].selection.start, assignment_at);
    assert!(finder.unbound_references(mod_a).is_empty());
    let caret = LineCol::new(assignment_at.line, assignment_at.col + 1);
    assert_eq!(finder.find_declaration_at(mod_a, caret).map(|d| d.id), Some(foo.id));
    assert_eq!(session.state(), ParserState::Ready);
}

#[test]
fn test_closer_scopes_shadow_project_members() {
    let (session, ids) = resolve(&[
        ("ModA", Standard, "Public Sub Foo()\nEnd Sub\n"),
        (
            "ModB",
            Standard,
            "Private Sub Foo()\nEnd Sub\n\nPublic Sub Bar()\n    Foo\nEnd Sub\n",
        ),
        (
            "ModC",
            Standard,
            "Public Sub Baz()\n    Dim Foo As Long\n    Foo = 1\nEnd Sub\n",
        ),
    ]);
    let finder = session.finder();

    assert!(finder.references_to(single(&finder, "VBAProject.ModA.Foo").id).is_empty());

    let private_foo = single(&finder, "VBAProject.ModB.Foo");
    assert_eq!(finder.references_to(private_foo.id).len(), 1);

    let local = single(&finder, "VBAProject.ModC.Baz.Foo");
    let refs = finder.references_to(local.id);
    assert_eq!(refs.len(), 1);
    assert!(refs[0].is_assignment);
    assert_eq!(refs[0].module, ids[2]);
    assert!(session.dependencies_of(ids[2]).is_empty());
}

#[test]
fn test_parameter_wins_over_procedure_of_same_name() {
    let text = "Public Sub foo(foo As Long)\n    foo = foo + 1\nEnd Sub\n";
    let (session, ids) = resolve(&[("Module1", Standard, text)]);
    let module = ids[0];
    let finder = session.finder();

    let procedure = finder.find_declaration_at(module, LineCol::new(0, 12)).unwrap();
    assert_eq!(procedure.kind, DeclarationKind::Procedure);

    let parameter = finder.find_declaration_at(module, LineCol::new(0, 16)).unwrap();
    assert_eq!(parameter.kind, DeclarationKind::Parameter);

    let in_body = finder.find_declaration_at(module, LineCol::new(1, 5)).unwrap();
    assert_eq!(in_body.id, parameter.id);

    let refs = finder.references_to(parameter.id);
    assert_eq!(refs.len(), 2);
    assert_eq!(refs.iter().filter(|r| r.is_assignment).count(), 1);
    assert!(finder.references_to(procedure.id).is_empty());
}

#[test]
fn test_unbound_identifiers_do_not_fail_the_module() {
    let (session, ids) = resolve(&[(
        "Module1",
        Standard,
        "Public Sub A()\n    total = missing + 1\nEnd Sub\n",
    )]);
    let module = ids[0];
    let finder = session.finder();

    let unbound: Vec<&str> = finder
        .unbound_references(module)
        .iter()
        .map(|u| u.identifier.as_str())
        .collect();
    assert_eq!(unbound, vec!["total", "missing"]);
    assert!(finder.unbound_references(module)[0].is_assignment);

    let diagnostics = finder.diagnostics_for_module(module);
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics.iter().all(|d| d.kind == DiagnosticKind::UnboundIdentifier));
    assert_eq!(session.module_state(module), ParserState::Ready);
    assert_eq!(session.state(), ParserState::Ready);
}

#[test]
fn test_public_clash_is_ambiguous_and_reported() {
    let (session, ids) = resolve(&[
        ("ModA", Standard, "Public Sub Foo()\nEnd Sub\n"),
        ("ModB", Standard, "Public Sub Bar()\n    Foo\nEnd Sub\n"),
        ("ModC", Standard, "Public Sub Foo()\nEnd Sub\n"),
    ]);
    let finder = session.finder();

    let chosen = single(&finder, "VBAProject.ModA.Foo");
    let refs = finder.references_to(chosen.id);
    assert_eq!(refs.len(), 1);
    assert!(refs[0].is_ambiguous);
    assert!(finder.references_to(single(&finder, "VBAProject.ModC.Foo").id).is_empty());

    let diagnostics = finder.diagnostics_for_module(ids[1]);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::AmbiguousResolution);
}

#[test]
fn test_ambiguity_reporting_can_be_disabled() {
    let session = Session::new(SessionConfig::default().with_ambiguity_reporting(false)).unwrap();
    for (name, text) in [
        ("ModA", "Public Sub Foo()\nEnd Sub\n"),
        ("ModB", "Public Sub Bar()\n    Foo\nEnd Sub\n"),
        ("ModC", "Public Sub Foo()\nEnd Sub\n"),
    ] {
        session.upsert_module(PROJECT, name, Standard, text).unwrap();
    }
    session.parse_blocking(&CancellationToken::new());
    let finder = session.finder();

    let chosen = single(&finder, "VBAProject.ModA.Foo");
    assert!(finder.references_to(chosen.id)[0].is_ambiguous);
    assert!(finder.diagnostics().is_empty());
}

#[test]
fn test_builtin_library_members_resolve() {
    let (session, _) = resolve(&[(
        "Module1",
        Standard,
        "Public Sub Hello()\n    MsgBox \"hi\", vbOKOnly\n    Debug.Print Len(\"abc\")\nEnd Sub\n",
    )]);
    let finder = session.finder();

    for name in ["MsgBox", "vbOKOnly", "Print", "Len"] {
        let decls = finder.declarations_named(name);
        assert_eq!(decls.len(), 1, "{}", name);
        assert!(!decls[0].is_user_defined());
        assert_eq!(finder.references_to(decls[0].id).len(), 1, "{}", name);
    }
    assert_eq!(finder.all_unbound_references().count(), 0);
}

#[test]
fn test_enum_members_and_types_across_modules() {
    let (session, ids) = resolve(&[
        (
            "Colors",
            Standard,
            "Public Enum Color\n    Red\n    Green\nEnd Enum\n",
        ),
        (
            "Painter",
            Standard,
            "Public Sub Paint()\n    Dim c As Color\n    c = Red\nEnd Sub\n",
        ),
    ]);
    let finder = session.finder();

    let color = single(&finder, "VBAProject.Colors.Color");
    assert_eq!(color.kind, DeclarationKind::Enumeration);
    assert_eq!(finder.references_to(color.id).len(), 1);

    let red = single(&finder, "VBAProject.Colors.Color.Red");
    assert_eq!(red.kind, DeclarationKind::EnumerationMember);
    assert_eq!(finder.references_to(red.id)[0].module, ids[1]);

    let c = single(&finder, "VBAProject.Painter.Paint.c");
    assert_eq!(c.as_type.resolved(), Some(color.id));
    assert_eq!(session.dependencies_of(ids[1]), vec![ids[0]]);
}

#[test]
fn test_property_accessor_follows_access_kind() {
    let class = "Private m As Long\n\
                 Public Property Get Value() As Long\n\
                 \x20   Value = m\n\
                 End Property\n\
                 Public Property Let Value(ByVal v As Long)\n\
                 \x20   m = v\n\
                 End Property\n";
    let user = "Public Sub T()\n\
                \x20   Dim c As New Class1\n\
                \x20   c.Value = 3\n\
                \x20   Debug.Print c.Value\n\
                End Sub\n";
    let (session, ids) = resolve(&[("Class1", Class, class), ("Module1", Standard, user)]);
    let user_module = ids[1];
    let finder = session.finder();

    let accessors = finder.find_by_qualified_name("VBAProject.Class1.Value");
    let getter = accessors.iter().find(|d| d.kind == DeclarationKind::PropertyGet).unwrap();
    let setter = accessors.iter().find(|d| d.kind == DeclarationKind::PropertyLet).unwrap();

    let from_user = |id| {
        finder
            .references_to(id)
            .iter()
            .filter(|r| r.module == user_module)
            .cloned()
            .collect::<Vec<_>>()
    };
    let reads = from_user(getter.id);
    assert_eq!(reads.len(), 1);
    assert!(!reads[0].is_assignment && reads[0].is_member_access);
    let writes = from_user(setter.id);
    assert_eq!(writes.len(), 1);
    assert!(writes[0].is_assignment);

    assert_eq!(session.dependencies_of(user_module), vec![ids[0]]);
}

#[test]
fn test_module_qualified_call() {
    let (session, ids) = resolve(&[
        ("ModA", Standard, "Public Sub Foo()\nEnd Sub\n"),
        ("ModB", Standard, "Public Sub Bar()\n    ModA.Foo\nEnd Sub\n"),
    ]);
    let finder = session.finder();

    let module_refs = finder.references_to(finder.find_module(PROJECT, "ModA").unwrap().id);
    assert_eq!(module_refs.len(), 1);
    assert!(!module_refs[0].is_member_access);

    let foo_refs = finder.references_to(single(&finder, "VBAProject.ModA.Foo").id);
    assert_eq!(foo_refs.len(), 1);
    assert!(foo_refs[0].is_member_access);
    assert_eq!(foo_refs[0].module, ids[1]);
}

#[test]
fn test_with_block_members_bind_to_receiver_type() {
    let class = "Public Name As String\n";
    let user = "Public Sub T(ByVal item As Class1)\n\
                \x20   With item\n\
                \x20       .Name = \"x\"\n\
                \x20   End With\n\
                End Sub\n";
    let (session, ids) = resolve(&[("Class1", Class, class), ("Module1", Standard, user)]);
    let finder = session.finder();

    let name = single(&finder, "VBAProject.Class1.Name");
    let refs = finder.references_to(name.id);
    assert_eq!(refs.len(), 1);
    assert!(refs[0].is_assignment && refs[0].is_member_access);
    assert_eq!(refs[0].module, ids[1]);
}

#[test]
fn test_syntax_errors_keep_the_rest_of_the_project_resolving() {
    let (session, ids) = resolve(&[
        ("ModA", Standard, "Public Sub Foo()\n    x = 1\nEnd Sub\n"),
        ("ModB", Standard, "Public Sub Bar()\n    Foo\nEnd Sub\n"),
    ]);
    session
        .upsert_module(PROJECT, "ModA", Standard, "Public Sub Foo()\n    x = \nEnd Sub\n")
        .unwrap();
    assert_eq!(
        session.run_blocking(vbscope::ChangeSet::none(), &CancellationToken::new()),
        PassOutcome::Completed
    );
    let finder = session.finder();

    assert_eq!(session.module_state(ids[0]), ParserState::Error);
    assert_eq!(session.module_state(ids[1]), ParserState::Ready);
    assert_eq!(session.state(), ParserState::Error);

    let syntax: Vec<_> = finder
        .diagnostics_for_module(ids[0])
        .into_iter()
        .filter(|d| d.kind == DiagnosticKind::SyntaxError)
        .collect();
    assert_eq!(syntax.len(), 1);
    assert_eq!(syntax[0].selection.start.line, 1);

    // The last good tree still declares Foo.
    let foo = single(&finder, "VBAProject.ModA.Foo");
    assert_eq!(finder.references_to(foo.id).len(), 1);
}

#[test]
fn test_module_that_never_parsed_declares_nothing() {
    let (session, ids) = resolve(&[
        ("ModA", Standard, "Public Sub Foo()\n    x = \nEnd Sub\n"),
        ("ModB", Standard, "Public Sub Bar()\n    Foo\nEnd Sub\n"),
    ]);
    let finder = session.finder();

    assert_eq!(session.module_state(ids[0]), ParserState::Error);
    assert!(finder.find_by_qualified_name("VBAProject.ModA.Foo").is_empty());
    assert!(finder.find_module(PROJECT, "ModA").is_some());
    let unbound: Vec<&str> = finder
        .unbound_references(ids[1])
        .iter()
        .map(|u| u.identifier.as_str())
        .collect();
    assert_eq!(unbound, vec!["Foo"]);
}
