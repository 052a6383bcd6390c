//! Finder queries over resolved projects: interfaces, event handlers,
//! rename conflicts and position lookups.

use rstest::rstest;
use vbscope::{
    CancellationToken, ComponentKind, DeclarationFinder, DeclarationKind, Declaration, LineCol,
    ModuleId, Session, SessionConfig,
};

const PROJECT: &str = "VBAProject";

fn resolve(modules: &[(&str, ComponentKind, &str)]) -> (Session, Vec<ModuleId>) {
    let session = Session::new(SessionConfig::default().with_parallelism(2)).unwrap();
    let ids = modules
        .iter()
        .map(|(name, kind, text)| session.upsert_module(PROJECT, name, *kind, *text).unwrap())
        .collect();
    assert!(session.parse_blocking(&CancellationToken::new()).is_completed());
    (session, ids)
}

fn single<'f>(finder: &'f DeclarationFinder, qualified: &str) -> &'f Declaration {
    let found = finder.find_by_qualified_name(qualified);
    assert_eq!(found.len(), 1, "expected one declaration named {}", qualified);
    found[0]
}

fn names(decls: &[&Declaration]) -> Vec<String> {
    let mut out: Vec<String> = decls.iter().map(|d| d.name.to_string()).collect();
    out.sort();
    out
}

// ============================================================================
// INTERFACES AND EVENTS
// ============================================================================

const SHAPE: &str = "Public Function Area() As Double\nEnd Function\n";
const SQUARE: &str = "Implements IShape\n\
                      Implements IShape\n\
                      \n\
                      Private Function IShape_Area() As Double\n\
                      End Function\n";

#[test]
fn test_interface_members_listed_once_per_implementation() {
    let (session, _) = resolve(&[
        ("IShape", ComponentKind::Class, SHAPE),
        ("Square", ComponentKind::Class, SQUARE),
    ]);
    let finder = session.finder();
    let shape = finder.find_module(PROJECT, "IShape").unwrap();

    let implementers = finder.implementers_of(shape.id);
    assert_eq!(implementers.len(), 1);
    assert_eq!(implementers[0].name, "Square");
    assert_eq!(implementers[0].supertypes, vec![shape.id]);

    let members = finder.interface_members_of(shape.id);
    assert_eq!(names(&members), vec!["IShape_Area"]);

    let all = finder.find_all_interface_members();
    assert_eq!(names(&all), vec!["Area"]);
}

#[test]
fn test_interface_handler_splits_its_name() {
    let (session, ids) = resolve(&[
        ("IShape", ComponentKind::Class, SHAPE),
        ("Square", ComponentKind::Class, SQUARE),
    ]);
    let square = ids[1];
    let finder = session.finder();

    let area = single(&finder, "VBAProject.IShape.Area");
    let member_refs: Vec<_> = finder
        .references_to(area.id)
        .iter()
        .filter(|r| r.module == square)
        .collect();
    assert_eq!(member_refs.len(), 1);
    assert_eq!(member_refs[0].identifier, "Area");
    assert_eq!(member_refs[0].selection.start, LineCol::new(3, 24));

    // Both `Implements` lines and the handler prefix point at the interface.
    let shape = finder.find_module(PROJECT, "IShape").unwrap();
    let prefix_refs = finder
        .references_to(shape.id)
        .iter()
        .filter(|r| r.module == square)
        .count();
    assert_eq!(prefix_refs, 3);
}

#[test]
fn test_with_events_handler_binds_to_event() {
    let source = "Public Event Changed(ByVal value As Long)\n\
                  \n\
                  Public Sub Fire()\n\
                  \x20   RaiseEvent Changed(1)\n\
                  End Sub\n";
    let sink = "Private WithEvents src As Source\n\
                \n\
                Private Sub src_Changed(ByVal value As Long)\n\
                End Sub\n";
    let (session, ids) = resolve(&[
        ("Source", ComponentKind::Class, source),
        ("Sink", ComponentKind::Class, sink),
    ]);
    let finder = session.finder();

    let changed = single(&finder, "VBAProject.Source.Changed");
    assert_eq!(changed.kind, DeclarationKind::Event);
    let refs = finder.references_to(changed.id);
    assert_eq!(refs.len(), 2);
    let from_sink: Vec<_> = refs.iter().filter(|r| r.module == ids[1]).collect();
    assert_eq!(from_sink.len(), 1);
    assert_eq!(from_sink[0].identifier, "Changed");

    let src = single(&finder, "VBAProject.Sink.src");
    assert!(src.is_with_events);
    assert_eq!(finder.references_to(src.id).len(), 1);
    assert_eq!(finder.references_to(src.id)[0].identifier, "src");

    let handlers = finder.interface_members_of(finder.find_module(PROJECT, "Source").unwrap().id);
    assert_eq!(names(&handlers), vec!["src_Changed"]);
    assert_eq!(session.dependencies_of(ids[1]), vec![ids[0]]);
}

#[test]
fn test_implicit_class_events_bind_their_handlers() {
    let (session, ids) = resolve(&[(
        "Class1",
        ComponentKind::Class,
        "Private Sub Class_Initialize()\nEnd Sub\n",
    )]);
    let finder = session.finder();

    let initialize = finder
        .declarations_named("Initialize")
        .into_iter()
        .find(|d| d.module() == Some(ids[0]))
        .unwrap();
    assert!(initialize.is_implicit);
    assert_eq!(finder.references_to(initialize.id).len(), 1);
    assert!(finder.unbound_references(ids[0]).is_empty());
}

#[test]
fn test_default_instance_is_not_a_value_candidate() {
    let form = "Public Sub Refresh()\nEnd Sub\n";
    let user = "Public Sub Show()\n    Form1.Refresh\nEnd Sub\n";
    let (session, ids) = resolve(&[
        ("Form1", ComponentKind::UserForm, form),
        ("Module1", ComponentKind::Standard, user),
    ]);
    let finder = session.finder();

    let form_module = finder.find_module(PROJECT, "Form1").unwrap();
    assert_eq!(form_module.kind, DeclarationKind::ClassModule);
    let refs = finder.references_to(form_module.id);
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].module, ids[1]);

    let instance = finder
        .declarations_named("Form1")
        .into_iter()
        .find(|d| d.is_default_instance)
        .unwrap();
    assert!(finder.references_to(instance.id).is_empty());
    let refresh = single(&finder, "VBAProject.Form1.Refresh");
    assert_eq!(finder.references_to(refresh.id).len(), 1);
}

// ============================================================================
// RENAME CONFLICTS
// ============================================================================

const MOD_A: &str = "Public Sub Foo()\n\
                     \x20   Dim x As Long\n\
                     End Sub\n\
                     \n\
                     Public Sub Other()\n\
                     End Sub\n";
const MOD_B: &str = "Private Sub Bar()\n\
                     \x20   Dim y As Long\n\
                     \x20   Foo\n\
                     End Sub\n";

#[rstest]
#[case(
    "VBAProject.ModA.Foo.x",
    &["Foo", "ModA", "ModB", "Other", "VBAProject"],
    &["x", "y", "Bar"]
)]
#[case("VBAProject.ModA.Foo", &["Bar", "ModA", "ModB", "Other", "VBAProject", "x", "y"], &["Foo"])]
fn test_identifiers_to_avoid(
    #[case] target: &str,
    #[case] expected: &[&str],
    #[case] absent: &[&str],
) {
    let (session, _) = resolve(&[
        ("ModA", ComponentKind::Standard, MOD_A),
        ("ModB", ComponentKind::Standard, MOD_B),
    ]);
    let finder = session.finder();
    let target = single(&finder, target);

    let avoid = names(&finder.identifiers_to_avoid(target.id));
    for name in expected {
        assert!(avoid.iter().any(|n| n == name), "{} missing from {:?}", name, avoid);
    }
    for name in absent {
        assert!(!avoid.iter().any(|n| n == name), "{} unexpected in {:?}", name, avoid);
    }
}

#[test]
fn test_visible_declarations_exclude_other_procedures_locals() {
    let (session, _) = resolve(&[
        ("ModA", ComponentKind::Standard, MOD_A),
        ("ModB", ComponentKind::Standard, MOD_B),
    ]);
    let finder = session.finder();
    let bar = single(&finder, "VBAProject.ModB.Bar");

    let visible = names(&finder.declarations_visible_from(bar.id));
    for name in ["y", "Bar", "Foo", "Other", "ModA", "VBAProject", "MsgBox"] {
        assert!(visible.iter().any(|n| n == name), "{} missing", name);
    }
    assert!(!visible.iter().any(|n| n == "x"));
}

// ============================================================================
// POSITIONS
// ============================================================================

#[rstest]
#[case(LineCol::new(0, 12), Some("Foo"))]
#[case(LineCol::new(1, 9), Some("x"))]
#[case(LineCol::new(1, 2), None)]
fn test_declaration_at_caret(#[case] caret: LineCol, #[case] expected: Option<&str>) {
    let (session, ids) = resolve(&[("ModA", ComponentKind::Standard, MOD_A)]);
    let finder = session.finder();
    let found = finder.find_declaration_at(ids[0], caret).map(|d| d.name.to_string());
    assert_eq!(found.as_deref(), expected);
}

#[test]
fn test_reference_caret_finds_target_in_other_module() {
    let (session, ids) = resolve(&[
        ("ModA", ComponentKind::Standard, MOD_A),
        ("ModB", ComponentKind::Standard, MOD_B),
    ]);
    let finder = session.finder();

    let found = finder.find_declaration_at(ids[1], LineCol::new(2, 5)).unwrap();
    assert_eq!(found.qualified_name, "VBAProject.ModA.Foo");
}

#[test]
fn test_enclosing_scope() {
    let (session, ids) = resolve(&[("ModA", ComponentKind::Standard, MOD_A)]);
    let finder = session.finder();
    let foo = single(&finder, "VBAProject.ModA.Foo");

    assert_eq!(finder.enclosing_scope_at(ids[0], LineCol::new(1, 4)), Some(foo.id));
    let module = finder.module_declaration(ids[0]).unwrap();
    assert_eq!(finder.enclosing_scope_at(ids[0], LineCol::new(3, 0)), Some(module.id));
}
