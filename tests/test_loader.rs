//! Loading exported component files from disk.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use vbscope::project::{collect_component_paths, read_component};
use vbscope::{
    CancellationToken, ComponentKind, ParserState, ProjectLoader, Session, SessionConfig,
    SessionError,
};

const MODULE: &str = "Attribute VB_Name = \"Helpers\"\n\
                      Option Explicit\n\
                      \n\
                      Public Function Twice(ByVal n As Long) As Long\n\
                      \x20   Twice = n * 2\n\
                      End Function\n";

const CLASS: &str = "VERSION 1.0 CLASS\n\
                     BEGIN\n\
                     \x20 MultiUse = -1  'True\n\
                     END\n\
                     Attribute VB_Name = \"Counter\"\n\
                     Option Explicit\n\
                     \n\
                     Private mCount As Long\n\
                     \n\
                     Public Sub Bump()\n\
                     \x20   mCount = Twice(mCount)\n\
                     End Sub\n";

fn write(dir: &Path, name: &str, text: &str) {
    fs::write(dir.join(name), text).unwrap();
}

fn exported_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "helpers_file.bas", MODULE);
    write(dir.path(), "Counter.cls", CLASS);
    write(dir.path(), "README.txt", "not a component");
    fs::create_dir(dir.path().join("nested")).unwrap();
    write(
        &dir.path().join("nested"),
        "Extra.bas",
        "Public Sub Extra()\nEnd Sub\n",
    );
    dir
}

#[test]
fn test_collect_skips_unknown_extensions() {
    let dir = exported_project();
    let paths = collect_component_paths(dir.path()).unwrap();
    let names: Vec<String> = paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 3);
    assert!(!names.iter().any(|n| n == "README.txt"));
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);
}

#[test]
fn test_component_name_comes_from_vb_name() {
    let dir = exported_project();
    let module = read_component(&dir.path().join("helpers_file.bas")).unwrap();
    assert_eq!(module.name, "Helpers");
    assert_eq!(module.kind, ComponentKind::Standard);

    let extra = read_component(&dir.path().join("nested").join("Extra.bas")).unwrap();
    assert_eq!(extra.name, "Extra");
}

#[test]
fn test_unknown_extension_is_rejected() {
    let dir = exported_project();
    let err = read_component(&dir.path().join("README.txt")).unwrap_err();
    assert!(matches!(err, SessionError::InvalidName(_)));
}

#[test]
fn test_missing_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(SessionConfig::default()).unwrap();
    let missing = dir.path().join("nope");
    let err = ProjectLoader::new()
        .load_directory(&missing, "VBAProject", &session)
        .unwrap_err();
    assert!(matches!(err, SessionError::Io { .. }));
}

#[test]
fn test_loaded_directory_resolves() {
    let dir = exported_project();
    let session = Session::new(SessionConfig::default().with_parallelism(2)).unwrap();
    let report = ProjectLoader::new()
        .load_directory(dir.path(), "VBAProject", &session)
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.loaded.len(), 3);

    assert!(session.parse_blocking(&CancellationToken::new()).is_completed());
    assert_eq!(session.state(), ParserState::Ready);

    let finder = session.finder();
    let counter = finder.find_module("VBAProject", "Counter").unwrap();
    assert_eq!(counter.kind, vbscope::DeclarationKind::ClassModule);
    let twice = &finder.find_by_qualified_name("VBAProject.Helpers.Twice")[0];
    let from_counter = finder
        .references_to(twice.id)
        .iter()
        .filter(|r| Some(r.module) == counter.module())
        .count();
    assert_eq!(from_counter, 1);
    assert!(finder.all_unbound_references().next().is_none());
}

#[test]
fn test_reloading_unchanged_files_keeps_versions() {
    let dir = exported_project();
    let session = Session::new(SessionConfig::default()).unwrap();
    let loader = ProjectLoader::new();
    let module = loader
        .load_file(dir.path().join("helpers_file.bas"), "VBAProject", &session)
        .unwrap();
    let version = session.module_source(module).unwrap().version;

    let again = loader
        .load_file(dir.path().join("helpers_file.bas"), "VBAProject", &session)
        .unwrap();
    assert_eq!(again, module);
    assert_eq!(session.module_source(module).unwrap().version, version);
}
