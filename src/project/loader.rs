//! Loading exported VBA components from disk.
//!
//! Hosts that export their projects (`.bas`, `.cls`, `.frm`, `.doccls`) can
//! hand a directory to [`ProjectLoader`] instead of pushing text one module
//! at a time. Files are read in parallel; the component name comes from the
//! `VB_Name` attribute when present, else the file stem.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use smol_str::SmolStr;
use walkdir::WalkDir;

use crate::base::ModuleId;
use crate::error::SessionError;
use crate::hir::ComponentKind;
use crate::session::Session;

/// One component file, read but not yet handed to a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentFile {
    pub path: PathBuf,
    pub name: SmolStr,
    pub kind: ComponentKind,
    pub text: String,
}

/// What a directory load produced.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<ModuleId>,
    /// Files that could not be read or registered; the rest still loaded.
    pub errors: Vec<SessionError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Loads exported components into a session.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProjectLoader;

impl ProjectLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load every component under `dir` into `project`.
    ///
    /// Unknown extensions are skipped. A missing directory is an error; a
    /// bad file is recorded in the report and the others still load.
    pub fn load_directory(
        &self,
        dir: impl AsRef<Path>,
        project: &str,
        session: &Session,
    ) -> Result<LoadReport, SessionError> {
        let dir = dir.as_ref();
        let paths = collect_component_paths(dir)?;
        tracing::debug!("loading {} components from {}", paths.len(), dir.display());

        let files: Vec<Result<ComponentFile, SessionError>> =
            paths.par_iter().map(|path| read_component(path)).collect();

        let mut report = LoadReport::default();
        for file in files {
            let registered = file.and_then(|file| {
                session.upsert_module(project, &file.name, file.kind, file.text)
            });
            match registered {
                Ok(module) => report.loaded.push(module),
                Err(err) => {
                    tracing::warn!("skipping component: {}", err);
                    report.errors.push(err);
                }
            }
        }
        Ok(report)
    }

    /// Load a single component file into `project`.
    pub fn load_file(
        &self,
        path: impl AsRef<Path>,
        project: &str,
        session: &Session,
    ) -> Result<ModuleId, SessionError> {
        let file = read_component(path.as_ref())?;
        session.upsert_module(project, &file.name, file.kind, file.text)
    }
}

/// Component files under `dir`, sorted by path.
pub fn collect_component_paths(dir: &Path) -> Result<Vec<PathBuf>, SessionError> {
    if !dir.is_dir() {
        return Err(SessionError::Io {
            path: dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|source| SessionError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && kind_of(entry.path()).is_some() {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Read one component file. Invalid UTF-8 is replaced rather than rejected;
/// exported modules are often in the host's ANSI code page.
pub fn read_component(path: &Path) -> Result<ComponentFile, SessionError> {
    let kind = kind_of(path).ok_or_else(|| SessionError::InvalidName(file_stem(path)))?;
    let bytes = std::fs::read(path).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let name = vb_name(&text).unwrap_or_else(|| file_stem(path));
    Ok(ComponentFile {
        path: path.to_path_buf(),
        name,
        kind,
        text,
    })
}

fn kind_of(path: &Path) -> Option<ComponentKind> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(ComponentKind::from_extension)
}

fn file_stem(path: &Path) -> SmolStr {
    path.file_stem()
        .map(|stem| SmolStr::new(stem.to_string_lossy()))
        .unwrap_or_default()
}

/// The value of `Attribute VB_Name = "..."` in the module header.
fn vb_name(text: &str) -> Option<SmolStr> {
    text.lines().find_map(|line| {
        let mut words = line.trim_start().splitn(2, char::is_whitespace);
        if !words.next()?.eq_ignore_ascii_case("Attribute") {
            return None;
        }
        let (key, value) = words.next()?.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("VB_Name") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| SmolStr::new(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Attribute VB_Name = \"Module1\"\nOption Explicit\n", Some("Module1"))]
    #[case("attribute vb_name=\"Sheet1\"", Some("Sheet1"))]
    #[case("Attribute VB_GlobalNameSpace = False\n", None)]
    #[case("Option Explicit\n", None)]
    fn test_vb_name(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(vb_name(text).as_deref(), expected);
    }

    #[rstest]
    #[case("a/Module1.bas", Some(ComponentKind::Standard))]
    #[case("Class1.CLS", Some(ComponentKind::Class))]
    #[case("Form.frm", Some(ComponentKind::UserForm))]
    #[case("ThisWorkbook.doccls", Some(ComponentKind::Document))]
    #[case("Form.frx", None)]
    #[case("README", None)]
    fn test_kind_of(#[case] path: &str, #[case] expected: Option<ComponentKind>) {
        assert_eq!(kind_of(Path::new(path)), expected);
    }
}
