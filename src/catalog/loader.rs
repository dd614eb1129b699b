//! Schema file discovery and parsing
//!
//! Schema documents live in the schema search directory as
//! `<name>.json` or `<name>@<revision>.json`. A requested revision of
//! `None` resolves to the latest installed revision.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind, Result};
use crate::yang::schema::SchemaModule;

/// Locate the schema file of `(name, revision?)`.
///
/// With no revision, `<name>@<latest>.json` wins over `<name>.json`.
pub fn find_schema_file(schema_dir: &Path, name: &str, revision: Option<&str>) -> Result<PathBuf> {
    if let Some(rev) = revision {
        let path = schema_dir.join(format!("{}@{}.json", name, rev));
        if path.exists() {
            return Ok(path);
        }
        return Err(Error::unknown_model(name));
    }

    let mut best: Option<(String, PathBuf)> = None;
    let entries = fs::read_dir(schema_dir)
        .map_err(|e| Error::new(ErrorKind::InitFailed, format!("cannot read schema directory: {}", e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e.to_string()))?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(stem) = file_name.strip_suffix(".json") else {
            continue;
        };
        let (module, rev) = match stem.split_once('@') {
            Some((m, r)) => (m, r.to_string()),
            None => (stem, String::new()),
        };
        if module != name {
            continue;
        }
        // revisions are dates; lexical order is chronological
        match &best {
            Some((existing, _)) if *existing >= rev => {}
            _ => best = Some((rev, entry.path())),
        }
    }
    best.map(|(_, p)| p).ok_or_else(|| Error::unknown_model(name))
}

/// Parse one schema document.
pub fn parse_schema_file(path: &Path) -> Result<SchemaModule> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::new(ErrorKind::InitFailed, format!("cannot read '{}': {}", path.display(), e)))?;
    let module: SchemaModule = serde_json::from_str(&text).map_err(|e| {
        Error::new(
            ErrorKind::InitFailed,
            format!("malformed schema '{}': {}", path.display(), e),
        )
    })?;
    module.check_structure()?;
    Ok(module)
}

/// Names of every module present in the schema directory.
pub fn installed_modules(schema_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = fs::read_dir(schema_dir)
        .map_err(|e| Error::new(ErrorKind::InitFailed, format!("cannot read schema directory: {}", e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e.to_string()))?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(stem) = file_name.strip_suffix(".json") {
            let name = stem.split_once('@').map(|(m, _)| m).unwrap_or(stem);
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
