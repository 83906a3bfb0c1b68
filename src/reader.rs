// ==============================================================================
// Module Reader: Sandboxed Import Resolution
// ==============================================================================
//
// Turns logical import names into canonical on-disk paths and byte streams,
// restricted to the project's `src/` tree. Resolution policy:
//
//   - names beginning with `/` resolve against the source root;
//   - all other names resolve against the importing module's directory,
//     or the source root when there is no importing module (CLI entry).
//
// Canonicalization happens after an existence check, so a dangling name
// reports `UnresolvedImport` rather than a raw OS error, and a resolved path
// that escapes the source root (via `..` or symlinks) is rejected the same
// way.
//
// The reader also keeps an ordered record of every schema path the loader
// opens through it; the driver later walks that record to probe for validator
// companion files. The record grows while the validator pass itself imports
// further schemas, so it is index-walked rather than iterated.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::layout;

pub struct ModuleReader {
    /// Canonical absolute path of `<project_root>/src`.
    src_root: PathBuf,
    /// Schema paths in first-open order, deduplicated.
    schema_files: Vec<PathBuf>,
}

impl ModuleReader {
    /// Create a reader rooted at `<project_root>/src`. Fails if the source
    /// root does not exist, since nothing could ever resolve.
    pub fn new(project_root: &Path) -> Result<Self> {
        let src_root = project_root.join(layout::SOURCE_DIR);
        let src_root = src_root.canonicalize().map_err(|source| Error::Io {
            context: format!("locate source root `{}`", src_root.display()),
            source,
        })?;
        Ok(ModuleReader {
            src_root,
            schema_files: Vec::new(),
        })
    }

    /// Map a logical import name to a canonical absolute path.
    pub fn resolve(&self, name: &str, from: Option<&Path>) -> Result<PathBuf> {
        let candidate = if let Some(rest) = name.strip_prefix('/') {
            self.src_root.join(rest)
        } else {
            match from.and_then(Path::parent) {
                Some(dir) => dir.join(name),
                None => self.src_root.join(name),
            }
        };

        if !candidate.exists() {
            return Err(Error::UnresolvedImport {
                name: name.to_string(),
                reason: format!("`{}` does not exist", candidate.display()),
            });
        }

        let resolved = candidate.canonicalize().map_err(|source| Error::Io {
            context: format!("canonicalize `{}`", candidate.display()),
            source,
        })?;

        if !resolved.starts_with(&self.src_root) {
            return Err(Error::UnresolvedImport {
                name: name.to_string(),
                reason: format!(
                    "`{}` escapes the source root `{}`",
                    resolved.display(),
                    self.src_root.display()
                ),
            });
        }

        Ok(resolved)
    }

    /// Read a resolved module's contents. The handle is opened per-read and
    /// closed before returning.
    pub fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|source| Error::Io {
            context: format!("read `{}`", path.display()),
            source,
        })
    }

    /// Express a resolved path as a `/`-separated name relative to the source
    /// root. This is the name the schema compiler knows the file by.
    pub fn rel_name(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.src_root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Record a schema path the loader just opened. First open wins the slot;
    /// re-imports served from the loader cache do not re-record.
    pub fn record_schema(&mut self, path: &Path) {
        if !self.schema_files.iter().any(|p| p == path) {
            self.schema_files.push(path.to_path_buf());
        }
    }

    /// Schema paths recorded so far, in first-open order.
    pub fn schema_files(&self) -> &[PathBuf] {
        &self.schema_files
    }

    pub fn src_root(&self) -> &Path {
        &self.src_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("create temp project");
        fs::create_dir_all(dir.path().join("src/sub")).expect("create src tree");
        fs::write(dir.path().join("src/a.pconf"), "fn main() { 1 }").unwrap();
        fs::write(dir.path().join("src/sub/b.pconf"), "fn main() { 2 }").unwrap();
        fs::write(dir.path().join("outside.pconf"), "fn main() { 3 }").unwrap();
        dir
    }

    #[test]
    fn root_relative_names_resolve_against_source_root() {
        let dir = project();
        let reader = ModuleReader::new(dir.path()).unwrap();
        let from = reader.resolve("sub/b.pconf", None).unwrap();
        let resolved = reader.resolve("/a.pconf", Some(&from)).unwrap();
        assert!(resolved.ends_with("src/a.pconf"));
    }

    #[test]
    fn bare_names_resolve_against_the_importing_module() {
        let dir = project();
        let reader = ModuleReader::new(dir.path()).unwrap();
        let from = reader.resolve("sub/b.pconf", None).unwrap();
        let sibling = reader.resolve("../a.pconf", Some(&from)).unwrap();
        assert!(sibling.ends_with("src/a.pconf"));
    }

    #[test]
    fn missing_modules_are_unresolved_imports() {
        let dir = project();
        let reader = ModuleReader::new(dir.path()).unwrap();
        assert!(matches!(
            reader.resolve("nope.pconf", None),
            Err(Error::UnresolvedImport { .. })
        ));
    }

    #[test]
    fn escaping_the_source_root_is_rejected() {
        let dir = project();
        let reader = ModuleReader::new(dir.path()).unwrap();
        let err = reader.resolve("../outside.pconf", None).unwrap_err();
        match err {
            Error::UnresolvedImport { reason, .. } => {
                assert!(reason.contains("escapes the source root"), "{reason}");
            }
            other => panic!("expected UnresolvedImport, got {other:?}"),
        }
    }

    #[test]
    fn schema_record_is_ordered_and_deduplicated() {
        let dir = project();
        fs::write(dir.path().join("src/x.proto"), "").unwrap();
        fs::write(dir.path().join("src/y.proto"), "").unwrap();
        let mut reader = ModuleReader::new(dir.path()).unwrap();
        let x = reader.resolve("x.proto", None).unwrap();
        let y = reader.resolve("y.proto", None).unwrap();
        reader.record_schema(&x);
        reader.record_schema(&y);
        reader.record_schema(&x);
        assert_eq!(reader.schema_files(), &[x, y]);
    }

    #[test]
    fn rel_name_uses_forward_slashes() {
        let dir = project();
        let reader = ModuleReader::new(dir.path()).unwrap();
        let b = reader.resolve("sub/b.pconf", None).unwrap();
        assert_eq!(reader.rel_name(&b), "sub/b.pconf");
    }
}
