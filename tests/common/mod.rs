// ==============================================================================
// Shared Test Helpers
// ==============================================================================
//
// Builds throwaway project trees for integration tests: a temp directory with
// the `src/` layout the compiler expects, plus helpers to compile sources and
// read back emitted files.
//
// Each test file that imports this module compiles its own copy, so not every
// function is used in every binary. Suppress the resulting dead_code warnings.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use pconf::error::Error;
use pconf::{CompileOutput, Compiler};
use tempfile::TempDir;

pub struct Project {
    dir: TempDir,
}

impl Project {
    /// Create an empty project with a `src/` directory.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp project directory");
        fs::create_dir_all(dir.path().join("src")).expect("create src/");
        Project { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file under `src/`, creating parent directories as needed.
    pub fn src_file(&self, rel: &str, content: &str) -> &Self {
        let path = self.root().join("src").join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create source subdirectory");
        }
        fs::write(&path, content).expect("write source file");
        self
    }

    /// Write a file directly under the project root (outside `src/`), for
    /// sandbox tests.
    pub fn root_file(&self, rel: &str, content: &str) -> &Self {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create root subdirectory");
        }
        fs::write(&path, content).expect("write root file");
        self
    }

    /// Compile one source through the library API.
    pub fn compile(&self, source: &str) -> Result<CompileOutput, Error> {
        Compiler::new(self.root()).compile(source)
    }

    /// Path of an emitted file, relative to `materialized_config/`.
    pub fn output_path(&self, rel: &str) -> PathBuf {
        self.root().join("materialized_config").join(rel)
    }

    /// Read an emitted file back as raw text.
    pub fn output_text(&self, rel: &str) -> String {
        let path = self.output_path(rel);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("read output `{}`: {e}", path.display()))
    }

    /// Read an emitted file back as parsed JSON.
    pub fn output_json(&self, rel: &str) -> serde_json::Value {
        serde_json::from_str(&self.output_text(rel)).expect("emitted file should be valid JSON")
    }
}

/// A minimal schema used across tests.
pub const GREET_PROTO: &str = "\
syntax = \"proto3\";

message Hello {
  string name = 1;
}
";

/// Render a compile error for substring assertions.
pub fn error_text(err: &Error) -> String {
    err.to_string()
}
