//! Typed configuration compiler — evaluate scripted `.pconf` / `.mpconf`
//! sources against protobuf schemas and materialize schema-validated JSON.
//!
//! A configuration program is a small sandboxed script that imports schema
//! files, constructs typed messages, and returns them from `main()`. The
//! compiler loads the script and its import closure, runs any validator
//! predicates registered alongside the schemas, and emits each message as a
//! self-describing JSON envelope under `materialized_config/`.
//!
//! The main entry point is [`Compiler`], a non-consuming builder that can be
//! reused across multiple sources; each call gets a fresh compilation session.
//!
//! # Compiling a source
//!
//! ```no_run
//! use pconf::Compiler;
//!
//! let compiler = Compiler::new("my-project");
//! let output = compiler.compile("fleet.mpconf")?;
//! for file in &output.files {
//!     println!("wrote {}", file.path.display());
//! }
//! # Ok::<(), pconf::Error>(())
//! ```
//!
//! # Project layout
//!
//! | Role | Location |
//! |------|----------|
//! | Sources (`.pconf`, `.mpconf`) and schemas (`.proto`) | `src/` |
//! | Validator companions | `<schema>.proto-validator`, alongside the schema |
//! | Outputs (`.materialized_JSON`) | `materialized_config/` |
//!
//! Scripts may only import modules that resolve under `src/`; outputs only
//! ever land under `materialized_config/`.

pub mod error;
pub mod layout;

pub(crate) mod bridge;
pub(crate) mod compiler;
pub(crate) mod envelope;
pub(crate) mod loader;
pub(crate) mod reader;
pub(crate) mod registry;
pub(crate) mod runtime;
pub(crate) mod validator;

// Re-export the small number of public API at the crate root.
pub use compiler::{CompileOutput, Compiler, MaterializedFile};
pub use error::Error;
