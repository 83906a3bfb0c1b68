// ==============================================================================
// Error Taxonomy for the Compilation Pipeline
// ==============================================================================
//
// Every failure the pipeline can surface is a variant here. Errors raised
// inside script evaluation (builtins, the bridge, the module resolver) travel
// through rhai as runtime errors and come back out wrapped in `ScriptEval`,
// which preserves rhai's position and call-stack rendering. Everything else is
// raised directly by the loader, driver, or writer.
//
// The policy is fail-fast: all variants propagate to the driver, which aborts
// the current input. Nothing is swallowed, nothing is retried.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    /// The configuration source name carries no recognized extension.
    #[error("`{name}` has no recognized configuration extension (expected `.pconf` or `.mpconf`)")]
    #[diagnostic(code(pconf::input_classification))]
    InputClassification { name: String },

    /// An import name did not resolve to a file under the source root.
    #[error("unresolved import `{name}`: {reason}")]
    #[diagnostic(code(pconf::unresolved_import))]
    UnresolvedImport { name: String, reason: String },

    /// A filesystem read failed after the path itself resolved.
    #[error("{context}: {source}")]
    #[diagnostic(code(pconf::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A module was imported while its own evaluation was still in flight.
    #[error("import cycle detected at `{path}`")]
    #[diagnostic(code(pconf::import_cycle))]
    ImportCycle { path: String },

    /// The schema compiler rejected a `.proto` file.
    #[error("failed to parse schema `{path}`: {message}")]
    #[diagnostic(code(pconf::schema_parse))]
    SchemaParse { path: String, message: String },

    /// A runtime error inside script code. The message carries rhai's own
    /// rendering, including source positions and the call chain.
    #[error("script evaluation failed: {message}")]
    #[diagnostic(code(pconf::script_eval))]
    ScriptEval { message: String },

    /// The entry module defines no `main` function.
    #[error("module `{path}` does not define `main`")]
    #[diagnostic(code(pconf::missing_main))]
    MissingMain { path: String },

    /// The entry module defines `main`, but not as a zero-parameter function.
    #[error("`main` in `{path}` is not callable with no arguments")]
    #[diagnostic(code(pconf::main_not_callable))]
    MainNotCallable { path: String },

    /// `main` returned a value that does not match the source's mode contract.
    #[error("`main` in `{path}` returned {got}; expected {expected}")]
    #[diagnostic(code(pconf::bad_main_return))]
    BadMainReturn {
        path: String,
        got: String,
        expected: String,
    },

    /// A constructed message was given a field name its descriptor lacks.
    #[error("message `{message_type}` has no field `{field}`")]
    #[diagnostic(code(pconf::unknown_field))]
    UnknownField { message_type: String, field: String },

    /// A field assignment carried a value incompatible with the declared type.
    #[error("field `{field}` of `{message_type}`: {message}")]
    #[diagnostic(code(pconf::type_mismatch))]
    TypeMismatch {
        message_type: String,
        field: String,
        message: String,
    },

    /// `add_validator` was called outside the validator discovery pass.
    #[error("add_validator may only be called while validator modules load")]
    #[diagnostic(code(pconf::validator_out_of_phase))]
    ValidatorOutOfPhase,

    /// A message type already has a validator bound.
    #[error("validator already registered for `{message_type}`")]
    #[diagnostic(code(pconf::duplicate_validator))]
    DuplicateValidator { message_type: String },

    /// A validator predicate does not accept exactly one argument.
    #[error("validator `{name}` must accept exactly one argument")]
    #[diagnostic(code(pconf::arity_mismatch))]
    ArityMismatch { name: String },

    /// The companion path alongside a schema exists but is a directory.
    #[error("validator path `{}` is a directory", path.display())]
    #[diagnostic(code(pconf::validator_is_directory))]
    ValidatorIsDirectory { path: PathBuf },

    /// A registered validator rejected a message.
    #[error("validation of `{message_type}` failed: {message}")]
    #[diagnostic(code(pconf::validation_failed))]
    ValidationFailed {
        message_type: String,
        message: String,
    },

    /// Converting a compiled message into its serialized envelope failed.
    #[error("failed to marshal `{context}`: {message}")]
    #[diagnostic(code(pconf::marshal))]
    Marshal { context: String, message: String },

    /// Writing an output file (or creating its parent directories) failed.
    #[error("failed to write `{}`: {source}", path.display())]
    #[diagnostic(code(pconf::write))]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convert a pipeline error into a rhai runtime error so it can propagate
/// through script evaluation. The structured kind is flattened to its message
/// text; the driver surfaces it inside `ScriptEval`.
pub(crate) fn into_runtime(err: Error) -> Box<rhai::EvalAltResult> {
    err.to_string().into()
}
