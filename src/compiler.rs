// ==============================================================================
// Compile Driver: Load -> main() -> Validate -> Emit
// ==============================================================================
//
// The public API of the crate, in the non-consuming builder style: a
// `Compiler` is configured once with a project root and can compile any
// number of sources, each in a fresh session (reader, registry, loader cache,
// validator map), so descriptors never leak between configurations.
//
// One compilation is an uninterrupted, single-threaded traversal:
//
//   1. classify the source by extension (single vs. multi mode);
//   2. load the entry module and check the `main` contract;
//   3. invoke `main` and classify its return value;
//   4. run the validator discovery pass over every schema the load recorded;
//   5. validate every output message recursively;
//   6. write every envelope.
//
// Steps 5 and 6 are two passes on purpose: a multi-output compile writes
// nothing unless every message validates.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use prost_reflect::{DynamicMessage, Kind, ReflectMessage, Value};
use rhai::{Dynamic, Engine, Map, Scope};

use crate::bridge::{self, MessageValue};
use crate::envelope::EnvelopeWriter;
use crate::error::{Error, Result};
use crate::layout::{self, SourceKind};
use crate::loader::Loader;
use crate::runtime;
use crate::validator::Validator;

// ==============================================================================
// `Compiler` Builder
// ==============================================================================

/// Compiles configuration sources under one project root.
///
/// # Examples
///
/// ```no_run
/// use pconf::Compiler;
///
/// let compiler = Compiler::new("example-project");
/// let output = compiler.compile("hi.pconf")?;
/// for file in &output.files {
///     println!("wrote {}", file.path.display());
/// }
/// # Ok::<(), pconf::Error>(())
/// ```
pub struct Compiler {
    project_root: PathBuf,
}

/// One emitted output file.
#[derive(Debug)]
pub struct MaterializedFile {
    /// Absolute path under `materialized_config/`.
    pub path: PathBuf,
    /// The emitted envelope, re-parsed.
    pub json: serde_json::Value,
}

/// Result of compiling one configuration source. Files appear in emission
/// order: the single message, or multi-mode entries in the returned map's
/// iteration order.
#[derive(Debug)]
pub struct CompileOutput {
    pub files: Vec<MaterializedFile>,
}

impl Compiler {
    /// Create a compiler for the given project root (the directory holding
    /// `src/` and `materialized_config/`).
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Compiler {
            project_root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Compile one source, named relative to `src/`, and write its outputs.
    pub fn compile(&self, source_name: &str) -> Result<CompileOutput> {
        let kind = layout::classify(source_name)?;

        let loader = Loader::new(&self.project_root)?;
        let engine = runtime::build_engine(&loader);

        let (_entry_path, ast) = loader.load_entry(&engine, source_name)?;

        // The `main` contract is checked against the compiled AST before any
        // evaluation happens.
        let mut saw_main = false;
        let mut saw_nullary_main = false;
        for f in ast.iter_functions() {
            if f.name == "main" {
                saw_main = true;
                saw_nullary_main |= f.params.is_empty();
            }
        }
        if !saw_main {
            return Err(Error::MissingMain {
                path: source_name.to_string(),
            });
        }
        if !saw_nullary_main {
            return Err(Error::MainNotCallable {
                path: source_name.to_string(),
            });
        }

        // Evaluates the module body (resolving imports), then calls main().
        let mut scope = Scope::new();
        let result = engine
            .call_fn::<Dynamic>(&mut scope, &ast, "main", ())
            .map_err(|e| Error::ScriptEval {
                message: e.to_string(),
            })?;

        let targets = self.materialize(kind, source_name, result)?;

        loader.run_validator_pass(&engine)?;

        // Validate everything before writing anything.
        let validators = loader.validators_snapshot();
        for (_, message) in &targets {
            validate_tree(&engine, &validators, message)?;
        }

        let mut files = Vec::with_capacity(targets.len());
        loader.with_registry(|registry| {
            let writer = EnvelopeWriter::new(registry);
            for (path, message) in &targets {
                let json = writer.write(path, message)?;
                files.push(MaterializedFile {
                    path: path.clone(),
                    json,
                });
            }
            Ok::<(), Error>(())
        })?;

        Ok(CompileOutput { files })
    }

    /// Pair `main`'s return value with output paths per the mode contract.
    fn materialize(
        &self,
        kind: SourceKind,
        source_name: &str,
        result: Dynamic,
    ) -> Result<Vec<(PathBuf, DynamicMessage)>> {
        let bad = |got: String, expected: &str| Error::BadMainReturn {
            path: source_name.to_string(),
            got,
            expected: expected.to_string(),
        };

        match kind {
            SourceKind::Single => {
                let got = bridge::type_label(&result);
                let Some(message) = result.try_cast::<MessageValue>() else {
                    return Err(bad(got, "a message instance"));
                };
                Ok(vec![(
                    layout::single_output(&self.project_root, source_name),
                    message.into_message(),
                )])
            }
            SourceKind::Multi => {
                let got = bridge::type_label(&result);
                let Some(map) = result.try_cast::<Map>() else {
                    return Err(bad(got, "a string-keyed map of message instances"));
                };
                let dir = layout::multi_output_dir(&self.project_root, source_name);
                let mut targets = Vec::with_capacity(map.len());
                for (key, value) in map {
                    if !layout::is_valid_output_key(key.as_str()) {
                        return Err(bad(
                            format!("a map with key `{key}` unusable as a file name"),
                            "plain file-name keys",
                        ));
                    }
                    let label = bridge::type_label(&value);
                    let Some(message) = value.try_cast::<MessageValue>() else {
                        return Err(bad(
                            format!("a map whose value for `{key}` is {label}"),
                            "message instances as map values",
                        ));
                    };
                    targets.push((
                        layout::multi_output(&dir, key.as_str()),
                        message.into_message(),
                    ));
                }
                Ok(targets)
            }
        }
    }
}

// ==============================================================================
// Recursive Validation
// ==============================================================================

/// Validate one message and every message reachable from it. The message's
/// own validator runs first, then message-typed fields recurse in declaration
/// order: each element of a repeated field, each value of a map with message
/// values (in sorted key order), and a singular field only when present.
///
/// Validators receive a clone, so the compiled message is never mutated.
fn validate_tree(
    engine: &Engine,
    validators: &IndexMap<String, Validator>,
    message: &DynamicMessage,
) -> Result<()> {
    let desc = message.descriptor();
    if let Some(validator) = validators.get(desc.full_name()) {
        let arg = Dynamic::from(MessageValue::new(message.clone()));
        validator
            .fn_ptr
            .call::<Dynamic>(engine, &validator.ast, (arg,))
            .map_err(|e| Error::ValidationFailed {
                message_type: desc.full_name().to_string(),
                message: e.to_string(),
            })?;
    }

    for field in desc.fields() {
        if field.is_map() {
            // A map field's kind is its synthetic entry message; only map
            // values that are themselves messages recurse.
            let Kind::Message(entry) = field.kind() else {
                continue;
            };
            if !matches!(entry.map_entry_value_field().kind(), Kind::Message(_)) {
                continue;
            }
            if let Value::Map(entries) = &*message.get_field(&field) {
                let mut sorted: Vec<_> = entries.iter().collect();
                sorted.sort_by_key(|(key, _)| bridge::map_key_string(key));
                for (_, value) in sorted {
                    if let Value::Message(child) = value {
                        validate_tree(engine, validators, child)?;
                    }
                }
            }
        } else if matches!(field.kind(), Kind::Message(_)) {
            if field.is_list() {
                if let Value::List(items) = &*message.get_field(&field) {
                    for item in items {
                        if let Value::Message(child) = item {
                            validate_tree(engine, validators, child)?;
                        }
                    }
                }
            } else if message.has_field(&field) {
                if let Value::Message(child) = &*message.get_field(&field) {
                    validate_tree(engine, validators, child)?;
                }
            }
        }
    }
    Ok(())
}
