// ==============================================================================
// Module Loader: Import Resolution, Caching, and Cycle Detection
// ==============================================================================
//
// The import engine behind every `import` statement. The loader implements
// `rhai::ModuleResolver`, so script imports recurse through the same cache and
// resolution policy as the driver's own entry-module load: resolve the name
// through the sandboxed reader, classify by suffix (`.proto` is a schema
// module, everything else a script module), evaluate, cache.
//
// The cache is keyed by canonical path and doubles as the cycle detector: an
// in-flight sentinel is inserted before evaluation begins, so any recursive
// request for a module that has not finished evaluating fails with
// `ImportCycle` naming the path. Completed results are cached, errors
// included, and two imports resolving to the same path share one evaluation.
//
// The loader also runs the validator discovery pass: after the entry module
// has evaluated, each schema path recorded by the reader is probed for a
// `-validator` companion, which is evaluated as an ordinary script module
// with the registration phase switched on. The record can grow while the pass
// runs (companions may import further schemas), so it is walked by index.
//
// Borrow discipline: session state lives in one `RefCell`, and every borrow
// is dropped before script evaluation starts, because evaluation re-enters
// the loader through nested imports and builtins.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use rhai::{AST, Engine, EvalAltResult, FnPtr, Module, ModuleResolver, Position, Scope, Shared};

use crate::bridge::{self, MessageType};
use crate::error::{Error, Result};
use crate::layout;
use crate::reader::ModuleReader;
use crate::registry::SchemaRegistry;
use crate::validator::{Validator, ValidatorRegistry};

/// Whether `add_validator` is currently live. Switched on only while the
/// validator discovery pass evaluates companion modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Normal,
    Validator,
}

/// A cached load result.
#[derive(Clone)]
pub struct LoadedModule {
    pub module: Shared<Module>,
    /// Retained for script modules so validator predicates defined in them
    /// can be invoked later; schema modules have no AST.
    pub ast: Option<Rc<AST>>,
}

enum CacheSlot {
    /// Evaluation in progress; a lookup hitting this is an import cycle.
    InFlight,
    Ready(LoadedModule),
    Failed(String),
}

/// Per-compilation session state shared between the resolver, the builtins,
/// and the driver.
struct Session {
    reader: ModuleReader,
    registry: SchemaRegistry,
    validators: ValidatorRegistry,
    cache: HashMap<PathBuf, CacheSlot>,
    phase: Phase,
}

#[derive(Clone)]
pub struct Loader {
    session: Rc<RefCell<Session>>,
}

impl Loader {
    /// Build a fresh session rooted at a project directory. The registry is
    /// seeded with the envelope schema immediately.
    pub fn new(project_root: &Path) -> Result<Self> {
        let reader = ModuleReader::new(project_root)?;
        let registry = SchemaRegistry::new(reader.src_root())?;
        Ok(Loader {
            session: Rc::new(RefCell::new(Session {
                reader,
                registry,
                validators: ValidatorRegistry::new(),
                cache: HashMap::new(),
                phase: Phase::Normal,
            })),
        })
    }

    /// Load a module by logical name: the engine behind both script imports
    /// and the validator pass.
    pub(crate) fn resolve_module(
        &self,
        engine: &Engine,
        name: &str,
        from: Option<&Path>,
    ) -> Result<LoadedModule> {
        let path = self.session.borrow().reader.resolve(name, from)?;

        {
            let mut session = self.session.borrow_mut();
            match session.cache.get(&path) {
                Some(CacheSlot::Ready(loaded)) => return Ok(loaded.clone()),
                Some(CacheSlot::InFlight) => {
                    return Err(Error::ImportCycle {
                        path: path.display().to_string(),
                    });
                }
                Some(CacheSlot::Failed(message)) => {
                    return Err(Error::ScriptEval {
                        message: message.clone(),
                    });
                }
                None => {
                    session.cache.insert(path.clone(), CacheSlot::InFlight);
                }
            }
        }

        let result = if layout::is_schema(&path) {
            self.load_schema(&path)
        } else {
            self.load_script(engine, &path)
        };

        let mut session = self.session.borrow_mut();
        match &result {
            Ok(loaded) => {
                session.cache.insert(path, CacheSlot::Ready(loaded.clone()));
            }
            Err(e) => {
                session.cache.insert(path, CacheSlot::Failed(e.to_string()));
            }
        }
        result
    }

    /// Parse a schema file and expose its message constructors as a module.
    fn load_schema(&self, path: &Path) -> Result<LoadedModule> {
        let messages = {
            let mut session = self.session.borrow_mut();
            let rel = session.reader.rel_name(path);
            let messages = session.registry.ingest(&rel)?;
            session.reader.record_schema(path);
            messages
        };
        let mut module = bridge::schema_module(&messages);
        module.build_index();
        Ok(LoadedModule {
            module: module.into(),
            ast: None,
        })
    }

    /// Compile and evaluate a script file as a module. Top-level bindings
    /// become the module's contents; validator registrations made during the
    /// evaluation are promoted against this module's AST.
    fn load_script(&self, engine: &Engine, path: &Path) -> Result<LoadedModule> {
        let (source, mark) = {
            let session = self.session.borrow();
            let source = session.reader.read(path)?;
            (source, session.validators.pending_len())
        };

        let mut ast = engine.compile(&source).map_err(|e| Error::ScriptEval {
            message: format!("parse error in `{}`: {e}", path.display()),
        })?;
        ast.set_source(path.display().to_string());
        let ast = Rc::new(ast);

        let module = Module::eval_ast_as_new(Scope::new(), &ast, engine)
            .map_err(|e| Error::ScriptEval {
                message: e.to_string(),
            })?;

        self.session
            .borrow_mut()
            .validators
            .promote_pending(mark, &ast)?;

        Ok(LoadedModule {
            module: Shared::new(module),
            ast: Some(ast),
        })
    }

    /// Resolve and compile the entry module without evaluating it. The
    /// in-flight sentinel is left in place for the whole compile, so any
    /// import that cycles back to the entry fails. The driver evaluates the
    /// returned AST when it invokes `main`.
    pub fn load_entry(&self, engine: &Engine, source_name: &str) -> Result<(PathBuf, Rc<AST>)> {
        let path = self.session.borrow().reader.resolve(source_name, None)?;
        let source = {
            let mut session = self.session.borrow_mut();
            session.cache.insert(path.clone(), CacheSlot::InFlight);
            session.reader.read(&path)?
        };
        let mut ast = engine.compile(&source).map_err(|e| Error::ScriptEval {
            message: format!("parse error in `{}`: {e}", path.display()),
        })?;
        ast.set_source(path.display().to_string());
        Ok((path, Rc::new(ast)))
    }

    /// Probe every recorded schema for a `-validator` companion and evaluate
    /// the ones that exist, with `add_validator` live.
    pub fn run_validator_pass(&self, engine: &Engine) -> Result<()> {
        self.session.borrow_mut().phase = Phase::Validator;
        let result = self.validator_pass_inner(engine);
        self.session.borrow_mut().phase = Phase::Normal;
        result
    }

    fn validator_pass_inner(&self, engine: &Engine) -> Result<()> {
        let mut index = 0;
        loop {
            let schema = {
                let session = self.session.borrow();
                session.reader.schema_files().get(index).cloned()
            };
            let Some(schema) = schema else { break };
            index += 1;

            let companion = layout::validator_companion(&schema);
            if !companion.exists() {
                continue;
            }
            if companion.is_dir() {
                return Err(Error::ValidatorIsDirectory { path: companion });
            }
            let name = companion
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.resolve_module(engine, &name, Some(&schema))?;
        }
        Ok(())
    }

    /// Registration callback behind the `add_validator` builtin.
    pub(crate) fn register_validator(&self, ty: &MessageType, fn_ptr: FnPtr) -> Result<()> {
        let mut session = self.session.borrow_mut();
        if session.phase != Phase::Validator {
            return Err(Error::ValidatorOutOfPhase);
        }
        session
            .validators
            .add_pending(ty.descriptor().full_name().to_string(), fn_ptr)
    }

    /// Clone out the promoted validator bindings so they can be invoked
    /// without holding the session borrow (predicates may re-enter builtins).
    pub fn validators_snapshot(&self) -> IndexMap<String, Validator> {
        self.session.borrow().validators.snapshot()
    }

    /// Run a closure against the schema registry. No script code may run
    /// inside the closure.
    pub fn with_registry<R>(&self, f: impl FnOnce(&SchemaRegistry) -> R) -> R {
        f(&self.session.borrow().registry)
    }
}

impl ModuleResolver for Loader {
    fn resolve(
        &self,
        engine: &Engine,
        source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> std::result::Result<Shared<Module>, Box<EvalAltResult>> {
        let from = source.map(PathBuf::from);
        self.resolve_module(engine, path, from.as_deref())
            .map(|loaded| loaded.module)
            .map_err(|e| {
                Box::new(EvalAltResult::ErrorInModule(
                    path.to_string(),
                    e.to_string().into(),
                    pos,
                ))
            })
    }
}
