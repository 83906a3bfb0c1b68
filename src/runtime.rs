// ==============================================================================
// Script Runtime Shim: Engine Construction and the Builtin Surface
// ==============================================================================
//
// Builds the rhai engine a compilation session evaluates all of its modules
// with. The builtin surface available to every script:
//
//   fail(msg)                 -- abort evaluation; rhai annotates the error
//                                with the call site and chain
//   struct(#{ ... })          -- freeze an object map into an immutable record
//   add_validator(Type, fn)   -- bind a unary predicate to a message type;
//                                only live during the validator pass
//
// Schema types arrive through ordinary `import` statements (the loader is the
// engine's module resolver), so no further registration happens here. `eval`
// is disabled: modules are the only way to bring code in, which keeps the
// import graph (and its cycle detection) authoritative.

use rhai::{Engine, EvalAltResult, FnPtr, Map};

use crate::bridge::{self, MessageType, StructValue};
use crate::error;
use crate::loader::Loader;

/// Build the engine for one compilation session.
pub fn build_engine(loader: &Loader) -> Engine {
    let mut engine = Engine::new();

    engine.set_module_resolver(loader.clone());
    engine.disable_symbol("eval");
    // Rhai's debug-build expression-depth limits (16 inside function bodies)
    // are tight enough that ordinary nested struct/array literals in schema
    // scripts trip `ExprTooDeep`. Lift them to the release-build defaults so
    // parsing behavior doesn't depend on how this crate itself was built.
    engine.set_max_expr_depths(64, 32);

    bridge::register_types(&mut engine);

    engine.register_fn(
        "fail",
        |msg: &str| -> std::result::Result<(), Box<EvalAltResult>> {
            Err(msg.to_string().into())
        },
    );

    engine.register_fn("struct", |fields: Map| StructValue::new(fields));

    let registrar = loader.clone();
    engine.register_fn(
        "add_validator",
        move |ty: MessageType, predicate: FnPtr| -> std::result::Result<(), Box<EvalAltResult>> {
            registrar
                .register_validator(&ty, predicate)
                .map_err(error::into_runtime)
        },
    );

    engine
}
