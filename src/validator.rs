// ==============================================================================
// Validator Registry: (Descriptor -> Predicate) Bindings
// ==============================================================================
//
// Validators are unary script predicates bound to message descriptors via the
// `add_validator` builtin, which is only live while validator companion
// modules load (the loader gates the phase). Registration is two-step:
//
//   1. `add_validator` appends a *pending* entry (type name + function
//      pointer). At that point the defining module's AST is still being
//      evaluated, so the predicate's arity cannot be inspected yet.
//   2. When the module's evaluation completes, the loader promotes the
//      entries it contributed, checking each function pointer against the
//      module AST for unary arity and retaining the AST so the pointer can be
//      invoked later, outside any script context.
//
// Closures curry their captured variables into the pointer, so the expected
// parameter count is one plus the curried count. A pointer that names no
// function in the AST (a native function, say) cannot be checked and is
// accepted; a wrong shape then surfaces at call time as a validation error.
//
// At most one binding may exist per descriptor; re-registration fails whether
// the earlier binding is pending or promoted.

use std::rc::Rc;

use indexmap::IndexMap;
use rhai::{AST, FnPtr};

use crate::error::{Error, Result};

/// A promoted validator: the predicate plus the AST that defines it.
#[derive(Clone)]
pub struct Validator {
    pub fn_ptr: FnPtr,
    pub ast: Rc<AST>,
}

#[derive(Default)]
pub struct ValidatorRegistry {
    bindings: IndexMap<String, Validator>,
    pending: Vec<(String, FnPtr)>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration made by `add_validator`. Fails if the type
    /// already has a validator, pending or promoted.
    pub fn add_pending(&mut self, message_type: String, fn_ptr: FnPtr) -> Result<()> {
        if self.bindings.contains_key(&message_type)
            || self.pending.iter().any(|(name, _)| *name == message_type)
        {
            return Err(Error::DuplicateValidator { message_type });
        }
        self.pending.push((message_type, fn_ptr));
        Ok(())
    }

    /// Number of pending registrations; the loader snapshots this before
    /// evaluating a module so it can promote exactly that module's
    /// contributions afterwards.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Promote the pending entries registered at or beyond `mark`, binding
    /// them to the module AST that defined their predicates.
    pub fn promote_pending(&mut self, mark: usize, ast: &Rc<AST>) -> Result<()> {
        let promoted: Vec<_> = self.pending.drain(mark..).collect();
        for (message_type, fn_ptr) in promoted {
            let expected = 1 + fn_ptr.curry().len();
            if let Some(meta) = ast.iter_functions().find(|f| f.name == fn_ptr.fn_name())
                && meta.params.len() != expected
            {
                return Err(Error::ArityMismatch {
                    name: fn_ptr.fn_name().to_string(),
                });
            }
            self.bindings.insert(
                message_type,
                Validator {
                    fn_ptr,
                    ast: Rc::clone(ast),
                },
            );
        }
        Ok(())
    }

    /// Look up the validator bound to a descriptor's full name.
    pub fn get(&self, message_type: &str) -> Option<&Validator> {
        self.bindings.get(message_type)
    }

    /// Snapshot of the promoted bindings, for invocation outside the session
    /// borrow.
    pub fn snapshot(&self) -> IndexMap<String, Validator> {
        self.bindings.clone()
    }
}
