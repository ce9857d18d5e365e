//! `classgraft`: a compositional JVM bytecode rewriting core.
//!
//! A host (an agent's `ClassFileTransformer`, a custom class loader, a
//! test harness) owns class bytes and the moment they become available;
//! this crate owns turning a declarative list of rewrite primitives into
//! the patched bytes for one class. [`manager::ScriptManager`] is the
//! entry point; [`rewrite::PatchScript`] lists the primitives it runs.

mod classfile;
mod codepatch;
mod descriptor;
mod error;
mod host;
mod hook;
mod ir;
mod logistics;
mod manager;
mod opcodes;
mod remap;
mod rewrite;
mod scan;
mod stackmap;
mod symbol_stack;
mod target;
mod transplant;
mod witness;

pub use descriptor::{DecomposedDescriptor, decompose_method_descriptor, to_internal_method_descriptor, to_internal_type, type_spec_match};
pub use error::PatchError;
pub use hook::Hook;
pub use host::{AcceptAll, Filter, NoReload, Reloader, debug_dump};
pub use manager::{ScriptManager, ScriptManagerBuilder};
pub use rewrite::PatchScript;
pub use rewrite::add_field::{AddFieldScript, AddFieldScriptBuilder, ConstantValue, Visibility};
pub use rewrite::delivery::HookDelivery;
pub use rewrite::exit_early::{ExitEarlyScript, ExitEarlyScriptBuilder};
pub use rewrite::replace_method_call::{ReplaceMethodCallScript, ReplaceMethodCallScriptBuilder};
pub use rewrite::set_symbol_during_method_call::{SetSymbolDuringMethodCallScript, SetSymbolDuringMethodCallScriptBuilder};
pub use rewrite::wrap_method_call::{WrapMethodCallScript, WrapMethodCallScriptBuilder};
pub use rewrite::wrap_return_values::{WrapReturnValuesScript, WrapReturnValuesScriptBuilder};
pub use target::{MethodTarget, Signature, StackRequest};
pub use transplant::{ClasspathHookLocator, HookLocator};
pub use witness::{WitnessAction, WitnessEffect};

pub mod symbols {
    //! Thread-local push/pop stack a host's `Symbols` class can delegate
    //! to, backing the bytecode [`crate::rewrite::set_symbol_during_method_call::SetSymbolDuringMethodCallScript`]
    //! emits calls against — §4.8.
    pub use crate::symbol_stack::{has_symbol, has_tail, is_empty, pop, push, size};
}
