//! Shared "make a hook happen" logic used by every primitive that invokes
//! a hook method: `Call`/`Transplant`/`Insert` dispatch, §4.4.

use crate::classfile::RawClassFile;
use crate::error::PatchError;
use crate::hook::Hook;
use crate::opcodes;
use crate::transplant::{self, HookLocator};

/// How a hook's body reaches the target method — §4.4.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HookDelivery {
    Call,
    Transplant,
    Insert,
}

/// Emits whatever bytecode makes the hook run at this point: for `Call`
/// and `Transplant` that's an `INVOKESTATIC`; for `Insert` it's the hook's
/// own body, pasted in and renumbered onto locals starting at
/// `insert_locals_base` (only meaningful for `Insert`).
///
/// Returns the bytes to splice and how many extra local slots (beyond
/// `insert_locals_base`) the inserted body consumes, so the caller can
/// grow `max_locals` accordingly.
pub(crate) fn emit_hook_invocation(
    out: &mut Vec<u8>,
    class: &mut RawClassFile,
    hook: &Hook,
    delivery: HookDelivery,
    locator: &dyn HookLocator,
    insert_locals_base: u16,
) -> Result<u16, PatchError> {
    let descriptor = crate::descriptor::to_internal_method_descriptor(&hook.parameter_types, &hook.return_type);

    match delivery {
        HookDelivery::Call => {
            let owner = hook.owner_internal()?;
            let index = class.constant_pool.get_or_insert_methodref(owner, &hook.method_name, &descriptor);
            out.push(opcodes::INVOKESTATIC);
            out.extend_from_slice(&index.to_be_bytes());
            Ok(0)
        }
        HookDelivery::Transplant => {
            let (hook_class, hook_method) = transplant::resolve_hook_method(hook, locator)?;
            transplant::transplant_method(class, &hook_class, &hook_method)?;
            let this_class_name = class.this_class_name().map_err(|source| PatchError::TransformFailure {
                script: "transplant".to_string(),
                class_name: String::new(),
                source,
            })?.to_string();
            let index = class
                .constant_pool
                .get_or_insert_methodref(&this_class_name, &hook.method_name, &descriptor);
            out.push(opcodes::INVOKESTATIC);
            out.extend_from_slice(&index.to_be_bytes());
            Ok(0)
        }
        HookDelivery::Insert => {
            let (hook_class, hook_method) = transplant::resolve_hook_method(hook, locator)?;
            let params_descriptor_sum: u16 =
                hook.parameter_types.iter().map(|t| crate::logistics::slot_size_of_human(t) as u16).sum();
            let body = transplant::inline_hook_body_remapped(
                &mut class.constant_pool,
                &hook_class,
                &hook_method,
                insert_locals_base,
            )?;
            out.extend_from_slice(&body);
            Ok(params_descriptor_sum.max(1))
        }
    }
}
