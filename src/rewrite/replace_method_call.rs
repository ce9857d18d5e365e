//! `ReplaceMethodCall` — §4.5.5. Swaps every inner call site matching a
//! target for a call to a user-supplied static wrapper of compatible
//! signature, optionally appending extra arguments after the inner
//! call's own.

use crate::classfile::RawClassFile;
use crate::codepatch::{self, Splice};
use crate::error::PatchError;
use crate::hook::Hook;
use crate::ir;
use crate::logistics::MethodLogistics;
use crate::rewrite::delivery::{HookDelivery, emit_hook_invocation};
use crate::target::{MethodTarget, StackRequest, canonical_order};
use crate::transplant::HookLocator;

#[derive(Clone, Debug)]
pub struct ReplaceMethodCallScript {
    enclosing_target: MethodTarget,
    inner_call: MethodTarget,
    wrapper: Hook,
    delivery: HookDelivery,
    extra_args: Vec<StackRequest>,
    reload_classes: Vec<String>,
}

impl ReplaceMethodCallScript {
    pub fn builder() -> ReplaceMethodCallScriptBuilder {
        ReplaceMethodCallScriptBuilder::default()
    }

    pub(crate) fn reload_classes(&self) -> &[String] {
        &self.reload_classes
    }

    pub(crate) fn apply(
        &self,
        class: &mut RawClassFile,
        locator: &dyn HookLocator,
    ) -> Result<bool, PatchError> {
        let this_name = class.this_class_name().map_err(config_err)?.to_string();
        let mut changed = false;

        for method_index in 0..class.methods.len() {
            let (name, descriptor, access_flags) = {
                let method = &class.methods[method_index];
                (
                    class.constant_pool.utf8(method.name_index).map_err(config_err)?.to_string(),
                    class.constant_pool.utf8(method.descriptor_index).map_err(config_err)?.to_string(),
                    method.access_flags,
                )
            };
            if !self.enclosing_target.matches(&this_name, &name, &descriptor)? {
                continue;
            }

            let logistics = MethodLogistics::compute(access_flags, &descriptor)?;
            let mut code = class.methods[method_index]
                .code(&class.constant_pool)
                .map_err(config_err)?
                .ok_or_else(|| PatchError::InvalidConfiguration(format!("{name}{descriptor} has no Code attribute")))?;

            let calls: Vec<_> = ir::scan_calls(&code.code, &class.constant_pool)
                .map_err(config_err)?
                .into_iter()
                .filter(|call| {
                    self.inner_call
                        .matches(&call.owner, &call.name, &call.descriptor)
                        .unwrap_or(false)
                })
                .collect();
            if calls.is_empty() {
                continue;
            }

            let tmp_base = logistics.first_local_slot;
            let mut splices = Vec::new();
            let mut extra_locals = 0u16;

            for call in &calls {
                let mut replacement = Vec::new();
                for request in &self.extra_args {
                    match request {
                        StackRequest::ReturnValue => {
                            return Err(PatchError::InvalidConfiguration(
                                "ReplaceMethodCall does not permit a RETURN_VALUE extra argument".into(),
                            ));
                        }
                        StackRequest::This => logistics.emit_load_this(&mut replacement),
                        StackRequest::Param(n) => logistics.emit_load_param(&mut replacement, (*n - 1) as usize)?,
                    }
                }
                let hook_locals = emit_hook_invocation(&mut replacement, class, &self.wrapper, self.delivery, locator, tmp_base)?;
                extra_locals = extra_locals.max(hook_locals);

                splices.push(Splice::replace(call.offset, call.length as u32, replacement));
            }

            codepatch::apply_splices(&mut code, splices, 4, extra_locals).map_err(|e| {
                PatchError::TransformFailure { script: "ReplaceMethodCall".to_string(), class_name: this_name.clone(), source: e }
            })?;
            class.methods[method_index].set_code(&code, &mut class.constant_pool);
            changed = true;
        }
        Ok(changed)
    }
}

fn config_err(source: anyhow::Error) -> PatchError {
    PatchError::InvalidConfiguration(source.to_string())
}

#[derive(Default)]
pub struct ReplaceMethodCallScriptBuilder {
    enclosing_target: Option<MethodTarget>,
    inner_call: Option<MethodTarget>,
    wrapper: Option<Hook>,
    delivery: Option<HookDelivery>,
    extra_args: Vec<StackRequest>,
    reload_classes: Vec<String>,
}

impl ReplaceMethodCallScriptBuilder {
    pub fn enclosing_target(mut self, target: MethodTarget) -> Self {
        self.enclosing_target = Some(target);
        self
    }

    pub fn inner_call(mut self, target: MethodTarget) -> Self {
        self.inner_call = Some(target);
        self
    }

    pub fn wrapper(mut self, hook: Hook, delivery: HookDelivery) -> Self {
        self.wrapper = Some(hook);
        self.delivery = Some(delivery);
        self
    }

    pub fn extra_args(mut self, requests: impl IntoIterator<Item = StackRequest>) -> Self {
        self.extra_args = canonical_order(requests.into_iter().collect());
        self
    }

    pub fn reload_classes(mut self, classes: impl IntoIterator<Item = String>) -> Self {
        self.reload_classes = classes.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<ReplaceMethodCallScript, PatchError> {
        let enclosing_target = self
            .enclosing_target
            .ok_or_else(|| PatchError::InvalidConfiguration("ReplaceMethodCall requires an enclosing target".into()))?;
        let inner_call = self
            .inner_call
            .ok_or_else(|| PatchError::InvalidConfiguration("ReplaceMethodCall requires an inner call target".into()))?;
        let wrapper = self
            .wrapper
            .ok_or_else(|| PatchError::InvalidConfiguration("ReplaceMethodCall requires a wrapper".into()))?;
        if self.extra_args.contains(&StackRequest::ReturnValue) {
            return Err(PatchError::InvalidConfiguration(
                "ReplaceMethodCall does not permit a RETURN_VALUE extra argument".into(),
            ));
        }
        if self.delivery == Some(HookDelivery::Insert) {
            return Err(PatchError::InvalidConfiguration(
                "ReplaceMethodCall does not support Insert delivery: the wrapper's own arguments come from the \
                 inner call's operand stack, not from locals an inlined body could read"
                    .into(),
            ));
        }
        Ok(ReplaceMethodCallScript {
            enclosing_target,
            inner_call,
            wrapper,
            delivery: self.delivery.unwrap_or(HookDelivery::Call),
            extra_args: self.extra_args,
            reload_classes: self.reload_classes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{CodeAttribute, ConstantPool, RawField, RawMethod};
    use crate::opcodes as op;
    use crate::transplant::ClasspathHookLocator;

    fn class_with_sleep_call() -> RawClassFile {
        let mut pool = ConstantPool::default();
        let this_class = pool.get_or_insert_class("com/example/Target");
        let super_class = pool.get_or_insert_class("java/lang/Object");
        let method_ref = pool.get_or_insert_methodref("java/lang/Thread", "sleep", "(J)V");
        let name_index = pool.get_or_insert_utf8("go");
        let descriptor_index = pool.get_or_insert_utf8("()V");
        let mut code = vec![op::LCONST_0, op::INVOKESTATIC, 0, 0, op::RETURN];
        code[2..4].copy_from_slice(&method_ref.to_be_bytes());
        let mut method = RawMethod { access_flags: 0x0001, name_index, descriptor_index, attributes: Vec::new() };
        method.set_code(
            &CodeAttribute { max_stack: 2, max_locals: 1, code, exception_table: Vec::new(), other_attributes: Vec::new() },
            &mut pool,
        );
        RawClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::<RawField>::new(),
            methods: vec![method],
            attributes: Vec::new(),
        }
    }

    #[test]
    fn replaces_call_site_with_static_wrapper() {
        let mut class = class_with_sleep_call();
        let wrapper = Hook::new("com/example/Hooks", "sleepReplacement", "void", ["long".to_string()]);
        let script = ReplaceMethodCallScript::builder()
            .enclosing_target(MethodTarget::any_overload("com.example.Target", "go"))
            .inner_call(MethodTarget::exact("java.lang.Thread", "sleep", "void", ["long".to_string()]))
            .wrapper(wrapper, HookDelivery::Call)
            .build()
            .unwrap();

        let locator = ClasspathHookLocator::new(Vec::new());
        assert!(script.apply(&mut class, &locator).unwrap());

        let code = class.methods[0].code(&class.constant_pool).unwrap().unwrap();
        let calls = ir::scan_calls(&code.code, &class.constant_pool).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].owner, "com/example/Hooks");
        assert_eq!(calls[0].name, "sleepReplacement");
    }

    #[test]
    fn rejects_insert_delivery() {
        let wrapper = Hook::new("com/example/Hooks", "sleepReplacement", "void", ["long".to_string()]);
        let result = ReplaceMethodCallScript::builder()
            .enclosing_target(MethodTarget::any_overload("com.example.Target", "go"))
            .inner_call(MethodTarget::exact("java.lang.Thread", "sleep", "void", ["long".to_string()]))
            .wrapper(wrapper, HookDelivery::Insert)
            .build();
        assert!(result.is_err());
    }
}
