//! `WrapMethodCall` — §4.5.4. Wraps every inner call site matching a
//! target with a hook invoked right after the original call returns,
//! optionally observing its tentative return value.

use crate::classfile::RawClassFile;
use crate::codepatch::{self, Splice};
use crate::error::PatchError;
use crate::hook::Hook;
use crate::ir;
use crate::logistics::{self, MethodLogistics};
use crate::rewrite::delivery::{HookDelivery, emit_hook_invocation};
use crate::target::{MethodTarget, StackRequest, canonical_order};
use crate::transplant::HookLocator;

#[derive(Clone, Debug)]
pub struct WrapMethodCallScript {
    enclosing_target: MethodTarget,
    inner_call: MethodTarget,
    hook: Hook,
    delivery: HookDelivery,
    stack_requests: Vec<StackRequest>,
    leave_return_value_intact: bool,
    reload_classes: Vec<String>,
}

impl WrapMethodCallScript {
    pub fn builder() -> WrapMethodCallScriptBuilder {
        WrapMethodCallScriptBuilder::default()
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

            let call_return = crate::descriptor::decompose_method_descriptor(&calls[0].descriptor)?.return_type;
            let tmp_slot = logistics.first_local_slot;
            let mut splices = Vec::new();
            let mut extra_locals = logistics::slot_size_of_descriptor(&call_return).max(1) as u16;

            for call in &calls {
                let mut epilogue = Vec::new();
                let call_return_size = logistics::slot_size_of_descriptor(&call_return);
                if call_return_size > 0 {
                    if self.leave_return_value_intact {
                        logistics::dup_for_descriptor(&mut epilogue, &call_return);
                    }
                    logistics::emit_store_local(&mut epilogue, &call_return, tmp_slot);
                }

                for request in &self.stack_requests {
                    match request {
                        StackRequest::ReturnValue => {
                            if call_return_size == 0 {
                                return Err(PatchError::InvalidConfiguration(
                                    "WrapMethodCall cannot request RETURN_VALUE on a void inner call".into(),
                                ));
                            }
                            logistics::emit_load_local(&mut epilogue, &call_return, tmp_slot);
                        }
                        StackRequest::This => logistics.emit_load_this(&mut epilogue),
                        StackRequest::Param(n) => logistics.emit_load_param(&mut epilogue, (*n - 1) as usize)?,
                    }
                }

                let hook_locals = emit_hook_invocation(
                    &mut epilogue,
                    class,
                    &self.hook,
                    self.delivery,
                    locator,
                    tmp_slot + (logistics::slot_size_of_descriptor(&call_return) as u16).max(1),
                )?;
                extra_locals = extra_locals.max((logistics::slot_size_of_descriptor(&call_return) as u16).max(1) + hook_locals);
                if self.hook.return_type != "void" {
                    logistics::pop_for_descriptor(&mut epilogue, &crate::descriptor::to_internal_type(&self.hook.return_type));
                }

                splices.push(Splice::insert(call.offset + call.length as u32, epilogue));
            }

            let extra_stack = (logistics::slot_size_of_descriptor(&call_return) as u16).max(1) + 2;
            codepatch::apply_splices(&mut code, splices, extra_stack, extra_locals).map_err(|e| {
                PatchError::TransformFailure { script: "WrapMethodCall".to_string(), class_name: this_name.clone(), source: e }
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
pub struct WrapMethodCallScriptBuilder {
    enclosing_target: Option<MethodTarget>,
    inner_call: Option<MethodTarget>,
    hook: Option<Hook>,
    delivery: Option<HookDelivery>,
    stack_requests: Vec<StackRequest>,
    leave_return_value_intact: bool,
    reload_classes: Vec<String>,
}

impl WrapMethodCallScriptBuilder {
    pub fn enclosing_target(mut self, target: MethodTarget) -> Self {
        self.enclosing_target = Some(target);
        self
    }

    pub fn inner_call(mut self, target: MethodTarget) -> Self {
        self.inner_call = Some(target);
        self
    }

    pub fn hook(mut self, hook: Hook, delivery: HookDelivery) -> Self {
        self.hook = Some(hook);
        self.delivery = Some(delivery);
        self
    }

    pub fn stack_requests(mut self, requests: impl IntoIterator<Item = StackRequest>) -> Self {
        self.stack_requests = canonical_order(requests.into_iter().collect());
        self
    }

    pub fn leave_return_value_intact(mut self, value: bool) -> Self {
        self.leave_return_value_intact = value;
        self
    }

    pub fn reload_classes(mut self, classes: impl IntoIterator<Item = String>) -> Self {
        self.reload_classes = classes.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<WrapMethodCallScript, PatchError> {
        let enclosing_target = self
            .enclosing_target
            .ok_or_else(|| PatchError::InvalidConfiguration("WrapMethodCall requires an enclosing target".into()))?;
        let inner_call = self
            .inner_call
            .ok_or_else(|| PatchError::InvalidConfiguration("WrapMethodCall requires an inner call target".into()))?;
        let hook = self
            .hook
            .ok_or_else(|| PatchError::InvalidConfiguration("WrapMethodCall requires a hook".into()))?;
        Ok(WrapMethodCallScript {
            enclosing_target,
            inner_call,
            hook,
            delivery: self.delivery.unwrap_or(HookDelivery::Call),
            stack_requests: self.stack_requests,
            leave_return_value_intact: self.leave_return_value_intact,
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
            &CodeAttribute { max_stack: 3, max_locals: 1, code, exception_table: Vec::new(), other_attributes: Vec::new() },
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
    fn wraps_every_matching_call_site() {
        let mut class = class_with_sleep_call();
        let hook = Hook::new("com/example/Hooks", "afterSleep", "void", []);
        let script = WrapMethodCallScript::builder()
            .enclosing_target(MethodTarget::any_overload("com.example.Target", "go"))
            .inner_call(MethodTarget::exact("java.lang.Thread", "sleep", "void", ["long".to_string()]))
            .hook(hook, HookDelivery::Call)
            .build()
            .unwrap();

        let locator = ClasspathHookLocator::new(Vec::new());
        assert!(script.apply(&mut class, &locator).unwrap());
        let code = class.methods[0].code(&class.constant_pool).unwrap().unwrap();
        assert!(code.code.len() > 5);
    }
}
