//! `WrapReturnValues` — §4.5.3. Intercepts every return point of a matched
//! method with a hook call that may observe, and optionally replace, the
//! tentative return value.

use crate::classfile::RawClassFile;
use crate::codepatch::{self, Splice};
use crate::error::PatchError;
use crate::hook::Hook;
use crate::logistics::{self, MethodLogistics};
use crate::opcodes;
use crate::rewrite::delivery::{HookDelivery, emit_hook_invocation};
use crate::scan;
use crate::target::{MethodTarget, StackRequest, canonical_order};
use crate::transplant::HookLocator;

#[derive(Clone, Debug)]
pub struct WrapReturnValuesScript {
    target: MethodTarget,
    hook: Hook,
    delivery: HookDelivery,
    stack_requests: Vec<StackRequest>,
    hijack: bool,
    cast_to: Option<String>,
    reload_classes: Vec<String>,
}

impl WrapReturnValuesScript {
    pub fn builder() -> WrapReturnValuesScriptBuilder {
        WrapReturnValuesScriptBuilder::default()
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
            if !self.target.matches(&this_name, &name, &descriptor)? {
                continue;
            }
            if self.hijack {
                let return_type = crate::descriptor::decompose_method_descriptor(&descriptor)?.return_type;
                if logistics::return_opcode_for(&return_type) != logistics::return_opcode_for(&crate::descriptor::to_internal_type(&self.hook.return_type)) {
                    return Err(PatchError::InvalidConfiguration(format!(
                        "WrapReturnValues hook return type {} is not value-compatible with {name}{descriptor}",
                        self.hook.return_type
                    )));
                }
            }

            let logistics = MethodLogistics::compute(access_flags, &descriptor)?;
            let mut code = class.methods[method_index]
                .code(&class.constant_pool)
                .map_err(config_err)?
                .ok_or_else(|| PatchError::InvalidConfiguration(format!("{name}{descriptor} has no Code attribute")))?;

            let return_sites: Vec<u32> = scan::decode_instructions(&code.code)
                .map_err(config_err)?
                .into_iter()
                .filter(|instruction| opcodes::is_return(instruction.opcode) && instruction.opcode == logistics.return_opcode)
                .map(|instruction| instruction.offset)
                .collect();
            if return_sites.is_empty() {
                continue;
            }

            let tmp_slot = logistics.first_local_slot;
            let mut splices = Vec::new();
            let mut extra_locals = (logistics.return_size as u16).max(1);

            for offset in return_sites {
                let mut prologue = Vec::new();
                if logistics.return_size > 0 {
                    logistics::emit_store_local(&mut prologue, &logistics.return_descriptor, tmp_slot);
                }

                for request in &self.stack_requests {
                    match request {
                        StackRequest::ReturnValue => {
                            if logistics.return_size == 0 {
                                return Err(PatchError::InvalidConfiguration(
                                    "WrapReturnValues cannot request RETURN_VALUE on a void method".into(),
                                ));
                            }
                            logistics::emit_load_local(&mut prologue, &logistics.return_descriptor, tmp_slot);
                        }
                        StackRequest::This => logistics.emit_load_this(&mut prologue),
                        StackRequest::Param(n) => logistics.emit_load_param(&mut prologue, (*n - 1) as usize)?,
                    }
                }

                let hook_locals =
                    emit_hook_invocation(&mut prologue, class, &self.hook, self.delivery, locator, tmp_slot + (logistics.return_size as u16).max(1))?;
                extra_locals = extra_locals.max((logistics.return_size as u16).max(1) + hook_locals);

                if self.hijack {
                    if let Some(cast_to) = &self.cast_to {
                        let internal = crate::descriptor::to_internal_type(cast_to);
                        if let Some(class_name) = internal.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
                            let index = class.constant_pool.get_or_insert_class(class_name);
                            prologue.push(opcodes::CHECKCAST);
                            prologue.extend_from_slice(&index.to_be_bytes());
                        }
                    }
                } else if self.hook.return_type != "void" {
                    logistics::pop_for_descriptor(&mut prologue, &crate::descriptor::to_internal_type(&self.hook.return_type));
                    if logistics.return_size > 0 {
                        logistics::emit_load_local(&mut prologue, &logistics.return_descriptor, tmp_slot);
                    }
                } else if logistics.return_size > 0 {
                    logistics::emit_load_local(&mut prologue, &logistics.return_descriptor, tmp_slot);
                }

                splices.push(Splice::insert(offset, prologue));
            }

            let extra_stack = (logistics.return_size as u16).max(1) + 2;
            codepatch::apply_splices(&mut code, splices, extra_stack, extra_locals).map_err(|e| {
                PatchError::TransformFailure { script: "WrapReturnValues".to_string(), class_name: this_name.clone(), source: e }
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
pub struct WrapReturnValuesScriptBuilder {
    target: Option<MethodTarget>,
    hook: Option<Hook>,
    delivery: Option<HookDelivery>,
    stack_requests: Vec<StackRequest>,
    hijack: bool,
    cast_to: Option<String>,
    reload_classes: Vec<String>,
}

impl WrapReturnValuesScriptBuilder {
    pub fn target(mut self, target: MethodTarget) -> Self {
        self.target = Some(target);
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

    pub fn hijack(mut self, value: bool) -> Self {
        self.hijack = value;
        self
    }

    pub fn cast_to(mut self, human_type: impl Into<String>) -> Self {
        self.cast_to = Some(human_type.into());
        self
    }

    pub fn reload_classes(mut self, classes: impl IntoIterator<Item = String>) -> Self {
        self.reload_classes = classes.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<WrapReturnValuesScript, PatchError> {
        let target = self
            .target
            .ok_or_else(|| PatchError::InvalidConfiguration("WrapReturnValues requires a target".into()))?;
        let hook = self
            .hook
            .ok_or_else(|| PatchError::InvalidConfiguration("WrapReturnValues requires a hook".into()))?;
        if self.cast_to.is_some() && !self.hijack {
            return Err(PatchError::InvalidConfiguration(
                "WrapReturnValues: cast_to only makes sense when hijack is set".into(),
            ));
        }
        Ok(WrapReturnValuesScript {
            target,
            hook,
            delivery: self.delivery.unwrap_or(HookDelivery::Call),
            stack_requests: self.stack_requests,
            hijack: self.hijack,
            cast_to: self.cast_to,
            reload_classes: self.reload_classes,
        })
    }
}
