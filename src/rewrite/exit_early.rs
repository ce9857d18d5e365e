//! `ExitEarly` — §4.5.2. Prepends a decision/value hook pair that may
//! return from a matched method before its original body runs.

use crate::classfile::RawClassFile;
use crate::codepatch::{self, Splice};
use crate::error::PatchError;
use crate::hook::Hook;
use crate::logistics::MethodLogistics;
use crate::opcodes;
use crate::rewrite::delivery::{HookDelivery, emit_hook_invocation};
use crate::target::{MethodTarget, StackRequest, canonical_order};
use crate::transplant::HookLocator;

#[derive(Clone, Debug)]
pub struct ExitEarlyScript {
    target: MethodTarget,
    decision_hook: Option<Hook>,
    decision_delivery: HookDelivery,
    value_hook: Option<Hook>,
    value_delivery: HookDelivery,
    stack_requests: Vec<StackRequest>,
    reload_classes: Vec<String>,
}

impl ExitEarlyScript {
    pub fn builder() -> ExitEarlyScriptBuilder {
        ExitEarlyScriptBuilder::default()
    }

    pub(crate) fn reload_classes(&self) -> &[String] {
        &self.reload_classes
    }

    /// `true` once the decision hook is known to return `void`
    /// ("insertCallOnly" — the hook runs but the method never actually
    /// exits early).
    fn insert_call_only(&self) -> bool {
        self.decision_hook.as_ref().is_some_and(|h| h.return_type == "void")
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

            let decomposed = crate::descriptor::decompose_method_descriptor(&descriptor)?;
            let returns_void = decomposed.return_type == "V";
            if returns_void && self.value_hook.is_some() {
                return Err(PatchError::InvalidConfiguration(format!(
                    "ExitEarly value hook configured for void-returning method {name}{descriptor}"
                )));
            }
            if !returns_void && self.value_hook.is_none() && !self.insert_call_only() {
                return Err(PatchError::InvalidConfiguration(format!(
                    "ExitEarly requires a value hook for non-void method {name}{descriptor}"
                )));
            }

            let logistics = MethodLogistics::compute(access_flags, &descriptor)?;
            let mut prologue = Vec::new();
            let mut extra_locals = 0u16;

            emit_requested_args(&mut prologue, &logistics, &self.stack_requests)?;

            let mut branch_patch_index = None;
            if let Some(decision_hook) = &self.decision_hook {
                extra_locals += emit_hook_invocation(
                    &mut prologue,
                    class,
                    decision_hook,
                    self.decision_delivery,
                    locator,
                    logistics.first_local_slot + extra_locals,
                )?;
                if !self.insert_call_only() {
                    prologue.push(opcodes::IFEQ);
                    branch_patch_index = Some(prologue.len());
                    prologue.extend_from_slice(&[0, 0]);
                }
            }

            if !self.insert_call_only() {
                emit_requested_args(&mut prologue, &logistics, &self.stack_requests)?;
                if let Some(value_hook) = &self.value_hook {
                    extra_locals += emit_hook_invocation(
                        &mut prologue,
                        class,
                        value_hook,
                        self.value_delivery,
                        locator,
                        logistics.first_local_slot + extra_locals,
                    )?;
                }
                logistics.emit_return(&mut prologue);
            }

            if let Some(patch_index) = branch_patch_index {
                let target = prologue.len() as i16;
                let from = (patch_index - 1) as i16;
                let delta = target - from;
                prologue[patch_index..patch_index + 2].copy_from_slice(&delta.to_be_bytes());
            }

            let mut code = class.methods[method_index]
                .code(&class.constant_pool)
                .map_err(config_err)?
                .ok_or_else(|| PatchError::InvalidConfiguration(format!("{name}{descriptor} has no Code attribute")))?;

            let extra_stack = logistics.params.iter().map(|p| p.size as u16).max().unwrap_or(0).max(1);
            codepatch::apply_splices(&mut code, vec![Splice::insert(0, prologue)], extra_stack, extra_locals)
                .map_err(|e| PatchError::TransformFailure {
                    script: "ExitEarly".to_string(),
                    class_name: this_name.clone(),
                    source: e,
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

fn emit_requested_args(
    out: &mut Vec<u8>,
    logistics: &MethodLogistics,
    requests: &[StackRequest],
) -> Result<(), PatchError> {
    for request in requests {
        match request {
            StackRequest::ReturnValue => {
                return Err(PatchError::InvalidConfiguration(
                    "ExitEarly does not permit a RETURN_VALUE stack request".into(),
                ));
            }
            StackRequest::This => logistics.emit_load_this(out),
            StackRequest::Param(n) => logistics.emit_load_param(out, (*n - 1) as usize)?,
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct ExitEarlyScriptBuilder {
    target: Option<MethodTarget>,
    decision_hook: Option<Hook>,
    decision_delivery: Option<HookDelivery>,
    value_hook: Option<Hook>,
    value_delivery: Option<HookDelivery>,
    stack_requests: Vec<StackRequest>,
    reload_classes: Vec<String>,
}

impl ExitEarlyScriptBuilder {
    pub fn target(mut self, target: MethodTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn decision_hook(mut self, hook: Hook, delivery: HookDelivery) -> Self {
        self.decision_hook = Some(hook);
        self.decision_delivery = Some(delivery);
        self
    }

    pub fn value_hook(mut self, hook: Hook, delivery: HookDelivery) -> Self {
        self.value_hook = Some(hook);
        self.value_delivery = Some(delivery);
        self
    }

    pub fn stack_requests(mut self, requests: impl IntoIterator<Item = StackRequest>) -> Self {
        self.stack_requests = canonical_order(requests.into_iter().collect());
        self
    }

    pub fn reload_classes(mut self, classes: impl IntoIterator<Item = String>) -> Self {
        self.reload_classes = classes.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<ExitEarlyScript, PatchError> {
        let target = self
            .target
            .ok_or_else(|| PatchError::InvalidConfiguration("ExitEarly requires a target".into()))?;
        if self.stack_requests.contains(&StackRequest::ReturnValue) {
            return Err(PatchError::InvalidConfiguration(
                "ExitEarly does not permit a RETURN_VALUE stack request".into(),
            ));
        }
        if let (Some(decision), Some(value)) = (&self.decision_hook, &self.value_hook) {
            if decision.return_type == "void" {
                return Err(PatchError::InvalidConfiguration(
                    "ExitEarly: a void (insertCallOnly) decision hook cannot be combined with a value hook".into(),
                ));
            }
            let _ = value;
        }
        if let Some(signature) = &target.signature {
            let returns_void = signature.return_type == "void";
            if returns_void && self.value_hook.is_some() {
                return Err(PatchError::InvalidConfiguration(
                    "ExitEarly value hook configured for a target known to return void".into(),
                ));
            }
        }

        Ok(ExitEarlyScript {
            target,
            decision_hook: self.decision_hook,
            decision_delivery: self.decision_delivery.unwrap_or(HookDelivery::Call),
            value_hook: self.value_hook,
            value_delivery: self.value_delivery.unwrap_or(HookDelivery::Call),
            stack_requests: self.stack_requests,
            reload_classes: self.reload_classes,
        })
    }
}
