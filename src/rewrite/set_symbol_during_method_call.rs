//! `SetSymbolDuringMethodCall` — §4.5.6. Wraps every call to a designated
//! inner method with a push/pop pair on the thread-local symbol stack
//! (§4.8), generating one synthetic wrapper per distinct call shape and
//! replacing the original call sites with an `INVOKESTATIC` to it.

use std::collections::HashMap;

use crate::classfile::{CodeAttribute, ConstantPoolEntry, ExceptionTableEntry, RawAttribute, RawMethod};
use crate::codepatch::{self, Splice};
use crate::descriptor::decompose_method_descriptor;
use crate::error::PatchError;
use crate::ir::{self, CallKind};
use crate::logistics::{self, MethodLogistics};
use crate::opcodes;
use crate::target::MethodTarget;

const ACC_STATIC: u16 = 0x0008;
const ACC_PRIVATE: u16 = 0x0002;
const ACC_SYNTHETIC: u16 = 0x1000;

/// The class hosting the process-wide symbol stack's static operations —
/// `push(String)V` / `pop()V` — that the synthetic wrapper calls into.
/// Overridable since a host may ship its own copy on a different package.
const DEFAULT_SYMBOLS_OWNER: &str = "classgraft/runtime/Symbols";

#[derive(Clone, Debug)]
pub struct SetSymbolDuringMethodCallScript {
    enclosing_target: MethodTarget,
    inner_call: MethodTarget,
    symbol: String,
    symbols_owner: String,
    reload_classes: Vec<String>,
}

impl SetSymbolDuringMethodCallScript {
    pub fn builder() -> SetSymbolDuringMethodCallScriptBuilder {
        SetSymbolDuringMethodCallScriptBuilder::default()
    }

    pub(crate) fn reload_classes(&self) -> &[String] {
        &self.reload_classes
    }

    pub(crate) fn apply(&self, class: &mut crate::classfile::RawClassFile) -> Result<bool, PatchError> {
        let this_name = class.this_class_name().map_err(config_err)?.to_string();
        let mut changed = false;
        let mut wrappers: HashMap<(CallKind, String, String, String), String> = HashMap::new();

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

            let mut splices = Vec::new();
            for call in &calls {
                let shape = (call.kind, call.owner.clone(), call.name.clone(), call.descriptor.clone());
                let wrapper_name = if let Some(existing) = wrappers.get(&shape) {
                    existing.clone()
                } else {
                    let synthetic_name = format!("classgraft$symbol${}", wrappers.len());
                    let wrapper_method = build_wrapper_method(
                        class,
                        call.kind,
                        &call.owner,
                        &call.name,
                        &call.descriptor,
                        &synthetic_name,
                        &self.symbol,
                        &self.symbols_owner,
                    )?;
                    class.methods.push(wrapper_method);
                    wrappers.insert(shape, synthetic_name.clone());
                    synthetic_name
                };

                let wrapper_index =
                    class.constant_pool.get_or_insert_methodref(&this_name, &wrapper_name, &call.descriptor);
                let mut replacement = vec![opcodes::INVOKESTATIC];
                replacement.extend_from_slice(&wrapper_index.to_be_bytes());
                splices.push(Splice::replace(call.offset, call.length as u32, replacement));
            }

            codepatch::apply_splices(&mut code, splices, 0, 0).map_err(|e| PatchError::TransformFailure {
                script: "SetSymbolDuringMethodCall".to_string(),
                class_name: this_name.clone(),
                source: e,
            })?;
            class.methods[method_index].set_code(&code, &mut class.constant_pool);
            changed = true;
        }
        Ok(changed)
    }
}

/// Builds the synthetic `(opcode, owner, name, descriptor)`-shaped wrapper
/// method described in §4.5.6.
fn build_wrapper_method(
    class: &mut crate::classfile::RawClassFile,
    kind: CallKind,
    owner: &str,
    inner_name: &str,
    inner_descriptor: &str,
    wrapper_name: &str,
    symbol: &str,
    symbols_owner: &str,
) -> Result<RawMethod, PatchError> {
    let is_instance = kind != CallKind::Static;
    let decomposed = decompose_method_descriptor(inner_descriptor)?;

    let wrapper_descriptor = if is_instance {
        format!("(L{};{}){}", owner, decomposed.parameter_types.join(""), decomposed.return_type)
    } else {
        inner_descriptor.to_string()
    };

    let logistics = MethodLogistics::compute(ACC_STATIC, &wrapper_descriptor)?;

    let mut body = Vec::new();
    let symbol_index = class.constant_pool.get_or_insert_string(symbol);
    emit_ldc(&mut body, symbol_index);
    let push_index = class.constant_pool.get_or_insert_methodref(symbols_owner, "push", "(Ljava/lang/String;)V");
    body.push(opcodes::INVOKESTATIC);
    body.extend_from_slice(&push_index.to_be_bytes());

    let mut slot = 0u16;
    if is_instance {
        logistics::emit_load_local(&mut body, &format!("L{owner};"), slot);
        slot += 1;
    }
    for param in &decomposed.parameter_types {
        logistics::emit_load_local(&mut body, param, slot);
        slot += logistics::slot_size_of_descriptor(param) as u16;
    }

    let inner_index = match kind {
        CallKind::Interface => {
            let class_index = class.constant_pool.get_or_insert_class(owner);
            let name_and_type_index = class.constant_pool.get_or_insert_name_and_type(inner_name, inner_descriptor);
            class
                .constant_pool
                .get_or_insert_literal(ConstantPoolEntry::InterfaceMethodref { class_index, name_and_type_index })
        }
        _ => class.constant_pool.get_or_insert_methodref(owner, inner_name, inner_descriptor),
    };
    body.push(kind.opcode());
    body.extend_from_slice(&inner_index.to_be_bytes());
    if kind == CallKind::Interface {
        let arg_words: u16 = 1 + decomposed.parameter_types.iter().map(|p| logistics::slot_size_of_descriptor(p) as u16).sum::<u16>();
        body.push(arg_words as u8);
        body.push(0);
    }
    let try_end = body.len() as u16;

    let pop_index = class.constant_pool.get_or_insert_methodref(symbols_owner, "pop", "()V");
    body.push(opcodes::INVOKESTATIC);
    body.extend_from_slice(&pop_index.to_be_bytes());
    body.push(logistics::return_opcode_for(&decomposed.return_type));

    let handler_pc = body.len() as u16;
    body.push(opcodes::INVOKESTATIC);
    body.extend_from_slice(&pop_index.to_be_bytes());
    body.push(opcodes::ATHROW);

    let name_index = class.constant_pool.get_or_insert_utf8(wrapper_name);
    let descriptor_index = class.constant_pool.get_or_insert_utf8(&wrapper_descriptor);
    let mut method = RawMethod {
        access_flags: ACC_STATIC | ACC_PRIVATE | ACC_SYNTHETIC,
        name_index,
        descriptor_index,
        attributes: Vec::<RawAttribute>::new(),
    };

    let return_size = logistics::slot_size_of_descriptor(&decomposed.return_type);
    let max_stack = (logistics.first_local_slot + return_size as u16 + 2).max(3);
    method.set_code(
        &CodeAttribute {
            max_stack,
            max_locals: logistics.first_local_slot,
            code: body,
            exception_table: vec![ExceptionTableEntry { start_pc: 0, end_pc: try_end, handler_pc, catch_type: 0 }],
            other_attributes: Vec::new(),
        },
        &mut class.constant_pool,
    );
    Ok(method)
}

fn emit_ldc(out: &mut Vec<u8>, index: u16) {
    if index <= u8::MAX as u16 {
        out.push(opcodes::LDC);
        out.push(index as u8);
    } else {
        out.push(opcodes::LDC_W);
        out.extend_from_slice(&index.to_be_bytes());
    }
}

fn config_err(source: anyhow::Error) -> PatchError {
    PatchError::InvalidConfiguration(source.to_string())
}

#[derive(Default)]
pub struct SetSymbolDuringMethodCallScriptBuilder {
    enclosing_target: Option<MethodTarget>,
    inner_call: Option<MethodTarget>,
    symbol: Option<String>,
    symbols_owner: Option<String>,
    reload_classes: Vec<String>,
}

impl SetSymbolDuringMethodCallScriptBuilder {
    pub fn enclosing_target(mut self, target: MethodTarget) -> Self {
        self.enclosing_target = Some(target);
        self
    }

    pub fn inner_call(mut self, target: MethodTarget) -> Self {
        self.inner_call = Some(target);
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn symbols_owner(mut self, owner_internal_name: impl Into<String>) -> Self {
        self.symbols_owner = Some(owner_internal_name.into());
        self
    }

    pub fn reload_classes(mut self, classes: impl IntoIterator<Item = String>) -> Self {
        self.reload_classes = classes.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<SetSymbolDuringMethodCallScript, PatchError> {
        let enclosing_target = self.enclosing_target.ok_or_else(|| {
            PatchError::InvalidConfiguration("SetSymbolDuringMethodCall requires an enclosing target".into())
        })?;
        let inner_call = self
            .inner_call
            .ok_or_else(|| PatchError::InvalidConfiguration("SetSymbolDuringMethodCall requires an inner call target".into()))?;
        let symbol = self
            .symbol
            .ok_or_else(|| PatchError::InvalidConfiguration("SetSymbolDuringMethodCall requires a symbol".into()))?;
        Ok(SetSymbolDuringMethodCallScript {
            enclosing_target,
            inner_call,
            symbol,
            symbols_owner: self.symbols_owner.unwrap_or_else(|| DEFAULT_SYMBOLS_OWNER.to_string()),
            reload_classes: self.reload_classes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{ConstantPool, RawClassFile, RawField};
    use crate::opcodes as op;

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

    /// `void aMethod() { cMethod(); bMethod(); }`, wrapping only the
    /// `bMethod()` call site — the literal scenario from §4.5.6/S8: the
    /// `cMethod()` call must stay a direct `INVOKESTATIC` to `cMethod`
    /// untouched, while `bMethod()` is rewritten to call a synthetic
    /// wrapper that pushes the symbol, invokes `bMethod`, and pops the
    /// symbol again (or pops-and-rethrows on the handler edge) — so a host
    /// watching `classgraft::symbols` sees the symbol present only for the
    /// duration of the `bMethod` call, not the `cMethod` call.
    #[test]
    fn only_the_targeted_call_site_is_rewritten_and_wrapped() {
        let mut pool = ConstantPool::default();
        let this_class = pool.get_or_insert_class("com/example/Target");
        let super_class = pool.get_or_insert_class("java/lang/Object");
        let c_method_ref = pool.get_or_insert_methodref("com/example/Target", "cMethod", "()V");
        let b_method_ref = pool.get_or_insert_methodref("com/example/Target", "bMethod", "()V");
        let a_name_index = pool.get_or_insert_utf8("aMethod");
        let void_descriptor_index = pool.get_or_insert_utf8("()V");

        let mut a_code = vec![op::INVOKESTATIC, 0, 0, op::INVOKESTATIC, 0, 0, op::RETURN];
        a_code[1..3].copy_from_slice(&c_method_ref.to_be_bytes());
        a_code[4..6].copy_from_slice(&b_method_ref.to_be_bytes());
        let mut a_method = RawMethod { access_flags: 0x0009, name_index: a_name_index, descriptor_index: void_descriptor_index, attributes: Vec::new() };
        a_method.set_code(
            &CodeAttribute { max_stack: 0, max_locals: 0, code: a_code, exception_table: Vec::new(), other_attributes: Vec::new() },
            &mut pool,
        );

        let c_name_index = pool.get_or_insert_utf8("cMethod");
        let mut c_method = RawMethod { access_flags: 0x0009, name_index: c_name_index, descriptor_index: void_descriptor_index, attributes: Vec::new() };
        c_method.set_code(
            &CodeAttribute { max_stack: 0, max_locals: 0, code: vec![op::RETURN], exception_table: Vec::new(), other_attributes: Vec::new() },
            &mut pool,
        );

        let b_name_index = pool.get_or_insert_utf8("bMethod");
        let mut b_method = RawMethod { access_flags: 0x0009, name_index: b_name_index, descriptor_index: void_descriptor_index, attributes: Vec::new() };
        b_method.set_code(
            &CodeAttribute { max_stack: 0, max_locals: 0, code: vec![op::RETURN], exception_table: Vec::new(), other_attributes: Vec::new() },
            &mut pool,
        );

        let mut class = RawClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::<RawField>::new(),
            methods: vec![a_method, c_method, b_method],
            attributes: Vec::new(),
        };

        let script = SetSymbolDuringMethodCallScript::builder()
            .enclosing_target(MethodTarget::any_overload("com.example.Target", "aMethod"))
            .inner_call(MethodTarget::exact("com.example.Target", "bMethod", "void", Vec::<String>::new()))
            .symbol("Foobar")
            .build()
            .unwrap();

        assert!(script.apply(&mut class).unwrap());
        assert_eq!(class.methods.len(), 4, "exactly one synthetic wrapper must be generated, for bMethod only");

        let a_code = class.methods[0].code(&class.constant_pool).unwrap().unwrap();
        let calls = ir::scan_calls(&a_code.code, &class.constant_pool).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].owner.as_str(), calls[0].name.as_str()), ("com/example/Target", "cMethod"), "cMethod's call site must stay untouched");
        assert_ne!(calls[1].name, "bMethod", "bMethod's call site must be redirected to the synthetic wrapper, not call bMethod directly");

        let wrapper = &class.methods[3];
        assert_eq!(wrapper.access_flags, ACC_STATIC | ACC_PRIVATE | ACC_SYNTHETIC);
        let wrapper_code = wrapper.code(&class.constant_pool).unwrap().unwrap();
        let wrapper_calls = ir::scan_calls(&wrapper_code.code, &class.constant_pool).unwrap();
        let push_calls: Vec<_> = wrapper_calls.iter().filter(|c| c.name == "push").collect();
        let pop_calls: Vec<_> = wrapper_calls.iter().filter(|c| c.name == "pop").collect();
        let inner_calls: Vec<_> = wrapper_calls.iter().filter(|c| c.name == "bMethod").collect();
        assert_eq!(push_calls.len(), 1, "the symbol must be pushed exactly once, before the wrapped call");
        assert_eq!(inner_calls.len(), 1, "the wrapper must forward to bMethod exactly once");
        assert_eq!(pop_calls.len(), 2, "the symbol must be popped on both the normal-return and the handler edge");
        assert!(
            push_calls[0].offset < inner_calls[0].offset,
            "push must happen before the wrapped bMethod call, brokering Symbols.hasSymbol/hasTail for the duration of that call only"
        );
        assert_eq!(*wrapper_code.code.last().unwrap(), op::ATHROW, "the handler edge must rethrow after popping");
    }

    #[test]
    fn generates_one_synthetic_wrapper_and_rewrites_the_call_site() {
        let mut class = class_with_sleep_call();
        let script = SetSymbolDuringMethodCallScript::builder()
            .enclosing_target(MethodTarget::any_overload("com.example.Target", "go"))
            .inner_call(MethodTarget::exact("java.lang.Thread", "sleep", "void", ["long".to_string()]))
            .symbol("Foobar")
            .build()
            .unwrap();

        assert!(script.apply(&mut class).unwrap());
        assert_eq!(class.methods.len(), 2);

        let wrapper = &class.methods[1];
        assert_eq!(wrapper.access_flags, ACC_STATIC | ACC_PRIVATE | ACC_SYNTHETIC);
        let wrapper_code = wrapper.code(&class.constant_pool).unwrap().unwrap();
        assert_eq!(wrapper_code.exception_table.len(), 1);
        assert_eq!(*wrapper_code.code.last().unwrap(), op::ATHROW);

        let outer_code = class.methods[0].code(&class.constant_pool).unwrap().unwrap();
        let calls = ir::scan_calls(&outer_code.code, &class.constant_pool).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].owner, "com/example/Target");
    }
}
