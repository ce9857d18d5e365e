//! `ScriptManager` — §4.7: the single entry point a host's class-loading
//! hook calls for every class it sees. Owns the ordered script list, the
//! witness-gated activations layered on top of it, and the `Filter`/
//! `Reloader` collaborators a host wires in.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::classfile::RawClassFile;
use crate::error::PatchError;
use crate::host::{AcceptAll, Filter, NoReload, Reloader, debug_dump};
use crate::rewrite::PatchScript;
use crate::transplant::HookLocator;
use crate::witness::{WitnessAction, WitnessEffect};

/// Applies an ordered list of [`PatchScript`]s, gated by an optional
/// [`Filter`] and activated/deactivated by [`WitnessAction`]s, to every
/// class a host offers it.
pub struct ScriptManager {
    scripts: Vec<PatchScript>,
    witnesses: Vec<WitnessAction>,
    filter: Box<dyn Filter>,
    locator: Box<dyn HookLocator>,
    reloader: Box<dyn Reloader>,
    debug_dump_dir: Option<PathBuf>,
}

impl ScriptManager {
    pub fn builder() -> ScriptManagerBuilder {
        ScriptManagerBuilder::default()
    }

    /// Offers one loaded (or being-redefined) class to the manager.
    /// Returns the rewritten bytes, or `None` if the filter rejected the
    /// class, no script changed anything, or the class failed to parse.
    ///
    /// Witness observation happens before scripts run, in case this very
    /// class load is what activates one of them — §4.7's ordering: a
    /// witness that fires on class `X` can itself patch `X`.
    pub fn transform(
        &mut self,
        loader: Option<&str>,
        class_name: &str,
        class_being_redefined: bool,
        bytes: &[u8],
    ) -> Option<Vec<u8>> {
        if !self.filter.should_transform(loader, class_name, class_being_redefined, bytes) {
            return None;
        }

        for witness in &mut self.witnesses {
            match witness.observe(class_name) {
                Some(WitnessEffect::AddScriptIfWitness) => self.scripts.push(witness.script().clone()),
                Some(WitnessEffect::RemoveScriptIfWitness) => {
                    let name = witness.script().name();
                    if let Some(position) = self.scripts.iter().position(|s| s.name() == name) {
                        self.scripts.remove(position);
                    }
                }
                None => {}
            }
        }

        let mut class = match RawClassFile::parse(bytes) {
            Ok(class) => class,
            Err(source) => {
                tracing::error!(class = %class_name, error = %source, "could not decode class bytes, leaving class unmodified");
                return None;
            }
        };

        let mut changed = false;
        for script in &self.scripts {
            let span = tracing::debug_span!("script.apply", script = %script.name(), class = %class_name);
            let _enter = span.enter();
            match script.apply(&mut class, self.locator.as_ref()) {
                Ok(did_change) => changed |= did_change,
                Err(source) => {
                    tracing::error!(error = %source, "script failed, leaving class as the previous script left it");
                }
            }
        }

        if !changed {
            return None;
        }

        if let Err(source) = recompute_stack_maps(&mut class) {
            tracing::error!(class = %class_name, error = %source, "stack map recomputation failed after rewrite");
            return None;
        }

        let after = class.to_bytes();
        if let Some(dir) = &self.debug_dump_dir {
            if let Err(source) = debug_dump(dir, class_name, bytes, &after) {
                tracing::warn!(class = %class_name, error = %source, "failed to write debug dump");
            }
        }
        Some(after)
    }

    /// Every class name any active script (or activated witness) declared
    /// itself dependent on for a host re-transform — deduplicated, in no
    /// particular order, per §4.7.
    pub fn classes_to_reload(&self) -> Vec<String> {
        let mut classes: BTreeSet<String> = BTreeSet::new();
        for script in &self.scripts {
            classes.extend(script.reload_classes().iter().cloned());
        }
        classes.into_iter().collect()
    }

    /// Asks the configured [`Reloader`] to re-transform `class_name`,
    /// surfacing [`PatchError::ReloadUnsupported`] untouched.
    pub fn request_reload(&self, class_name: &str) -> Result<(), PatchError> {
        self.reloader.reload(class_name)
    }
}

/// Recomputes `StackMapTable` for every method with a `Code` attribute.
/// Cheaper to run unconditionally than to track exactly which methods a
/// script touched, and correct either way since recomputation from the
/// current bytecode is idempotent on an untouched method.
fn recompute_stack_maps(class: &mut RawClassFile) -> anyhow::Result<()> {
    let major_version = class.major_version;
    let this_class = class.this_class;
    for method_index in 0..class.methods.len() {
        let (name, descriptor, access_flags) = {
            let method = &class.methods[method_index];
            (
                class.constant_pool.utf8(method.name_index)?.to_string(),
                class.constant_pool.utf8(method.descriptor_index)?.to_string(),
                method.access_flags,
            )
        };
        let Some(mut code) = class.methods[method_index].code(&class.constant_pool)? else {
            continue;
        };
        let is_constructor = name == "<init>";
        crate::stackmap::recompute(
            &mut code,
            &mut class.constant_pool,
            access_flags,
            &descriptor,
            is_constructor,
            major_version,
            this_class,
        )?;
        class.methods[method_index].set_code(&code, &mut class.constant_pool);
    }
    Ok(())
}

#[derive(Default)]
pub struct ScriptManagerBuilder {
    scripts: Vec<PatchScript>,
    witnesses: Vec<WitnessAction>,
    filter: Option<Box<dyn Filter>>,
    locator: Option<Box<dyn HookLocator>>,
    reloader: Option<Box<dyn Reloader>>,
    debug_dump_dir: Option<PathBuf>,
}

impl ScriptManagerBuilder {
    pub fn scripts(mut self, scripts: impl IntoIterator<Item = PatchScript>) -> Self {
        self.scripts = scripts.into_iter().collect();
        self
    }

    pub fn witnesses(mut self, witnesses: impl IntoIterator<Item = WitnessAction>) -> Self {
        self.witnesses = witnesses.into_iter().collect();
        self
    }

    pub fn filter(mut self, filter: Box<dyn Filter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn locator(mut self, locator: Box<dyn HookLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn reloader(mut self, reloader: Box<dyn Reloader>) -> Self {
        self.reloader = Some(reloader);
        self
    }

    pub fn debug_dump_dir(mut self, dir: PathBuf) -> Self {
        self.debug_dump_dir = Some(dir);
        self
    }

    pub fn build(self) -> ScriptManager {
        ScriptManager {
            scripts: self.scripts,
            witnesses: self.witnesses,
            filter: self.filter.unwrap_or_else(|| Box::new(AcceptAll)),
            locator: self.locator.unwrap_or_else(|| Box::new(crate::transplant::ClasspathHookLocator::new(Vec::new()))),
            reloader: self.reloader.unwrap_or_else(|| Box::new(NoReload)),
            debug_dump_dir: self.debug_dump_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{CodeAttribute, ConstantPool, RawMethod};
    use crate::opcodes as op;
    use crate::rewrite::add_field::AddFieldScript;

    fn class_bytes_with_one_method() -> Vec<u8> {
        let mut pool = ConstantPool::default();
        let this_class = pool.get_or_insert_class("com/example/Target");
        let super_class = pool.get_or_insert_class("java/lang/Object");
        let name_index = pool.get_or_insert_utf8("go");
        let descriptor_index = pool.get_or_insert_utf8("()V");
        let mut method = RawMethod { access_flags: 0x0001, name_index, descriptor_index, attributes: Vec::new() };
        method.set_code(
            &CodeAttribute { max_stack: 0, max_locals: 1, code: vec![op::RETURN], exception_table: Vec::new(), other_attributes: Vec::new() },
            &mut pool,
        );
        let class = RawClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: vec![method],
            attributes: Vec::new(),
        };
        class.to_bytes()
    }

    #[test]
    fn unmatched_class_returns_none() {
        let mut manager = ScriptManager::builder()
            .scripts([PatchScript::AddField(
                AddFieldScript::builder()
                    .target_classes(["com/example/Other".to_string()])
                    .access_flags(0x0001)
                    .field_name("marker")
                    .field_descriptor("Z")
                    .build()
                    .unwrap(),
            )])
            .build();

        let bytes = class_bytes_with_one_method();
        assert!(manager.transform(None, "com/example/Target", false, &bytes).is_none());
    }

    #[test]
    fn matching_script_produces_rewritten_bytes() {
        let mut manager = ScriptManager::builder()
            .scripts([PatchScript::AddField(
                AddFieldScript::builder()
                    .target_classes(["com/example/Target".to_string()])
                    .access_flags(0x0001)
                    .field_name("marker")
                    .field_descriptor("Z")
                    .build()
                    .unwrap(),
            )])
            .build();

        let bytes = class_bytes_with_one_method();
        let after = manager.transform(None, "com/example/Target", false, &bytes).unwrap();
        let reparsed = RawClassFile::parse(&after).unwrap();
        assert_eq!(reparsed.fields.len(), 1);
    }

    #[test]
    fn filter_rejecting_a_class_is_never_offered_to_scripts() {
        struct RejectAll;
        impl Filter for RejectAll {
            fn should_transform(&self, _: Option<&str>, _: &str, _: bool, _: &[u8]) -> bool {
                false
            }
        }
        let mut manager = ScriptManager::builder()
            .filter(Box::new(RejectAll))
            .scripts([PatchScript::AddField(
                AddFieldScript::builder()
                    .target_classes(["com/example/Target".to_string()])
                    .access_flags(0x0001)
                    .field_name("marker")
                    .field_descriptor("Z")
                    .build()
                    .unwrap(),
            )])
            .build();
        let bytes = class_bytes_with_one_method();
        assert!(manager.transform(None, "com/example/Target", false, &bytes).is_none());
    }

    #[test]
    fn default_reloader_reports_unsupported() {
        let manager = ScriptManager::builder().build();
        assert!(manager.request_reload("com/example/Target").is_err());
    }

    /// `SetSymbolDuringMethodCall`'s generated wrapper carries a try/handler
    /// pair (`set_symbol_during_method_call::build_wrapper_method`). Once
    /// `recompute_stack_maps` runs on it, the handler's frame must show the
    /// thrown exception on the stack, not the empty entry-frame fallback a
    /// handler edge the worklist never reaches would produce.
    #[test]
    fn stack_map_recompute_gives_the_exception_handler_a_non_empty_stack() {
        use crate::rewrite::set_symbol_during_method_call::SetSymbolDuringMethodCallScript;
        use crate::target::MethodTarget;

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
        let class = RawClassFile {
            minor_version: 0,
            major_version: 61,
            constant_pool: pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: vec![method],
            attributes: Vec::new(),
        };
        let bytes = class.to_bytes();

        let script = PatchScript::SetSymbolDuringMethodCall(
            SetSymbolDuringMethodCallScript::builder()
                .enclosing_target(MethodTarget::any_overload("com.example.Target", "go"))
                .inner_call(MethodTarget::exact("java.lang.Thread", "sleep", "void", ["long".to_string()]))
                .symbol("Foobar")
                .build()
                .unwrap(),
        );
        let mut manager = ScriptManager::builder().scripts([script]).build();
        let after = manager.transform(None, "com/example/Target", false, &bytes).expect("script should have matched");

        let reparsed = RawClassFile::parse(&after).unwrap();
        let wrapper = &reparsed.methods[1];
        let wrapper_code = wrapper.code(&reparsed.constant_pool).unwrap().unwrap();
        let stack_map = wrapper_code
            .other_attributes
            .iter()
            .find(|a| reparsed.constant_pool.utf8(a.name_index).unwrap() == "StackMapTable")
            .expect("wrapper method should carry a recomputed StackMapTable");

        let entry_count = u16::from_be_bytes([stack_map.info[0], stack_map.info[1]]);
        assert_eq!(entry_count, 1, "only the handler offset needs a frame in this wrapper shape");
        // full_frame: tag(1) + offset_delta(2) + number_of_locals(2) + locals... + number_of_stack_items(2) + stack...
        let tag = stack_map.info[2];
        assert_eq!(tag, 255, "recompute always emits full_frame entries");
        let number_of_locals = u16::from_be_bytes([stack_map.info[5], stack_map.info[6]]);
        let mut cursor = 7usize;
        for _ in 0..number_of_locals {
            cursor += verification_type_width(stack_map.info[cursor]);
        }
        let number_of_stack_items = u16::from_be_bytes([stack_map.info[cursor], stack_map.info[cursor + 1]]);
        assert!(number_of_stack_items >= 1, "handler frame must show the caught exception on the stack");
    }

    fn verification_type_width(tag: u8) -> usize {
        if tag == 7 || tag == 8 { 3 } else { 1 }
    }
}
