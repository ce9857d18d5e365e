//! End-to-end tests driving [`classgraft::ScriptManager`] the way a host
//! actually would: real (hand-assembled) class bytes in, patched bytes
//! out, through the public API only.

use classgraft::{
    AddFieldScript, ExitEarlyScript, Hook, HookDelivery, MethodTarget, PatchScript, ScriptManager,
    SetSymbolDuringMethodCallScript, StackRequest, WitnessAction, WitnessEffect,
};

const RETURN: u8 = 0xb1;
const IRETURN: u8 = 0xac;
const ICONST_1: u8 = 0x04;
const ILOAD_0: u8 = 0x1a;
const IFEQ: u8 = 0x99;

/// Hand-assembles a minimal `.class` for `com/example/Target` with one
/// public instance method matching `(name, descriptor, code)`, constant
/// pool built up by hand the way a real compiled class would be laid out.
fn class_with_method(name: &str, descriptor: &str, code: Vec<u8>, max_stack: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // minor
    out.extend_from_slice(&61u16.to_be_bytes()); // major: Java 17, requires StackMapTable

    // constant pool: 1=Utf8 target, 2=Class target, 3=Utf8 Object, 4=Class Object,
    // 5=Utf8 name, 6=Utf8 descriptor, 7=Utf8 "Code"
    let mut pool = Vec::new();
    push_utf8(&mut pool, "com/example/Target");
    push_class(&mut pool, 1);
    push_utf8(&mut pool, "java/lang/Object");
    push_class(&mut pool, 3);
    push_utf8(&mut pool, name);
    push_utf8(&mut pool, descriptor);
    push_utf8(&mut pool, "Code");
    out.extend_from_slice(&8u16.to_be_bytes()); // constant_pool_count = highest index + 1
    out.extend_from_slice(&pool);

    out.extend_from_slice(&0x0021u16.to_be_bytes()); // access_flags: ACC_PUBLIC | ACC_SUPER
    out.extend_from_slice(&2u16.to_be_bytes()); // this_class
    out.extend_from_slice(&4u16.to_be_bytes()); // super_class
    out.extend_from_slice(&0u16.to_be_bytes()); // interfaces_count
    out.extend_from_slice(&0u16.to_be_bytes()); // fields_count

    out.extend_from_slice(&1u16.to_be_bytes()); // methods_count
    out.extend_from_slice(&0x0001u16.to_be_bytes()); // ACC_PUBLIC
    out.extend_from_slice(&5u16.to_be_bytes()); // name_index
    out.extend_from_slice(&6u16.to_be_bytes()); // descriptor_index
    out.extend_from_slice(&1u16.to_be_bytes()); // attributes_count

    let mut code_attr_info = Vec::new();
    code_attr_info.extend_from_slice(&max_stack.to_be_bytes());
    code_attr_info.extend_from_slice(&2u16.to_be_bytes()); // max_locals
    code_attr_info.extend_from_slice(&(code.len() as u32).to_be_bytes());
    code_attr_info.extend_from_slice(&code);
    code_attr_info.extend_from_slice(&0u16.to_be_bytes()); // exception_table_length
    code_attr_info.extend_from_slice(&0u16.to_be_bytes()); // attributes_count

    out.extend_from_slice(&7u16.to_be_bytes()); // "Code" name_index
    out.extend_from_slice(&(code_attr_info.len() as u32).to_be_bytes());
    out.extend_from_slice(&code_attr_info);

    out.extend_from_slice(&0u16.to_be_bytes()); // class attributes_count
    out
}

fn push_utf8(pool: &mut Vec<u8>, value: &str) {
    pool.push(1);
    pool.extend_from_slice(&(value.len() as u16).to_be_bytes());
    pool.extend_from_slice(value.as_bytes());
}

fn push_class(pool: &mut Vec<u8>, name_index: u16) {
    pool.push(7);
    pool.extend_from_slice(&name_index.to_be_bytes());
}

#[test]
fn add_field_script_adds_a_field_to_the_target_class() {
    let bytes = class_with_method("go", "()V", vec![RETURN], 1);
    let script = PatchScript::AddField(
        AddFieldScript::builder()
            .target_classes(["com/example/Target".to_string()])
            .access_flags(0x0002)
            .field_name("classgraftMarker")
            .field_descriptor("Z")
            .build()
            .unwrap(),
    );
    let mut manager = ScriptManager::builder().scripts([script]).build();

    let after = manager.transform(None, "com/example/Target", false, &bytes).expect("script should have matched");
    assert_ne!(after, bytes);
    assert_eq!(&after[0..4], &0xCAFEBABEu32.to_be_bytes());
}

#[test]
fn unmatched_class_name_is_left_untouched() {
    let bytes = class_with_method("go", "()V", vec![RETURN], 1);
    let script = PatchScript::AddField(
        AddFieldScript::builder()
            .target_classes(["com/example/Other".to_string()])
            .access_flags(0x0002)
            .field_name("marker")
            .field_descriptor("Z")
            .build()
            .unwrap(),
    );
    let mut manager = ScriptManager::builder().scripts([script]).build();
    assert!(manager.transform(None, "com/example/Target", false, &bytes).is_none());
}

#[test]
fn exit_early_script_prepends_a_guard_and_still_parses_after_rewrite() {
    // if (arg == 0) return 1; return 0; — a branchy body, so the manager's
    // post-rewrite StackMapTable recomputation runs its worklist pass for
    // more than a single straight-line block.
    let code = vec![ILOAD_0, IFEQ, 0x00, 0x07, /* else */ 0x03, IRETURN, /* then */ ICONST_1, IRETURN];
    let bytes = class_with_method("classify", "(I)I", code, 2);

    let script = PatchScript::ExitEarly(
        ExitEarlyScript::builder()
            .target(MethodTarget::any_overload("com.example.Target", "classify"))
            .decision_hook(Hook::new("com/example/Hooks", "onClassify", "void", Vec::<String>::new()), HookDelivery::Call)
            .build()
            .unwrap(),
    );
    let mut manager = ScriptManager::builder().scripts([script]).build();
    let after = manager.transform(None, "com/example/Target", false, &bytes).expect("script should have matched");
    assert_eq!(&after[0..4], &0xCAFEBABEu32.to_be_bytes());
}

#[test]
fn set_symbol_during_method_call_balances_push_and_pop_via_symbols_module() {
    // Exercises the thread-local stack backing SetSymbolDuringMethodCall's
    // emitted calls directly, independent of a live class-loader.
    assert!(classgraft::symbols::is_empty());
    classgraft::symbols::push("demo-request");
    assert!(classgraft::symbols::has_symbol("demo-request"));
    assert!(!classgraft::symbols::is_empty());
    assert_eq!(classgraft::symbols::pop(), Some("demo-request".to_string()));
    assert_eq!(classgraft::symbols::size(), 0);
    assert!(classgraft::symbols::is_empty());
}

#[test]
fn set_symbol_script_builds_without_error_for_an_interface_call_shape() {
    let script = SetSymbolDuringMethodCallScript::builder()
        .enclosing_target(MethodTarget::any_overload("com.example.Target", "go"))
        .inner_call(MethodTarget::exact("java.util.List", "add", "boolean", ["java.lang.Object".to_string()]))
        .symbol("list-add")
        .build();
    assert!(script.is_ok());
}

#[test]
fn witness_action_adds_its_script_once_all_trigger_classes_have_loaded() {
    let script = PatchScript::AddField(
        AddFieldScript::builder()
            .target_classes(["com/example/Target".to_string()])
            .access_flags(0x0002)
            .field_name("classgraftMarker")
            .field_descriptor("Z")
            .build()
            .unwrap(),
    );
    let witness = WitnessAction::new(vec![vec!["com/example/Loader".to_string()]], WitnessEffect::AddScriptIfWitness, script);
    let mut manager = ScriptManager::builder().witnesses([witness]).build();

    let target_bytes = class_with_method("go", "()V", vec![RETURN], 1);
    // Before the witness class loads, no script is active yet.
    assert!(manager.transform(None, "com/example/Target", false, &target_bytes).is_none());

    let loader_bytes = class_with_method("init", "()V", vec![RETURN], 1);
    manager.transform(None, "com/example/Loader", false, &loader_bytes);

    let after = manager.transform(None, "com/example/Target", false, &target_bytes);
    assert!(after.is_some(), "witness should have activated AddField by now");
}

#[test]
fn default_reload_set_is_empty_with_no_scripts_configured() {
    let manager = ScriptManager::builder().build();
    assert!(manager.classes_to_reload().is_empty());
}

#[test]
fn exit_early_script_accepts_out_of_order_stack_requests_and_builds() {
    let script = ExitEarlyScript::builder()
        .target(MethodTarget::any_overload("com.example.Target", "go"))
        .decision_hook(Hook::new("com/example/Hooks", "guard", "boolean", Vec::<String>::new()), HookDelivery::Call)
        .value_hook(Hook::new("com/example/Hooks", "classify", "int", Vec::<String>::new()), HookDelivery::Call)
        .stack_requests([StackRequest::Param(1), StackRequest::This])
        .build();
    assert!(script.is_ok());
}
