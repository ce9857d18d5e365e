//! Recomputes `StackMapTable` frames for a method whose bytecode a
//! rewriter has just changed — §4.6.
//!
//! `CodeAttribute.other_attributes` never carries `StackMapTable`: it is
//! dropped on decode and synthesized here on demand. This keeps every
//! rewriter free of frame bookkeeping; they only need to keep the
//! instruction stream and exception table consistent (`crate::codepatch`
//! already does that), and call [`recompute`] once before writing the
//! method back out.

use anyhow::Result;

use crate::classfile::{CodeAttribute, ConstantPool, RawAttribute};
use crate::descriptor::decompose_method_descriptor;
use crate::opcodes;
use crate::scan;

/// The JVM's own verification-type lattice (§4.20.2 of the class-file
/// format spec), trimmed to the tags this synthesizer actually produces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Object(u16),
    Uninitialized(u16),
}

impl VerificationType {
    /// `Long`/`Double` occupy two verification-type slots on the stack and
    /// in locals, matching their two local-variable slots at the bytecode
    /// level.
    fn width(&self) -> usize {
        if matches!(self, VerificationType::Long | VerificationType::Double) { 2 } else { 1 }
    }

    fn from_descriptor(descriptor: &str, pool: &mut ConstantPool) -> Self {
        match descriptor.as_bytes().first() {
            Some(b'I') | Some(b'S') | Some(b'B') | Some(b'C') | Some(b'Z') => VerificationType::Integer,
            Some(b'F') => VerificationType::Float,
            Some(b'J') => VerificationType::Long,
            Some(b'D') => VerificationType::Double,
            Some(b'L') => {
                let internal = descriptor.trim_start_matches('L').trim_end_matches(';');
                VerificationType::Object(pool.get_or_insert_class(internal))
            }
            Some(b'[') => VerificationType::Object(pool.get_or_insert_class(descriptor)),
            _ => VerificationType::Top,
        }
    }
}

/// One abstract interpreter state: the locals array (index = slot number,
/// with an explicit `Top` padding entry following a wide local) and the
/// operand stack, bottom first (same padding convention).
#[derive(Clone, Debug, Eq, PartialEq)]
struct Frame {
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
}

impl Frame {
    fn push(&mut self, ty: VerificationType) {
        let wide = ty.width() == 2;
        self.stack.push(ty);
        if wide {
            self.stack.push(VerificationType::Top);
        }
    }

    /// Pops one verification-type-sized value, consuming its `Top`
    /// padding too when it was wide.
    fn pop(&mut self) -> VerificationType {
        let top = self.stack.pop().unwrap_or(VerificationType::Top);
        if matches!(top, VerificationType::Top) {
            if let Some(under) = self.stack.last() {
                if under.width() == 2 {
                    return self.stack.pop().unwrap_or(VerificationType::Top);
                }
            }
        }
        top
    }

    fn store(&mut self, slot: usize, ty: VerificationType) {
        let wide = ty.width() == 2;
        while self.locals.len() <= slot + (wide as usize) {
            self.locals.push(VerificationType::Top);
        }
        self.locals[slot] = ty;
        if wide {
            self.locals[slot + 1] = VerificationType::Top;
        }
    }

    fn load(&self, slot: usize) -> VerificationType {
        self.locals.get(slot).cloned().unwrap_or(VerificationType::Top)
    }

    /// Merges `other` into `self` in place: locals/stack entries that
    /// disagree collapse to `Top` (per §4.6). A stack-depth mismatch
    /// cannot be reconciled by merging — the caller clears the state to
    /// force a conservative `full_frame` at that offset.
    fn merge(&mut self, other: &Frame) -> Result<()> {
        if self.stack.len() != other.stack.len() {
            anyhow::bail!("stack depth mismatch at merge: {} vs {}", self.stack.len(), other.stack.len());
        }
        for (mine, theirs) in self.stack.iter_mut().zip(&other.stack) {
            if mine != theirs {
                *mine = VerificationType::Top;
            }
        }
        let len = self.locals.len().min(other.locals.len());
        self.locals.truncate(len);
        for (mine, theirs) in self.locals.iter_mut().zip(&other.locals) {
            if mine != theirs {
                *mine = VerificationType::Top;
            }
        }
        Ok(())
    }
}

/// Recomputes `max_stack`, `max_locals`, and the `StackMapTable` attribute
/// for `code`, given the declaring method's access flags/descriptor
/// (seeds locals with `this` and the parameters) and whether it is a
/// constructor (`this` starts `UninitializedThis` until `<init>` chains).
///
/// Below major version 50 the JVM never verifies via stack maps; this
/// still runs the pass (to catch a rewriter bug that left a branch
/// pointing mid-instruction) but appends no attribute.
pub(crate) fn recompute(
    code: &mut CodeAttribute,
    pool: &mut ConstantPool,
    access_flags: u16,
    descriptor: &str,
    is_constructor: bool,
    major_version: u16,
    this_class: u16,
) -> Result<()> {
    let decomposed = decompose_method_descriptor(descriptor)?;
    let is_static = access_flags & 0x0008 != 0;

    let mut entry_locals = Vec::new();
    if !is_static {
        entry_locals.push(if is_constructor { VerificationType::UninitializedThis } else { VerificationType::Object(this_class) });
    }
    for param in &decomposed.parameter_types {
        let ty = VerificationType::from_descriptor(param, pool);
        let wide = ty.width() == 2;
        entry_locals.push(ty);
        if wide {
            entry_locals.push(VerificationType::Top);
        }
    }

    code.other_attributes.retain(|a| !is_stack_map_table(a, pool));

    let instructions = scan::decode_instructions(&code.code)?;
    if instructions.is_empty() {
        return Ok(());
    }

    let targets = branch_targets(&code.code, &instructions, code)?;
    let entry = Frame { locals: entry_locals, stack: Vec::new() };

    let offset_index: std::collections::HashMap<u32, usize> =
        instructions.iter().enumerate().map(|(i, ins)| (ins.offset, i)).collect();

    let mut states: std::collections::BTreeMap<u32, Frame> = std::collections::BTreeMap::new();
    states.insert(0, entry.clone());
    let mut worklist = vec![0u32];
    let mut max_stack_words = 0usize;
    let mut max_locals_words = entry.locals.len();

    while let Some(offset) = worklist.pop() {
        let Some(&index) = offset_index.get(&offset) else { continue };
        let Some(frame_before) = states.get(&offset).cloned() else { continue };

        // An exception can surface at any instruction inside a protected
        // range, with whatever locals were live at that point but a bare
        // one-entry stack holding the thrown value — a separate edge into
        // the handler, not something `step()`'s normal successors produce.
        for handler in &code.exception_table {
            if (handler.start_pc as u32) <= offset && offset < (handler.end_pc as u32) {
                let exception_type = if handler.catch_type == 0 {
                    VerificationType::Object(pool.get_or_insert_class("java/lang/Throwable"))
                } else {
                    VerificationType::Object(handler.catch_type)
                };
                let handler_frame = Frame { locals: frame_before.locals.clone(), stack: vec![exception_type] };
                merge_into(&mut states, &mut worklist, handler.handler_pc as u32, handler_frame);
            }
        }

        let mut frame = frame_before;
        let instruction = instructions[index];
        let successors = step(&code.code, &instruction, &mut frame, pool)?;
        max_stack_words = max_stack_words.max(frame.stack.len());
        max_locals_words = max_locals_words.max(frame.locals.len());

        for successor in successors {
            merge_into(&mut states, &mut worklist, successor, frame.clone());
        }
    }

    code.max_stack = (max_stack_words as u16).max(code.max_stack).max(1);
    code.max_locals = (max_locals_words as u16).max(code.max_locals);

    if major_version < 50 {
        return Ok(());
    }

    let mut frame_offsets: Vec<u32> = targets.into_iter().filter(|t| *t != 0).collect();
    frame_offsets.sort_unstable();
    frame_offsets.dedup();
    if frame_offsets.is_empty() {
        return Ok(());
    }

    let mut info = Vec::new();
    write_u16(&mut info, frame_offsets.len() as u16);
    let mut previous_offset: i64 = -1;
    for target in frame_offsets {
        let frame = states.get(&target).cloned().unwrap_or_else(|| entry.clone());
        let offset_delta = (target as i64 - previous_offset - 1) as u16;
        write_full_frame(&mut info, offset_delta, &frame);
        previous_offset = target as i64;
    }

    let name_index = pool.get_or_insert_utf8("StackMapTable");
    code.other_attributes.push(RawAttribute { name_index, info });
    Ok(())
}

/// Inserts `incoming` as the state at `target`, or merges it into whatever
/// is already there, scheduling `target` for (re-)processing either way.
fn merge_into(states: &mut std::collections::BTreeMap<u32, Frame>, worklist: &mut Vec<u32>, target: u32, incoming: Frame) {
    match states.get_mut(&target) {
        Some(existing) => {
            if existing.merge(&incoming).is_err() {
                *existing = Frame { locals: Vec::new(), stack: Vec::new() };
            }
        }
        None => {
            states.insert(target, incoming);
        }
    }
    worklist.push(target);
}

fn is_stack_map_table(attribute: &RawAttribute, pool: &ConstantPool) -> bool {
    pool.utf8(attribute.name_index).map(|n| n == "StackMapTable").unwrap_or(false)
}

fn write_full_frame(out: &mut Vec<u8>, offset_delta: u16, frame: &Frame) {
    out.push(255); // full_frame tag: always safe, simpler than delta-optimized frame kinds
    write_u16(out, offset_delta);
    let locals = collapse_wide_padding(&frame.locals);
    write_u16(out, locals.len() as u16);
    for local in &locals {
        write_verification_type(out, local);
    }
    let stack = collapse_wide_padding(&frame.stack);
    write_u16(out, stack.len() as u16);
    for entry in &stack {
        write_verification_type(out, entry);
    }
}

/// Drops the synthetic `Top` padding slots that follow a `Long`/`Double`
/// entry — those are implicit in the verification-type encoding, not
/// written out as their own entries.
fn collapse_wide_padding(types: &[VerificationType]) -> Vec<VerificationType> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for ty in types {
        if skip_next {
            skip_next = false;
            continue;
        }
        skip_next = ty.width() == 2;
        out.push(ty.clone());
    }
    out
}

fn write_verification_type(out: &mut Vec<u8>, ty: &VerificationType) {
    match ty {
        VerificationType::Top => out.push(0),
        VerificationType::Integer => out.push(1),
        VerificationType::Float => out.push(2),
        VerificationType::Double => out.push(3),
        VerificationType::Long => out.push(4),
        VerificationType::Null => out.push(5),
        VerificationType::UninitializedThis => out.push(6),
        VerificationType::Object(class_index) => {
            out.push(7);
            write_u16(out, *class_index);
        }
        VerificationType::Uninitialized(new_offset) => {
            out.push(8);
            write_u16(out, *new_offset);
        }
    }
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Every offset that can be reached other than by straight-line
/// fall-through: branch/switch targets and exception handlers. These are
/// exactly the offsets a `StackMapTable` must carry a frame for.
fn branch_targets(code: &[u8], instructions: &[scan::Instruction], attribute: &CodeAttribute) -> Result<Vec<u32>> {
    let mut targets = Vec::new();
    for instruction in instructions {
        let offset = instruction.offset as usize;
        match instruction.opcode {
            opcodes::IFEQ
            | opcodes::IFNE
            | opcodes::IFLT
            | opcodes::IFGE
            | opcodes::IFGT
            | opcodes::IFLE
            | opcodes::IF_ICMPEQ
            | opcodes::IF_ICMPNE
            | opcodes::IF_ICMPLT
            | opcodes::IF_ICMPGE
            | opcodes::IF_ICMPGT
            | opcodes::IF_ICMPLE
            | opcodes::IF_ACMPEQ
            | opcodes::IF_ACMPNE
            | opcodes::GOTO
            | opcodes::JSR
            | opcodes::IFNULL
            | opcodes::IFNONNULL => {
                let delta = scan::read_u16(code, offset + 1)? as i16 as i32;
                targets.push((instruction.offset as i32 + delta) as u32);
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let delta = scan::read_u32(code, offset + 1)? as i32;
                targets.push((instruction.offset as i32 + delta) as u32);
            }
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
                let mut padded = offset + 1;
                while padded % 4 != 0 {
                    padded += 1;
                }
                let default_delta = scan::read_i32(code, padded)?;
                targets.push((instruction.offset as i32 + default_delta) as u32);
                if instruction.opcode == opcodes::TABLESWITCH {
                    let low = scan::read_i32(code, padded + 4)?;
                    let high = scan::read_i32(code, padded + 8)?;
                    for i in 0..(high - low + 1) {
                        let delta = scan::read_i32(code, padded + 12 + i as usize * 4)?;
                        targets.push((instruction.offset as i32 + delta) as u32);
                    }
                } else {
                    let npairs = scan::read_u32(code, padded + 4)? as usize;
                    for i in 0..npairs {
                        let delta = scan::read_i32(code, padded + 8 + i * 8 + 4)?;
                        targets.push((instruction.offset as i32 + delta) as u32);
                    }
                }
            }
            _ => {}
        }
    }
    for handler in &attribute.exception_table {
        targets.push(handler.handler_pc as u32);
    }
    Ok(targets)
}

const LLOAD_COMPACT_BASE: u8 = 0x1e;
const FLOAD_COMPACT_BASE: u8 = 0x22;
const DLOAD_COMPACT_BASE: u8 = 0x26;
const LSTORE_COMPACT_BASE: u8 = 0x3f;
const FSTORE_COMPACT_BASE: u8 = 0x43;
const DSTORE_COMPACT_BASE: u8 = 0x47;

/// Applies one instruction's stack/locals effect to `frame`, returning the
/// offsets execution may continue at (fall-through, branch targets, or
/// none for an unconditional transfer/return/throw).
///
/// Covers every opcode this crate itself emits plus the common subset of
/// arbitrary host bytecode (arithmetic, comparisons, and array ops that
/// round-trip a category without changing stack depth are left as a
/// stack/locals-neutral fall-through, which is exact for those and the
/// documented approximation everywhere else).
fn step(code: &[u8], instruction: &scan::Instruction, frame: &mut Frame, pool: &mut ConstantPool) -> Result<Vec<u32>> {
    let offset = instruction.offset as usize;
    let next = instruction.offset + instruction.length as u32;
    let op = instruction.opcode;

    Ok(match op {
        opcodes::ACONST_NULL => {
            frame.push(VerificationType::Null);
            vec![next]
        }
        opcodes::ICONST_M1..=opcodes::ICONST_5 | opcodes::BIPUSH | opcodes::SIPUSH | opcodes::LDC | opcodes::LDC_W => {
            frame.push(VerificationType::Integer);
            vec![next]
        }
        opcodes::LDC2_W | opcodes::LCONST_0 | opcodes::LCONST_1 => {
            frame.push(VerificationType::Long);
            vec![next]
        }
        opcodes::FCONST_0 => {
            frame.push(VerificationType::Float);
            vec![next]
        }
        opcodes::DCONST_0 => {
            frame.push(VerificationType::Double);
            vec![next]
        }
        opcodes::ILOAD | opcodes::ILOAD_0..=opcodes::ILOAD_3 => {
            let slot = compact_slot(code, op, offset, opcodes::ILOAD, opcodes::ILOAD_0);
            frame.push(frame.load(slot));
            vec![next]
        }
        opcodes::LLOAD | LLOAD_COMPACT_BASE..=0x21 => {
            let slot = compact_slot(code, op, offset, opcodes::LLOAD, LLOAD_COMPACT_BASE);
            frame.push(frame.load(slot));
            vec![next]
        }
        opcodes::FLOAD | FLOAD_COMPACT_BASE..=0x25 => {
            let slot = compact_slot(code, op, offset, opcodes::FLOAD, FLOAD_COMPACT_BASE);
            frame.push(frame.load(slot));
            vec![next]
        }
        opcodes::DLOAD | DLOAD_COMPACT_BASE..=0x29 => {
            let slot = compact_slot(code, op, offset, opcodes::DLOAD, DLOAD_COMPACT_BASE);
            frame.push(frame.load(slot));
            vec![next]
        }
        opcodes::ALOAD | opcodes::ALOAD_0..=opcodes::ALOAD_3 => {
            let slot = compact_slot(code, op, offset, opcodes::ALOAD, opcodes::ALOAD_0);
            frame.push(frame.load(slot));
            vec![next]
        }
        opcodes::ISTORE | opcodes::ISTORE_0..=0x3e => {
            let slot = compact_slot(code, op, offset, opcodes::ISTORE, opcodes::ISTORE_0);
            let v = frame.pop();
            frame.store(slot, v);
            vec![next]
        }
        opcodes::LSTORE | LSTORE_COMPACT_BASE..=0x42 => {
            let slot = compact_slot(code, op, offset, opcodes::LSTORE, LSTORE_COMPACT_BASE);
            let v = frame.pop();
            frame.store(slot, v);
            vec![next]
        }
        opcodes::FSTORE | FSTORE_COMPACT_BASE..=0x46 => {
            let slot = compact_slot(code, op, offset, opcodes::FSTORE, FSTORE_COMPACT_BASE);
            let v = frame.pop();
            frame.store(slot, v);
            vec![next]
        }
        opcodes::DSTORE | DSTORE_COMPACT_BASE..=0x4a => {
            let slot = compact_slot(code, op, offset, opcodes::DSTORE, DSTORE_COMPACT_BASE);
            let v = frame.pop();
            frame.store(slot, v);
            vec![next]
        }
        opcodes::ASTORE | opcodes::ASTORE_0..=opcodes::ASTORE_3 => {
            let slot = compact_slot(code, op, offset, opcodes::ASTORE, opcodes::ASTORE_0);
            let v = frame.pop();
            frame.store(slot, v);
            vec![next]
        }
        opcodes::POP => {
            frame.stack.pop();
            vec![next]
        }
        opcodes::POP2 => {
            frame.stack.pop();
            frame.stack.pop();
            vec![next]
        }
        opcodes::DUP => {
            if let Some(top) = frame.stack.last().cloned() {
                frame.stack.push(top);
            }
            vec![next]
        }
        opcodes::DUP2 => {
            let len = frame.stack.len();
            if len >= 2 {
                let pair = frame.stack[len - 2..].to_vec();
                frame.stack.extend(pair);
            }
            vec![next]
        }
        opcodes::SWAP => {
            let len = frame.stack.len();
            if len >= 2 {
                frame.stack.swap(len - 1, len - 2);
            }
            vec![next]
        }
        opcodes::GETSTATIC => {
            let index = scan::read_u16(code, offset + 1)?;
            let (_, _, descriptor) = pool.resolve_ref(index)?;
            frame.push(VerificationType::from_descriptor(&descriptor, pool));
            vec![next]
        }
        opcodes::GETFIELD => {
            frame.pop();
            let index = scan::read_u16(code, offset + 1)?;
            let (_, _, descriptor) = pool.resolve_ref(index)?;
            frame.push(VerificationType::from_descriptor(&descriptor, pool));
            vec![next]
        }
        opcodes::PUTSTATIC => {
            frame.pop();
            vec![next]
        }
        opcodes::PUTFIELD => {
            frame.pop();
            frame.pop();
            vec![next]
        }
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC | opcodes::INVOKEINTERFACE => {
            let index = scan::read_u16(code, offset + 1)?;
            let (_, _, descriptor) = pool.resolve_ref(index)?;
            let decomposed = decompose_method_descriptor(&descriptor)?;
            for _ in &decomposed.parameter_types {
                frame.pop();
            }
            if op != opcodes::INVOKESTATIC {
                frame.pop();
            }
            if decomposed.return_type != "V" {
                frame.push(VerificationType::from_descriptor(&decomposed.return_type, pool));
            }
            vec![next]
        }
        opcodes::NEW => {
            frame.push(VerificationType::Uninitialized(instruction.offset as u16));
            vec![next]
        }
        opcodes::CHECKCAST => {
            let index = scan::read_u16(code, offset + 1)?;
            frame.pop();
            frame.push(VerificationType::Object(index));
            vec![next]
        }
        opcodes::ATHROW => Vec::new(),
        opcodes::GOTO => {
            let delta = scan::read_u16(code, offset + 1)? as i16 as i32;
            vec![(instruction.offset as i32 + delta) as u32]
        }
        opcodes::GOTO_W => {
            let delta = scan::read_u32(code, offset + 1)? as i32;
            vec![(instruction.offset as i32 + delta) as u32]
        }
        opcodes::IFEQ
        | opcodes::IFNE
        | opcodes::IFLT
        | opcodes::IFGE
        | opcodes::IFGT
        | opcodes::IFLE
        | opcodes::IFNULL
        | opcodes::IFNONNULL => {
            frame.pop();
            let delta = scan::read_u16(code, offset + 1)? as i16 as i32;
            vec![next, (instruction.offset as i32 + delta) as u32]
        }
        opcodes::IF_ICMPEQ
        | opcodes::IF_ICMPNE
        | opcodes::IF_ICMPLT
        | opcodes::IF_ICMPGE
        | opcodes::IF_ICMPGT
        | opcodes::IF_ICMPLE
        | opcodes::IF_ACMPEQ
        | opcodes::IF_ACMPNE => {
            frame.pop();
            frame.pop();
            let delta = scan::read_u16(code, offset + 1)? as i16 as i32;
            vec![next, (instruction.offset as i32 + delta) as u32]
        }
        opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
            frame.pop();
            let mut padded = offset + 1;
            while padded % 4 != 0 {
                padded += 1;
            }
            let mut successors = Vec::new();
            let default_delta = scan::read_i32(code, padded)?;
            successors.push((instruction.offset as i32 + default_delta) as u32);
            if op == opcodes::TABLESWITCH {
                let low = scan::read_i32(code, padded + 4)?;
                let high = scan::read_i32(code, padded + 8)?;
                for i in 0..(high - low + 1) {
                    let delta = scan::read_i32(code, padded + 12 + i as usize * 4)?;
                    successors.push((instruction.offset as i32 + delta) as u32);
                }
            } else {
                let npairs = scan::read_u32(code, padded + 4)? as usize;
                for i in 0..npairs {
                    let delta = scan::read_i32(code, padded + 8 + i * 8 + 4)?;
                    successors.push((instruction.offset as i32 + delta) as u32);
                }
            }
            successors
        }
        _ if opcodes::is_return(op) => {
            if op != opcodes::RETURN {
                frame.pop();
            }
            Vec::new()
        }
        _ => vec![next],
    })
}

fn compact_slot(code: &[u8], opcode: u8, offset: usize, wide_form: u8, compact_base: u8) -> usize {
    if opcode == wide_form {
        code.get(offset + 1).copied().unwrap_or(0) as usize
    } else {
        (opcode - compact_base) as usize
    }
}
