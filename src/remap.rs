//! Rewrites a constant-pool-indexed operand so a borrowed instruction
//! stream keeps working after its bytecode is copied into a different
//! class file's constant pool — the operation [`crate::transplant`]'s
//! `Transplant`/`Insert` modes need before they can splice a hook method's
//! body into a target class.
//!
//! `invokedynamic` call sites and raw `MethodHandle`/`MethodType` constants
//! are not remapped: resolving a `CallSite` bootstrap method correctly
//! would mean carrying the whole `BootstrapMethods` attribute across
//! classes too, which no script in this engine needs. A hook body built
//! from a lambda or method reference will surface as
//! [`PatchError::UnresolvableHook`] at transplant time instead of being
//! silently mis-copied.

use anyhow::{Result, anyhow};

use crate::classfile::{ConstantPool, ConstantPoolEntry};
use crate::error::PatchError;
use crate::opcodes;
use crate::scan;

/// Copies `code` (and the exception table, separately, via
/// [`remap_class_index`]) from `source_pool`'s indexing space into
/// `target_pool`'s, inserting whatever entries are missing along the way.
pub(crate) fn remap_code(
    code: &[u8],
    source_pool: &ConstantPool,
    target_pool: &mut ConstantPool,
) -> Result<Vec<u8>, PatchError> {
    let mut out = code.to_vec();
    let instructions = scan::decode_instructions(code)
        .map_err(|e| PatchError::UnresolvableHook { internal_name: String::new(), source: e })?;

    for instruction in instructions {
        let offset = instruction.offset as usize;
        match instruction.opcode {
            opcodes::LDC => {
                let index = code[offset + 1] as u16;
                let remapped = remap_loadable(index, source_pool, target_pool)?;
                if remapped > 0xff {
                    return Err(unresolvable(
                        "constant promoted past LDC's single-byte index; use LDC_W in the hook",
                    ));
                }
                out[offset + 1] = remapped as u8;
            }
            opcodes::LDC_W | opcodes::LDC2_W => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_loadable(index, source_pool, target_pool)?;
                write_index(&mut out, offset + 1, remapped);
            }
            opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_fieldref(index, source_pool, target_pool)?;
                write_index(&mut out, offset + 1, remapped);
            }
            opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_methodref(index, source_pool, target_pool, false)?;
                write_index(&mut out, offset + 1, remapped);
            }
            opcodes::INVOKEINTERFACE => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_methodref(index, source_pool, target_pool, true)?;
                write_index(&mut out, offset + 1, remapped);
            }
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF
            | opcodes::MULTIANEWARRAY => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_class_index(index, source_pool, target_pool)?;
                write_index(&mut out, offset + 1, remapped);
            }
            opcodes::INVOKEDYNAMIC => {
                return Err(unresolvable(
                    "hook body uses invokedynamic, which this engine cannot transplant",
                ));
            }
            _ => {}
        }
    }
    Ok(out)
}

fn unresolvable(message: &str) -> PatchError {
    PatchError::UnresolvableHook {
        internal_name: String::new(),
        source: anyhow!(message.to_string()),
    }
}

fn read_index(code: &[u8], offset: usize) -> Result<u16, PatchError> {
    scan::read_u16(code, offset).map_err(|e| PatchError::UnresolvableHook {
        internal_name: String::new(),
        source: e,
    })
}

fn write_index(out: &mut [u8], offset: usize, value: u16) {
    let bytes = value.to_be_bytes();
    out[offset] = bytes[0];
    out[offset + 1] = bytes[1];
}

pub(crate) fn remap_class_index(
    index: u16,
    source_pool: &ConstantPool,
    target_pool: &mut ConstantPool,
) -> Result<u16, PatchError> {
    let name = source_pool
        .class_name(index)
        .map_err(|e| PatchError::UnresolvableHook { internal_name: String::new(), source: e })?;
    Ok(target_pool.get_or_insert_class(name))
}

fn remap_fieldref(
    index: u16,
    source_pool: &ConstantPool,
    target_pool: &mut ConstantPool,
) -> Result<u16, PatchError> {
    let (owner, name, descriptor) = source_pool
        .resolve_ref(index)
        .map_err(|e| PatchError::UnresolvableHook { internal_name: String::new(), source: e })?;
    Ok(target_pool.get_or_insert_fieldref(&owner, &name, &descriptor))
}

fn remap_methodref(
    index: u16,
    source_pool: &ConstantPool,
    target_pool: &mut ConstantPool,
    _interface: bool,
) -> Result<u16, PatchError> {
    let (owner, name, descriptor) = source_pool
        .resolve_ref(index)
        .map_err(|e| PatchError::UnresolvableHook { internal_name: String::new(), source: e })?;
    Ok(target_pool.get_or_insert_methodref(&owner, &name, &descriptor))
}

/// Local-variable-slot opcodes, keyed by their compact `_0..._3` base (for
/// the four typed kinds) plus the untyped `IINC`/`RET`.
fn local_slot_kind(opcode: u8) -> Option<(u8, bool)> {
    const LLOAD_3: u8 = opcodes::LLOAD_0 + 3;
    const FLOAD_3: u8 = opcodes::FLOAD_0 + 3;
    const DLOAD_3: u8 = opcodes::DLOAD_0 + 3;
    const ISTORE_3: u8 = opcodes::ISTORE_0 + 3;
    // (general opcode, is_store)
    match opcode {
        opcodes::ILOAD | opcodes::ILOAD_0..=opcodes::ILOAD_3 => Some((opcodes::ILOAD, false)),
        opcodes::LLOAD | opcodes::LLOAD_0..=LLOAD_3 => Some((opcodes::LLOAD, false)),
        opcodes::FLOAD | opcodes::FLOAD_0..=FLOAD_3 => Some((opcodes::FLOAD, false)),
        opcodes::DLOAD | opcodes::DLOAD_0..=DLOAD_3 => Some((opcodes::DLOAD, false)),
        opcodes::ALOAD | opcodes::ALOAD_0..=opcodes::ALOAD_3 => Some((opcodes::ALOAD, false)),
        opcodes::ISTORE | opcodes::ISTORE_0..=ISTORE_3 => Some((opcodes::ISTORE, true)),
        opcodes::LSTORE => Some((opcodes::LSTORE, true)),
        opcodes::FSTORE => Some((opcodes::FSTORE, true)),
        opcodes::DSTORE => Some((opcodes::DSTORE, true)),
        opcodes::ASTORE | opcodes::ASTORE_0..=opcodes::ASTORE_3 => Some((opcodes::ASTORE, true)),
        _ => None,
    }
}

fn slot_of(code: &[u8], offset: usize, opcode: u8) -> Result<u16, PatchError> {
    const LLOAD_3: u8 = opcodes::LLOAD_0 + 3;
    const FLOAD_3: u8 = opcodes::FLOAD_0 + 3;
    const DLOAD_3: u8 = opcodes::DLOAD_0 + 3;
    let general = match opcode {
        opcodes::ILOAD_0..=opcodes::ILOAD_3 => Some(opcode - opcodes::ILOAD_0),
        opcodes::ALOAD_0..=opcodes::ALOAD_3 => Some(opcode - opcodes::ALOAD_0),
        opcodes::LLOAD_0..=LLOAD_3 => Some(opcode - opcodes::LLOAD_0),
        opcodes::FLOAD_0..=FLOAD_3 => Some(opcode - opcodes::FLOAD_0),
        opcodes::DLOAD_0..=DLOAD_3 => Some(opcode - opcodes::DLOAD_0),
        opcodes::ISTORE_0 => Some(0),
        opcodes::ASTORE_0..=opcodes::ASTORE_3 => Some(opcode - opcodes::ASTORE_0),
        _ => None,
    };
    if let Some(slot) = general {
        return Ok(slot as u16);
    }
    Ok(code[offset + 1] as u16)
}

/// Rewrites a hook body destined for inline splicing (`Insert` mode,
/// §4.4): remaps constant-pool operands as [`remap_code`] does, and shifts
/// every local-variable slot by `locals_delta` so the hook's own locals
/// land past the host method's existing ones. Rejects any branch,
/// `switch`, or `invokedynamic` instruction — an inserted hook must be a
/// single linear body (no internal control flow to keep consistent once
/// re-emitted in non-compact form).
pub(crate) fn remap_code_for_insert(
    code: &[u8],
    source_pool: &ConstantPool,
    target_pool: &mut ConstantPool,
    locals_delta: u16,
) -> Result<Vec<u8>, PatchError> {
    let instructions = scan::decode_instructions(code)
        .map_err(|e| PatchError::UnresolvableHook { internal_name: String::new(), source: e })?;

    let mut out = Vec::with_capacity(code.len());
    for instruction in &instructions {
        let offset = instruction.offset as usize;
        if is_branch_or_switch(instruction.opcode) {
            return Err(unresolvable("hook body has internal control flow and cannot be inlined"));
        }
        if instruction.opcode == opcodes::INVOKEDYNAMIC {
            return Err(unresolvable("hook body uses invokedynamic, which this engine cannot transplant"));
        }

        if let Some((general_opcode, _is_store)) = local_slot_kind(instruction.opcode) {
            let old_slot = slot_of(code, offset, instruction.opcode)?;
            let new_slot = old_slot + locals_delta;
            emit_local_access(&mut out, general_opcode, new_slot);
            continue;
        }

        match instruction.opcode {
            opcodes::IINC => {
                let old_slot = code[offset + 1] as u16 + locals_delta;
                if old_slot > 0xff {
                    return Err(unresolvable("IINC slot overflowed a single byte after remapping"));
                }
                out.push(opcodes::IINC);
                out.push(old_slot as u8);
                out.push(code[offset + 2]);
            }
            opcodes::LDC => {
                let index = code[offset + 1] as u16;
                let remapped = remap_loadable(index, source_pool, target_pool)?;
                out.push(opcodes::LDC_W);
                out.extend_from_slice(&remapped.to_be_bytes());
            }
            opcodes::LDC_W | opcodes::LDC2_W => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_loadable(index, source_pool, target_pool)?;
                out.push(instruction.opcode);
                out.extend_from_slice(&remapped.to_be_bytes());
            }
            opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_fieldref(index, source_pool, target_pool)?;
                out.push(instruction.opcode);
                out.extend_from_slice(&remapped.to_be_bytes());
            }
            opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_methodref(index, source_pool, target_pool, false)?;
                out.push(instruction.opcode);
                out.extend_from_slice(&remapped.to_be_bytes());
            }
            opcodes::INVOKEINTERFACE => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_methodref(index, source_pool, target_pool, true)?;
                out.push(instruction.opcode);
                out.extend_from_slice(&remapped.to_be_bytes());
                out.push(code[offset + 3]);
                out.push(code[offset + 4]);
            }
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_class_index(index, source_pool, target_pool)?;
                out.push(instruction.opcode);
                out.extend_from_slice(&remapped.to_be_bytes());
            }
            opcodes::MULTIANEWARRAY => {
                let index = read_index(code, offset + 1)?;
                let remapped = remap_class_index(index, source_pool, target_pool)?;
                out.push(instruction.opcode);
                out.extend_from_slice(&remapped.to_be_bytes());
                out.push(code[offset + 3]);
            }
            _ => out.extend_from_slice(&code[offset..offset + instruction.length]),
        }
    }
    Ok(out)
}

fn is_branch_or_switch(opcode: u8) -> bool {
    matches!(
        opcode,
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
            | opcodes::RET
            | opcodes::IFNULL
            | opcodes::IFNONNULL
            | opcodes::GOTO_W
            | opcodes::JSR_W
            | opcodes::TABLESWITCH
            | opcodes::LOOKUPSWITCH
    )
}

/// Emits a local-variable load/store in compact `_0..._3` form when
/// possible, else the general `<OP> <slot>` form.
fn emit_local_access(out: &mut Vec<u8>, general_opcode: u8, slot: u16) {
    if slot <= 3 {
        let base = match general_opcode {
            opcodes::ILOAD => Some(opcodes::ILOAD_0),
            opcodes::LLOAD => Some(opcodes::LLOAD_0),
            opcodes::FLOAD => Some(opcodes::FLOAD_0),
            opcodes::DLOAD => Some(opcodes::DLOAD_0),
            opcodes::ALOAD => Some(opcodes::ALOAD_0),
            opcodes::ISTORE => Some(opcodes::ISTORE_0),
            opcodes::ASTORE => Some(opcodes::ASTORE_0),
            _ => None,
        };
        if let Some(base) = base {
            out.push(base + slot as u8);
            return;
        }
    }
    if slot <= 255 {
        out.push(general_opcode);
        out.push(slot as u8);
        return;
    }
    out.push(opcodes::WIDE);
    out.push(general_opcode);
    out.extend_from_slice(&slot.to_be_bytes());
}

fn remap_loadable(
    index: u16,
    source_pool: &ConstantPool,
    target_pool: &mut ConstantPool,
) -> Result<u16, PatchError> {
    match source_pool.get(index) {
        Some(
            entry @ (ConstantPoolEntry::Integer(_)
            | ConstantPoolEntry::Float(_)
            | ConstantPoolEntry::Long(_)
            | ConstantPoolEntry::Double(_)),
        ) => Ok(target_pool.get_or_insert_literal(entry.clone())),
        Some(ConstantPoolEntry::String { string_index }) => {
            let value = source_pool
                .utf8(*string_index)
                .map_err(|e| PatchError::UnresolvableHook { internal_name: String::new(), source: e })?;
            Ok(target_pool.get_or_insert_string(value))
        }
        Some(ConstantPoolEntry::Class { .. }) => remap_class_index(index, source_pool, target_pool),
        _ => Err(unresolvable("LDC operand is not a literal, string, or class this engine can remap")),
    }
}
