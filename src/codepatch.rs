//! Splices bytes into a method body at arbitrary offsets and fixes up
//! every offset-sensitive structure that crosses the splice: branch
//! targets, `TABLESWITCH`/`LOOKUPSWITCH` targets, and the exception table.
//!
//! Every primitive rewriter in [`crate::rewrite`] needs this: prepending
//! an `ExitEarly` prologue, or injecting code after a matched return or
//! call site, shifts every instruction downstream of the insertion point.
//! Writing that offset algebra once here keeps each rewriter focused on
//! *what* bytecode to emit rather than *how* to keep the method walkable
//! afterward.

use crate::classfile::{CodeAttribute, ExceptionTableEntry};
use crate::opcodes;
use crate::scan;

/// One splice: replace `remove` original bytes starting at offset `at`
/// with `bytes`. `remove == 0` is a pure insertion (the common case, used
/// by every rewriter that only ever prepends or appends code); `remove >
/// 0` additionally deletes bytes, used by rewriters that rewrite a call
/// site of a different encoded length than the one it replaces. Multiple
/// splices may target the same method; they are applied in ascending `at`
/// order, each shifting everything from that point on and must not
/// overlap.
#[derive(Clone, Debug)]
pub(crate) struct Splice {
    pub(crate) at: u32,
    pub(crate) remove: u32,
    pub(crate) bytes: Vec<u8>,
}

impl Splice {
    pub(crate) fn insert(at: u32, bytes: Vec<u8>) -> Self {
        Self { at, remove: 0, bytes }
    }

    pub(crate) fn replace(at: u32, remove: u32, bytes: Vec<u8>) -> Self {
        Self { at, remove, bytes }
    }
}

/// Maps an offset in the pre-splice code to its position in the
/// post-splice code. An offset at or past a splice's removed region
/// shifts by that splice's net length change; an offset that would have
/// landed inside a removed region snaps to the start of its replacement,
/// since no rewriter ever targets the interior of bytes it is deleting.
fn remap_offset(old_offset: u32, splices: &[Splice]) -> u32 {
    let mut delta: i64 = 0;
    for splice in splices {
        let removed_end = splice.at + splice.remove;
        if old_offset < splice.at {
            break;
        }
        if old_offset < removed_end {
            return (splice.at as i64 + delta) as u32;
        }
        delta += splice.bytes.len() as i64 - splice.remove as i64;
    }
    (old_offset as i64 + delta) as u32
}

/// Applies `splices` to `code.code`, rewriting every branch target,
/// switch target, and exception-table entry to account for the shift, and
/// updates `code.max_stack`/`code.max_locals` by the given deltas.
pub(crate) fn apply_splices(
    code: &mut CodeAttribute,
    mut splices: Vec<Splice>,
    extra_stack: u16,
    extra_locals: u16,
) -> anyhow::Result<()> {
    if splices.is_empty() {
        code.max_stack += extra_stack;
        code.max_locals += extra_locals;
        return Ok(());
    }
    splices.sort_by_key(|s| s.at);

    let original = code.code.clone();
    let mut rewritten = rewrite_branch_targets(&original, &splices)?;

    let mut spliced = Vec::with_capacity(rewritten.len() + splices.iter().map(|s| s.bytes.len()).sum::<usize>());
    let mut cursor = 0usize;
    for splice in &splices {
        let at = splice.at as usize;
        spliced.extend_from_slice(&rewritten[cursor..at]);
        spliced.extend_from_slice(&splice.bytes);
        cursor = at + splice.remove as usize;
    }
    spliced.extend_from_slice(&rewritten[cursor..]);
    std::mem::swap(&mut rewritten, &mut spliced);

    for entry in &mut code.exception_table {
        entry.start_pc = remap_offset(entry.start_pc as u32, &splices) as u16;
        entry.end_pc = remap_offset(entry.end_pc as u32, &splices) as u16;
        entry.handler_pc = remap_offset(entry.handler_pc as u32, &splices) as u16;
    }

    code.code = rewritten;
    code.max_stack += extra_stack;
    code.max_locals += extra_locals;
    Ok(())
}

/// Rewrites every branch/switch-target operand in `code` to its
/// post-splice position, returning a new buffer the same length as
/// `code` (splicing itself happens afterward, in [`apply_splices`]).
fn rewrite_branch_targets(code: &[u8], splices: &[Splice]) -> anyhow::Result<Vec<u8>> {
    let mut out = code.to_vec();
    for instruction in scan::decode_instructions(code)? {
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
                let target = instruction.offset as i32 + delta;
                let new_target = remap_offset(target as u32, splices) as i32;
                let new_instruction_offset = remap_offset(instruction.offset, splices) as i32;
                let new_delta = (new_target - new_instruction_offset) as i16;
                out[offset + 1..offset + 3].copy_from_slice(&new_delta.to_be_bytes());
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let delta = scan::read_u32(code, offset + 1)? as i32;
                let target = instruction.offset as i32 + delta;
                let new_target = remap_offset(target as u32, splices) as i32;
                let new_instruction_offset = remap_offset(instruction.offset, splices) as i32;
                let new_delta = new_target - new_instruction_offset;
                out[offset + 1..offset + 5].copy_from_slice(&new_delta.to_be_bytes());
            }
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
                rewrite_switch_targets(code, &mut out, &instruction, splices)?;
            }
            _ => {}
        }
    }
    Ok(out)
}

fn rewrite_switch_targets(
    code: &[u8],
    out: &mut [u8],
    instruction: &scan::Instruction,
    splices: &[Splice],
) -> anyhow::Result<()> {
    let offset = instruction.offset as usize;
    let mut padded = offset + 1;
    while padded % 4 != 0 {
        padded += 1;
    }

    let new_instruction_offset = remap_offset(instruction.offset, splices) as i32;
    let rewrite_entry = |out: &mut [u8], entry_offset: usize| -> anyhow::Result<()> {
        let delta = scan::read_i32(code, entry_offset)?;
        let target = instruction.offset as i32 + delta;
        let new_target = remap_offset(target as u32, splices) as i32;
        let new_delta = new_target - new_instruction_offset;
        out[entry_offset..entry_offset + 4].copy_from_slice(&new_delta.to_be_bytes());
        Ok(())
    };

    rewrite_entry(out, padded)?; // default

    if instruction.opcode == opcodes::TABLESWITCH {
        let low = scan::read_i32(code, padded + 4)?;
        let high = scan::read_i32(code, padded + 8)?;
        let count = (high - low + 1) as usize;
        for i in 0..count {
            rewrite_entry(out, padded + 12 + i * 4)?;
        }
    } else {
        let npairs = scan::read_u32(code, padded + 4)? as usize;
        for i in 0..npairs {
            rewrite_entry(out, padded + 8 + i * 8 + 4)?;
        }
    }
    Ok(())
}

/// Builds a flattened exception-table entry covering every handler that
/// must be re-pointed when its region gains a prologue/epilogue — a
/// convenience for rewriters that only ever append whole new handlers,
/// not relocate existing ones.
pub(crate) fn append_handler(
    code: &mut CodeAttribute,
    start_pc: u16,
    end_pc: u16,
    handler_pc: u16,
    catch_type: u16,
) {
    code.exception_table.push(ExceptionTableEntry { start_pc, end_pc, handler_pc, catch_type });
}
