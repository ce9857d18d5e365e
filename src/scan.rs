//! Linear bytecode scanning helpers shared by the IR builder and every rewriter.
//!
//! Every rewriter needs to walk a method's instruction stream without
//! re-deriving per-opcode operand widths each time, so that logic lives
//! here once: [`opcode_length`] (how many bytes this instruction occupies,
//! including its opcode byte) and [`decode_instructions`] (a full linear
//! pass producing an [`Instruction`] per decoded opcode).

use anyhow::{Result, bail};

use crate::opcodes;

/// One decoded instruction: its offset, total encoded length, and opcode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) length: usize,
    pub(crate) opcode: u8,
}

/// Reads a big-endian `u16` at `offset`, failing if it runs past the end.
pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .ok_or_else(|| anyhow::anyhow!("truncated operand at offset {offset}"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads a big-endian `u32` at `offset`, failing if it runs past the end.
pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let bytes = code
        .get(offset..offset + 4)
        .ok_or_else(|| anyhow::anyhow!("truncated operand at offset {offset}"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a big-endian `i32` at `offset`.
pub(crate) fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    Ok(read_u32(code, offset)? as i32)
}

/// Number of bytes the instruction at `offset` occupies, opcode included.
pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = *code
        .get(offset)
        .ok_or_else(|| anyhow::anyhow!("offset {offset} out of range"))?;
    let length = match opcode {
        opcodes::WIDE => {
            let widened = code
                .get(offset + 1)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("truncated wide instruction at {offset}"))?;
            if widened == opcodes::IINC { 6 } else { 4 }
        }
        opcodes::TABLESWITCH => {
            let mut padded = offset + 1;
            while padded % 4 != 0 {
                padded += 1;
            }
            let low = read_i32(code, padded + 4)?;
            let high = read_i32(code, padded + 8)?;
            if high < low {
                bail!("tableswitch at {offset} has high < low");
            }
            let entry_count = (high - low + 1) as usize;
            (padded + 12 + entry_count * 4) - offset
        }
        opcodes::LOOKUPSWITCH => {
            let mut padded = offset + 1;
            while padded % 4 != 0 {
                padded += 1;
            }
            let npairs = read_u32(code, padded + 4)? as usize;
            (padded + 8 + npairs * 8) - offset
        }
        opcodes::BIPUSH
        | opcodes::LDC
        | opcodes::NEWARRAY
        | opcodes::ILOAD
        | opcodes::LLOAD
        | opcodes::FLOAD
        | opcodes::DLOAD
        | opcodes::ALOAD
        | opcodes::ISTORE
        | opcodes::LSTORE
        | opcodes::FSTORE
        | opcodes::DSTORE
        | opcodes::ASTORE
        | opcodes::RET => 2,
        opcodes::SIPUSH
        | opcodes::LDC_W
        | opcodes::LDC2_W
        | opcodes::IFEQ
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
        | opcodes::GETSTATIC
        | opcodes::PUTSTATIC
        | opcodes::GETFIELD
        | opcodes::PUTFIELD
        | opcodes::INVOKEVIRTUAL
        | opcodes::INVOKESPECIAL
        | opcodes::INVOKESTATIC
        | opcodes::NEW
        | opcodes::ANEWARRAY
        | opcodes::CHECKCAST
        | opcodes::INSTANCEOF
        | opcodes::IFNULL
        | opcodes::IFNONNULL => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC | opcodes::MULTIANEWARRAY => {
            if opcode == opcodes::MULTIANEWARRAY { 4 } else { 5 }
        }
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        _ => 1,
    };
    Ok(length)
}

/// Decodes every instruction in `code` in a single linear pass.
pub(crate) fn decode_instructions(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        instructions.push(Instruction {
            offset: offset as u32,
            length,
            opcode,
        });
        offset += length;
    }
    Ok(instructions)
}
