//! Decoded, read-only view over a method body: the call sites and
//! instruction boundaries every rewriter scans before it mutates anything.
//!
//! `spec.md` §4.5.4/§4.5.5/§4.5.6 all describe finding "calls that
//! syntactically match a specified inner call site (owner + name +
//! descriptor)". [`CallSite`] is that match target, built once per method
//! by resolving every `INVOKE*` instruction's constant-pool operand.

use anyhow::Result;

use crate::classfile::ConstantPool;
use crate::opcodes;
use crate::scan;

/// Which of the four `INVOKE*` forms produced a [`CallSite`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) enum CallKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl CallKind {
    pub(crate) fn opcode(self) -> u8 {
        match self {
            CallKind::Virtual => opcodes::INVOKEVIRTUAL,
            CallKind::Special => opcodes::INVOKESPECIAL,
            CallKind::Static => opcodes::INVOKESTATIC,
            CallKind::Interface => opcodes::INVOKEINTERFACE,
        }
    }

    fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            opcodes::INVOKEVIRTUAL => Some(CallKind::Virtual),
            opcodes::INVOKESPECIAL => Some(CallKind::Special),
            opcodes::INVOKESTATIC => Some(CallKind::Static),
            opcodes::INVOKEINTERFACE => Some(CallKind::Interface),
            _ => None,
        }
    }
}

/// One resolved call site: the owner/name/descriptor an `INVOKE*`
/// instruction's constant-pool operand points to, and where it sits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CallSite {
    pub(crate) offset: u32,
    /// Total length of the instruction, including the opcode byte.
    pub(crate) length: usize,
    pub(crate) kind: CallKind,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl CallSite {
    pub(crate) fn matches(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.owner == owner && self.name == name && self.descriptor == descriptor
    }
}

/// Scans `code` for every `INVOKE*` instruction and resolves its operand
/// against `pool`, in ascending offset order.
pub(crate) fn scan_calls(code: &[u8], pool: &ConstantPool) -> Result<Vec<CallSite>> {
    let mut calls = Vec::new();
    for instruction in scan::decode_instructions(code)? {
        let Some(kind) = CallKind::from_opcode(instruction.opcode) else {
            continue;
        };
        let operand_index = scan::read_u16(code, instruction.offset as usize + 1)?;
        let (owner, name, descriptor) = pool.resolve_ref(operand_index)?;
        calls.push(CallSite {
            offset: instruction.offset,
            length: instruction.length,
            kind,
            owner,
            name,
            descriptor,
        });
    }
    Ok(calls)
}
