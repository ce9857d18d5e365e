//! Per-method derived table of parameter slots, sizes, and type-specific
//! opcodes — §4.3.
//!
//! Every rewriter needs to push "the i-th parameter" or "the receiver" or
//! "the return value" onto the stack without re-deriving JVM local-slot
//! arithmetic each time; [`MethodLogistics`] computes that table once from
//! `(access_flags, descriptor)` and is then queried by every primitive in
//! [`crate::rewrite`].

use crate::descriptor::{DecomposedDescriptor, decompose_method_descriptor};
use crate::error::PatchError;
use crate::opcodes;

const ACC_STATIC: u16 = 0x0008;

/// Size, in local-variable/operand-stack slots, of a dotted human-form
/// type (`"long"`, `"java.lang.String[]"`, …).
pub(crate) fn slot_size_of_human(human: &str) -> u8 {
    slot_size(&crate::descriptor::to_internal_type(human))
}

/// Size, in local-variable/operand-stack slots, of an internal-form JVM
/// type descriptor (`"J"`, `"Ljava/lang/String;"`, …).
pub(crate) fn slot_size_of_descriptor(descriptor: &str) -> u8 {
    slot_size(descriptor)
}

/// Size, in local-variable/operand-stack slots, of one JVM value category.
fn slot_size(descriptor: &str) -> u8 {
    match descriptor.as_bytes().first() {
        Some(b'J') | Some(b'D') => 2,
        Some(b'V') => 0,
        _ => 1,
    }
}

/// One parameter's position and type-specific load opcode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ParamSlot {
    pub(crate) slot_index: u16,
    pub(crate) size: u8,
    pub(crate) load_opcode: u8,
}

/// Derived per-method table, per §3/§4.3.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodLogistics {
    pub(crate) is_static: bool,
    pub(crate) return_descriptor: String,
    pub(crate) return_size: u8,
    pub(crate) return_opcode: u8,
    pub(crate) params: Vec<ParamSlot>,
    /// First local-variable slot available after the receiver (if any)
    /// and all parameters — §8 property 3.
    pub(crate) first_local_slot: u16,
}

impl MethodLogistics {
    pub(crate) fn compute(access_flags: u16, descriptor: &str) -> Result<Self, PatchError> {
        let is_static = access_flags & ACC_STATIC != 0;
        let DecomposedDescriptor { return_type, parameter_types } =
            decompose_method_descriptor(descriptor)?;

        let mut slot = if is_static { 0 } else { 1 };
        let mut params = Vec::with_capacity(parameter_types.len());
        for param_descriptor in &parameter_types {
            let size = slot_size(param_descriptor);
            params.push(ParamSlot {
                slot_index: slot,
                size,
                load_opcode: load_opcode_for(param_descriptor),
            });
            slot += size as u16;
        }

        Ok(Self {
            is_static,
            return_size: slot_size(&return_type),
            return_opcode: return_opcode_for(&return_type),
            return_descriptor: return_type,
            params,
            first_local_slot: slot,
        })
    }

    /// Emits the load opcode + operand for the receiver, or `ACONST_NULL`
    /// when the method is static (§4.3).
    pub(crate) fn emit_load_this(&self, out: &mut Vec<u8>) {
        if self.is_static {
            out.push(opcodes::ACONST_NULL);
        } else {
            out.push(opcodes::ALOAD_0);
        }
    }

    /// Emits the load instruction for the `index`-th parameter (0-based),
    /// using the compact `_N` form for slots 0–3 where one exists.
    pub(crate) fn emit_load_param(&self, out: &mut Vec<u8>, index: usize) -> Result<(), PatchError> {
        let param = self.params.get(index).ok_or_else(|| {
            PatchError::InvalidConfiguration(format!("no parameter at index {index}"))
        })?;
        emit_load(out, param.load_opcode, param.slot_index);
        Ok(())
    }

    pub(crate) fn emit_return(&self, out: &mut Vec<u8>) {
        out.push(self.return_opcode);
    }

    /// Emits `DUP`/`DUP2`/nothing, sized to the method's return value.
    pub(crate) fn emit_dup_return(&self, out: &mut Vec<u8>) {
        match self.return_size {
            1 => out.push(opcodes::DUP),
            2 => out.push(opcodes::DUP2),
            _ => {}
        }
    }

    /// Emits `POP`/`POP2`/nothing, sized to the method's return value.
    pub(crate) fn emit_pop_return(&self, out: &mut Vec<u8>) {
        match self.return_size {
            1 => out.push(opcodes::POP),
            2 => out.push(opcodes::POP2),
            _ => {}
        }
    }
}

/// Sized `DUP`/`DUP2`/nothing for an arbitrary descriptor's value size,
/// used when a call site's own return (not the outer method's) needs
/// preserving — §4.5.4.
pub(crate) fn dup_for_descriptor(out: &mut Vec<u8>, descriptor: &str) {
    match slot_size(descriptor) {
        1 => out.push(opcodes::DUP),
        2 => out.push(opcodes::DUP2),
        _ => {}
    }
}

pub(crate) fn pop_for_descriptor(out: &mut Vec<u8>, descriptor: &str) {
    match slot_size(descriptor) {
        1 => out.push(opcodes::POP),
        2 => out.push(opcodes::POP2),
        _ => {}
    }
}

pub(crate) fn return_opcode_for(descriptor: &str) -> u8 {
    match descriptor.as_bytes().first() {
        Some(b'V') => opcodes::RETURN,
        Some(b'J') => opcodes::LRETURN,
        Some(b'F') => opcodes::FRETURN,
        Some(b'D') => opcodes::DRETURN,
        Some(b'[') | Some(b'L') => opcodes::ARETURN,
        _ => opcodes::IRETURN,
    }
}

fn load_opcode_for(descriptor: &str) -> u8 {
    match descriptor.as_bytes().first() {
        Some(b'J') => opcodes::LLOAD,
        Some(b'F') => opcodes::FLOAD,
        Some(b'D') => opcodes::DLOAD,
        Some(b'[') | Some(b'L') => opcodes::ALOAD,
        _ => opcodes::ILOAD,
    }
}

/// Emits the compact `_0`..`_3` load form when `slot <= 3`, else the
/// general `<OP> <slot>` form (widened with `WIDE` past 255).
fn emit_load(out: &mut Vec<u8>, load_opcode: u8, slot: u16) {
    if slot <= 3 {
        let base_n = match load_opcode {
            opcodes::ILOAD => opcodes::ILOAD_0,
            opcodes::LLOAD => opcodes::LLOAD_0,
            opcodes::FLOAD => opcodes::FLOAD_0,
            opcodes::DLOAD => opcodes::DLOAD_0,
            opcodes::ALOAD => opcodes::ALOAD_0,
            _ => unreachable!("load_opcode_for only returns *LOAD opcodes"),
        };
        out.push(base_n + slot as u8);
        return;
    }
    if slot <= 255 {
        out.push(load_opcode);
        out.push(slot as u8);
        return;
    }
    out.push(opcodes::WIDE);
    out.push(load_opcode);
    out.extend_from_slice(&slot.to_be_bytes());
}

fn store_opcode_for(descriptor: &str) -> u8 {
    match descriptor.as_bytes().first() {
        Some(b'J') => opcodes::LSTORE,
        Some(b'F') => opcodes::FSTORE,
        Some(b'D') => opcodes::DSTORE,
        Some(b'[') | Some(b'L') => opcodes::ASTORE,
        _ => opcodes::ISTORE,
    }
}

fn emit_store(out: &mut Vec<u8>, store_opcode: u8, slot: u16) {
    if slot <= 3 {
        let base_n = match store_opcode {
            opcodes::ISTORE => opcodes::ISTORE_0,
            opcodes::LSTORE => opcodes::ISTORE_0 + 4,
            opcodes::FSTORE => opcodes::ISTORE_0 + 8,
            opcodes::DSTORE => opcodes::ISTORE_0 + 12,
            opcodes::ASTORE => opcodes::ASTORE_0,
            _ => unreachable!("store_opcode_for only returns *STORE opcodes"),
        };
        out.push(base_n + slot as u8);
        return;
    }
    if slot <= 255 {
        out.push(store_opcode);
        out.push(slot as u8);
        return;
    }
    out.push(opcodes::WIDE);
    out.push(store_opcode);
    out.extend_from_slice(&slot.to_be_bytes());
}

/// Emits a load instruction for an arbitrary descriptor and local slot,
/// used when a rewriter needs to reload a value it stashed with
/// [`emit_store_local`] rather than one of a method's own parameters.
pub(crate) fn emit_load_local(out: &mut Vec<u8>, descriptor: &str, slot: u16) {
    emit_load(out, load_opcode_for(descriptor), slot);
}

/// Emits a store instruction sized to `descriptor`, saving the top of the
/// operand stack into `slot` — used by rewriters that need to hold a
/// tentative return value or call-site result across a hook invocation.
pub(crate) fn emit_store_local(out: &mut Vec<u8>, descriptor: &str, slot: u16) {
    emit_store(out, store_opcode_for(descriptor), slot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_method_slots_start_at_zero() {
        let logistics = MethodLogistics::compute(0x0008, "(JI)V").unwrap();
        assert!(logistics.is_static);
        assert_eq!(logistics.params[0].slot_index, 0);
        assert_eq!(logistics.params[0].size, 2);
        assert_eq!(logistics.params[1].slot_index, 2);
        assert_eq!(logistics.params[1].size, 1);
        assert_eq!(logistics.first_local_slot, 3);
    }

    #[test]
    fn instance_method_reserves_receiver_slot() {
        let logistics = MethodLogistics::compute(0x0001, "(Ljava/lang/String;D)I").unwrap();
        assert!(!logistics.is_static);
        assert_eq!(logistics.params[0].slot_index, 1);
        assert_eq!(logistics.params[0].size, 1);
        assert_eq!(logistics.params[1].slot_index, 2);
        assert_eq!(logistics.params[1].size, 2);
        assert_eq!(logistics.first_local_slot, 4);
    }

    proptest::proptest! {
        /// For any mix of static/instance and any run of parameter types,
        /// `first_local_slot` must equal the receiver slot (0 or 1) plus
        /// the summed widths of every parameter — the invariant every
        /// prologue emitter (`emit_load_this`, `emit_load_param`,
        /// `SetSymbolDuringMethodCall`'s wrapper) relies on to place its
        /// own temporaries past the method's real locals.
        #[test]
        fn logistics_consistency_s8_property_3(
            is_static in proptest::bool::ANY,
            params in proptest::collection::vec(
                proptest::sample::select(vec!["I", "J", "F", "D", "Ljava/lang/Object;", "[I"]),
                0..6,
            ),
        ) {
            let access = if is_static { 0x0008u16 } else { 0x0001u16 };
            let descriptor = format!("({})V", params.concat());
            let logistics = MethodLogistics::compute(access, &descriptor).unwrap();
            let receiver_slot: u16 = if logistics.is_static { 0 } else { 1 };
            let param_size_sum: u16 = logistics.params.iter().map(|p| p.size as u16).sum();
            proptest::prop_assert_eq!(receiver_slot + param_size_sum, logistics.first_local_slot);
        }
    }

    #[test]
    fn return_opcodes_match_descriptor_category() {
        assert_eq!(return_opcode_for("V"), opcodes::RETURN);
        assert_eq!(return_opcode_for("I"), opcodes::IRETURN);
        assert_eq!(return_opcode_for("J"), opcodes::LRETURN);
        assert_eq!(return_opcode_for("F"), opcodes::FRETURN);
        assert_eq!(return_opcode_for("D"), opcodes::DRETURN);
        assert_eq!(return_opcode_for("Ljava/lang/String;"), opcodes::ARETURN);
        assert_eq!(return_opcode_for("[I"), opcodes::ARETURN);
    }

    #[test]
    fn emit_load_param_uses_compact_form_for_low_slots() {
        let logistics = MethodLogistics::compute(0x0001, "(I)V").unwrap();
        let mut out = Vec::new();
        logistics.emit_load_param(&mut out, 0).unwrap();
        assert_eq!(out, vec![opcodes::ILOAD_1]);
    }

    #[test]
    fn store_then_load_local_round_trips_for_every_category() {
        for (descriptor, store_base, load_base) in [
            ("I", opcodes::ISTORE_0, opcodes::ILOAD_0),
            ("J", opcodes::ISTORE_0 + 4, opcodes::LLOAD_0),
            ("Ljava/lang/String;", opcodes::ASTORE_0, opcodes::ALOAD_0),
        ] {
            let mut out = Vec::new();
            emit_store_local(&mut out, descriptor, 2);
            emit_load_local(&mut out, descriptor, 2);
            assert_eq!(out, vec![store_base + 2, load_base + 2]);
        }
    }

    #[test]
    fn emit_store_local_widens_past_slot_three() {
        let mut out = Vec::new();
        emit_store_local(&mut out, "I", 10);
        assert_eq!(out, vec![opcodes::ISTORE, 10]);
    }
}
