/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Format selection: turn scheduled bundles into encodings.
//!
//! Each bundle that still carries the catalog's placeholder opcode gets the
//! smallest format covering its occupied slots.  Its members are rewritten
//! into the format's slot order, and the slots nobody occupies receive that
//! slot's no-op.

use log::{debug, trace};

use crate::bundle::Bundle;
use crate::data_structures::{Opcode, SlotBits};
use crate::emit::{CodeItem, ScheduledBlock};
use crate::format::{FieldSign, VliwFormat};
use crate::interface::{Function, SchedError, SlotCatalog};

/// The sign the member opcodes ask for, if they agree on exactly one.
fn hinted_sign(catalog: &dyn SlotCatalog, opcodes: &[Opcode]) -> Option<FieldSign> {
  let mut hinted = None;
  for op in opcodes {
    match (catalog.sign_hint(*op), hinted) {
      (None, _) | (Some(FieldSign::Neutral), _) => {}
      (Some(sign), None) => hinted = Some(sign),
      (Some(sign), Some(prev)) if sign == prev => {}
      (Some(_), Some(_)) => return None,
    }
  }
  hinted
}

/// Choose among |candidates|, which all have the same size and all cover
/// |slots|.
pub(crate) fn pick_candidate<'c>(
  catalog: &dyn SlotCatalog, candidates: &[&'c VliwFormat], slots: SlotBits,
  opcodes: &[Opcode],
) -> Result<&'c VliwFormat, SchedError> {
  debug_assert!(!candidates.is_empty());
  let first = candidates[0];
  if candidates.iter().all(|f| f.sign == first.sign) {
    return Ok(first);
  }
  let sign = match hinted_sign(catalog, opcodes) {
    Some(sign) => sign,
    None => {
      debug!("pick_candidate: no hint for slot set {:#x}", slots);
      return Err(SchedError::AmbiguousFormat { slots });
    }
  };
  candidates
    .iter()
    .find(|f| f.sign == sign)
    .or_else(|| candidates.iter().find(|f| f.sign == FieldSign::Neutral))
    .copied()
    .ok_or(SchedError::AmbiguousFormat { slots })
}

/// The format for a bundle occupying |slots| with members |opcodes|.  Panics
/// if no format covers |slots|: the scheduler only builds bundles that have
/// one.
pub fn resolve_format<'c>(
  catalog: &'c dyn SlotCatalog, slots: SlotBits, opcodes: &[Opcode],
) -> Result<&'c VliwFormat, SchedError> {
  let candidates = catalog.formats().minimal_candidates(slots);
  if candidates.is_empty() {
    panic!("resolve_format: no format holds slot set {:#x}", slots);
  }
  pick_candidate(catalog, &candidates, slots, opcodes)
}

/// Rebuild the slot assignment of |members| the way the scheduler made it.
/// The bundle holds indices into |members|.
pub(crate) fn rebuild_bundle<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, members: &[F::Inst],
) -> Bundle<usize> {
  let mut bundle = Bundle::new();
  for (ix, insn) in members.iter().enumerate() {
    bundle.add(catalog, ix, func.opcode(insn));
  }
  bundle
}

/// Lay |members| out in |format|'s slot order, filling free slots with
/// no-ops.
pub(crate) fn encode_members<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, format: &VliwFormat,
  bundle: &Bundle<usize>, members: &[F::Inst],
) -> Vec<F::Inst> {
  format
    .slots
    .iter()
    .map(|slot| match bundle.at(*slot) {
      Some(ix) => members[*ix].clone(),
      None => func.gen_nop(catalog.slot_info(*slot).nop_opcode),
    })
    .collect()
}

/// Select a format for every bundle of |block| that doesn't have one yet.
pub fn select_formats<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, block: &mut ScheduledBlock<F::Inst>,
) -> Result<(), SchedError> {
  let placeholder = catalog.bundle_opcode();
  let mut selected = 0;
  for item in block.items.iter_mut() {
    let (opcode, members) = match item {
      CodeItem::Bundle { opcode, members } if *opcode == placeholder => {
        (opcode, members)
      }
      _ => continue,
    };
    let bundle = rebuild_bundle(func, catalog, members);
    let format =
      resolve_format(catalog, bundle.occupied_slots(), &bundle.opcodes())?;
    trace!("{:?}: {} -> {}", block.block, members.len(), format.name);
    *members = encode_members(func, catalog, format, &bundle, members);
    *opcode = format.opcode;
    selected += 1;
  }
  debug!("select_formats: {:?}: {} bundles", block.block, selected);
  Ok(())
}

/// Recover the slot assignment of an encoded bundle: the member at position
/// i of |members| sits in slot i of the format named by |opcode|.  No-op
/// fillers are dropped.  Returns None if |opcode| is not a format or the
/// members don't fit it.
pub fn regroup_bundle<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, opcode: Opcode, members: &[F::Inst],
) -> Option<Bundle<F::Inst>> {
  let format = catalog.format_by_opcode(opcode)?;
  if format.slots.len() != members.len() {
    return None;
  }
  let mut bundle = Bundle::new();
  for (slot, insn) in format.slots.iter().zip(members.iter()) {
    let op = func.opcode(insn);
    if op == catalog.slot_info(*slot).nop_opcode {
      continue;
    }
    if !catalog.slot_alternatives(op).contains(slot) {
      return None;
    }
    bundle.add_in_slot(*slot, insn.clone(), op);
  }
  Some(bundle)
}

#[cfg(test)]
pub(crate) mod test {
  use super::*;
  use crate::bundle::test::*;
  use crate::data_structures::{slot_bit, BlockIx, InstIx, Range, Reg, SlotKind};
  use crate::interblock::BlockType;
  use crate::interface::{InstRegUses, MemAccess};
  use smallvec::smallvec;

  /// A single block of (opcode, tag) pairs, without registers.
  pub(crate) struct Ops(pub(crate) Vec<(Opcode, u32)>);

  impl Function for Ops {
    type Inst = (Opcode, u32);
    fn insns(&self) -> &[Self::Inst] {
      &self.0
    }
    fn blocks(&self) -> Range<BlockIx> {
      Range::new(BlockIx::new(0), 1)
    }
    fn entry_block(&self) -> BlockIx {
      BlockIx::new(0)
    }
    fn block_insns(&self, _block: BlockIx) -> Range<InstIx> {
      Range::new(InstIx::new(0), self.0.len())
    }
    fn block_succs(&self, _block: BlockIx) -> Vec<BlockIx> {
      vec![]
    }
    fn opcode(&self, insn: &Self::Inst) -> Opcode {
      insn.0
    }
    fn get_regs(&self, insn: &Self::Inst) -> InstRegUses {
      InstRegUses { used: smallvec![], defined: smallvec![Reg::new(insn.1)] }
    }
    fn mem_access(&self, _insn: &Self::Inst) -> MemAccess {
      MemAccess::None
    }
    fn is_region_end(&self, insn: &Self::Inst) -> bool {
      insn.0 == CALL_OP
    }
    fn is_alignment_boundary(&self, insn: &Self::Inst) -> bool {
      insn.0 == CALL_OP
    }
    fn gen_nop(&self, opcode: Opcode) -> Self::Inst {
      (opcode, 0)
    }
  }

  pub(crate) fn block_of(
    items: Vec<CodeItem<(Opcode, u32)>>,
  ) -> ScheduledBlock<(Opcode, u32)> {
    ScheduledBlock { block: BlockIx::new(0), kind: BlockType::Regular, items }
  }

  pub(crate) fn bundle(members: &[(Opcode, u32)]) -> CodeItem<(Opcode, u32)> {
    CodeItem::Bundle { opcode: BUNDLE_OP, members: members.to_vec() }
  }

  #[test]
  fn selects_smallest_and_fills_nops() {
    let cat = TinyCatalog::new();
    let f = Ops(vec![]);
    let mut b = block_of(vec![
      bundle(&[(ALU_OP, 1), (LD_OP, 2)]),
      bundle(&[(LD_OP, 3)]),
      bundle(&[]),
      CodeItem::Single((CALL_OP, 4)),
    ]);
    select_formats(&f, &cat, &mut b).unwrap();
    // AL lists the ld slot first.
    assert_eq!(
      b.items[0],
      CodeItem::Bundle { opcode: Opcode(102), members: vec![(LD_OP, 2), (ALU_OP, 1)] }
    );
    assert_eq!(
      b.items[1],
      CodeItem::Bundle { opcode: Opcode(101), members: vec![(LD_OP, 3)] }
    );
    // An empty cycle becomes a bundle of no-ops in the smallest format.
    assert_eq!(
      b.items[2],
      CodeItem::Bundle { opcode: Opcode(100), members: vec![(NOP_ALU, 0)] }
    );
    assert_eq!(b.items[3], CodeItem::Single((CALL_OP, 4)));
  }

  #[test]
  fn selection_is_idempotent() {
    let cat = TinyCatalog::new();
    let f = Ops(vec![]);
    let mut b = block_of(vec![
      bundle(&[(LNG_OP, 1), (LD_OP, 2)]),
      bundle(&[(EITHER_OP, 3), (EITHER_OP, 4)]),
    ]);
    select_formats(&f, &cat, &mut b).unwrap();
    let once = b.items.clone();
    select_formats(&f, &cat, &mut b).unwrap();
    assert_eq!(b.items, once);
  }

  #[test]
  fn regroup_recovers_slots() {
    let cat = TinyCatalog::new();
    let f = Ops(vec![]);
    let members = [(LNG_OP, 1), (LD_OP, 2)];
    let original = rebuild_bundle(&f, &cat, &members);
    let mut b = block_of(vec![bundle(&members)]);
    select_formats(&f, &cat, &mut b).unwrap();
    let (opcode, encoded) = match &b.items[0] {
      CodeItem::Bundle { opcode, members } => (*opcode, members.clone()),
      _ => panic!("expected a bundle"),
    };
    let regrouped = regroup_bundle(&f, &cat, opcode, &encoded).unwrap();
    assert_eq!(regrouped.occupied_slots(), original.occupied_slots());
    for (ix, slot) in original.instrs() {
      assert_eq!(regrouped.at(slot.unwrap()), Some(&members[ix]));
    }
    // A member in a slot it can't take is refused.
    assert!(regroup_bundle(&f, &cat, Opcode(101), &[(ALU_OP, 1)]).is_none());
    assert!(regroup_bundle(&f, &cat, Opcode(7), &[(ALU_OP, 1)]).is_none());
  }

  #[test]
  fn sign_hints_break_ties() {
    let cat = TinyCatalog::new();
    let lng = slot_bit(SlotKind::new(2));
    assert_eq!(resolve_format(&cat, lng, &[LNG_S_OP]).unwrap().name, "XS");
    assert_eq!(resolve_format(&cat, lng, &[LNG_U_OP]).unwrap().name, "XU");
    assert_eq!(
      resolve_format(&cat, lng, &[LNG_OP]).unwrap_err(),
      SchedError::AmbiguousFormat { slots: lng }
    );
    // Candidates that agree on sign need no hint.
    assert_eq!(resolve_format(&cat, 0b011, &[ALU_OP, LD_OP]).unwrap().name, "AL");

    let f = Ops(vec![]);
    let mut b = block_of(vec![bundle(&[(LNG_U_OP, 1)]), bundle(&[(LNG_OP, 2)])]);
    assert!(select_formats(&f, &cat, &mut b).is_err());
  }

  #[test]
  #[should_panic]
  fn missing_format_panics() {
    let cat = TinyCatalog::new();
    // alu and lng never share a format.
    let _ = resolve_format(&cat, 0b101, &[ALU_OP, LNG_OP]);
  }
}
