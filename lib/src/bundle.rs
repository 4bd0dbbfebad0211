/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Bundles: the instructions that issue together in one cycle.
//!
//! A bundle owns an array indexed by slot ordinal.  The occupied-slot bitset
//! is cached alongside and checked against the array in debug builds.
//! Meta instructions are kept on a side list and never take a slot.  An
//! instruction without a known slot can only be issued on its own; the
//! bundle holding it is "standalone" and accepts nothing else.

use smallvec::SmallVec;

use crate::data_structures::{
  slot_bit, Opcode, SlotBits, SlotKind, MAX_SLOTS,
};
use crate::format::VliwFormat;
use crate::interface::SlotCatalog;

#[derive(Clone, Debug)]
pub struct Bundle<I> {
  slots: Vec<Option<(I, Opcode)>>,
  occupied: SlotBits,
  // Slot ordinals in insertion order.
  order: SmallVec<[u8; 8]>,
  standalone: Option<(I, Opcode)>,
  meta: Vec<(I, Opcode)>,
}

impl<I: Clone> Bundle<I> {
  pub fn new() -> Self {
    Self {
      slots: Vec::new(),
      occupied: 0,
      order: SmallVec::new(),
      standalone: None,
      meta: Vec::new(),
    }
  }

  /// Number of non-meta instructions.
  pub fn len(&self) -> usize {
    self.order.len() + if self.standalone.is_some() { 1 } else { 0 }
  }

  /// A bundle with only meta instructions is still empty.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_standalone(&self) -> bool {
    self.standalone.is_some()
  }

  pub fn occupied_slots(&self) -> SlotBits {
    self.check_consistency();
    self.occupied
  }

  /// The instruction occupying |slot|, if any.
  pub fn at(&self, slot: SlotKind) -> Option<&I> {
    self
      .slots
      .get(slot.get() as usize)
      .and_then(|e| e.as_ref())
      .map(|(i, _)| i)
  }

  pub fn opcode_at(&self, slot: SlotKind) -> Option<Opcode> {
    self.slots.get(slot.get() as usize).and_then(|e| e.as_ref()).map(|e| e.1)
  }

  /// Non-meta instructions in insertion order, each with the slot it
  /// occupies.  A standalone instruction has no slot.
  pub fn instrs(&self) -> Vec<(I, Option<SlotKind>)> {
    if let Some((i, _)) = &self.standalone {
      return vec![(i.clone(), None)];
    }
    self
      .order
      .iter()
      .map(|s| {
        let (i, _) = self.slots[*s as usize].as_ref().unwrap();
        (i.clone(), Some(SlotKind::new(*s as u32)))
      })
      .collect()
  }

  /// Opcodes of the non-meta instructions, in insertion order.
  pub fn opcodes(&self) -> Vec<Opcode> {
    if let Some((_, op)) = &self.standalone {
      return vec![*op];
    }
    self.order.iter().map(|s| self.slots[*s as usize].as_ref().unwrap().1).collect()
  }

  /// Opcode and issue slot set of each non-meta member.  A standalone
  /// instruction occupies no slot.
  pub fn issue_slots(&self) -> Vec<(Opcode, SlotBits)> {
    if let Some((_, op)) = &self.standalone {
      return vec![(*op, 0)];
    }
    self
      .order
      .iter()
      .map(|s| {
        let op = self.slots[*s as usize].as_ref().unwrap().1;
        (op, slot_bit(SlotKind::new(*s as u32)))
      })
      .collect()
  }

  pub fn meta_instrs(&self) -> impl Iterator<Item = &I> {
    self.meta.iter().map(|(i, _)| i)
  }

  /// Find a free slot for |opcode| such that the resulting occupancy still
  /// has a format.
  pub fn find_slot(
    &self, catalog: &dyn SlotCatalog, opcode: Opcode,
  ) -> Option<SlotKind> {
    for slot in catalog.slot_alternatives(opcode) {
      let bit = slot_bit(*slot);
      if self.occupied & bit != 0 {
        continue;
      }
      if catalog.get_format(self.occupied | bit).is_some() {
        return Some(*slot);
      }
    }
    None
  }

  pub fn can_add(&self, catalog: &dyn SlotCatalog, opcode: Opcode) -> bool {
    if catalog.is_meta(opcode) {
      return true;
    }
    if self.is_empty() {
      return true;
    }
    if self.is_standalone() {
      return false;
    }
    if !catalog.is_supported_instruction(opcode) {
      return false;
    }
    self.find_slot(catalog, opcode).is_some()
  }

  /// Add |instr|.  The caller must have checked |can_add|.
  pub fn add(&mut self, catalog: &dyn SlotCatalog, instr: I, opcode: Opcode) {
    assert!(self.can_add(catalog, opcode), "Bundle::add: illegal addition");
    if catalog.is_meta(opcode) {
      self.meta.push((instr, opcode));
      return;
    }
    if !catalog.is_supported_instruction(opcode) {
      debug_assert!(self.is_empty());
      self.standalone = Some((instr, opcode));
      return;
    }
    // An empty bundle accepts anything, but we still need a slot with a
    // format for it.
    let slot = match self.find_slot(catalog, opcode) {
      Some(slot) => slot,
      None => panic!("Bundle::add: no format holds {:?}", opcode),
    };
    self.put(slot, instr, opcode);
  }

  /// Put |instr| in a specific slot.  Used when regrouping encoded
  /// instructions whose slot is already decided.
  pub fn add_in_slot(&mut self, slot: SlotKind, instr: I, opcode: Opcode) {
    assert!(!self.is_standalone());
    assert!(self.at(slot).is_none(), "Bundle::add_in_slot: slot is taken");
    self.put(slot, instr, opcode);
  }

  fn put(&mut self, slot: SlotKind, instr: I, opcode: Opcode) {
    let ix = slot.get() as usize;
    debug_assert!(ix < MAX_SLOTS);
    if self.slots.len() <= ix {
      self.slots.resize(ix + 1, None);
    }
    self.slots[ix] = Some((instr, opcode));
    self.occupied |= slot_bit(slot);
    self.order.push(ix as u8);
    self.check_consistency();
  }

  pub fn clear(&mut self) {
    self.slots.clear();
    self.occupied = 0;
    self.order.clear();
    self.standalone = None;
    self.meta.clear();
  }

  /// The smallest format holding the occupied slots.  A standalone bundle
  /// has no format.
  pub fn format<'c>(
    &self, catalog: &'c dyn SlotCatalog,
  ) -> Option<&'c VliwFormat> {
    if self.is_standalone() {
      return None;
    }
    catalog.get_format(self.occupied_slots())
  }

  /// The format of exactly |size| bytes holding the occupied slots.
  pub fn format_of_size<'c>(
    &self, catalog: &'c dyn SlotCatalog, size: u32,
  ) -> Option<&'c VliwFormat> {
    if self.is_standalone() {
      return None;
    }
    catalog.get_format_by_size(self.occupied_slots(), size)
  }

  /// Is every slot of the selected format filled by that slot's no-op?
  pub fn is_nop_bundle(&self, catalog: &dyn SlotCatalog) -> bool {
    let format = match self.format(catalog) {
      Some(f) => f,
      None => return false,
    };
    format.slots.iter().all(|slot| match self.opcode_at(*slot) {
      Some(op) => op == catalog.slot_info(*slot).nop_opcode,
      None => false,
    })
  }

  #[inline(always)]
  fn check_consistency(&self) {
    debug_assert!(
      self.occupied.count_ones() as usize == self.order.len(),
      "Bundle: slot bitset out of sync with its members"
    );
    debug_assert!(self.standalone.is_none() || self.order.is_empty());
  }
}

#[cfg(test)]
pub(crate) mod test {
  use super::*;
  use crate::format::{FieldSign, PacketFormats, SlotInfo};

  // A tiny catalog: slots 0 (alu), 1 (ld), 2 (lng).  alu and lng never
  // appear together in a format.  Opcode 10 has no slot, 11 is meta, 12 may
  // go in either alu or ld.  The lng-only formats come in a signed and an
  // unsigned flavour, and opcodes 13 and 14 ask for one of them.
  pub(crate) struct TinyCatalog {
    infos: Vec<SlotInfo>,
    formats: PacketFormats,
    alu: [SlotKind; 1],
    ld: [SlotKind; 1],
    lng: [SlotKind; 1],
    either: [SlotKind; 2],
  }

  pub(crate) const ALU_OP: Opcode = Opcode(1);
  pub(crate) const LD_OP: Opcode = Opcode(2);
  pub(crate) const LNG_OP: Opcode = Opcode(3);
  pub(crate) const NOP_ALU: Opcode = Opcode(4);
  pub(crate) const NOP_LD: Opcode = Opcode(5);
  pub(crate) const NOP_LNG: Opcode = Opcode(6);
  pub(crate) const CALL_OP: Opcode = Opcode(10);
  pub(crate) const META_OP: Opcode = Opcode(11);
  pub(crate) const EITHER_OP: Opcode = Opcode(12);
  pub(crate) const LNG_S_OP: Opcode = Opcode(13);
  pub(crate) const LNG_U_OP: Opcode = Opcode(14);
  pub(crate) const BUNDLE_OP: Opcode = Opcode(99);

  impl TinyCatalog {
    pub(crate) fn new() -> Self {
      let (a, l, x) = (SlotKind::new(0), SlotKind::new(1), SlotKind::new(2));
      Self {
        infos: vec![
          SlotInfo::new(a, "alu", 16, NOP_ALU),
          SlotInfo::new(l, "ld", 16, NOP_LD),
          SlotInfo::new(x, "lng", 32, NOP_LNG),
        ],
        formats: PacketFormats::new(vec![
          VliwFormat::new(Opcode(100), "A", &[a], 2, FieldSign::Neutral),
          VliwFormat::new(Opcode(101), "L", &[l], 4, FieldSign::Neutral),
          VliwFormat::new(Opcode(102), "AL", &[l, a], 6, FieldSign::Neutral),
          VliwFormat::new(Opcode(103), "XS", &[x], 6, FieldSign::Signed),
          VliwFormat::new(Opcode(106), "XU", &[x], 6, FieldSign::Unsigned),
          VliwFormat::new(Opcode(104), "LX", &[x, l], 8, FieldSign::Neutral),
          VliwFormat::new(Opcode(105), "AL16", &[a, l], 16, FieldSign::Neutral),
        ]),
        alu: [a],
        ld: [l],
        lng: [x],
        either: [a, l],
      }
    }
  }

  impl SlotCatalog for TinyCatalog {
    fn num_slots(&self) -> usize {
      3
    }
    fn slot_alternatives(&self, opcode: Opcode) -> &[SlotKind] {
      match opcode {
        ALU_OP | NOP_ALU => &self.alu,
        LD_OP | NOP_LD => &self.ld,
        LNG_OP | LNG_S_OP | LNG_U_OP | NOP_LNG => &self.lng,
        EITHER_OP => &self.either,
        _ => &[],
      }
    }
    fn slot_info(&self, slot: SlotKind) -> &SlotInfo {
      &self.infos[slot.get() as usize]
    }
    fn formats(&self) -> &PacketFormats {
      &self.formats
    }
    fn is_meta(&self, opcode: Opcode) -> bool {
      opcode == META_OP
    }
    fn bundle_opcode(&self) -> Opcode {
      BUNDLE_OP
    }
    fn standalone_size(&self, _opcode: Opcode) -> u32 {
      4
    }
    fn sign_hint(&self, opcode: Opcode) -> Option<FieldSign> {
      match opcode {
        LNG_S_OP => Some(FieldSign::Signed),
        LNG_U_OP => Some(FieldSign::Unsigned),
        _ => None,
      }
    }
    fn alignment(&self) -> u32 {
      16
    }
  }

  #[test]
  fn add_and_query() {
    let cat = TinyCatalog::new();
    let mut b = Bundle::<u32>::new();
    assert!(b.is_empty());
    assert!(b.can_add(&cat, LD_OP));
    b.add(&cat, 0, LD_OP);
    assert!(b.can_add(&cat, ALU_OP));
    b.add(&cat, 1, ALU_OP);
    assert_eq!(b.occupied_slots().count_ones() as usize, b.len());
    assert_eq!(b.at(SlotKind::new(0)), Some(&1));
    assert_eq!(b.format(&cat).unwrap().name, "AL");
    assert_eq!(b.format_of_size(&cat, 16).unwrap().name, "AL16");
    assert!(b.format_of_size(&cat, 8).is_none());
    // Same slot twice is refused.
    assert!(!b.can_add(&cat, ALU_OP));
    let v: Vec<u32> = b.instrs().into_iter().map(|(i, _)| i).collect();
    assert_eq!(v, vec![0, 1]);
  }

  #[test]
  fn mutually_exclusive_slots() {
    let cat = TinyCatalog::new();
    let mut b = Bundle::<u32>::new();
    b.add(&cat, 0, ALU_OP);
    // No format holds alu together with lng.
    assert!(!b.can_add(&cat, LNG_OP));
    let mut b2 = Bundle::<u32>::new();
    b2.add(&cat, 0, LNG_OP);
    assert!(!b2.can_add(&cat, ALU_OP));
    assert!(b2.can_add(&cat, LD_OP));
  }

  #[test]
  fn standalone_and_meta() {
    let cat = TinyCatalog::new();
    let mut b = Bundle::<u32>::new();
    b.add(&cat, 7, META_OP);
    assert!(b.is_empty());
    assert!(b.can_add(&cat, CALL_OP));
    b.add(&cat, 0, CALL_OP);
    assert!(b.is_standalone());
    assert_eq!(b.len(), 1);
    assert!(!b.can_add(&cat, ALU_OP));
    assert!(!b.can_add(&cat, CALL_OP));
    assert!(b.can_add(&cat, META_OP));
    assert!(b.format(&cat).is_none());
    assert_eq!(b.meta_instrs().count(), 1);
    b.clear();
    assert!(b.is_empty() && !b.is_standalone());
    // A slotless opcode can't join a non-empty bundle.
    b.add(&cat, 1, ALU_OP);
    assert!(!b.can_add(&cat, CALL_OP));
  }

  #[test]
  fn multi_slot_opcode_takes_free_alternative() {
    let cat = TinyCatalog::new();
    let mut b = Bundle::<u32>::new();
    b.add(&cat, 0, ALU_OP);
    assert!(b.can_add(&cat, EITHER_OP));
    b.add(&cat, 1, EITHER_OP);
    assert_eq!(b.at(SlotKind::new(1)), Some(&1));
    assert!(!b.can_add(&cat, EITHER_OP));
  }

  #[test]
  #[should_panic]
  fn add_without_can_add_panics() {
    let cat = TinyCatalog::new();
    let mut b = Bundle::<u32>::new();
    b.add(&cat, 0, ALU_OP);
    b.add(&cat, 1, LNG_OP);
  }

  #[test]
  fn nop_bundles() {
    let cat = TinyCatalog::new();
    let mut b = Bundle::<u32>::new();
    b.add_in_slot(SlotKind::new(0), 0, NOP_ALU);
    assert!(b.is_nop_bundle(&cat));
    b.add_in_slot(SlotKind::new(1), 1, LD_OP);
    assert!(!b.is_nop_bundle(&cat));
    // An empty bundle's format has unfilled slots.
    assert!(!Bundle::<u32>::new().is_nop_bundle(&cat));
  }

  #[test]
  fn popcount_matches_members() {
    let cat = TinyCatalog::new();
    let ops = [LD_OP, META_OP, EITHER_OP, META_OP, LNG_OP];
    let mut b = Bundle::<usize>::new();
    for (i, op) in ops.iter().enumerate() {
      if b.can_add(&cat, *op) {
        b.add(&cat, i, *op);
      }
      assert_eq!(b.occupied_slots().count_ones() as usize, b.len());
      if !b.is_standalone() {
        assert!(b.format(&cat).is_some());
      }
    }
  }
}
